//! Helpers for assembling programs in tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;

use coldbrew::bytecode::OPCode;
use coldbrew::{CPInfo, ConstantPool, Method, Program, Runtime, RuntimeConfig};

/// Builds a constant pool, sharing Utf8 entries between references.
#[derive(Default)]
pub struct PoolBuilder {
    pool: ConstantPool,
    utf8: HashMap<String, u16>,
}

impl PoolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn utf8(&mut self, text: &str) -> u16 {
        if let Some(index) = self.utf8.get(text) {
            return *index;
        }
        let index = self
            .pool
            .push(CPInfo::ConstantUtf8 {
                bytes: text.to_string(),
            })
            .unwrap();
        self.utf8.insert(text.to_string(), index);
        index
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        self.pool.push(CPInfo::ConstantClass { name_index }).unwrap()
    }

    pub fn string(&mut self, text: &str) -> u16 {
        let string_index = self.utf8(text);
        self.pool.push(CPInfo::ConstantString { string_index }).unwrap()
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        self.pool.push(CPInfo::ConstantInteger { value }).unwrap()
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.pool.push(CPInfo::ConstantNameAndType {
            name_index,
            descriptor_index,
        })
        .unwrap()
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(class);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.pool.push(CPInfo::ConstantMethodRef {
            class_index,
            name_and_type_index,
        })
        .unwrap()
    }

    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(class);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.pool.push(CPInfo::ConstantFieldRef {
            class_index,
            name_and_type_index,
        })
        .unwrap()
    }

    /// `System.out` and its `println` overloads.
    pub fn system_out(&mut self) -> SystemOut {
        SystemOut {
            out: self.field_ref("java/lang/System", "out", "Ljava/io/PrintStream;"),
            println_int: self.method_ref("java/io/PrintStream", "println", "(I)V"),
            println_string: self.method_ref(
                "java/io/PrintStream",
                "println",
                "(Ljava/lang/String;)V",
            ),
        }
    }

    pub fn build(self) -> ConstantPool {
        self.pool
    }
}

pub struct SystemOut {
    pub out: u16,
    pub println_int: u16,
    pub println_string: u16,
}

/// Bytecode assembler.
#[derive(Default)]
pub struct Asm(Vec<u8>);

impl Asm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op(mut self, op: OPCode) -> Self {
        self.0.push(op.byte());
        self
    }

    pub fn u1(mut self, byte: u8) -> Self {
        self.0.push(byte);
        self
    }

    pub fn i1(self, value: i8) -> Self {
        self.u1(value as u8)
    }

    pub fn u2(mut self, value: u16) -> Self {
        self.0.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn i2(self, value: i16) -> Self {
        self.u2(value as u16)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn finish(self) -> Vec<u8> {
        self.0
    }
}

pub fn method(name: &str, descriptor: &str, code: Vec<u8>, max_locals: u16) -> Method {
    Method::new(name, descriptor, code, 8, max_locals).unwrap()
}

/// Output sink tests can read back after the runtime wrote to it.
#[derive(Clone, Default)]
pub struct SharedOutput(Rc<RefCell<Vec<u8>>>);

impl SharedOutput {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).unwrap()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn runtime(pool: ConstantPool, methods: Vec<Method>, config: RuntimeConfig) -> (Runtime, SharedOutput) {
    let output = SharedOutput::default();
    let program = Program::new(pool, methods).unwrap();
    let runtime = Runtime::with_output(program, config, Box::new(output.clone()));
    (runtime, output)
}

/// `iload_0; iload_1; iadd; ireturn`
pub fn add_code() -> Vec<u8> {
    Asm::new()
        .op(OPCode::ILoad0)
        .op(OPCode::ILoad1)
        .op(OPCode::IAdd)
        .op(OPCode::IReturn)
        .finish()
}
