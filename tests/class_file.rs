mod common;

use coldbrew::bytecode::OPCode::*;
use coldbrew::jvm::{read_class_file, JVMParser};
use coldbrew::{CPInfo, ConstantPool, Program, Runtime, RuntimeConfig};

use common::{add_code, Asm, PoolBuilder, SharedOutput};

struct MethodSpec {
    name: u16,
    descriptor: u16,
    max_locals: u16,
    code: Vec<u8>,
}

fn u2(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn u4(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Serializes a constant pool and method table into class file bytes.
fn class_bytes(pool: &ConstantPool, this_class: u16, code_name: u16, methods: &[MethodSpec]) -> Vec<u8> {
    let mut out = Vec::new();
    u4(&mut out, 0xCAFE_BABE);
    u2(&mut out, 0);
    u2(&mut out, 52);
    u2(&mut out, pool.len() as u16);
    for entry in &pool.entries()[1..] {
        match entry {
            CPInfo::ConstantUtf8 { bytes } => {
                out.push(1);
                u2(&mut out, bytes.len() as u16);
                out.extend_from_slice(bytes.as_bytes());
            }
            CPInfo::ConstantInteger { value } => {
                out.push(3);
                u4(&mut out, *value as u32);
            }
            CPInfo::ConstantClass { name_index } => {
                out.push(7);
                u2(&mut out, *name_index);
            }
            CPInfo::ConstantString { string_index } => {
                out.push(8);
                u2(&mut out, *string_index);
            }
            CPInfo::ConstantFieldRef {
                class_index,
                name_and_type_index,
            } => {
                out.push(9);
                u2(&mut out, *class_index);
                u2(&mut out, *name_and_type_index);
            }
            CPInfo::ConstantMethodRef {
                class_index,
                name_and_type_index,
            } => {
                out.push(10);
                u2(&mut out, *class_index);
                u2(&mut out, *name_and_type_index);
            }
            CPInfo::ConstantNameAndType {
                name_index,
                descriptor_index,
            } => {
                out.push(12);
                u2(&mut out, *name_index);
                u2(&mut out, *descriptor_index);
            }
            other => panic!("cannot serialize {other:?}"),
        }
    }
    // access flags, this, super, interfaces, fields
    u2(&mut out, 0x0021);
    u2(&mut out, this_class);
    u2(&mut out, 0);
    u2(&mut out, 0);
    u2(&mut out, 0);
    u2(&mut out, methods.len() as u16);
    for method in methods {
        u2(&mut out, 0x0009);
        u2(&mut out, method.name);
        u2(&mut out, method.descriptor);
        u2(&mut out, 1);
        u2(&mut out, code_name);
        u4(&mut out, 12 + method.code.len() as u32);
        u2(&mut out, 8);
        u2(&mut out, method.max_locals);
        u4(&mut out, method.code.len() as u32);
        out.extend_from_slice(&method.code);
        // exception table, attributes
        u2(&mut out, 0);
        u2(&mut out, 0);
    }
    // class attributes
    u2(&mut out, 0);
    out
}

fn add_test_class() -> Vec<u8> {
    let mut pool = PoolBuilder::new();
    let this_class = pool.class("AddTest");
    let code_name = pool.utf8("Code");
    let add = pool.method_ref("AddTest", "add", "(II)I");
    let out = pool.system_out();
    let main_code = Asm::new()
        .op(GetStatic)
        .u2(out.out)
        .op(BiPush)
        .i1(10)
        .op(BiPush)
        .i1(20)
        .op(InvokeStatic)
        .u2(add)
        .op(InvokeVirtual)
        .u2(out.println_int)
        .op(Return)
        .finish();
    let methods = [
        MethodSpec {
            name: pool.utf8("add"),
            descriptor: pool.utf8("(II)I"),
            max_locals: 2,
            code: add_code(),
        },
        MethodSpec {
            name: pool.utf8("main"),
            descriptor: pool.utf8("([Ljava/lang/String;)V"),
            max_locals: 1,
            code: main_code,
        },
    ];
    class_bytes(&pool.build(), this_class, code_name, &methods)
}

#[test]
fn parsed_class_runs_end_to_end() {
    let bytes = add_test_class();
    let class_file = JVMParser::parse(&bytes).unwrap();
    assert_eq!(class_file.class_name(), Some("AddTest"));
    assert_eq!(class_file.methods().len(), 2);

    let program = Program::from_class_file(&class_file).unwrap();
    let output = SharedOutput::default();
    let mut rt = Runtime::with_output(program, RuntimeConfig::default(), Box::new(output.clone()));
    rt.run().unwrap();
    assert_eq!(output.contents(), "30\n");
}

#[test]
fn class_files_are_read_from_disk() {
    let path = std::env::temp_dir().join(format!("coldbrew-{}-AddTest.class", std::process::id()));
    std::fs::write(&path, add_test_class()).unwrap();
    let bytes = read_class_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(bytes, add_test_class());
    assert!(read_class_file(&path).is_err());
}

#[test]
fn truncated_class_file_is_rejected() {
    let bytes = add_test_class();
    assert!(JVMParser::parse(&bytes[..bytes.len() / 2]).is_err());
}
