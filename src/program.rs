//! Abstract representation of a Java program: the constant pool plus the
//! method table the runtime executes from.
use std::cell::{Cell, OnceCell};
use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::constant_pool::ConstantPool;
use crate::jit::NativeEntry;
use crate::jvm::JVMClassFile;

/// Descriptor of the conventional Java entry point.
pub const MAIN_DESCRIPTOR: &str = "([Ljava/lang/String;)V";

/// Errors raised while assembling a method table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProgramError {
    #[error("malformed method descriptor `{0}`")]
    InvalidDescriptor(String),

    #[error("method {name}{descriptor} is defined more than once")]
    DuplicateMethod { name: String, descriptor: String },

    #[error("method \"main\" was not found")]
    MissingMain,
}

/// Primitive types supported by the JVM.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BaseTypeKind {
    /// `int` and the types the JVM widens to it (`boolean`, `byte`, `char`,
    /// `short`).
    Int,
    Long,
    Float,
    Double,
    /// Objects and arrays.
    Reference,
    Void,
}

impl BaseTypeKind {
    /// Size in operand stack slots.
    pub const fn slots(self) -> usize {
        match self {
            Self::Int | Self::Float | Self::Reference => 1,
            Self::Long | Self::Double => 2,
            Self::Void => 0,
        }
    }
}

/// Parsed method descriptor, e.g. `(II)I`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub args: Vec<BaseTypeKind>,
    pub ret: BaseTypeKind,
}

impl MethodDescriptor {
    /// Parse a method descriptor into argument and return types.
    pub fn parse(descriptor: &str) -> Result<Self, ProgramError> {
        static SHAPE: OnceLock<Regex> = OnceLock::new();
        let invalid = || ProgramError::InvalidDescriptor(descriptor.to_string());

        let re = SHAPE.get_or_init(|| {
            Regex::new(r"^\(([^)]*)\)(.+)$").expect("descriptor regex is valid")
        });
        let caps = re.captures(descriptor).ok_or_else(invalid)?;
        let arg_string = caps.get(1).map_or("", |m| m.as_str());
        let return_string = caps.get(2).map_or("", |m| m.as_str());

        let mut args = Vec::new();
        let mut rest = arg_string;
        while !rest.is_empty() {
            let (t, length) = decode_type(rest).ok_or_else(invalid)?;
            args.push(t);
            rest = &rest[length..];
        }

        let ret = if return_string == "V" {
            BaseTypeKind::Void
        } else {
            match decode_type(return_string) {
                Some((t, length)) if length == return_string.len() => t,
                _ => return Err(invalid()),
            }
        };
        Ok(Self { args, ret })
    }

    /// Number of operand stack slots taken by the arguments.
    pub fn arg_slots(&self) -> usize {
        self.args.iter().map(|t| t.slots()).sum()
    }

    pub fn returns_value(&self) -> bool {
        self.ret != BaseTypeKind::Void
    }
}

/// Decodes one field type at the start of `s`, returning it together with
/// the length of its textual representation.
fn decode_type(s: &str) -> Option<(BaseTypeKind, usize)> {
    match s.as_bytes().first()? {
        b'B' | b'C' | b'I' | b'S' | b'Z' => Some((BaseTypeKind::Int, 1)),
        b'J' => Some((BaseTypeKind::Long, 1)),
        b'F' => Some((BaseTypeKind::Float, 1)),
        b'D' => Some((BaseTypeKind::Double, 1)),
        b'L' => {
            let end = s.find(';')?;
            (end > 1).then_some((BaseTypeKind::Reference, end + 1))
        }
        b'[' => {
            let (_, length) = decode_type(&s[1..])?;
            Some((BaseTypeKind::Reference, length + 1))
        }
        _ => None,
    }
}

/// Index of a method inside its `Program`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MethodId(usize);

/// Java class method representation for the interpreter.
///
/// The bytecode and its metadata never change once loaded; the call counter
/// and the compiled-code slot are runtime state owned by the table.
#[derive(Debug)]
pub struct Method {
    name: String,
    descriptor: String,
    signature: MethodDescriptor,
    code: Vec<u8>,
    max_stack: u16,
    max_locals: u16,
    call_count: Cell<u32>,
    // Filled at most once: `Some` with the installed native entry, `None`
    // when the JIT judged the method ineligible.
    compiled: OnceCell<Option<NativeEntry>>,
}

impl Method {
    pub fn new(
        name: &str,
        descriptor: &str,
        code: Vec<u8>,
        max_stack: u16,
        max_locals: u16,
    ) -> Result<Self, ProgramError> {
        Ok(Self {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            signature: MethodDescriptor::parse(descriptor)?,
            code,
            max_stack,
            max_locals,
            call_count: Cell::new(0),
            compiled: OnceCell::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn signature(&self) -> &MethodDescriptor {
        &self.signature
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn max_stack(&self) -> u16 {
        self.max_stack
    }

    pub fn max_locals(&self) -> u16 {
        self.max_locals
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.get()
    }

    /// Bumps the call counter and returns the new count.
    pub fn record_call(&self) -> u32 {
        let count = self.call_count.get().saturating_add(1);
        self.call_count.set(count);
        count
    }

    /// Native entry installed for this method, if any.
    pub fn native_entry(&self) -> Option<&NativeEntry> {
        self.compiled.get().and_then(Option::as_ref)
    }

    /// Whether the JIT already looked at this method.
    pub fn jit_attempted(&self) -> bool {
        self.compiled.get().is_some()
    }

    /// Runs `compile` the first time it's called and caches its outcome;
    /// later calls return the cached entry without compiling again.
    pub fn native_entry_or_compile<F>(&self, compile: F) -> Option<&NativeEntry>
    where
        F: FnOnce(&Method) -> Option<NativeEntry>,
    {
        self.compiled.get_or_init(|| compile(self)).as_ref()
    }
}

/// Representation of Java programs that we want to run.
#[derive(Debug)]
pub struct Program {
    pub constant_pool: ConstantPool,
    methods: Vec<Method>,
    index: HashMap<(String, String), MethodId>,
}

impl Program {
    /// Build a program from a ready constant pool and method table, rejecting
    /// tables that define the same `(name, descriptor)` twice.
    pub fn new(
        constant_pool: ConstantPool,
        methods: Vec<Method>,
    ) -> Result<Self, ProgramError> {
        let mut index = HashMap::with_capacity(methods.len());
        for (i, method) in methods.iter().enumerate() {
            let key = (method.name.clone(), method.descriptor.clone());
            if index.insert(key, MethodId(i)).is_some() {
                return Err(ProgramError::DuplicateMethod {
                    name: method.name.clone(),
                    descriptor: method.descriptor.clone(),
                });
            }
        }
        Ok(Self {
            constant_pool,
            methods,
            index,
        })
    }

    /// Build a new program from a parsed class file.
    pub fn from_class_file(
        class_file: &JVMClassFile,
    ) -> Result<Self, ProgramError> {
        let methods = class_file
            .methods()
            .iter()
            .map(|info| {
                Method::new(
                    &info.name,
                    &info.descriptor,
                    info.code.clone(),
                    info.max_stack,
                    info.max_locals,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(class_file.constant_pool().clone(), methods)
    }

    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<MethodId> {
        self.index
            .get(&(name.to_string(), descriptor.to_string()))
            .copied()
    }

    pub fn method(&self, id: MethodId) -> &Method {
        &self.methods[id.0]
    }

    /// Returns the program entry point: the void method named `main`, taking
    /// either the conventional `String[]` or nothing.
    pub fn entry_point(&self) -> Result<MethodId, ProgramError> {
        self.find_method("main", MAIN_DESCRIPTOR)
            .or_else(|| self.find_method("main", "()V"))
            .ok_or(ProgramError::MissingMain)
    }
}
