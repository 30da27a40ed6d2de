//! Lightweight implementation of a parser and decoder for JVM bytecode
//! class files.
//!
//! Only what the runtime needs survives decoding: the constant pool and,
//! for every method carrying a `Code` attribute, its name, descriptor,
//! bytecode and frame sizes. Fields and every other attribute are skipped.
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};
use thiserror::Error;

use crate::constant_pool::{CPInfo, ConstantPool, PoolFull};

const MAGIC: u32 = 0xCAFE_BABE;

const CONSTANT_UTF8: u8 = 1;
const CONSTANT_INTEGER: u8 = 3;
const CONSTANT_FLOAT: u8 = 4;
const CONSTANT_LONG: u8 = 5;
const CONSTANT_DOUBLE: u8 = 6;
const CONSTANT_CLASS: u8 = 7;
const CONSTANT_STRING: u8 = 8;
const CONSTANT_FIELDREF: u8 = 9;
const CONSTANT_METHODREF: u8 = 10;
const CONSTANT_INTERFACE_METHODREF: u8 = 11;
const CONSTANT_NAME_AND_TYPE: u8 = 12;
const CONSTANT_METHOD_HANDLE: u8 = 15;
const CONSTANT_METHOD_TYPE: u8 = 16;
const CONSTANT_DYNAMIC: u8 = 17;
const CONSTANT_INVOKE_DYNAMIC: u8 = 18;
const CONSTANT_MODULE: u8 = 19;
const CONSTANT_PACKAGE: u8 = 20;

/// Errors raised while decoding a class file.
#[derive(Error, Debug)]
pub enum ClassFileError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid magic number {0:#010x}")]
    BadMagic(u32),

    #[error("class file ends unexpectedly")]
    Truncated,

    #[error("unknown constant pool tag {tag} at index {index}")]
    UnknownTag { tag: u8, index: u16 },

    #[error("constant pool entry {0} is not valid UTF-8")]
    InvalidUtf8(u16),

    #[error("constant pool index {0} does not name a Utf8 entry")]
    BadNameIndex(u16),

    #[error(transparent)]
    PoolFull(#[from] PoolFull),
}

/// A method as declared in the class file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub access_flags: u16,
    pub name: String,
    pub descriptor: String,
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
}

/// Decoded class file.
#[derive(Debug, Clone)]
pub struct JVMClassFile {
    minor_version: u16,
    major_version: u16,
    constant_pool: ConstantPool,
    this_class: u16,
    methods: Vec<MethodInfo>,
}

impl JVMClassFile {
    pub fn version(&self) -> (u16, u16) {
        (self.major_version, self.minor_version)
    }

    pub fn constant_pool(&self) -> &ConstantPool {
        &self.constant_pool
    }

    /// Name of the class declared by this file.
    pub fn class_name(&self) -> Option<&str> {
        self.constant_pool.class_name(self.this_class).ok()
    }

    /// Methods that carry bytecode.
    pub fn methods(&self) -> &[MethodInfo] {
        &self.methods
    }
}

/// Reads the whole class file at `path`.
pub fn read_class_file(path: &Path) -> Result<Vec<u8>, ClassFileError> {
    let mut f = File::open(path)?;
    let mut buffer = Vec::new();
    f.read_to_end(&mut buffer)?;
    Ok(buffer)
}

/// `JVMParser` decodes class file bytes into a `JVMClassFile`.
pub struct JVMParser<'a> {
    reader: Cursor<&'a [u8]>,
}

impl<'a> JVMParser<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<JVMClassFile, ClassFileError> {
        let mut parser = Self {
            reader: Cursor::new(bytes),
        };
        parser.class_file()
    }

    fn class_file(&mut self) -> Result<JVMClassFile, ClassFileError> {
        let magic = self.u4()?;
        if magic != MAGIC {
            return Err(ClassFileError::BadMagic(magic));
        }
        let minor_version = self.u2()?;
        let major_version = self.u2()?;
        let constant_pool = self.constant_pool()?;

        // access_flags
        self.skip(2)?;
        let this_class = self.u2()?;
        // super_class
        self.skip(2)?;

        let interfaces_count = self.u2()?;
        for _ in 0..interfaces_count {
            self.u2()?;
        }

        let fields_count = self.u2()?;
        for _ in 0..fields_count {
            // access_flags, name_index, descriptor_index
            self.skip(6)?;
            self.skip_attributes()?;
        }

        let methods_count = self.u2()?;
        let mut methods = Vec::with_capacity(methods_count as usize);
        for _ in 0..methods_count {
            if let Some(method) = self.method(&constant_pool)? {
                methods.push(method);
            }
        }

        self.skip_attributes()?;

        log::debug!(
            "parsed class file v{major_version}.{minor_version}: {} constants, {} methods",
            constant_pool.len(),
            methods.len()
        );

        Ok(JVMClassFile {
            minor_version,
            major_version,
            constant_pool,
            this_class,
            methods,
        })
    }

    fn constant_pool(&mut self) -> Result<ConstantPool, ClassFileError> {
        let count = self.u2()?;
        let mut pool = ConstantPool::new();
        let mut index = 1u16;
        while index < count {
            let tag = self.u1()?;
            let entry = match tag {
                CONSTANT_UTF8 => {
                    let length = self.u2()? as usize;
                    let bytes = self.bytes(length)?;
                    let text = String::from_utf8(bytes)
                        .map_err(|_| ClassFileError::InvalidUtf8(index))?;
                    CPInfo::ConstantUtf8 { bytes: text }
                }
                CONSTANT_INTEGER => CPInfo::ConstantInteger {
                    value: self.reader.read_i32::<BigEndian>().map_err(eof)?,
                },
                CONSTANT_CLASS => CPInfo::ConstantClass {
                    name_index: self.u2()?,
                },
                CONSTANT_STRING => CPInfo::ConstantString {
                    string_index: self.u2()?,
                },
                CONSTANT_FIELDREF => CPInfo::ConstantFieldRef {
                    class_index: self.u2()?,
                    name_and_type_index: self.u2()?,
                },
                CONSTANT_METHODREF => CPInfo::ConstantMethodRef {
                    class_index: self.u2()?,
                    name_and_type_index: self.u2()?,
                },
                CONSTANT_NAME_AND_TYPE => CPInfo::ConstantNameAndType {
                    name_index: self.u2()?,
                    descriptor_index: self.u2()?,
                },
                CONSTANT_LONG | CONSTANT_DOUBLE => {
                    self.skip(8)?;
                    pool.push(CPInfo::Unsupported { tag })?;
                    index += 1;
                    CPInfo::Reserved
                }
                CONSTANT_FLOAT
                | CONSTANT_INTERFACE_METHODREF
                | CONSTANT_DYNAMIC
                | CONSTANT_INVOKE_DYNAMIC => {
                    self.skip(4)?;
                    CPInfo::Unsupported { tag }
                }
                CONSTANT_METHOD_HANDLE => {
                    self.skip(3)?;
                    CPInfo::Unsupported { tag }
                }
                CONSTANT_METHOD_TYPE | CONSTANT_MODULE | CONSTANT_PACKAGE => {
                    self.skip(2)?;
                    CPInfo::Unsupported { tag }
                }
                _ => return Err(ClassFileError::UnknownTag { tag, index }),
            };
            pool.push(entry)?;
            index += 1;
        }
        Ok(pool)
    }

    /// Decodes one method, returning `None` for methods without a `Code`
    /// attribute (abstract and native ones).
    fn method(
        &mut self,
        pool: &ConstantPool,
    ) -> Result<Option<MethodInfo>, ClassFileError> {
        let access_flags = self.u2()?;
        let name_index = self.u2()?;
        let descriptor_index = self.u2()?;
        let name = utf8(pool, name_index)?;
        let descriptor = utf8(pool, descriptor_index)?;

        let mut code_attribute = None;
        let attributes_count = self.u2()?;
        for _ in 0..attributes_count {
            let attribute_name_index = self.u2()?;
            let length = self.u4()? as usize;
            if utf8(pool, attribute_name_index)? != "Code" {
                self.skip(length)?;
                continue;
            }
            let max_stack = self.u2()?;
            let max_locals = self.u2()?;
            let code_length = self.u4()? as usize;
            let code = self.bytes(code_length)?;
            let exception_table_length = self.u2()? as usize;
            self.skip(exception_table_length * 8)?;
            self.skip_attributes()?;
            code_attribute = Some((max_stack, max_locals, code));
        }

        match code_attribute {
            Some((max_stack, max_locals, code)) => Ok(Some(MethodInfo {
                access_flags,
                name,
                descriptor,
                max_stack,
                max_locals,
                code,
            })),
            None => {
                log::debug!("skipping method {name}{descriptor}: no Code attribute");
                Ok(None)
            }
        }
    }

    fn skip_attributes(&mut self) -> Result<(), ClassFileError> {
        let count = self.u2()?;
        for _ in 0..count {
            self.u2()?;
            let length = self.u4()? as usize;
            self.skip(length)?;
        }
        Ok(())
    }

    fn u1(&mut self) -> Result<u8, ClassFileError> {
        self.reader.read_u8().map_err(eof)
    }

    fn u2(&mut self) -> Result<u16, ClassFileError> {
        self.reader.read_u16::<BigEndian>().map_err(eof)
    }

    fn u4(&mut self) -> Result<u32, ClassFileError> {
        self.reader.read_u32::<BigEndian>().map_err(eof)
    }

    fn bytes(&mut self, length: usize) -> Result<Vec<u8>, ClassFileError> {
        let mut buffer = vec![0u8; length];
        self.reader.read_exact(&mut buffer).map_err(eof)?;
        Ok(buffer)
    }

    fn skip(&mut self, length: usize) -> Result<(), ClassFileError> {
        let remaining = self.reader.get_ref().len() as u64 - self.reader.position();
        if (length as u64) > remaining {
            return Err(ClassFileError::Truncated);
        }
        self.reader.set_position(self.reader.position() + length as u64);
        Ok(())
    }
}

fn utf8(pool: &ConstantPool, index: u16) -> Result<String, ClassFileError> {
    pool.utf8(index)
        .map(str::to_string)
        .map_err(|_| ClassFileError::BadNameIndex(index))
}

fn eof(err: io::Error) -> ClassFileError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        ClassFileError::Truncated
    } else {
        ClassFileError::Io(err)
    }
}
