//! Constant pool of a loaded class and the typed resolver the interpreter
//! and the JIT go through whenever an opcode carries an index operand.
//!
//! Pools are 1-indexed: slot 0 is always `CPInfo::Reserved`, as is the
//! phantom slot that follows every long or double constant.
use std::fmt;

use thiserror::Error;

/// Constant pool entries as decoded from the class file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CPInfo {
    ConstantUtf8 {
        bytes: String,
    },
    ConstantInteger {
        value: i32,
    },
    ConstantClass {
        name_index: u16,
    },
    ConstantString {
        string_index: u16,
    },
    ConstantFieldRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    ConstantMethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    ConstantNameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    /// Unusable slot (index 0, second half of a long or double).
    Reserved,
    /// Well-formed entry of a kind the runtime doesn't model.
    Unsupported {
        tag: u8,
    },
}

/// Discriminant of a `CPInfo`, used to state what a caller expected.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Tag {
    Utf8,
    Integer,
    Class,
    String,
    FieldRef,
    MethodRef,
    NameAndType,
    Reserved,
    Unsupported,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Utf8 => "Utf8",
            Self::Integer => "Integer",
            Self::Class => "Class",
            Self::String => "String",
            Self::FieldRef => "Fieldref",
            Self::MethodRef => "Methodref",
            Self::NameAndType => "NameAndType",
            Self::Reserved => "reserved slot",
            Self::Unsupported => "unsupported entry",
        };
        f.write_str(name)
    }
}

impl CPInfo {
    /// Returns the tag of this entry.
    pub fn tag(&self) -> Tag {
        match self {
            Self::ConstantUtf8 { .. } => Tag::Utf8,
            Self::ConstantInteger { .. } => Tag::Integer,
            Self::ConstantClass { .. } => Tag::Class,
            Self::ConstantString { .. } => Tag::String,
            Self::ConstantFieldRef { .. } => Tag::FieldRef,
            Self::ConstantMethodRef { .. } => Tag::MethodRef,
            Self::ConstantNameAndType { .. } => Tag::NameAndType,
            Self::Reserved => Tag::Reserved,
            Self::Unsupported { .. } => Tag::Unsupported,
        }
    }
}

/// Failure to resolve a constant pool index to the expected kind of entry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("constant pool index #{index} out of range (pool length {len})")]
    IndexOutOfRange { index: u16, len: usize },

    #[error("constant pool entry #{index} is {found}, expected {expected}")]
    TagMismatch {
        index: u16,
        expected: Tag,
        found: Tag,
    },
}

/// The pool already holds every index a `u16` can address.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("constant pool is full ({len} slots)")]
pub struct PoolFull {
    pub len: usize,
}

/// A resolved field or method reference.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub class: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

/// Immutable 1-indexed table of constants shared by every method of a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantPool {
    entries: Vec<CPInfo>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    /// Creates a pool holding only the reserved slot 0.
    pub fn new() -> Self {
        Self {
            entries: vec![CPInfo::Reserved],
        }
    }

    /// Appends an entry and returns its index.
    pub fn push(&mut self, entry: CPInfo) -> Result<u16, PoolFull> {
        let index = u16::try_from(self.entries.len()).map_err(|_| PoolFull {
            len: self.entries.len(),
        })?;
        self.entries.push(entry);
        Ok(index)
    }

    /// Number of slots, including the reserved slot 0.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn entries(&self) -> &[CPInfo] {
        &self.entries
    }

    /// Returns the entry at `index` if it carries the `expected` tag.
    pub fn resolve(
        &self,
        index: u16,
        expected: Tag,
    ) -> Result<&CPInfo, ResolutionError> {
        let entry = self.entries.get(index as usize).ok_or(
            ResolutionError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            },
        )?;
        let found = entry.tag();
        if found != expected {
            return Err(ResolutionError::TagMismatch {
                index,
                expected,
                found,
            });
        }
        Ok(entry)
    }

    pub fn utf8(&self, index: u16) -> Result<&str, ResolutionError> {
        match self.resolve(index, Tag::Utf8)? {
            CPInfo::ConstantUtf8 { bytes } => Ok(bytes),
            other => Err(mismatch(index, Tag::Utf8, other)),
        }
    }

    pub fn integer(&self, index: u16) -> Result<i32, ResolutionError> {
        match self.resolve(index, Tag::Integer)? {
            CPInfo::ConstantInteger { value } => Ok(*value),
            other => Err(mismatch(index, Tag::Integer, other)),
        }
    }

    /// Class → Utf8.
    pub fn class_name(&self, index: u16) -> Result<&str, ResolutionError> {
        match self.resolve(index, Tag::Class)? {
            CPInfo::ConstantClass { name_index } => self.utf8(*name_index),
            other => Err(mismatch(index, Tag::Class, other)),
        }
    }

    /// String → Utf8.
    pub fn string(&self, index: u16) -> Result<&str, ResolutionError> {
        match self.resolve(index, Tag::String)? {
            CPInfo::ConstantString { string_index } => self.utf8(*string_index),
            other => Err(mismatch(index, Tag::String, other)),
        }
    }

    /// NameAndType → (Utf8 name, Utf8 descriptor).
    pub fn name_and_type(
        &self,
        index: u16,
    ) -> Result<(&str, &str), ResolutionError> {
        match self.resolve(index, Tag::NameAndType)? {
            CPInfo::ConstantNameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            other => Err(mismatch(index, Tag::NameAndType, other)),
        }
    }

    /// Methodref → Class + NameAndType.
    pub fn method_ref(&self, index: u16) -> Result<MemberRef<'_>, ResolutionError> {
        match self.resolve(index, Tag::MethodRef)? {
            CPInfo::ConstantMethodRef {
                class_index,
                name_and_type_index,
            } => self.member(*class_index, *name_and_type_index),
            other => Err(mismatch(index, Tag::MethodRef, other)),
        }
    }

    /// Fieldref → Class + NameAndType.
    pub fn field_ref(&self, index: u16) -> Result<MemberRef<'_>, ResolutionError> {
        match self.resolve(index, Tag::FieldRef)? {
            CPInfo::ConstantFieldRef {
                class_index,
                name_and_type_index,
            } => self.member(*class_index, *name_and_type_index),
            other => Err(mismatch(index, Tag::FieldRef, other)),
        }
    }

    fn member(
        &self,
        class_index: u16,
        name_and_type_index: u16,
    ) -> Result<MemberRef<'_>, ResolutionError> {
        let class = self.class_name(class_index)?;
        let (name, descriptor) = self.name_and_type(name_and_type_index)?;
        Ok(MemberRef {
            class,
            name,
            descriptor,
        })
    }
}

/// Entries are pushed starting at index 1.
impl FromIterator<CPInfo> for ConstantPool {
    fn from_iter<I: IntoIterator<Item = CPInfo>>(iter: I) -> Self {
        let mut pool = Self::new();
        pool.entries.extend(iter);
        pool
    }
}

fn mismatch(index: u16, expected: Tag, found: &CPInfo) -> ResolutionError {
    ResolutionError::TagMismatch {
        index,
        expected,
        found: found.tag(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf8(s: &str) -> CPInfo {
        CPInfo::ConstantUtf8 {
            bytes: s.to_string(),
        }
    }

    fn sample_pool() -> ConstantPool {
        [
            utf8("Point"),                                   // #1
            CPInfo::ConstantClass { name_index: 1 },         // #2
            utf8("add"),                                     // #3
            utf8("(II)I"),                                   // #4
            CPInfo::ConstantNameAndType {
                name_index: 3,
                descriptor_index: 4,
            }, // #5
            CPInfo::ConstantMethodRef {
                class_index: 2,
                name_and_type_index: 5,
            }, // #6
            utf8("Hello"),                                   // #7
            CPInfo::ConstantString { string_index: 7 },      // #8
            CPInfo::ConstantInteger { value: 100_000 },      // #9
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn resolves_method_ref_chain() {
        let pool = sample_pool();
        let method = pool.method_ref(6).unwrap();
        assert_eq!(method.class, "Point");
        assert_eq!(method.name, "add");
        assert_eq!(method.descriptor, "(II)I");
    }

    #[test]
    fn resolves_literals() {
        let pool = sample_pool();
        assert_eq!(pool.string(8).unwrap(), "Hello");
        assert_eq!(pool.integer(9).unwrap(), 100_000);
        assert_eq!(pool.class_name(2).unwrap(), "Point");
    }

    #[test]
    fn index_zero_is_reserved() {
        let pool = sample_pool();
        assert_eq!(
            pool.utf8(0),
            Err(ResolutionError::TagMismatch {
                index: 0,
                expected: Tag::Utf8,
                found: Tag::Reserved,
            })
        );
    }

    #[test]
    fn out_of_range_index_fails() {
        let pool = sample_pool();
        assert_eq!(
            pool.resolve(10, Tag::Utf8),
            Err(ResolutionError::IndexOutOfRange { index: 10, len: 10 })
        );
    }

    #[test]
    fn wrong_tag_is_reported_not_reinterpreted() {
        let pool = sample_pool();
        assert_eq!(
            pool.utf8(6),
            Err(ResolutionError::TagMismatch {
                index: 6,
                expected: Tag::Utf8,
                found: Tag::MethodRef,
            })
        );
        // A method reference is not a field reference.
        assert!(matches!(
            pool.field_ref(6),
            Err(ResolutionError::TagMismatch {
                expected: Tag::FieldRef,
                ..
            })
        ));
    }

    #[test]
    fn broken_hop_fails_the_chain() {
        let mut pool = sample_pool();
        // NameAndType whose name points at a Class entry.
        let bad_nt = pool.push(CPInfo::ConstantNameAndType {
            name_index: 2,
            descriptor_index: 4,
        })
        .unwrap();
        let bad_ref = pool
            .push(CPInfo::ConstantMethodRef {
                class_index: 2,
                name_and_type_index: bad_nt,
            })
            .unwrap();
        assert_eq!(
            pool.method_ref(bad_ref),
            Err(ResolutionError::TagMismatch {
                index: 2,
                expected: Tag::Utf8,
                found: Tag::Class,
            })
        );
    }

    #[test]
    fn push_stops_at_the_last_addressable_index() {
        let mut pool: ConstantPool = std::iter::repeat(CPInfo::Reserved)
            .take(usize::from(u16::MAX) - 1)
            .collect();
        assert_eq!(pool.push(CPInfo::Reserved), Ok(u16::MAX));
        assert_eq!(
            pool.push(CPInfo::Reserved),
            Err(PoolFull {
                len: usize::from(u16::MAX) + 1
            })
        );
        assert_eq!(pool.len(), usize::from(u16::MAX) + 1);
    }
}
