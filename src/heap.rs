//! Object heap. Records are only ever appended, so a reference (the index a
//! record was allocated at) stays valid for the rest of the run.
use std::collections::HashMap;

use thiserror::Error;

/// Every reference an `i32` can hold has been handed out.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("heap exhausted after {len} objects")]
pub struct HeapExhausted {
    pub len: usize,
}

/// An object allocated by `new`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    pub class_name: String,
    pub fields: HashMap<String, i32>,
}

impl Object {
    fn new(class_name: &str) -> Self {
        Self {
            class_name: class_name.to_string(),
            fields: HashMap::new(),
        }
    }

    /// Reads a field; fields never written hold the JVM default of zero.
    pub fn field(&self, name: &str) -> i32 {
        self.fields.get(name).copied().unwrap_or(0)
    }

    pub fn set_field(&mut self, name: &str, value: i32) {
        self.fields.insert(name.to_string(), value);
    }
}

/// Append-only object store shared by every frame of a run.
#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<Object>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new record and returns its reference.
    pub fn alloc(&mut self, class_name: &str) -> Result<i32, HeapExhausted> {
        let reference = reference_at(self.objects.len())?;
        self.objects.push(Object::new(class_name));
        log::debug!("allocated {class_name} at heap reference {reference}");
        Ok(reference)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Returns the record for `reference`, `None` when it was never allocated.
    pub fn get(&self, reference: i32) -> Option<&Object> {
        usize::try_from(reference)
            .ok()
            .and_then(|index| self.objects.get(index))
    }

    pub fn get_mut(&mut self, reference: i32) -> Option<&mut Object> {
        usize::try_from(reference)
            .ok()
            .and_then(|index| self.objects.get_mut(index))
    }
}

/// Reference handed out for the record stored at `index`.
fn reference_at(index: usize) -> Result<i32, HeapExhausted> {
    i32::try_from(index).map_err(|_| HeapExhausted { len: index })
}
