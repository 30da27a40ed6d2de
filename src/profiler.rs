//! Method profiler for the interpreter. Every static call bumps the callee's
//! call counter; once a method has been entered `threshold` times it is
//! considered hot and handed to the JIT.
use crate::program::Method;

#[derive(Debug)]
pub struct Profiler {
    // Calls before a method is considered hot.
    threshold: u32,
}

impl Profiler {
    pub fn new(threshold: u32) -> Profiler {
        Profiler { threshold }
    }

    /// Records a call to `method` and returns whether it is now hot.
    pub fn count_entry(&self, method: &Method) -> bool {
        method.record_call() >= self.threshold
    }
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new(crate::config::JitConfig::default().threshold)
    }
}
