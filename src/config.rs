//! Runtime configuration knobs.

/// Hot-method compilation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitConfig {
    /// When false every method is interpreted.
    pub enabled: bool,
    /// Number of calls after which a method is handed to the JIT.
    pub threshold: u32,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Deepest chain of interpreted frames allowed before the run is aborted
    /// with a call depth fault. Frames live on the host stack.
    pub max_call_depth: usize,
    pub jit: JitConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 256,
            jit: JitConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Configuration that never compiles anything.
    pub fn interpreter_only() -> Self {
        Self {
            jit: JitConfig {
                enabled: false,
                ..JitConfig::default()
            },
            ..Self::default()
        }
    }
}
