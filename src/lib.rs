//! coldbrew: a small JVM that interprets class file bytecode on a stack
//! machine and compiles hot, simple methods to native code.
pub mod arm64;
pub mod bytecode;
pub mod config;
pub mod constant_pool;
pub mod error;
pub mod executable;
pub mod heap;
pub mod jit;
pub mod jvm;
pub mod profiler;
pub mod program;
pub mod runtime;
pub mod x86;

pub use config::{JitConfig, RuntimeConfig};
pub use constant_pool::{CPInfo, ConstantPool, PoolFull, ResolutionError, Tag};
pub use error::Error;
pub use jit::{Jit, JitError, NativeEntry};
pub use program::{Method, MethodId, Program, ProgramError};
pub use runtime::{Runtime, RuntimeError};
