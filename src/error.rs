//! Top-level error type used by the driver.
use thiserror::Error;

use crate::jvm::ClassFileError;
use crate::program::ProgramError;
use crate::runtime::RuntimeError;

/// Anything that can stop a run, from reading the class file to executing it.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to load class file: {0}")]
    Load(#[from] ClassFileError),

    #[error("invalid program: {0}")]
    Program(#[from] ProgramError),

    #[error("execution fault: {0}")]
    Runtime(#[from] RuntimeError),
}

impl Error {
    /// Process exit status: 1 when the program could not be loaded or has no
    /// entry point, 2 when it faulted while running.
    pub fn exit_status(&self) -> u8 {
        match self {
            Self::Load(_) | Self::Program(_) => 1,
            Self::Runtime(RuntimeError::Descriptor(ProgramError::MissingMain)) => 1,
            Self::Runtime(_) => 2,
        }
    }
}
