//! Functions used for the x86_64 target.
//!
//! Code follows the System V AMD64 ABI: integer arguments 1 and 2 arrive in
//! `edi` and `esi`, the result leaves in `eax`. All three are caller-saved so
//! the generated functions need no prologue or epilogue.
use dynasmrt::x64::X64Relocation;
use dynasmrt::{dynasm, DynasmApi, VecAssembler};

use crate::jit::{ArgRegister, JitError, Lowered};

/// Register numbers as encoded in ModRM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Register {
    Rsi = 6,
    Rdi = 7,
}

fn register(r: ArgRegister) -> Register {
    match r {
        ArgRegister::A0 => Register::Rdi,
        ArgRegister::A1 => Register::Rsi,
    }
}

/// Lower the JIT's register program to x86-64 machine code.
pub fn assemble(program: &[Lowered]) -> Result<Vec<u8>, JitError> {
    let mut ops: VecAssembler<X64Relocation> = VecAssembler::new(0);
    for op in program {
        match *op {
            Lowered::Add { dst, src } => {
                let dst = register(dst) as u8;
                let src = register(src) as u8;
                dynasm!(ops
                    ; .arch x64
                    ; add Rd(dst), Rd(src)
                );
            }
            Lowered::Return { src } => {
                let src = register(src) as u8;
                dynasm!(ops
                    ; .arch x64
                    ; mov eax, Rd(src)
                    ; ret
                );
            }
        }
    }
    ops.finalize()
        .map_err(|err| JitError::Assembler(format!("{err:?}")))
}
