//! Minimal ARM64 assembly module useful for doing ARM64 codegen.
//!
//! Every A64 instruction is a 32-bit little-endian word, so the encoders
//! below just fill register fields into fixed base patterns.
use crate::jit::{ArgRegister, Lowered};

/// `RET` (branch to x30).
pub const RET: u32 = 0xD65F_03C0;

/// Create a mask to extract n-bits of a given value from start.
pub fn mask(len: u32, start: u32) -> u32 {
    ((1 << len) - 1) << start
}

/// Place a register number into the 5-bit field starting at `start`.
fn reg(r: u8, start: u32) -> u32 {
    ((r as u32) << start) & mask(5, start)
}

/// `ADD Wd, Wn, Wm`
pub fn encode_add(rd: u8, rn: u8, rm: u8) -> u32 {
    0x0B00_0000 | reg(rm, 16) | reg(rn, 5) | reg(rd, 0)
}

/// `MOV Wd, Wm`, an alias of `ORR Wd, WZR, Wm`.
pub fn encode_mov(rd: u8, rm: u8) -> u32 {
    0x2A00_03E0 | reg(rm, 16) | reg(rd, 0)
}

/// AAPCS64 passes the first integer arguments in W0, W1, ... and returns in
/// W0, so argument register `n` is simply `Wn`.
fn w(r: ArgRegister) -> u8 {
    r.index()
}

/// Lower the JIT's register program to A64 machine code.
pub fn assemble(program: &[Lowered]) -> Vec<u8> {
    let mut words = Vec::with_capacity(program.len() + 1);
    for op in program {
        match *op {
            Lowered::Add { dst, src } => words.push(encode_add(w(dst), w(dst), w(src))),
            Lowered::Return { src } => {
                if w(src) != 0 {
                    words.push(encode_mov(0, w(src)));
                }
                words.push(RET);
            }
        }
    }
    words.iter().flat_map(|word| word.to_le_bytes()).collect()
}
