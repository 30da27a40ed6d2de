//! JIT compiler for coldbrew targeting x86_64 and aarch64.
//!
//! The JIT is a best-effort tier: it only handles methods whose bytecode
//! adds up integer arguments and returns the sum. Anything else is reported
//! as a `JitError` and the runtime keeps interpreting the method.
use thiserror::Error;

use crate::bytecode::OPCode;
use crate::executable::{ExecutableRegion, MemoryError};
use crate::program::{BaseTypeKind, Method};
use crate::{arm64, x86};

/// Reasons a method could not be turned into a native entry. None of them
/// are fatal to the run.
#[derive(Error, Debug)]
pub enum JitError {
    #[error("opcode {opcode:#04x} at pc {pc} is not compilable")]
    UnsupportedOpcode { opcode: u8, pc: usize },

    #[error("operand stack underflow at pc {pc}")]
    StackUnderflow { pc: usize },

    #[error("method has no bytecode")]
    EmptyMethod,

    #[error("method does not end in a return")]
    MissingReturn,

    #[error("result is not in the return register")]
    ResultNotInReturnRegister,

    #[error("argument register {index} no longer holds its argument at pc {pc}")]
    RegisterClobbered { index: u8, pc: usize },

    #[error("method loads argument {index} but takes {arity}")]
    MissingArgument { index: u8, arity: usize },

    #[error("signature {0} is not compilable")]
    UnsupportedSignature(String),

    #[error("no code generator for this target")]
    UnsupportedTarget,

    #[error("assembler error: {0}")]
    Assembler(String),

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Abstract argument registers: the n-th integer argument arrives in `An`,
/// and `A0` doubles as the return register. Back ends map these onto the
/// calling convention of their CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgRegister {
    A0,
    A1,
}

impl ArgRegister {
    pub const RETURN: ArgRegister = ArgRegister::A0;

    pub fn index(self) -> u8 {
        match self {
            Self::A0 => 0,
            Self::A1 => 1,
        }
    }
}

/// Register-level program produced by the eligibility scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lowered {
    /// `dst = dst + src`
    Add { dst: ArgRegister, src: ArgRegister },
    /// Return the value held in `src`.
    Return { src: ArgRegister },
}

/// Code generation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    X86_64,
    Aarch64,
}

impl Target {
    /// The CPU this process runs on, if we can generate code for it.
    pub fn host() -> Option<Target> {
        if cfg!(target_arch = "x86_64") {
            Some(Target::X86_64)
        } else if cfg!(target_arch = "aarch64") {
            Some(Target::Aarch64)
        } else {
            None
        }
    }
}

/// Native code entry point taking up to two `int` arguments and returning
/// an `int`, the C calling convention of the host.
type NativeFn = extern "C" fn(i32, i32) -> i32;

/// A compiled method installed in executable memory.
#[derive(Debug)]
pub struct NativeEntry {
    region: ExecutableRegion,
    arity: usize,
}

impl NativeEntry {
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Call the compiled method. Missing arguments are passed as zero and
    /// anything past the method's arity is ignored.
    pub fn call(&self, args: &[i32]) -> i32 {
        let arg = |i: usize| {
            if i < self.arity {
                args.get(i).copied().unwrap_or(0)
            } else {
                0
            }
        };
        // SAFETY: the region holds code generated by `Jit::try_compile` for
        // the host target, following the C ABI for `NativeFn`, and stays
        // mapped as long as `self` is alive.
        let execute: NativeFn = unsafe { std::mem::transmute(self.region.as_ptr()) };
        execute(arg(0), arg(1))
    }
}

/// `Jit` turns eligible methods into native entries.
///
/// Compilation works as follows :
/// 1. Check the method signature: at most two `int` arguments, `int` result.
/// 2. Scan the bytecode once, tracking on a shadow stack which argument
///    register holds each operand instead of the operand values.
/// 3. Lower every opcode to a `Lowered` register operation.
/// 4. Assemble the operations for the target.
/// 5. Install the machine code through `ExecutableRegion`.
///
/// Any step may bail out; the caller then keeps interpreting.
#[derive(Debug, Clone, Copy)]
pub struct Jit {
    target: Option<Target>,
}

impl Default for Jit {
    fn default() -> Self {
        Self::new()
    }
}

impl Jit {
    /// JIT generating code for the host CPU.
    pub fn new() -> Self {
        Self {
            target: Target::host(),
        }
    }

    /// JIT generating code for `target`. Only host-target code can be run.
    pub fn for_target(target: Target) -> Self {
        Self {
            target: Some(target),
        }
    }

    /// Compile `method` and install it, or report why it can't be compiled.
    pub fn try_compile(&self, method: &Method) -> Result<NativeEntry, JitError> {
        let code = self.compile(method)?;
        if self.target != Target::host() {
            return Err(JitError::UnsupportedTarget);
        }
        let region = ExecutableRegion::install(&code)?;
        log::info!(
            "jit compiled {}{} ({} bytes)",
            method.name(),
            method.descriptor(),
            region.code_len()
        );
        Ok(NativeEntry {
            region,
            arity: method.signature().args.len(),
        })
    }

    /// Produce machine code for `method` without installing it.
    pub fn compile(&self, method: &Method) -> Result<Vec<u8>, JitError> {
        let program = lower(method)?;
        match self.target {
            Some(Target::X86_64) => x86::assemble(&program),
            Some(Target::Aarch64) => Ok(arm64::assemble(&program)),
            None => Err(JitError::UnsupportedTarget),
        }
    }
}

/// Eligibility scan: lower `method` to register operations, or explain why
/// it falls outside the compilable subset.
pub fn lower(method: &Method) -> Result<Vec<Lowered>, JitError> {
    let signature = method.signature();
    if signature.ret != BaseTypeKind::Int
        || signature.args.len() > 2
        || signature.args.iter().any(|t| *t != BaseTypeKind::Int)
    {
        return Err(JitError::UnsupportedSignature(method.descriptor().to_string()));
    }
    let arity = signature.args.len();

    // Which register holds each operand stack entry.
    let mut registers: Vec<ArgRegister> = Vec::new();
    // Registers overwritten by an `Add`; they no longer hold their argument.
    let mut clobbered = [false; 2];
    let mut program = Vec::new();

    for (pc, &byte) in method.code().iter().enumerate() {
        let unsupported = JitError::UnsupportedOpcode { opcode: byte, pc };
        let Ok(op) = OPCode::try_from(byte) else {
            return Err(unsupported);
        };
        match op {
            op @ (OPCode::ILoad0 | OPCode::ILoad1) => {
                let reg = if op == OPCode::ILoad0 {
                    ArgRegister::A0
                } else {
                    ArgRegister::A1
                };
                let index = reg.index();
                if usize::from(index) >= arity {
                    return Err(JitError::MissingArgument { index, arity });
                }
                if clobbered[usize::from(index)] {
                    return Err(JitError::RegisterClobbered { index, pc });
                }
                registers.push(reg);
            }
            OPCode::IAdd => {
                let src = registers.pop().ok_or(JitError::StackUnderflow { pc })?;
                let dst = registers.pop().ok_or(JitError::StackUnderflow { pc })?;
                // Writing into `dst` would change an operand still waiting on
                // the stack.
                if registers.contains(&dst) {
                    return Err(JitError::RegisterClobbered {
                        index: dst.index(),
                        pc,
                    });
                }
                clobbered[usize::from(dst.index())] = true;
                program.push(Lowered::Add { dst, src });
                registers.push(dst);
            }
            OPCode::IReturn => {
                let src = registers.pop().ok_or(JitError::StackUnderflow { pc })?;
                if src != ArgRegister::RETURN {
                    return Err(JitError::ResultNotInReturnRegister);
                }
                program.push(Lowered::Return { src });
            }
            _ => return Err(unsupported),
        }
    }

    match program.last() {
        None => Err(JitError::EmptyMethod),
        Some(Lowered::Return { .. }) => Ok(program),
        Some(_) => Err(JitError::MissingReturn),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ILOAD_0: u8 = 0x1a;
    const ILOAD_1: u8 = 0x1b;
    const IADD: u8 = 0x60;
    const IRETURN: u8 = 0xac;

    fn method(descriptor: &str, code: &[u8]) -> Method {
        Method::new("m", descriptor, code.to_vec(), 4, 2).unwrap()
    }

    #[test]
    fn lowers_add_method() {
        let program = lower(&method("(II)I", &[ILOAD_0, ILOAD_1, IADD, IRETURN])).unwrap();
        assert_eq!(
            program,
            vec![
                Lowered::Add {
                    dst: ArgRegister::A0,
                    src: ArgRegister::A1,
                },
                Lowered::Return {
                    src: ArgRegister::A0,
                },
            ]
        );
    }

    #[test]
    fn identity_and_doubling_are_eligible() {
        assert!(lower(&method("(I)I", &[ILOAD_0, IRETURN])).is_ok());
        assert!(lower(&method("(I)I", &[ILOAD_0, ILOAD_0, IADD, IRETURN])).is_ok());
    }

    #[test]
    fn unsupported_opcodes_are_rejected() {
        // bipush 42; ireturn
        let err = lower(&method("()I", &[0x10, 42, IRETURN])).unwrap_err();
        assert!(matches!(err, JitError::UnsupportedOpcode { opcode: 0x10, pc: 0 }));
        // iload_0; iload_1; isub; ireturn
        let err = lower(&method("(II)I", &[ILOAD_0, ILOAD_1, 0x64, IRETURN])).unwrap_err();
        assert!(matches!(err, JitError::UnsupportedOpcode { opcode: 0x64, pc: 2 }));
        // not an opcode at all
        let err = lower(&method("(II)I", &[0xff])).unwrap_err();
        assert!(matches!(err, JitError::UnsupportedOpcode { opcode: 0xff, .. }));
    }

    #[test]
    fn structural_problems_are_rejected() {
        assert!(matches!(lower(&method("(II)I", &[])), Err(JitError::EmptyMethod)));
        assert!(matches!(
            lower(&method("(II)I", &[ILOAD_0, IADD, IRETURN])),
            Err(JitError::StackUnderflow { pc: 1 })
        ));
        assert!(matches!(
            lower(&method("(II)I", &[IRETURN])),
            Err(JitError::StackUnderflow { pc: 0 })
        ));
        assert!(matches!(
            lower(&method("(II)I", &[ILOAD_0, ILOAD_1, IADD])),
            Err(JitError::MissingReturn)
        ));
        assert!(matches!(
            lower(&method("(II)I", &[ILOAD_1, ILOAD_0, IADD, IRETURN])),
            Err(JitError::ResultNotInReturnRegister)
        ));
        assert!(matches!(
            lower(&method("(II)I", &[ILOAD_0, IRETURN, ILOAD_0, ILOAD_1, IADD])),
            Err(JitError::MissingReturn)
        ));
    }

    #[test]
    fn clobbered_arguments_are_rejected() {
        // a + (a + b): the inner add overwrites a while it is still needed.
        assert!(matches!(
            lower(&method("(II)I", &[ILOAD_0, ILOAD_0, ILOAD_1, IADD, IADD, IRETURN])),
            Err(JitError::RegisterClobbered { index: 0, pc: 3 })
        ));
        // (a + b) + a: a is reloaded after being overwritten.
        assert!(matches!(
            lower(&method("(II)I", &[ILOAD_0, ILOAD_1, IADD, ILOAD_0, IADD, IRETURN])),
            Err(JitError::RegisterClobbered { index: 0, pc: 3 })
        ));
    }

    #[test]
    fn signatures_outside_int_int_to_int_are_rejected() {
        for descriptor in ["(II)V", "(J)I", "(III)I", "(Ljava/lang/String;)I"] {
            assert!(
                matches!(
                    lower(&method(descriptor, &[ILOAD_0, IRETURN])),
                    Err(JitError::UnsupportedSignature(_))
                ),
                "{descriptor}"
            );
        }
        assert!(matches!(
            lower(&method("(I)I", &[ILOAD_1, IRETURN])),
            Err(JitError::MissingArgument { index: 1, arity: 1 })
        ));
    }

    #[test]
    fn foreign_target_compiles_but_does_not_install() {
        let m = method("(II)I", &[ILOAD_0, ILOAD_1, IADD, IRETURN]);
        let foreign = match Target::host() {
            Some(Target::X86_64) => Target::Aarch64,
            _ => Target::X86_64,
        };
        let jit = Jit::for_target(foreign);
        assert!(!jit.compile(&m).unwrap().is_empty());
        assert!(matches!(jit.try_compile(&m), Err(JitError::UnsupportedTarget)));
    }

    #[cfg(all(unix, any(target_arch = "x86_64", target_arch = "aarch64")))]
    #[test]
    fn compiled_add_matches_arithmetic() {
        let m = method("(II)I", &[ILOAD_0, ILOAD_1, IADD, IRETURN]);
        let entry = Jit::new().try_compile(&m).unwrap();
        assert_eq!(entry.arity(), 2);
        assert_eq!(entry.call(&[3, 4]), 7);
        assert_eq!(entry.call(&[-5, 5]), 0);
        assert_eq!(entry.call(&[0, 0]), 0);
        assert_eq!(entry.call(&[i32::MAX, 1]), i32::MIN);
    }

    #[cfg(all(unix, any(target_arch = "x86_64", target_arch = "aarch64")))]
    #[test]
    fn compiled_doubling() {
        let m = method("(I)I", &[ILOAD_0, ILOAD_0, IADD, IRETURN]);
        let entry = Jit::new().try_compile(&m).unwrap();
        assert_eq!(entry.call(&[21]), 42);
        // extra arguments are ignored
        assert_eq!(entry.call(&[21, 1000]), 42);
    }
}
