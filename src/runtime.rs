//! JVM runtime module responsible for creating a new runtime
//! environment and running programs.
use std::io::{self, Write};
use std::rc::Rc;

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use crate::bytecode::OPCode;
use crate::config::RuntimeConfig;
use crate::constant_pool::{ConstantPool, ResolutionError};
use crate::heap::{Heap, HeapExhausted, Object};
use crate::jit::{Jit, NativeEntry};
use crate::profiler::Profiler;
use crate::program::{BaseTypeKind, Method, MethodDescriptor, MethodId, Program, ProgramError};

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Opaque value `getstatic` pushes in place of a real static field, such as
/// the `System.out` receiver of a print call.
pub const STATIC_FIELD_PLACEHOLDER: i32 = i32::MIN;

/// `RuntimeError` represents the possible execution failures. Every one of
/// them aborts the current top-level invocation.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Descriptor(#[from] ProgramError),

    #[error("operand stack underflow at pc {pc}")]
    StackUnderflow { pc: usize },

    #[error("local variable {index} out of range (max_locals {max_locals})")]
    LocalOutOfRange { index: usize, max_locals: usize },

    #[error("invalid heap reference {reference} (heap holds {heap_len} objects)")]
    InvalidReference { reference: i32, heap_len: usize },

    #[error(transparent)]
    HeapExhausted(#[from] HeapExhausted),

    #[error("unsupported opcode {opcode:#04x} at pc {pc}")]
    UnsupportedOpcode { opcode: u8, pc: usize },

    #[error("instruction {opcode:#04x} at pc {pc} runs past the end of the bytecode")]
    TruncatedInstruction { opcode: u8, pc: usize },

    #[error("branch at pc {pc} targets {target}, outside the method")]
    InvalidBranch { pc: usize, target: isize },

    #[error("value {token} is not a constant pool index")]
    InvalidConstantToken { token: i32 },

    #[error("unsupported invocation of {name}{descriptor}")]
    UnsupportedInvocation { name: String, descriptor: String },

    #[error("method {name}{descriptor} not found")]
    MethodNotFound { name: String, descriptor: String },

    #[error("call depth limit of {limit} frames exceeded")]
    CallDepthExceeded { limit: usize },

    #[error("{given} arguments passed to a method with max_locals {max_locals}")]
    TooManyArguments { given: usize, max_locals: usize },

    #[error("output error: {0}")]
    Output(#[from] io::Error),
}

/// Execution state of a single method invocation: its operand stack,
/// local variables and program counter. Created on entry and dropped on
/// return.
#[derive(Debug)]
struct Frame {
    pc: usize,
    stack: Vec<i32>,
    locals: Vec<i32>,
}

impl Frame {
    fn new(method: &Method, args: &[i32]) -> Result<Self> {
        check_arity(method, args.len())?;
        let mut locals = vec![0; usize::from(method.max_locals())];
        locals[..args.len()].copy_from_slice(args);
        Ok(Self {
            pc: 0,
            stack: Vec::with_capacity(usize::from(method.max_stack())),
            locals,
        })
    }

    fn push(&mut self, value: i32) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<i32> {
        self.stack
            .pop()
            .ok_or(RuntimeError::StackUnderflow { pc: self.pc })
    }

    fn peek(&self) -> Result<i32> {
        self.stack
            .last()
            .copied()
            .ok_or(RuntimeError::StackUnderflow { pc: self.pc })
    }

    /// Pops `count` values, returning them in the order they were pushed.
    fn pop_n(&mut self, count: usize) -> Result<Vec<i32>> {
        if count > self.stack.len() {
            return Err(RuntimeError::StackUnderflow { pc: self.pc });
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn load(&self, index: usize) -> Result<i32> {
        self.locals
            .get(index)
            .copied()
            .ok_or(RuntimeError::LocalOutOfRange {
                index,
                max_locals: self.locals.len(),
            })
    }

    fn store(&mut self, index: usize, value: i32) -> Result<()> {
        let max_locals = self.locals.len();
        let slot = self
            .locals
            .get_mut(index)
            .ok_or(RuntimeError::LocalOutOfRange { index, max_locals })?;
        *slot = value;
        Ok(())
    }
}

/// `Runtime` represents an execution context for JVM programs and is
/// responsible for interpreting the program's instructions in a bytecode
/// format, counting calls and dispatching to the `Jit` when a method is
/// considered hot.
///
/// Each invocation runs in its own `Frame` on the host stack: `invokestatic`
/// recurses into `execute`, and the depth of that recursion is capped by
/// `RuntimeConfig::max_call_depth`.
pub struct Runtime {
    program: Rc<Program>,
    heap: Heap,
    jit: Jit,
    profiler: Profiler,
    config: RuntimeConfig,
    out: Box<dyn Write>,
    depth: usize,
}

impl Runtime {
    /// Runtime printing program output to stdout.
    pub fn new(program: Program, config: RuntimeConfig) -> Self {
        Self::with_output(program, config, Box::new(io::stdout()))
    }

    /// Runtime printing program output to `out`.
    pub fn with_output(
        program: Program,
        config: RuntimeConfig,
        out: Box<dyn Write>,
    ) -> Self {
        Self {
            program: Rc::new(program),
            heap: Heap::new(),
            jit: Jit::new(),
            profiler: Profiler::new(config.jit.threshold),
            config,
            out,
            depth: 0,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Run the program's `main` with no arguments.
    pub fn run(&mut self) -> Result<()> {
        let main = self.program.entry_point()?;
        self.execute(main, &[])?;
        self.out.flush()?;
        Ok(())
    }

    /// Look up `name` + `descriptor` in the method table and execute it.
    pub fn invoke(&mut self, name: &str, descriptor: &str, args: &[i32]) -> Result<i32> {
        let id = self
            .program
            .find_method(name, descriptor)
            .ok_or_else(|| RuntimeError::MethodNotFound {
                name: name.to_string(),
                descriptor: descriptor.to_string(),
            })?;
        self.execute(id, args)
    }

    /// Execute a method the way a call site does: count the call, prefer a
    /// native entry (compiling the method once it turns hot) and interpret
    /// otherwise. Void methods yield 0.
    pub fn execute(&mut self, id: MethodId, args: &[i32]) -> Result<i32> {
        let program = Rc::clone(&self.program);
        let method = program.method(id);
        check_arity(method, args.len())?;
        let hot = self.profiler.count_entry(method);
        if let Some(entry) = self.native_entry(method, hot) {
            let result = entry.call(args);
            log::debug!("native {}{} returned {result}", method.name(), method.descriptor());
            return Ok(result);
        }
        self.interpret_method(&program, method, args)
    }

    /// Execute a method in the interpreter, whatever its JIT state.
    pub fn interpret(&mut self, id: MethodId, args: &[i32]) -> Result<i32> {
        let program = Rc::clone(&self.program);
        self.interpret_method(&program, program.method(id), args)
    }

    /// Returns the native entry to use for `method`, compiling it first if it
    /// just turned hot. Compilation failures are logged and cached so the
    /// method is interpreted from then on.
    fn native_entry<'m>(&self, method: &'m Method, hot: bool) -> Option<&'m NativeEntry> {
        if method.jit_attempted() {
            return method.native_entry();
        }
        if !self.config.jit.enabled || !hot {
            return None;
        }
        let jit = self.jit;
        method.native_entry_or_compile(|method| match jit.try_compile(method) {
            Ok(entry) => Some(entry),
            Err(err) => {
                log::warn!(
                    "not compiling {}{}: {err}; falling back to the interpreter",
                    method.name(),
                    method.descriptor()
                );
                None
            }
        })
    }

    fn interpret_method(
        &mut self,
        program: &Program,
        method: &Method,
        args: &[i32],
    ) -> Result<i32> {
        if self.depth >= self.config.max_call_depth {
            return Err(RuntimeError::CallDepthExceeded {
                limit: self.config.max_call_depth,
            });
        }
        self.depth += 1;
        log::debug!(
            "--- entering frame {}{} (depth {}) ---",
            method.name(),
            method.descriptor(),
            self.depth
        );
        let result = self.run_frame(program, method, args);
        self.depth -= 1;
        match &result {
            Ok(value) => log::debug!("--- leaving frame {} (result {value}) ---", method.name()),
            Err(err) => log::debug!("--- unwinding frame {}: {err} ---", method.name()),
        }
        result
    }

    /// The opcode loop: runs `method` until it returns or falls off the end
    /// of its bytecode, which counts as a void return.
    fn run_frame(&mut self, program: &Program, method: &Method, args: &[i32]) -> Result<i32> {
        let pool = &program.constant_pool;
        let code = method.code();
        let mut frame = Frame::new(method, args)?;

        while frame.pc < code.len() {
            let pc = frame.pc;
            let byte = code[pc];
            let op = OPCode::try_from(byte)
                .map_err(|opcode| RuntimeError::UnsupportedOpcode { opcode, pc })?;
            let mut next = pc + op.width();
            if next > code.len() {
                return Err(RuntimeError::TruncatedInstruction { opcode: byte, pc });
            }
            let operands = &code[pc + 1..next];
            log::trace!("{pc:4}: {op:?} {operands:?}");

            match op {
                OPCode::NOP => {}
                OPCode::IconstM1
                | OPCode::Iconst0
                | OPCode::Iconst1
                | OPCode::Iconst2
                | OPCode::Iconst3
                | OPCode::Iconst4
                | OPCode::Iconst5 => {
                    frame.push(i32::from(byte) - i32::from(OPCode::Iconst0.byte()));
                }
                OPCode::BiPush => frame.push(i32::from(operands[0] as i8)),
                OPCode::SiPush => frame.push(i32::from(BigEndian::read_i16(operands))),
                OPCode::Ldc => {
                    let value = ldc(pool, u16::from(operands[0]))?;
                    frame.push(value);
                }
                OPCode::ILoad => {
                    let value = frame.load(usize::from(operands[0]))?;
                    frame.push(value);
                }
                OPCode::ILoad0 | OPCode::ALoad0 => frame.push(frame.load(0)?),
                OPCode::ILoad1 | OPCode::ALoad1 => frame.push(frame.load(1)?),
                OPCode::ILoad2 | OPCode::ALoad2 => frame.push(frame.load(2)?),
                OPCode::ILoad3 | OPCode::ALoad3 => frame.push(frame.load(3)?),
                OPCode::IStore => {
                    let value = frame.pop()?;
                    frame.store(usize::from(operands[0]), value)?;
                }
                OPCode::IStore0 | OPCode::AStore0 => {
                    let value = frame.pop()?;
                    frame.store(0, value)?;
                }
                OPCode::IStore1 | OPCode::AStore1 => {
                    let value = frame.pop()?;
                    frame.store(1, value)?;
                }
                OPCode::IStore2 | OPCode::AStore2 => {
                    let value = frame.pop()?;
                    frame.store(2, value)?;
                }
                OPCode::IStore3 | OPCode::AStore3 => {
                    let value = frame.pop()?;
                    frame.store(3, value)?;
                }
                OPCode::Pop => {
                    frame.pop()?;
                }
                OPCode::Dup => {
                    let top = frame.peek()?;
                    frame.push(top);
                }
                OPCode::IAdd | OPCode::ISub | OPCode::IMul => {
                    let rhs = frame.pop()?;
                    let lhs = frame.pop()?;
                    frame.push(match op {
                        OPCode::IAdd => lhs.wrapping_add(rhs),
                        OPCode::ISub => lhs.wrapping_sub(rhs),
                        _ => lhs.wrapping_mul(rhs),
                    });
                }
                OPCode::IInc => {
                    let index = usize::from(operands[0]);
                    let delta = i32::from(operands[1] as i8);
                    let value = frame.load(index)?;
                    frame.store(index, value.wrapping_add(delta))?;
                }
                OPCode::IfEq
                | OPCode::IfNe
                | OPCode::IfLt
                | OPCode::IfGe
                | OPCode::IfGt
                | OPCode::IfLe => {
                    let value = frame.pop()?;
                    let taken = match op {
                        OPCode::IfEq => value == 0,
                        OPCode::IfNe => value != 0,
                        OPCode::IfLt => value < 0,
                        OPCode::IfGe => value >= 0,
                        OPCode::IfGt => value > 0,
                        _ => value <= 0,
                    };
                    if taken {
                        next = branch_target(pc, operands, code.len())?;
                    }
                }
                OPCode::IfICmpEq
                | OPCode::IfICmpNe
                | OPCode::IfICmpLt
                | OPCode::IfICmpGe
                | OPCode::IfICmpGt
                | OPCode::IfICmpLe => {
                    let rhs = frame.pop()?;
                    let lhs = frame.pop()?;
                    let taken = match op {
                        OPCode::IfICmpEq => lhs == rhs,
                        OPCode::IfICmpNe => lhs != rhs,
                        OPCode::IfICmpLt => lhs < rhs,
                        OPCode::IfICmpGe => lhs >= rhs,
                        OPCode::IfICmpGt => lhs > rhs,
                        _ => lhs <= rhs,
                    };
                    if taken {
                        next = branch_target(pc, operands, code.len())?;
                    }
                }
                OPCode::Goto => next = branch_target(pc, operands, code.len())?,
                OPCode::IReturn | OPCode::AReturn => return frame.pop(),
                OPCode::Return => return Ok(0),
                OPCode::GetStatic => frame.push(STATIC_FIELD_PLACEHOLDER),
                OPCode::New => {
                    let class_name = pool.class_name(BigEndian::read_u16(operands))?;
                    let reference = self.heap.alloc(class_name)?;
                    frame.push(reference);
                }
                OPCode::GetField => {
                    let field = pool.field_ref(BigEndian::read_u16(operands))?;
                    let reference = frame.pop()?;
                    let value = self.object(reference)?.field(field.name);
                    frame.push(value);
                }
                OPCode::PutField => {
                    let field = pool.field_ref(BigEndian::read_u16(operands))?;
                    let value = frame.pop()?;
                    let reference = frame.pop()?;
                    let heap_len = self.heap.len();
                    self.heap
                        .get_mut(reference)
                        .ok_or(RuntimeError::InvalidReference {
                            reference,
                            heap_len,
                        })?
                        .set_field(field.name, value);
                }
                OPCode::InvokeStatic => {
                    let target = pool.method_ref(BigEndian::read_u16(operands))?;
                    let id = program.find_method(target.name, target.descriptor).ok_or_else(
                        || RuntimeError::MethodNotFound {
                            name: target.name.to_string(),
                            descriptor: target.descriptor.to_string(),
                        },
                    )?;
                    let signature = program.method(id).signature();
                    check_int_signature(signature, target.name, target.descriptor)?;
                    let args = frame.pop_n(signature.args.len())?;
                    let result = self.execute(id, &args)?;
                    if signature.returns_value() {
                        frame.push(result);
                    }
                }
                OPCode::InvokeSpecial => {
                    // Constructors are not run: the arguments and the receiver
                    // are dropped and the object keeps its default fields.
                    let target = pool.method_ref(BigEndian::read_u16(operands))?;
                    let signature = MethodDescriptor::parse(target.descriptor)?;
                    frame.pop_n(signature.arg_slots())?;
                    frame.pop()?;
                    log::debug!("skipped {}.{}{}", target.class, target.name, target.descriptor);
                }
                OPCode::InvokeVirtual => {
                    let target = pool.method_ref(BigEndian::read_u16(operands))?;
                    self.invoke_virtual(pool, &mut frame, target.name, target.descriptor)?;
                }
            }
            frame.pc = next;
        }
        Ok(0)
    }

    /// `invokevirtual` only knows the two print shapes; anything else would
    /// need calling-convention rules we don't have.
    fn invoke_virtual(
        &mut self,
        pool: &ConstantPool,
        frame: &mut Frame,
        name: &str,
        descriptor: &str,
    ) -> Result<()> {
        let newline = match name {
            "println" => true,
            "print" => false,
            _ => return Err(unsupported_invocation(name, descriptor)),
        };
        let text = match descriptor {
            "(Ljava/lang/String;)V" => {
                let token = frame.pop()?;
                let index = u16::try_from(token)
                    .map_err(|_| RuntimeError::InvalidConstantToken { token })?;
                pool.string(index)?.to_string()
            }
            "(I)V" => frame.pop()?.to_string(),
            _ => return Err(unsupported_invocation(name, descriptor)),
        };
        // the output stream receiver
        frame.pop()?;
        if newline {
            writeln!(self.out, "{text}")?;
        } else {
            write!(self.out, "{text}")?;
        }
        Ok(())
    }

    fn object(&self, reference: i32) -> Result<&Object> {
        self.heap.get(reference).ok_or(RuntimeError::InvalidReference {
            reference,
            heap_len: self.heap.len(),
        })
    }
}

/// Arguments are copied into locals, so a call can't pass more of them than
/// the callee has local slots.
fn check_arity(method: &Method, given: usize) -> Result<()> {
    let max_locals = usize::from(method.max_locals());
    if given > max_locals {
        return Err(RuntimeError::TooManyArguments { given, max_locals });
    }
    Ok(())
}

/// `ldc` pushes Integer constants by value and String constants as their pool
/// index, to be resolved by whoever consumes them.
fn ldc(pool: &ConstantPool, index: u16) -> Result<i32> {
    if let Ok(value) = pool.integer(index) {
        return Ok(value);
    }
    pool.string(index)?;
    Ok(i32::from(index))
}

/// Resolves a signed 16-bit branch offset relative to the branching
/// instruction.
fn branch_target(pc: usize, operands: &[u8], code_len: usize) -> Result<usize> {
    let offset = BigEndian::read_i16(operands);
    let target = pc as isize + isize::from(offset);
    usize::try_from(target)
        .ok()
        .filter(|t| *t < code_len)
        .ok_or(RuntimeError::InvalidBranch { pc, target })
}

/// Operands are 32-bit, so only int-sized arguments and results can cross a
/// call boundary.
fn check_int_signature(
    signature: &MethodDescriptor,
    name: &str,
    descriptor: &str,
) -> Result<()> {
    let int_sized = |t: &BaseTypeKind| matches!(t, BaseTypeKind::Int | BaseTypeKind::Reference);
    if signature.args.iter().all(int_sized)
        && (signature.ret == BaseTypeKind::Void || int_sized(&signature.ret))
    {
        Ok(())
    } else {
        Err(unsupported_invocation(name, descriptor))
    }
}

fn unsupported_invocation(name: &str, descriptor: &str) -> RuntimeError {
    RuntimeError::UnsupportedInvocation {
        name: name.to_string(),
        descriptor: descriptor.to_string(),
    }
}
