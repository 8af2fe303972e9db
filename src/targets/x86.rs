// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! x86-32 backend.
//!
//! Kernel calling convention: the first two evaluation-stack values ride in
//! ecx/edx, the rest go through the physical stack; return values come back
//! in eax. 8-byte values are always memory-resident (two dword pushes).

use std::path::{Path, PathBuf};

use crate::bytecode::literal::{self, Literal};
use crate::bytecode::{BytecodeOperation, OpcodeFamily};
use crate::core::arch::ArchId;
use crate::core::emit::Emitter;
use crate::core::error::{BuildError, BuildErrorKind};
use crate::core::target::{
    CleanupResult, DataDirectives, LowerCtx, LowerTable, Section, TargetBackend, ToolInvocation,
};
use crate::stack::StackFrame;

use super::{cleanup_text, ld_invocation, sanitize_symbol, stack_slot, CleanupDialect};

pub const ARCH_ID: ArchId = ArchId::new("x86");

const ARG_REGISTERS: &[&str] = &["ecx", "edx"];
const RETURN_REGISTER: &str = "eax";
const STACK_SLOT: u32 = 4;

const DIALECT: CleanupDialect = CleanupDialect {
    header: "[BITS 32]",
    export: "global",
    import: "extern",
};

pub struct X86Backend;

static LOWERING_TABLE: LowerTable = &[
    (OpcodeFamily::Nop, lower_nop),
    (OpcodeFamily::LoadConst, lower_load_const),
    (OpcodeFamily::Pop, lower_pop),
    (OpcodeFamily::Call, lower_call),
    (OpcodeFamily::MethodStart, lower_method_start),
    (OpcodeFamily::MethodEnd, lower_method_end),
    (OpcodeFamily::NewObject, lower_new_object),
];

impl TargetBackend for X86Backend {
    fn id(&self) -> ArchId {
        ARCH_ID
    }

    fn describe(&self) -> &'static str {
        "x86-32 protected mode, NASM dialect"
    }

    fn pointer_width(&self) -> u32 {
        4
    }

    fn arg_registers(&self) -> &'static [&'static str] {
        ARG_REGISTERS
    }

    fn return_register(&self) -> &'static str {
        RETURN_REGISTER
    }

    fn comment_prefix(&self) -> &'static str {
        "; "
    }

    fn lowerings(&self) -> LowerTable {
        LOWERING_TABLE
    }

    fn section_directive(&self, section: Section) -> String {
        format!("section .{}", section.as_str())
    }

    fn export_directive(&self, symbol: &str) -> String {
        format!("global {symbol}")
    }

    fn data_directives(&self) -> DataDirectives {
        DataDirectives {
            word: "dd",
            byte: "db",
            reserve: "resb",
        }
    }

    fn cleanup(&self, text: &str) -> CleanupResult {
        cleanup_text(text, &DIALECT)
    }

    fn output_format(&self) -> &'static str {
        "elf32-i386"
    }

    fn output_arch(&self) -> &'static str {
        "i386"
    }

    fn assemble_command(&self, input: &Path, output: &Path) -> ToolInvocation {
        ToolInvocation::new(
            "nasm",
            "nasm",
            vec![
                "-f".to_string(),
                "elf".to_string(),
                "-o".to_string(),
                output.to_string_lossy().into_owned(),
                "-DX86_COMPILATION".to_string(),
                input.to_string_lossy().into_owned(),
            ],
        )
    }

    fn link_executable_command(
        &self,
        script: &Path,
        output: &Path,
        objects: &[PathBuf],
    ) -> ToolInvocation {
        ld_invocation("ld", script, output, objects, false)
    }

    fn link_library_command(
        &self,
        script: &Path,
        output: &Path,
        objects: &[PathBuf],
    ) -> ToolInvocation {
        ld_invocation("ld", script, output, objects, true)
    }
}

fn lower_nop(
    _ctx: &LowerCtx<'_>,
    _op: &BytecodeOperation,
    _frame: &mut StackFrame,
    emitter: &mut Emitter,
) -> Result<(), BuildError> {
    emitter.inst("nop");
    Ok(())
}

fn lower_load_const(
    _ctx: &LowerCtx<'_>,
    op: &BytecodeOperation,
    frame: &mut StackFrame,
    emitter: &mut Emitter,
) -> Result<(), BuildError> {
    let literal = literal::decode(&op.operands)?;
    let item = frame.push(literal.width());
    match item.register {
        Some(reg) => match literal {
            Literal::Int { value, .. } => emitter.inst(format!("mov {reg}, {value}")),
            Literal::Float32(value) => {
                emitter.inst(format!("mov {reg}, 0x{:08X}", value.to_bits()))
            }
            // 8-byte literals never fit a 32-bit register; push() keeps them
            // memory-resident, so this arm is unreachable by construction.
            Literal::Float64(_) => {
                return Err(BuildError::new(
                    BuildErrorKind::Internal,
                    "8-byte literal marked register-resident on x86",
                    None,
                ))
            }
        },
        None => match literal {
            Literal::Int { value, width } if width <= 4 => {
                emitter.inst(format!("push dword {value}"));
            }
            other => {
                // Two dword pushes, high half first so the value sits
                // little-endian in memory.
                let bits = other.bits();
                emitter.inst(format!("push dword 0x{:08X}", (bits >> 32) as u32));
                emitter.inst(format!("push dword 0x{:08X}", bits as u32));
            }
        },
    }
    Ok(())
}

fn lower_pop(
    _ctx: &LowerCtx<'_>,
    _op: &BytecodeOperation,
    frame: &mut StackFrame,
    emitter: &mut Emitter,
) -> Result<(), BuildError> {
    let item = frame.pop()?;
    match item.register {
        Some(reg) => emitter.comment(format!("pop {reg} (register-resident)")),
        None => emitter.inst(format!("add esp, {}", stack_slot(item.size, STACK_SLOT))),
    }
    Ok(())
}

fn lower_call(
    ctx: &LowerCtx<'_>,
    op: &BytecodeOperation,
    frame: &mut StackFrame,
    emitter: &mut Emitter,
) -> Result<(), BuildError> {
    let target = op.call_target().ok_or_else(|| {
        BuildError::new(
            BuildErrorKind::Internal,
            "Call operand missing method id",
            Some(&ctx.method.name),
        )
    })?;
    let sig = ctx.methods.resolve(target).ok_or_else(|| {
        BuildError::new(
            BuildErrorKind::Internal,
            "Unknown call target",
            Some(&format!("method id {target} in {}", ctx.method.name)),
        )
    })?;

    let mut stack_bytes = 0u32;
    for popped in 0..sig.arg_count {
        let arg_index = (sig.arg_count - 1 - popped) as usize;
        let item = frame.pop()?;
        match item.register {
            Some(reg) => match ARG_REGISTERS.get(arg_index).copied() {
                Some(expected) => {
                    if reg != expected {
                        emitter.inst(format!("mov {expected}, {reg}"));
                    }
                    if let Some(index) = frame.arg_register_index(expected) {
                        frame.mark_arg_spilled(index);
                    }
                }
                None => {
                    emitter.inst(format!("push {reg}"));
                    stack_bytes += STACK_SLOT;
                }
            },
            None => stack_bytes += stack_slot(item.size, STACK_SLOT),
        }
    }

    let symbol = sanitize_symbol(&sig.name);
    emitter.directive(format!("extern {symbol}"));
    emitter.inst(format!("call {symbol}"));
    if stack_bytes > 0 {
        emitter.inst(format!("add esp, {stack_bytes}"));
    }
    frame.clear_spilled_args();
    if sig.returns_value {
        frame.push_in_register(4, RETURN_REGISTER);
    }
    Ok(())
}

fn lower_method_start(
    _ctx: &LowerCtx<'_>,
    _op: &BytecodeOperation,
    frame: &mut StackFrame,
    emitter: &mut Emitter,
) -> Result<(), BuildError> {
    emitter.inst("push ebp");
    emitter.inst("mov ebp, esp");
    frame.push_frame_placeholder(4);
    Ok(())
}

fn lower_method_end(
    ctx: &LowerCtx<'_>,
    _op: &BytecodeOperation,
    frame: &mut StackFrame,
    emitter: &mut Emitter,
) -> Result<(), BuildError> {
    if ctx.method.returns_value {
        let value = frame.pop()?;
        match value.register {
            Some(reg) if reg == RETURN_REGISTER => {}
            Some(reg) => emitter.inst(format!("mov {RETURN_REGISTER}, {reg}")),
            None => emitter.inst(format!("pop {RETURN_REGISTER}")),
        }
    }
    let placeholder = frame.pop()?;
    if placeholder.register.is_some() {
        return Err(BuildError::new(
            BuildErrorKind::Internal,
            "Frame placeholder must be memory-resident",
            Some(&ctx.method.name),
        ));
    }
    emitter.inst("pop ebp");
    emitter.inst("ret");
    Ok(())
}

fn lower_new_object(
    ctx: &LowerCtx<'_>,
    _op: &BytecodeOperation,
    _frame: &mut StackFrame,
    _emitter: &mut Emitter,
) -> Result<(), BuildError> {
    Err(BuildError::new(
        BuildErrorKind::Unsupported,
        "Constructor invocation is not supported",
        Some(&format!("method {} ({})", ctx.method.name, ctx.method.id)),
    ))
}
