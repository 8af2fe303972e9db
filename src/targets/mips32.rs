// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! MIPS32 backend, little-endian, GNU as dialect.
//!
//! Kernel calling convention: o32-style $a0-$a3 argument window, return in
//! $v0, $t0 as the spill scratch register. Emitted with `.set noreorder`, so
//! every jump carries its own delay-slot nop.

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

pub const ARCH_ID: ArchId = ArchId::new("mips32");

const ARG_REGISTERS: &[&str] = &["$a0", "$a1", "$a2", "$a3"];
const RETURN_REGISTER: &str = "$v0";
const SCRATCH_REGISTER: &str = "$t0";
const STACK_SLOT: u32 = 4;

const DIALECT: CleanupDialect = CleanupDialect {
    header: ".set noreorder",
    export: ".globl",
    import: ".extern",
};

pub struct Mips32Backend;

static LOWERING_TABLE: LowerTable = &[
    (OpcodeFamily::Nop, lower_nop),
    (OpcodeFamily::LoadConst, lower_load_const),
    (OpcodeFamily::Pop, lower_pop),
    (OpcodeFamily::Call, lower_call),
    (OpcodeFamily::MethodStart, lower_method_start),
    (OpcodeFamily::MethodEnd, lower_method_end),
    (OpcodeFamily::NewObject, lower_new_object),
];

impl TargetBackend for Mips32Backend {
    fn id(&self) -> ArchId {
        ARCH_ID
    }

    fn describe(&self) -> &'static str {
        "MIPS32 little-endian, GNU as dialect"
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
        "# "
    }

    fn lowerings(&self) -> LowerTable {
        LOWERING_TABLE
    }

    fn section_directive(&self, section: Section) -> String {
        match section {
            Section::Text => ".text".to_string(),
            Section::Data => ".data".to_string(),
            Section::Bss => ".section .bss".to_string(),
        }
    }

    fn export_directive(&self, symbol: &str) -> String {
        format!(".globl {symbol}")
    }

    fn data_directives(&self) -> DataDirectives {
        DataDirectives {
            word: ".word",
            byte: ".byte",
            reserve: ".space",
        }
    }

    fn cleanup(&self, text: &str) -> CleanupResult {
        cleanup_text(text, &DIALECT)
    }

    fn output_format(&self) -> &'static str {
        "elf32-tradlittlemips"
    }

    fn output_arch(&self) -> &'static str {
        "mips"
    }

    fn assemble_command(&self, input: &Path, output: &Path) -> ToolInvocation {
        ToolInvocation::new(
            "as",
            "mips-linux-gnu-as",
            vec![
                "-mips32".to_string(),
                "-EL".to_string(),
                "-o".to_string(),
                output.to_string_lossy().into_owned(),
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
        ld_invocation("mips-linux-gnu-ld", script, output, objects, false)
    }

    fn link_library_command(
        &self,
        script: &Path,
        output: &Path,
        objects: &[PathBuf],
    ) -> ToolInvocation {
        ld_invocation("mips-linux-gnu-ld", script, output, objects, true)
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
            Literal::Int { value, .. } => emitter.inst(format!("li {reg}, {value}")),
            Literal::Float32(value) => {
                emitter.inst(format!("li {reg}, 0x{:08X}", value.to_bits()))
            }
            Literal::Float64(_) => {
                return Err(BuildError::new(
                    BuildErrorKind::Internal,
                    "8-byte literal marked register-resident on mips32",
                    None,
                ))
            }
        },
        None => match literal {
            Literal::Int { value, width } if width <= 4 => {
                emitter.inst("addiu $sp, $sp, -4");
                emitter.inst(format!("li {SCRATCH_REGISTER}, {value}"));
                emitter.inst(format!("sw {SCRATCH_REGISTER}, 0($sp)"));
            }
            other => {
                let bits = other.bits();
                emitter.inst("addiu $sp, $sp, -8");
                emitter.inst(format!("li {SCRATCH_REGISTER}, 0x{:08X}", (bits >> 32) as u32));
                emitter.inst(format!("sw {SCRATCH_REGISTER}, 4($sp)"));
                emitter.inst(format!("li {SCRATCH_REGISTER}, 0x{:08X}", bits as u32));
                emitter.inst(format!("sw {SCRATCH_REGISTER}, 0($sp)"));
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
        None => emitter.inst(format!(
            "addiu $sp, $sp, {}",
            stack_slot(item.size, STACK_SLOT)
        )),
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
                        emitter.inst(format!("move {expected}, {reg}"));
                    }
                    if let Some(index) = frame.arg_register_index(expected) {
                        frame.mark_arg_spilled(index);
                    }
                }
                None => {
                    emitter.inst("addiu $sp, $sp, -4");
                    emitter.inst(format!("sw {reg}, 0($sp)"));
                    stack_bytes += STACK_SLOT;
                }
            },
            None => stack_bytes += stack_slot(item.size, STACK_SLOT),
        }
    }

    let symbol = sanitize_symbol(&sig.name);
    emitter.directive(format!(".extern {symbol}"));
    emitter.inst(format!("jal {symbol}"));
    emitter.inst("nop");
    if stack_bytes > 0 {
        emitter.inst(format!("addiu $sp, $sp, {stack_bytes}"));
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
    emitter.inst("addiu $sp, $sp, -8");
    emitter.inst("sw $ra, 4($sp)");
    emitter.inst("sw $fp, 0($sp)");
    emitter.inst("move $fp, $sp");
    // One placeholder for the $ra/$fp pair saved by the prologue.
    frame.push_frame_placeholder(8);
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
            Some(reg) => emitter.inst(format!("move {RETURN_REGISTER}, {reg}")),
            None => {
                emitter.inst(format!("lw {RETURN_REGISTER}, 0($sp)"));
                emitter.inst(format!(
                    "addiu $sp, $sp, {}",
                    stack_slot(value.size, STACK_SLOT)
                ));
            }
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
    emitter.inst("move $sp, $fp");
    emitter.inst("lw $fp, 0($sp)");
    emitter.inst("lw $ra, 4($sp)");
    emitter.inst("addiu $sp, $sp, 8");
    emitter.inst("jr $ra");
    emitter.inst("nop");
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
