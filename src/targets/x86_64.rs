// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! x86-64 backend.
//!
//! Kernel calling convention: the first six evaluation-stack values ride in
//! rdi/rsi/rdx/rcx/r8/r9, return values in rax. Destination register names
//! are selected by a logarithmic width lookup over the sub-register tables;
//! widths outside {1, 2, 4, 8} are internal errors, never index panics.
//! r11 is reserved as the spill scratch register.

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

pub const ARCH_ID: ArchId = ArchId::new("x86_64");

const ARG_REGISTERS: &[&str] = &["rdi", "rsi", "rdx", "rcx", "r8", "r9"];
const RETURN_REGISTER: &str = "rax";
const STACK_SLOT: u32 = 8;

/// Sub-register names per base register, indexed by log2(width).
const REGISTER_WIDTHS: &[[&'static str; 4]] = &[
    ["dil", "di", "edi", "rdi"],
    ["sil", "si", "esi", "rsi"],
    ["dl", "dx", "edx", "rdx"],
    ["cl", "cx", "ecx", "rcx"],
    ["r8b", "r8w", "r8d", "r8"],
    ["r9b", "r9w", "r9d", "r9"],
    ["al", "ax", "eax", "rax"],
];

const DIALECT: CleanupDialect = CleanupDialect {
    header: "[BITS 64]",
    export: "global",
    import: "extern",
};

fn width_index(width: u32) -> Result<usize, BuildError> {
    if !(1..=8).contains(&width) || !width.is_power_of_two() {
        return Err(BuildError::new(
            BuildErrorKind::Internal,
            "Unsupported register width",
            Some(&format!("{width} bytes")),
        ));
    }
    Ok(width.trailing_zeros() as usize)
}

/// Sub-register of `base` holding a `width`-byte value.
pub(crate) fn register_for_width(base: &str, width: u32) -> Result<&'static str, BuildError> {
    let row = REGISTER_WIDTHS
        .iter()
        .find(|row| row[3] == base)
        .ok_or_else(|| {
            BuildError::new(
                BuildErrorKind::Internal,
                "Unknown base register",
                Some(base),
            )
        })?;
    Ok(row[width_index(width)?])
}

pub struct X8664Backend;

static LOWERING_TABLE: LowerTable = &[
    (OpcodeFamily::Nop, lower_nop),
    (OpcodeFamily::LoadConst, lower_load_const),
    (OpcodeFamily::Pop, lower_pop),
    (OpcodeFamily::Call, lower_call),
    (OpcodeFamily::MethodStart, lower_method_start),
    (OpcodeFamily::MethodEnd, lower_method_end),
    (OpcodeFamily::NewObject, lower_new_object),
];

impl TargetBackend for X8664Backend {
    fn id(&self) -> ArchId {
        ARCH_ID
    }

    fn describe(&self) -> &'static str {
        "x86-64 long mode, NASM dialect"
    }

    fn pointer_width(&self) -> u32 {
        8
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
        "elf64-x86-64"
    }

    fn output_arch(&self) -> &'static str {
        "i386:x86-64"
    }

    fn assemble_command(&self, input: &Path, output: &Path) -> ToolInvocation {
        ToolInvocation::new(
            "nasm",
            "nasm",
            vec![
                "-f".to_string(),
                "elf64".to_string(),
                "-o".to_string(),
                output.to_string_lossy().into_owned(),
                "-DX86_64_COMPILATION".to_string(),
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
        Some(base) => {
            let dest = register_for_width(base, literal.width())?;
            match literal {
                Literal::Int { value, .. } => emitter.inst(format!("mov {dest}, {value}")),
                Literal::Float32(value) => {
                    emitter.inst(format!("mov {dest}, 0x{:08X}", value.to_bits()))
                }
                Literal::Float64(value) => {
                    emitter.inst(format!("mov {dest}, 0x{:016X}", value.to_bits()))
                }
            }
        }
        None => {
            match literal {
                Literal::Int { value, .. } => emitter.inst(format!("mov r11, {value}")),
                other => emitter.inst(format!("mov r11, 0x{:016X}", other.bits())),
            }
            emitter.inst("push r11");
        }
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
        None => emitter.inst(format!("add rsp, {}", stack_slot(item.size, STACK_SLOT))),
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
        emitter.inst(format!("add rsp, {stack_bytes}"));
    }
    frame.clear_spilled_args();
    if sig.returns_value {
        frame.push_in_register(8, RETURN_REGISTER);
    }
    Ok(())
}

fn lower_method_start(
    _ctx: &LowerCtx<'_>,
    _op: &BytecodeOperation,
    frame: &mut StackFrame,
    emitter: &mut Emitter,
) -> Result<(), BuildError> {
    emitter.inst("push rbp");
    emitter.inst("mov rbp, rsp");
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
    emitter.inst("pop rbp");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{MethodDescriptor, MethodIndex};

    fn ctx_fixture() -> (MethodDescriptor, MethodIndex) {
        let current = MethodDescriptor {
            id: 1,
            name: "Kernel_Main".to_string(),
            arg_count: 0,
            returns_value: false,
            ops: Vec::new(),
            priority: 0,
            page_align: false,
        };
        let index = MethodIndex::build(&[current.clone()]);
        (current, index)
    }

    #[test]
    fn width_lookup_is_logarithmic() {
        assert_eq!(register_for_width("rdi", 1).unwrap(), "dil");
        assert_eq!(register_for_width("rdi", 2).unwrap(), "di");
        assert_eq!(register_for_width("rdi", 4).unwrap(), "edi");
        assert_eq!(register_for_width("rdi", 8).unwrap(), "rdi");
        assert_eq!(register_for_width("rax", 4).unwrap(), "eax");
    }

    #[test]
    fn width_lookup_rejects_widths_outside_the_table() {
        for width in [0, 3, 5, 16] {
            let err = register_for_width("rdi", width).unwrap_err();
            assert_eq!(err.kind(), BuildErrorKind::Internal);
        }
        assert!(register_for_width("rbx", 4).is_err());
    }

    #[test]
    fn narrow_literal_uses_the_sub_register() {
        let (current, index) = ctx_fixture();
        let ctx = LowerCtx {
            library: "kernel",
            method: &current,
            methods: &index,
        };
        let mut frame = StackFrame::new(1, "Kernel_Main", ARG_REGISTERS, 8);
        let mut emitter = Emitter::new("; ");
        let op = BytecodeOperation::new(
            OpcodeFamily::LoadConst,
            literal::encode(&Literal::Int { value: -5, width: 1 }),
            0,
        );
        lower_load_const(&ctx, &op, &mut frame, &mut emitter).unwrap();
        assert_eq!(emitter.instructions(), vec!["mov dil, -5"]);
    }

    #[test]
    fn f64_literal_fits_one_register() {
        let (current, index) = ctx_fixture();
        let ctx = LowerCtx {
            library: "kernel",
            method: &current,
            methods: &index,
        };
        let mut frame = StackFrame::new(1, "Kernel_Main", ARG_REGISTERS, 8);
        let mut emitter = Emitter::new("; ");
        let op = BytecodeOperation::new(
            OpcodeFamily::LoadConst,
            literal::encode(&Literal::Float64(1.0)),
            0,
        );
        lower_load_const(&ctx, &op, &mut frame, &mut emitter).unwrap();
        assert_eq!(emitter.instructions(), vec!["mov rdi, 0x3FF0000000000000"]);
        assert_eq!(frame.top().unwrap().register, Some("rdi"));
    }

    #[test]
    fn spilled_literal_goes_through_the_scratch_register() {
        let (current, index) = ctx_fixture();
        let ctx = LowerCtx {
            library: "kernel",
            method: &current,
            methods: &index,
        };
        let mut frame = StackFrame::new(1, "Kernel_Main", ARG_REGISTERS, 8);
        let mut emitter = Emitter::new("; ");
        for _ in 0..ARG_REGISTERS.len() {
            frame.push(8);
        }
        let op = BytecodeOperation::new(
            OpcodeFamily::LoadConst,
            literal::encode(&Literal::Int { value: 7, width: 8 }),
            0,
        );
        lower_load_const(&ctx, &op, &mut frame, &mut emitter).unwrap();
        assert_eq!(emitter.instructions(), vec!["mov r11, 7", "push r11"]);
    }

    #[test]
    fn assemble_command_uses_the_elf64_format() {
        let tool = X8664Backend.assemble_command(Path::new("m.asm"), Path::new("m.o"));
        assert_eq!(
            tool.command_line(),
            "nasm -f elf64 -o m.o -DX86_64_COMPILATION m.asm"
        );
    }
}
