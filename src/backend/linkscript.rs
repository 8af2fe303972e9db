// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Linker-script synthesis.
//!
//! The external linker does the heavy lifting; this module only renders the
//! exact section layout the kernel expects: ordered members per section,
//! load-offset address arithmetic, 4 KiB alignment for page-aligned blocks,
//! and `*_start`/`*_end` boundary symbols for kernel-side bookkeeping.

use crate::bytecode::OutputKind;
use crate::core::target::{Section, TargetBackend};

use super::plan::LinkPlan;

pub const PAGE_SIZE: u64 = 4096;

/// Render the linker script for one plan.
pub fn synthesize(plan: &LinkPlan, backend: &dyn TargetBackend) -> String {
    let mut script = String::new();

    if plan.kind == OutputKind::Executable {
        if let Some(entry) = plan.resolved_entry() {
            script.push_str(&format!("ENTRY({entry})\n"));
        }
    }
    script.push_str(&format!("OUTPUT_FORMAT(\"{}\")\n", backend.output_format()));
    script.push_str(&format!("OUTPUT_ARCH({})\n", backend.output_arch()));
    script.push_str("SECTIONS\n{\n");
    script.push_str(&format!("    . = 0x{:X};\n", plan.link_base()));

    for section in Section::ALL {
        let blocks = plan.blocks.section(*section);
        if blocks.is_empty() {
            continue;
        }
        let name = section.as_str();
        script.push('\n');
        // .bss has no load image, so it takes no load-address adjustment.
        if plan.load_offset != 0 && *section != Section::Bss {
            script.push_str(&format!(
                "    .{name} : AT(ADDR(.{name}) - 0x{:X})\n",
                plan.load_offset
            ));
        } else {
            script.push_str(&format!("    .{name} :\n"));
        }
        script.push_str("    {\n");
        script.push_str(&format!("        {name}_start = .;\n"));
        for block in blocks {
            if block.page_align() {
                script.push_str(&format!("        . = ALIGN(0x{PAGE_SIZE:X});\n"));
                script.push_str(&format!("        {} = .;\n", block.boundary_symbol()));
            }
            let member = plan.script_member(&crate::targets::sanitize_symbol(block.id()));
            script.push_str(&format!("        {member}(.{name})\n"));
        }
        script.push_str(&format!("        {name}_end = .;\n"));
        script.push_str("    }\n");
    }

    script.push_str("}\n");

    if plan.kind == OutputKind::Library && !plan.dependencies.is_empty() {
        let deps = plan
            .dependencies
            .iter()
            .map(|dep| format!("{dep}.so"))
            .collect::<Vec<_>>()
            .join(" ");
        script.push_str(&format!("GROUP({deps})\n"));
    }

    script
}
