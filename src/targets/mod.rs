// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Architecture backends.
//!
//! Each backend owns its lowering table, assembler dialect, and toolchain
//! command builders. The shared helpers here cover only what every dialect
//! needs: symbol sanitizing, stack-slot rounding, and the cleanup pass that
//! hoists and dedupes symbol directives.

pub mod mips32;
pub mod x86;
pub mod x86_64;

use std::path::{Path, PathBuf};

use crate::core::error::BuildError;
use crate::core::registry::BackendRegistry;
use crate::core::target::{CleanupResult, ToolInvocation};

/// Registry with every built-in backend registered, coverage unchecked.
pub fn default_registry() -> Result<BackendRegistry, BuildError> {
    let mut registry = BackendRegistry::new();
    registry.register(Box::new(x86::X86Backend))?;
    registry.register(Box::new(x86_64::X8664Backend))?;
    registry.register(Box::new(mips32::Mips32Backend))?;
    Ok(registry)
}

/// Turn a method or block name into a legal assembly symbol.
pub fn sanitize_symbol(name: &str) -> String {
    let mut symbol = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            symbol.push(ch);
        } else {
            symbol.push('_');
        }
    }
    if symbol.is_empty() || symbol.starts_with(|ch: char| ch.is_ascii_digit()) {
        symbol.insert(0, '_');
    }
    symbol
}

/// Round a value size up to the backend's stack-slot granularity.
pub(crate) fn stack_slot(size: u32, slot: u32) -> u32 {
    size.div_ceil(slot) * slot
}

/// Symbol-directive keywords and file header of one assembler dialect.
pub(crate) struct CleanupDialect {
    pub header: &'static str,
    pub export: &'static str,
    pub import: &'static str,
}

/// Shared cleanup pass: canonicalize the file header, hoist and dedupe
/// export/import directives, trim trailing whitespace, collapse blank runs.
pub(crate) fn cleanup_text(text: &str, dialect: &CleanupDialect) -> CleanupResult {
    let mut exported: Vec<String> = Vec::new();
    let mut imported: Vec<String> = Vec::new();
    let mut body: Vec<String> = Vec::new();

    for raw in text.lines() {
        let line = raw.trim_end();
        let trimmed = line.trim_start();
        if trimmed == dialect.header {
            continue;
        }
        if let Some(symbol) = symbol_directive(trimmed, dialect.export) {
            if !exported.iter().any(|known| known == symbol) {
                exported.push(symbol.to_string());
            }
            continue;
        }
        if let Some(symbol) = symbol_directive(trimmed, dialect.import) {
            if !imported.iter().any(|known| known == symbol) {
                imported.push(symbol.to_string());
            }
            continue;
        }
        body.push(line.to_string());
    }

    let mut out = String::new();
    out.push_str(dialect.header);
    out.push('\n');
    for symbol in &exported {
        out.push_str(&format!("{} {symbol}\n", dialect.export));
    }
    for symbol in &imported {
        out.push_str(&format!("{} {symbol}\n", dialect.import));
    }
    let mut last_blank = false;
    for line in &body {
        let blank = line.is_empty();
        if blank && last_blank {
            continue;
        }
        out.push_str(line);
        out.push('\n');
        last_blank = blank;
    }

    CleanupResult {
        text: out,
        exported,
        imported,
    }
}

fn symbol_directive<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(keyword)?;
    if !rest.starts_with([' ', '\t']) {
        return None;
    }
    let symbol = rest.trim();
    if symbol.is_empty() {
        None
    } else {
        Some(symbol)
    }
}

/// Linker invocation shared by every backend: the script drives the layout,
/// `-shared` turns the output into a co-loadable library.
pub(crate) fn ld_invocation(
    program: &str,
    script: &Path,
    output: &Path,
    objects: &[PathBuf],
    shared: bool,
) -> ToolInvocation {
    let mut args = vec![
        "--fatal-warnings".to_string(),
        "-T".to_string(),
        script.to_string_lossy().into_owned(),
        "-o".to_string(),
        output.to_string_lossy().into_owned(),
    ];
    if shared {
        args.push("-shared".to_string());
    }
    for object in objects {
        args.push(object.to_string_lossy().into_owned());
    }
    ToolInvocation::new("ld", program, args)
}
