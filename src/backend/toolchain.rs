// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Toolchain driver.
//!
//! Runs the external assembler/linker/objcopy/symbol-dump/ISO subprocesses
//! for one plan. Every step is gated on the previous one; a non-zero exit
//! aborts the rest of this library's pipeline and reports the failing tool's
//! name and full command line. Siblings are unaffected.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::bytecode::OutputKind;
use crate::core::error::{BuildError, BuildErrorKind};
use crate::core::target::{TargetBackend, ToolInvocation};

use super::output;
use super::plan::LinkPlan;

#[derive(Debug, Clone, Copy, Default)]
pub struct ToolchainOptions {
    /// Write all inputs (assembly, script, args file) but run no subprocess.
    pub dry_run: bool,
    /// Master an ISO for bootable output when the plan carries an ISO spec.
    pub master_iso: bool,
}

/// Run one tool to completion; blocks until the subprocess exits.
pub fn run_tool(tool: &ToolInvocation) -> Result<(), BuildError> {
    let status = Command::new(&tool.program)
        .args(&tool.args)
        .status()
        .map_err(|err| spawn_error(tool, &err))?;
    if !status.success() {
        return Err(exit_error(tool));
    }
    Ok(())
}

/// Run one tool with stdout redirected into a file (the symbol-map dump).
pub fn run_tool_capture(tool: &ToolInvocation, stdout_path: &Path) -> Result<(), BuildError> {
    let output = Command::new(&tool.program)
        .args(&tool.args)
        .output()
        .map_err(|err| spawn_error(tool, &err))?;
    if !output.status.success() {
        return Err(exit_error(tool));
    }
    fs::write(stdout_path, &output.stdout).map_err(|err| {
        BuildError::new(
            BuildErrorKind::Io,
            &format!("Error writing {}", stdout_path.display()),
            Some(&err.to_string()),
        )
    })
}

fn spawn_error(tool: &ToolInvocation, err: &std::io::Error) -> BuildError {
    BuildError::new(
        BuildErrorKind::Tool,
        &format!("Could not start `{}` ({err})", tool.tool),
        Some(&tool.command_line()),
    )
}

fn exit_error(tool: &ToolInvocation) -> BuildError {
    BuildError::new(
        BuildErrorKind::Tool,
        &format!("`{}` failed", tool.tool),
        Some(&tool.command_line()),
    )
}

/// Delete stale final artifacts so a failed rebuild can never pass off old
/// outputs as fresh ones.
fn clean_stale(plan: &LinkPlan) -> Result<(), BuildError> {
    for path in [
        plan.image_path(),
        plan.bin_path(),
        plan.map_path(),
        plan.iso_path(),
        plan.script_path(),
        plan.args_path(),
    ] {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(BuildError::new(
                    BuildErrorKind::Io,
                    &format!("Error removing stale output {}", path.display()),
                    Some(&err.to_string()),
                ))
            }
        }
    }
    Ok(())
}

fn require_input(path: &Path, what: &str) -> Result<(), BuildError> {
    if !path.exists() {
        return Err(BuildError::new(
            BuildErrorKind::MissingInput,
            &format!("Required {what} does not exist"),
            Some(&path.display().to_string()),
        ));
    }
    Ok(())
}

/// Full pipeline for one library. Returns the artifacts produced.
pub fn run_pipeline(
    plan: &LinkPlan,
    backend: &dyn TargetBackend,
    options: ToolchainOptions,
) -> Result<Vec<PathBuf>, BuildError> {
    clean_stale(plan)?;

    let units = output::write_assembly_files(plan)?;
    for unit in &units {
        require_input(&unit.asm_path, "assembly file")?;
    }

    let script_path = output::write_link_script(plan, backend)?;

    // Build the whole invocation list up front; the args file records it
    // before anything runs, so a failed build is still reproducible.
    let mut assembles = Vec::with_capacity(units.len());
    for unit in &units {
        assembles.push(backend.assemble_command(&unit.asm_path, &unit.obj_path));
    }
    let objects: Vec<PathBuf> = units.iter().map(|unit| unit.obj_path.clone()).collect();
    let image_path = plan.image_path();
    let link = match plan.kind {
        OutputKind::Executable => {
            backend.link_executable_command(&script_path, &image_path, &objects)
        }
        OutputKind::Library => backend.link_library_command(&script_path, &image_path, &objects),
    };

    let mut extraction = Vec::new();
    if plan.kind == OutputKind::Executable {
        extraction.push(ToolInvocation::new(
            "objcopy",
            "objcopy",
            vec![
                "-O".to_string(),
                "binary".to_string(),
                image_path.to_string_lossy().into_owned(),
                plan.bin_path().to_string_lossy().into_owned(),
            ],
        ));
        extraction.push(ToolInvocation::new(
            "readelf",
            "readelf",
            vec![
                "--wide".to_string(),
                "--syms".to_string(),
                image_path.to_string_lossy().into_owned(),
            ],
        ));
    }

    let iso = match (&plan.iso, plan.kind, options.master_iso) {
        (Some(spec), OutputKind::Executable, true) => {
            require_input(&spec.include_dir.join(&spec.boot_file), "ISO boot file")?;
            Some(ToolInvocation::new(
                "mkisofs",
                "mkisofs",
                vec![
                    "-b".to_string(),
                    spec.boot_file.clone(),
                    "-boot-info-table".to_string(),
                    "-o".to_string(),
                    plan.iso_path().to_string_lossy().into_owned(),
                    spec.include_dir.to_string_lossy().into_owned(),
                ],
            ))
        }
        _ => None,
    };

    let mut recorded: Vec<&ToolInvocation> = assembles.iter().collect();
    recorded.push(&link);
    recorded.extend(extraction.iter());
    if let Some(iso) = &iso {
        recorded.push(iso);
    }
    let args_path = output::write_args_file(plan, &recorded)?;

    let mut artifacts = vec![script_path, args_path];
    if options.dry_run {
        artifacts.extend(units.iter().map(|unit| unit.asm_path.clone()));
        return Ok(artifacts);
    }

    for assemble in &assembles {
        run_tool(assemble)?;
    }
    run_tool(&link)?;
    artifacts.push(image_path);

    if let Some(extract) = extraction.first() {
        run_tool(extract)?;
        artifacts.push(plan.bin_path());
    }
    if let Some(dump) = extraction.get(1) {
        run_tool_capture(dump, &plan.map_path())?;
        artifacts.push(plan.map_path());
    }
    if let Some(iso) = &iso {
        run_tool(iso)?;
        artifacts.push(plan.iso_path());
    }

    Ok(artifacts)
}
