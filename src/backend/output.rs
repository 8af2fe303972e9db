// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Output-file writing: assembly files, link scripts, args files.

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::{BuildError, BuildErrorKind};
use crate::core::target::{TargetBackend, ToolInvocation};

use super::linkscript;
use super::plan::{LinkPlan, ObjectUnit};

fn write_error(path: &Path, err: &std::io::Error) -> BuildError {
    BuildError::new(
        BuildErrorKind::Io,
        &format!("Error writing {}", path.display()),
        Some(&err.to_string()),
    )
}

fn create_dir(path: &Path) -> Result<(), BuildError> {
    fs::create_dir_all(path).map_err(|err| {
        BuildError::new(
            BuildErrorKind::Io,
            &format!("Error creating {}", path.display()),
            Some(&err.to_string()),
        )
    })
}

/// Write one assembly file per block, in sequence order.
pub(super) fn write_assembly_files(plan: &LinkPlan) -> Result<Vec<ObjectUnit>, BuildError> {
    create_dir(&plan.asm_dir())?;
    create_dir(&plan.obj_dir())?;
    let units = plan.object_units();
    for (unit, block) in units.iter().zip(plan.blocks.iter_all()) {
        fs::write(&unit.asm_path, block.text()).map_err(|err| write_error(&unit.asm_path, &err))?;
    }
    Ok(units)
}

/// Synthesize and write the linker script.
pub(super) fn write_link_script(
    plan: &LinkPlan,
    backend: &dyn TargetBackend,
) -> Result<PathBuf, BuildError> {
    let path = plan.script_path();
    let script = linkscript::synthesize(plan, backend);
    fs::write(&path, script).map_err(|err| write_error(&path, &err))?;
    Ok(path)
}

/// Write the reproducibility args file: one line per planned invocation.
pub(super) fn write_args_file(
    plan: &LinkPlan,
    invocations: &[&ToolInvocation],
) -> Result<PathBuf, BuildError> {
    let path = plan.args_path();
    let mut text = String::new();
    for invocation in invocations {
        text.push_str(invocation.tool);
        text.push_str(": ");
        text.push_str(&invocation.command_line());
        text.push('\n');
    }
    fs::write(&path, text).map_err(|err| write_error(&path, &err))?;
    Ok(path)
}
