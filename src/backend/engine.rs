// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Lowering engine and per-library run orchestration.
//!
//! The engine owns the backend registry and drives method lowering. All of a
//! library's methods lower before any output file is written, so a lowering
//! failure leaves no partial artifacts behind.

use std::path::Path;
use std::thread;

use crate::bytecode::{LibraryUnit, MethodDescriptor, MethodIndex};
use crate::core::emit::Emitter;
use crate::core::error::{
    BuildError, BuildErrorKind, Diagnostic, RunError, RunReport, Severity,
};
use crate::core::registry::BackendRegistry;
use crate::core::target::{LowerCtx, Section, TargetBackend};
use crate::stack::{StackEvent, StackFrame};
use crate::targets::{self, sanitize_symbol};

use super::cli::{validate_cli, Cli, CliConfig};
use super::manifest;
use super::plan::LinkPlan;
use super::sequence::{sequence, AssemblyBlock};
use super::toolchain::{self, ToolchainOptions};

/// One lowered method: its block plus bookkeeping for tests and the map.
#[derive(Debug)]
pub struct LoweredMethod {
    pub block: AssemblyBlock,
    pub trace: Vec<StackEvent>,
    pub exported: Vec<String>,
    pub imported: Vec<String>,
}

/// All blocks of one library, ready for sequencing.
#[derive(Debug)]
pub struct LoweredLibrary {
    pub blocks: Vec<AssemblyBlock>,
    pub exported: Vec<String>,
    pub imported: Vec<String>,
    pub warnings: Vec<Diagnostic>,
}

pub struct Engine {
    registry: BackendRegistry,
}

impl Engine {
    /// Engine with all built-in backends; fails before any method is
    /// compiled if a lowering table has a coverage gap.
    pub fn new() -> Result<Self, BuildError> {
        Self::with_registry(targets::default_registry()?)
    }

    pub fn with_registry(registry: BackendRegistry) -> Result<Self, BuildError> {
        registry.verify_coverage()?;
        Ok(Self { registry })
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn backend(&self, name: &str) -> Result<&dyn TargetBackend, BuildError> {
        self.registry.resolve(name).ok_or_else(|| {
            BuildError::new(
                BuildErrorKind::Cli,
                "Unknown target architecture",
                Some(name),
            )
        })
    }

    /// Lower one method body. The frame is created here and checked empty
    /// after the return lowering; any imbalance is fatal.
    pub fn lower_method(
        &self,
        backend: &dyn TargetBackend,
        library: &str,
        methods: &MethodIndex,
        method: &MethodDescriptor,
    ) -> Result<LoweredMethod, BuildError> {
        let mut frame = StackFrame::new(
            method.id,
            method.name.clone(),
            backend.arg_registers(),
            backend.pointer_width(),
        );
        let mut emitter = Emitter::new(backend.comment_prefix());
        let symbol = sanitize_symbol(&method.name);
        emitter.directive(backend.section_directive(Section::Text));
        emitter.directive(backend.export_directive(&symbol));
        emitter.label(&symbol);

        let ctx = LowerCtx {
            library,
            method,
            methods,
        };
        for op in &method.ops {
            let lower = self
                .registry
                .lower_fn(backend.id(), op.family)
                .ok_or_else(|| {
                    BuildError::new(
                        BuildErrorKind::Internal,
                        "No lowering routine registered",
                        Some(&format!("{}/{}", backend.id(), op.family.as_str())),
                    )
                })?;
            lower(&ctx, op, &mut frame, &mut emitter)?;
        }
        let trace = frame.finish()?;

        let cleaned = backend.cleanup(&emitter.render());
        Ok(LoweredMethod {
            block: AssemblyBlock::new(
                symbol,
                Section::Text,
                method.priority,
                method.page_align,
                cleaned.text,
            ),
            trace,
            exported: cleaned.exported,
            imported: cleaned.imported,
        })
    }

    /// Lower every method of a library (plugs included) and emit its
    /// metadata blocks.
    pub fn lower_library(
        &self,
        backend: &dyn TargetBackend,
        unit: &LibraryUnit,
    ) -> Result<LoweredLibrary, BuildError> {
        let methods = MethodIndex::build(&unit.methods);
        let mut lowered = LoweredLibrary {
            blocks: Vec::new(),
            exported: Vec::new(),
            imported: Vec::new(),
            warnings: Vec::new(),
        };

        for method in &unit.methods {
            if let Some(plug_path) = unit.plugs.get(&method.id) {
                if !method.ops.is_empty() {
                    lowered.warnings.push(
                        Diagnostic::new(
                            Severity::Warning,
                            BuildError::new(
                                BuildErrorKind::Manifest,
                                "Plugged method also carries bytecode; the plug wins",
                                Some(&method.name),
                            ),
                        )
                        .with_library(&unit.name)
                        .with_method(&method.name),
                    );
                }
                let plugged = self.plugged_block(backend, method, plug_path)?;
                lowered.exported.extend(plugged.exported);
                lowered.imported.extend(plugged.imported);
                lowered.blocks.push(plugged.block);
                continue;
            }
            let method_result = self.lower_method(backend, &unit.name, &methods, method)?;
            lowered.exported.extend(method_result.exported);
            lowered.imported.extend(method_result.imported);
            lowered.blocks.push(method_result.block);
        }

        lowered.blocks.extend(metadata_blocks(backend, unit));
        Ok(lowered)
    }

    fn plugged_block(
        &self,
        backend: &dyn TargetBackend,
        method: &MethodDescriptor,
        plug_path: &Path,
    ) -> Result<LoweredMethod, BuildError> {
        let text = std::fs::read_to_string(plug_path).map_err(|_| {
            BuildError::new(
                BuildErrorKind::MissingInput,
                "Plugged assembly file does not exist",
                Some(&plug_path.display().to_string()),
            )
        })?;
        let cleaned = backend.cleanup(&text);
        Ok(LoweredMethod {
            block: AssemblyBlock::new(
                sanitize_symbol(&method.name),
                Section::Text,
                method.priority,
                method.page_align,
                cleaned.text,
            ),
            trace: Vec::new(),
            exported: cleaned.exported,
            imported: cleaned.imported,
        })
    }
}

/// Metadata tables: one data block with the type/field tables, one bss block
/// reserving static storage per type. Both sort after method code.
const METADATA_PRIORITY: i64 = 1000;

fn metadata_blocks(backend: &dyn TargetBackend, unit: &LibraryUnit) -> Vec<AssemblyBlock> {
    if unit.types.is_empty() {
        return Vec::new();
    }
    let directives = backend.data_directives();
    let library = sanitize_symbol(&unit.name);

    let mut data = Emitter::new(backend.comment_prefix());
    let table_symbol = format!("{library}_typetable");
    data.directive(backend.section_directive(Section::Data));
    data.directive(backend.export_directive(&table_symbol));
    data.label(&table_symbol);
    data.inst(format!("{} {}", directives.word, unit.types.len()));
    for ty in &unit.types {
        data.label(format!("{library}_type_{}", sanitize_symbol(&ty.name)));
        data.inst(format!(
            "{} {}, {}, {}",
            directives.word,
            ty.id,
            ty.size,
            ty.fields.len()
        ));
        for field in &ty.fields {
            data.inst(format!("{} {}, {}", directives.word, field.offset, field.size));
        }
    }

    let mut bss = Emitter::new(backend.comment_prefix());
    let statics_symbol = format!("{library}_statics");
    bss.directive(backend.section_directive(Section::Bss));
    bss.directive(backend.export_directive(&statics_symbol));
    bss.label(&statics_symbol);
    for ty in &unit.types {
        bss.label(format!("{library}_static_{}", sanitize_symbol(&ty.name)));
        bss.inst(format!("{} {}", directives.reserve, ty.size));
    }

    vec![
        AssemblyBlock::new(
            table_symbol,
            Section::Data,
            METADATA_PRIORITY,
            false,
            backend.cleanup(&data.render()).text,
        ),
        AssemblyBlock::new(
            statics_symbol,
            Section::Bss,
            METADATA_PRIORITY,
            false,
            backend.cleanup(&bss.render()).text,
        ),
    ]
}

/// Build one library end to end; never panics across the library boundary.
pub fn build_library(
    engine: &Engine,
    backend: &dyn TargetBackend,
    unit: &LibraryUnit,
    out_root: &Path,
    options: ToolchainOptions,
) -> RunReport {
    let lowered = match engine.lower_library(backend, unit) {
        Ok(lowered) => lowered,
        Err(err) => {
            return RunReport::failure(
                &unit.name,
                vec![Diagnostic::new(Severity::Error, err).with_library(&unit.name)],
            )
        }
    };
    let blocks = sequence(lowered.blocks);
    let plan = LinkPlan::new(unit, backend.id(), blocks, out_root);
    match toolchain::run_pipeline(&plan, backend, options) {
        Ok(artifacts) => {
            let mut report = RunReport::success(&unit.name, artifacts);
            for warning in lowered.warnings {
                report.push_diagnostic(warning);
            }
            report
        }
        Err(err) => RunReport::failure(
            &unit.name,
            vec![Diagnostic::new(Severity::Error, err).with_library(&unit.name)],
        ),
    }
}

/// Run the backend with command-line arguments.
pub fn run_with_cli(cli: &Cli) -> Result<Vec<RunReport>, RunError> {
    let config = validate_cli(cli)?;
    run_with_config(&config)
}

pub fn run_with_config(config: &CliConfig) -> Result<Vec<RunReport>, RunError> {
    let engine = Engine::new()?;
    let manifest = manifest::load_manifest(&config.manifest).map_err(|err| {
        let diag = Diagnostic::new(Severity::Error, err.clone())
            .with_file(config.manifest.display().to_string());
        RunError::new(err, vec![diag])
    })?;
    let arch_name = config
        .arch_override
        .clone()
        .unwrap_or_else(|| manifest.arch.clone());
    let backend = engine.backend(&arch_name)?;
    let options = ToolchainOptions {
        dry_run: config.dry_run,
        master_iso: config.master_iso,
    };

    let mut reports = if config.jobs > 1 {
        thread::scope(|scope| {
            let handles: Vec<_> = manifest
                .libraries
                .iter()
                .map(|unit| {
                    let engine = &engine;
                    scope.spawn(move || build_library(engine, backend, unit, &config.out_dir, options))
                })
                .collect();
            handles
                .into_iter()
                .zip(manifest.libraries.iter())
                .map(|(handle, unit)| match handle.join() {
                    Ok(report) => report,
                    Err(_) => RunReport::failure(
                        &unit.name,
                        vec![Diagnostic::new(
                            Severity::Error,
                            BuildError::new(
                                BuildErrorKind::Internal,
                                "Library worker panicked",
                                Some(&unit.name),
                            ),
                        )
                        .with_library(&unit.name)],
                    ),
                })
                .collect()
        })
    } else {
        manifest
            .libraries
            .iter()
            .map(|unit| build_library(&engine, backend, unit, &config.out_dir, options))
            .collect::<Vec<_>>()
    };

    if config.warning_policy.treat_warnings_as_errors {
        for report in &mut reports {
            report.escalate_warnings();
        }
    }
    Ok(reports)
}
