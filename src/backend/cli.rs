// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Command-line interface parsing and argument validation.

use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

use crate::core::error::{BuildError, BuildErrorKind};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const LONG_ABOUT: &str = "\
AOT code-generation and linking backend for bare-metal images.

Reads a JSON build manifest describing each library's methods, metadata
types, plugs, and link parameters; lowers every method body to the selected
architecture; and drives the external assembler/linker toolchain to produce
the final artifacts. Each library is an independent unit of work: a failing
library never takes down its siblings.";

#[derive(Parser, Debug)]
#[command(
    name = "bootforge",
    version = VERSION,
    about = "Bytecode-to-native backend (x86/x86_64/mips32) with linker-script synthesis",
    long_about = LONG_ABOUT
)]
pub struct Cli {
    #[arg(
        value_name = "MANIFEST",
        long_help = "JSON build manifest produced by the front end. Required unless --print-targets is given."
    )]
    pub manifest: Option<PathBuf>,
    #[arg(
        long = "format",
        value_enum,
        default_value_t = OutputFormat::Text,
        long_help = "Select global CLI output format. text is default; json enables machine-readable output where supported."
    )]
    pub format: OutputFormat,
    #[arg(
        short = 'o',
        long = "out-dir",
        value_name = "DIR",
        default_value = "build",
        long_help = "Root output directory. Each library builds into its own subdirectory, so parallel library builds never contend on file names."
    )]
    pub out_dir: PathBuf,
    #[arg(
        long = "arch",
        value_name = "ID",
        long_help = "Override the manifest's target architecture (x86, x86_64, mips32)."
    )]
    pub arch: Option<String>,
    #[arg(
        short = 'q',
        long = "quiet",
        action = ArgAction::SetTrue,
        long_help = "Suppress diagnostic output for successful library builds. Errors are still reported unless --no-error is set."
    )]
    pub quiet: bool,
    #[arg(
        short = 'E',
        long = "error",
        value_name = "FILE",
        long_help = "Write diagnostics to FILE instead of stderr."
    )]
    pub error_file: Option<PathBuf>,
    #[arg(
        long = "error-append",
        action = ArgAction::SetTrue,
        requires = "error_file",
        long_help = "Append diagnostics to --error FILE instead of truncating it."
    )]
    pub error_append: bool,
    #[arg(
        long = "no-error",
        action = ArgAction::SetTrue,
        conflicts_with_all = ["error_file", "error_append"],
        long_help = "Disable all diagnostic output routing."
    )]
    pub no_error: bool,
    #[arg(
        short = 'w',
        long = "no-warn",
        action = ArgAction::SetTrue,
        conflicts_with = "warn_error",
        long_help = "Suppress warning diagnostics."
    )]
    pub no_warn: bool,
    #[arg(
        long = "Werror",
        action = ArgAction::SetTrue,
        long_help = "Treat warnings as errors (non-zero exit status)."
    )]
    pub warn_error: bool,
    #[arg(
        short = 'j',
        long = "jobs",
        value_name = "N",
        long_help = "Build up to N libraries in parallel, one worker per library. Method lowering within a library stays sequential."
    )]
    pub jobs: Option<usize>,
    #[arg(
        long = "dry-run",
        action = ArgAction::SetTrue,
        long_help = "Write assembly files, link scripts, and args files, but invoke no external tool."
    )]
    pub dry_run: bool,
    #[arg(
        long = "iso",
        action = ArgAction::SetTrue,
        long_help = "Master a bootable ISO for executable libraries that carry an iso spec in the manifest."
    )]
    pub iso: bool,
    #[arg(
        long = "print-targets",
        action = ArgAction::SetTrue,
        long_help = "Print deterministic target-backend metadata and exit."
    )]
    pub print_targets: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Where diagnostics go.
#[derive(Debug, Clone)]
pub enum DiagnosticsSinkConfig {
    Disabled,
    Stderr,
    File { path: PathBuf, append: bool },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WarningPolicy {
    pub suppress_warnings: bool,
    pub treat_warnings_as_errors: bool,
}

/// Validated CLI configuration.
#[derive(Debug)]
pub struct CliConfig {
    pub manifest: PathBuf,
    pub out_dir: PathBuf,
    pub arch_override: Option<String>,
    pub format: OutputFormat,
    pub quiet: bool,
    pub sink: DiagnosticsSinkConfig,
    pub warning_policy: WarningPolicy,
    pub jobs: usize,
    pub dry_run: bool,
    pub master_iso: bool,
}

pub fn validate_cli(cli: &Cli) -> Result<CliConfig, BuildError> {
    let manifest = cli.manifest.clone().ok_or_else(|| {
        BuildError::new(BuildErrorKind::Cli, "No build manifest given", None)
    })?;
    let jobs = cli.jobs.unwrap_or(1);
    if jobs == 0 {
        return Err(BuildError::new(
            BuildErrorKind::Cli,
            "--jobs must be at least 1",
            None,
        ));
    }
    Ok(CliConfig {
        manifest,
        out_dir: cli.out_dir.clone(),
        arch_override: cli.arch.clone(),
        format: cli.format,
        quiet: cli.quiet,
        sink: sink_config(cli),
        warning_policy: WarningPolicy {
            suppress_warnings: cli.no_warn,
            treat_warnings_as_errors: cli.warn_error,
        },
        jobs,
        dry_run: cli.dry_run,
        master_iso: cli.iso,
    })
}

pub fn sink_config(cli: &Cli) -> DiagnosticsSinkConfig {
    if cli.no_error {
        return DiagnosticsSinkConfig::Disabled;
    }
    match &cli.error_file {
        Some(path) => DiagnosticsSinkConfig::File {
            path: path.clone(),
            append: cli.error_append,
        },
        None => DiagnosticsSinkConfig::Stderr,
    }
}
