// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Error types, diagnostics, and reporting for the code generator.

use std::fmt;
use std::path::PathBuf;

/// Categories of build errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildErrorKind {
    /// Bad command-line usage.
    Cli,
    /// Internal-consistency violation: stack imbalance, unregistered opcode,
    /// invalid register width. These mean the generator itself is wrong.
    Internal,
    /// Filesystem failure outside the missing-input contract.
    Io,
    /// Malformed build manifest.
    Manifest,
    /// A required input file does not exist at its expected path.
    MissingInput,
    /// An external tool exited non-zero or could not be spawned.
    Tool,
    /// A source construct no backend can lower.
    Unsupported,
}

fn format_error(msg: &str, param: Option<&str>) -> String {
    match param {
        Some(param) => format!("{msg}: {param}"),
        None => msg.to_string(),
    }
}

/// A build error with a kind and message.
#[derive(Debug, Clone)]
pub struct BuildError {
    kind: BuildErrorKind,
    message: String,
}

impl BuildError {
    pub fn new(kind: BuildErrorKind, msg: &str, param: Option<&str>) -> Self {
        Self {
            kind,
            message: format_error(msg, param),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> BuildErrorKind {
        self.kind
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for BuildError {}

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// Default diagnostic code per error kind.
pub fn default_diagnostic_code(kind: BuildErrorKind) -> &'static str {
    match kind {
        BuildErrorKind::Cli => "BF0101",
        BuildErrorKind::Internal => "BF0001",
        BuildErrorKind::Io => "BF0102",
        BuildErrorKind::Manifest => "BF0103",
        BuildErrorKind::MissingInput => "BF0002",
        BuildErrorKind::Tool => "BF0004",
        BuildErrorKind::Unsupported => "BF0003",
    }
}

/// A diagnostic message with build context.
///
/// Diagnostics carry library/method/file context so a driving build tool can
/// aggregate results across many libraries instead of reading exit codes.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub library: Option<String>,
    pub method: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub notes: Vec<String>,
    pub help: Vec<String>,
    error: BuildError,
}

impl Diagnostic {
    pub fn new(severity: Severity, error: BuildError) -> Self {
        Self {
            severity,
            code: default_diagnostic_code(error.kind()).to_string(),
            library: None,
            method: None,
            file: None,
            line: None,
            notes: Vec::new(),
            help: Vec::new(),
            error,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_library(mut self, library: impl Into<String>) -> Self {
        self.library = Some(library.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help.push(help.into());
        self
    }

    pub fn message(&self) -> &str {
        self.error.message()
    }

    pub fn kind(&self) -> BuildErrorKind {
        self.error.kind()
    }
}

/// Outcome of building one library.
#[derive(Debug, Clone)]
pub struct RunReport {
    library: String,
    diagnostics: Vec<Diagnostic>,
    artifacts: Vec<PathBuf>,
    failed: bool,
}

impl RunReport {
    pub fn success(library: impl Into<String>, artifacts: Vec<PathBuf>) -> Self {
        Self {
            library: library.into(),
            diagnostics: Vec::new(),
            artifacts,
            failed: false,
        }
    }

    pub fn failure(library: impl Into<String>, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            library: library.into(),
            diagnostics,
            artifacts: Vec::new(),
            failed: true,
        }
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn push_diagnostic(&mut self, diag: Diagnostic) {
        self.diagnostics.push(diag);
    }

    pub fn artifacts(&self) -> &[PathBuf] {
        &self.artifacts
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    /// Promote warnings to errors (the --Werror policy).
    pub fn escalate_warnings(&mut self) {
        for diag in &mut self.diagnostics {
            if diag.severity == Severity::Warning {
                diag.severity = Severity::Error;
                self.failed = true;
            }
        }
    }
}

/// A run-level failure that prevented building anything at all.
///
/// Per-library failures are reported through [`RunReport`] instead so that a
/// failed library never takes down its siblings.
#[derive(Debug, Clone)]
pub struct RunError {
    error: BuildError,
    diagnostics: Vec<Diagnostic>,
}

impl RunError {
    pub fn new(error: BuildError, diagnostics: Vec<Diagnostic>) -> Self {
        Self { error, diagnostics }
    }

    pub fn error(&self) -> &BuildError {
        &self.error
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for RunError {}

impl From<BuildError> for RunError {
    fn from(error: BuildError) -> Self {
        Self::new(error, Vec::new())
    }
}
