// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// CLI entrypoint for bootforge.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::process;

use clap::Parser;
use serde_json::json;

use bootforge::backend::cli::{validate_cli, Cli, DiagnosticsSinkConfig, OutputFormat};
use bootforge::backend::run_with_config;
use bootforge::bytecode::OpcodeFamily;
use bootforge::core::error::{Diagnostic, Severity};
use bootforge::targets::default_registry;

struct DiagnosticsSink {
    writer: Option<Box<dyn Write>>,
}

impl DiagnosticsSink {
    fn from_config(config: &DiagnosticsSinkConfig) -> io::Result<Self> {
        match config {
            DiagnosticsSinkConfig::Disabled => Ok(Self { writer: None }),
            DiagnosticsSinkConfig::Stderr => Ok(Self {
                writer: Some(Box::new(io::stderr())),
            }),
            DiagnosticsSinkConfig::File { path, append } => {
                let mut opts = OpenOptions::new();
                opts.create(true).write(true);
                if *append {
                    opts.append(true);
                } else {
                    opts.truncate(true);
                }
                let file = opts.open(path)?;
                Ok(Self {
                    writer: Some(Box::new(file)),
                })
            }
        }
    }

    fn emit_line(&mut self, line: &str) {
        if let Some(writer) = &mut self.writer {
            let _ = writeln!(writer, "{line}");
        }
    }

    fn emit_diagnostics(
        &mut self,
        diagnostics: &[Diagnostic],
        suppress_warnings: bool,
        format: OutputFormat,
    ) {
        for diag in diagnostics {
            if suppress_warnings && diag.severity == Severity::Warning {
                continue;
            }
            self.emit_line(&format_diagnostic_line(diag, format));
        }
    }
}

fn severity_to_str(severity: Severity) -> &'static str {
    match severity {
        Severity::Warning => "warning",
        Severity::Error => "error",
    }
}

fn format_diagnostic_line(diag: &Diagnostic, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => json!({
            "severity": severity_to_str(diag.severity),
            "code": diag.code,
            "message": diag.message(),
            "library": diag.library,
            "method": diag.method,
            "file": diag.file,
            "line": diag.line,
            "notes": diag.notes,
            "help": diag.help,
        })
        .to_string(),
        OutputFormat::Text => {
            let mut line = format!(
                "{}[{}]: {}",
                severity_to_str(diag.severity),
                diag.code,
                diag.message()
            );
            if let Some(library) = &diag.library {
                line.push_str(&format!(" (library {library}"));
                if let Some(method) = &diag.method {
                    line.push_str(&format!(", method {method}"));
                }
                line.push(')');
            }
            for note in &diag.notes {
                line.push_str(&format!("\n  note: {note}"));
            }
            for help in &diag.help {
                line.push_str(&format!("\n  help: {help}"));
            }
            line
        }
    }
}

fn print_targets(format: OutputFormat) -> i32 {
    let registry = match default_registry() {
        Ok(registry) => registry,
        Err(err) => {
            eprintln!("error: {err}");
            return 1;
        }
    };
    let families: Vec<&str> = OpcodeFamily::ALL.iter().map(|f| f.as_str()).collect();
    match format {
        OutputFormat::Json => {
            let targets: Vec<serde_json::Value> = registry
                .backends()
                .map(|backend| {
                    json!({
                        "id": backend.id().as_str(),
                        "description": backend.describe(),
                        "arg_registers": backend.arg_registers(),
                        "families": families,
                    })
                })
                .collect();
            println!("{}", json!({ "targets": targets }));
        }
        OutputFormat::Text => {
            for backend in registry.backends() {
                println!("{:<8} {}", backend.id().as_str(), backend.describe());
            }
            println!("families: {}", families.join(" "));
        }
    }
    0
}

fn main() {
    let cli = Cli::parse();
    if cli.print_targets {
        process::exit(print_targets(cli.format));
    }

    let config = match validate_cli(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            process::exit(1);
        }
    };
    let mut sink = match DiagnosticsSink::from_config(&config.sink) {
        Ok(sink) => sink,
        Err(err) => {
            eprintln!("error: cannot open diagnostics sink: {err}");
            process::exit(1);
        }
    };

    match run_with_config(&config) {
        Ok(reports) => {
            let mut failed = false;
            for report in &reports {
                if report.failed() {
                    failed = true;
                }
                if report.failed() || !config.quiet {
                    sink.emit_diagnostics(
                        report.diagnostics(),
                        config.warning_policy.suppress_warnings,
                        config.format,
                    );
                }
                if !config.quiet {
                    match config.format {
                        OutputFormat::Json => println!(
                            "{}",
                            json!({
                                "library": report.library(),
                                "status": if report.failed() { "failed" } else { "ok" },
                                "artifacts": report
                                    .artifacts()
                                    .iter()
                                    .map(|path| path.display().to_string())
                                    .collect::<Vec<_>>(),
                            })
                        ),
                        OutputFormat::Text => {
                            if report.failed() {
                                println!("failed {}", report.library());
                            } else {
                                println!(
                                    "ok {} ({} artifacts)",
                                    report.library(),
                                    report.artifacts().len()
                                );
                            }
                        }
                    }
                }
            }
            process::exit(i32::from(failed));
        }
        Err(err) => {
            sink.emit_diagnostics(err.diagnostics(), false, config.format);
            eprintln!("error: {err}");
            process::exit(1);
        }
    }
}
