// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;

use super::cli::{CliConfig, DiagnosticsSinkConfig, OutputFormat, WarningPolicy};
use super::engine::{build_library, run_with_config, Engine};
use super::manifest::parse_manifest;
use super::sequence::sequence;
use super::toolchain::ToolchainOptions;
use crate::bytecode::literal::{self, Literal};
use crate::bytecode::{
    BytecodeOperation, LibraryUnit, MethodDescriptor, MethodIndex, OpcodeFamily, OutputKind,
    TypeDescriptor,
};
use crate::core::error::{BuildErrorKind, Severity};
use crate::core::registry::BackendRegistry;
use crate::core::target::Section;
use crate::stack::StackEvent;
use crate::targets::x86::{self, X86Backend};

fn op(family: OpcodeFamily) -> BytecodeOperation {
    BytecodeOperation::new(family, Vec::new(), 0)
}

fn ldc_i32(value: i32) -> BytecodeOperation {
    BytecodeOperation::new(
        OpcodeFamily::LoadConst,
        literal::encode(&Literal::Int {
            value: i64::from(value),
            width: 4,
        }),
        0,
    )
}

fn call_op(target: u32) -> BytecodeOperation {
    BytecodeOperation::new(OpcodeFamily::Call, target.to_le_bytes().to_vec(), 0)
}

fn method(
    id: u32,
    name: &str,
    args: u32,
    returns: bool,
    priority: i64,
    ops: Vec<BytecodeOperation>,
) -> MethodDescriptor {
    MethodDescriptor {
        id,
        name: name.to_string(),
        arg_count: args,
        returns_value: returns,
        ops,
        priority,
        page_align: false,
    }
}

fn kernel_unit() -> LibraryUnit {
    LibraryUnit {
        name: "kernel".to_string(),
        kind: OutputKind::Executable,
        base_address: 0x0010_0000,
        load_offset: 0,
        entry_symbol: None,
        dependencies: Vec::new(),
        methods: vec![
            method(
                1,
                "Kernel_Main",
                0,
                false,
                0,
                vec![
                    op(OpcodeFamily::MethodStart),
                    ldc_i32(1),
                    ldc_i32(2),
                    ldc_i32(3),
                    call_op(2),
                    op(OpcodeFamily::MethodEnd),
                ],
            ),
            method(2, "Console_Clear", 3, false, 10, vec![op(OpcodeFamily::Nop)]),
        ],
        types: Vec::new(),
        plugs: HashMap::new(),
        iso: None,
    }
}

fn net_depth(trace: &[StackEvent]) -> i64 {
    trace.iter().fold(0i64, |depth, event| match event {
        StackEvent::Push { .. } => depth + 1,
        StackEvent::Pop { .. } => depth - 1,
    })
}

fn dry_config(manifest: PathBuf, out_dir: PathBuf) -> CliConfig {
    CliConfig {
        manifest,
        out_dir,
        arch_override: None,
        format: OutputFormat::Text,
        quiet: true,
        sink: DiagnosticsSinkConfig::Disabled,
        warning_policy: WarningPolicy::default(),
        jobs: 1,
        dry_run: true,
        master_iso: false,
    }
}

#[test]
fn end_to_end_two_methods_balance_and_order() {
    let engine = Engine::new().unwrap();
    let backend = engine.backend("x86").unwrap();
    let unit = kernel_unit();
    let index = MethodIndex::build(&unit.methods);

    // Every method's trace nets out to zero.
    for descriptor in &unit.methods {
        let lowered = engine
            .lower_method(backend, &unit.name, &index, descriptor)
            .unwrap();
        assert_eq!(net_depth(&lowered.trace), 0, "{}", descriptor.name);
    }

    let lowered = engine.lower_library(backend, &unit).unwrap();
    let blocks = sequence(lowered.blocks);
    let text_ids: Vec<&str> = blocks
        .section(Section::Text)
        .iter()
        .map(|block| block.id())
        .collect();
    assert_eq!(text_ids, vec!["Kernel_Main", "Console_Clear"]);
}

#[test]
fn lowering_is_deterministic() {
    let engine = Engine::new().unwrap();
    let backend = engine.backend("x86").unwrap();
    let unit = kernel_unit();
    let index = MethodIndex::build(&unit.methods);
    let first = engine
        .lower_method(backend, &unit.name, &index, &unit.methods[0])
        .unwrap();
    let second = engine
        .lower_method(backend, &unit.name, &index, &unit.methods[0])
        .unwrap();
    assert_eq!(first.block.text(), second.block.text());
    assert_eq!(first.trace, second.trace);
}

#[test]
fn lowered_text_collects_call_imports() {
    let engine = Engine::new().unwrap();
    let backend = engine.backend("x86").unwrap();
    let unit = kernel_unit();
    let index = MethodIndex::build(&unit.methods);
    let lowered = engine
        .lower_method(backend, &unit.name, &index, &unit.methods[0])
        .unwrap();
    assert_eq!(lowered.exported, vec!["Kernel_Main".to_string()]);
    assert_eq!(lowered.imported, vec!["Console_Clear".to_string()]);
    assert!(lowered.block.text().starts_with("[BITS 32]\n"));
}

#[test]
fn stack_imbalance_aborts_with_the_method_id() {
    let engine = Engine::new().unwrap();
    let backend = engine.backend("x86").unwrap();
    let unit = kernel_unit();
    let index = MethodIndex::build(&unit.methods);
    // A lone load-constant leaves one item on the frame.
    let broken = method(9, "Broken_Method", 0, false, 0, vec![ldc_i32(1)]);
    let err = engine
        .lower_method(backend, &unit.name, &index, &broken)
        .unwrap_err();
    assert_eq!(err.kind(), BuildErrorKind::Internal);
    assert!(err.message().contains("Broken_Method"));
}

#[test]
fn partial_registry_fails_at_startup_with_nothing_written() {
    struct OnlyNop;
    const TABLE: crate::core::target::LowerTable = &[(OpcodeFamily::Nop, |_, _, _, emitter| {
        emitter.inst("nop");
        Ok(())
    })];
    impl crate::core::target::TargetBackend for OnlyNop {
        fn id(&self) -> crate::core::arch::ArchId {
            crate::core::arch::ArchId::new("toy")
        }
        fn describe(&self) -> &'static str {
            "toy"
        }
        fn pointer_width(&self) -> u32 {
            4
        }
        fn arg_registers(&self) -> &'static [&'static str] {
            &[]
        }
        fn return_register(&self) -> &'static str {
            "r0"
        }
        fn comment_prefix(&self) -> &'static str {
            "; "
        }
        fn lowerings(&self) -> crate::core::target::LowerTable {
            TABLE
        }
        fn section_directive(&self, section: Section) -> String {
            format!("section .{}", section.as_str())
        }
        fn export_directive(&self, symbol: &str) -> String {
            format!("global {symbol}")
        }
        fn data_directives(&self) -> crate::core::target::DataDirectives {
            crate::core::target::DataDirectives {
                word: "dd",
                byte: "db",
                reserve: "resb",
            }
        }
        fn cleanup(&self, text: &str) -> crate::core::target::CleanupResult {
            crate::core::target::CleanupResult {
                text: text.to_string(),
                ..Default::default()
            }
        }
        fn output_format(&self) -> &'static str {
            "elf32-i386"
        }
        fn output_arch(&self) -> &'static str {
            "i386"
        }
        fn assemble_command(
            &self,
            _input: &Path,
            _output: &Path,
        ) -> crate::core::target::ToolInvocation {
            crate::core::target::ToolInvocation::new("as", "true", Vec::new())
        }
        fn link_executable_command(
            &self,
            _script: &Path,
            _output: &Path,
            _objects: &[PathBuf],
        ) -> crate::core::target::ToolInvocation {
            crate::core::target::ToolInvocation::new("ld", "true", Vec::new())
        }
        fn link_library_command(
            &self,
            _script: &Path,
            _output: &Path,
            _objects: &[PathBuf],
        ) -> crate::core::target::ToolInvocation {
            crate::core::target::ToolInvocation::new("ld", "true", Vec::new())
        }
    }

    let out = tempfile::tempdir().unwrap();
    let mut registry = BackendRegistry::new();
    registry.register(Box::new(OnlyNop)).unwrap();
    let err = Engine::with_registry(registry).unwrap_err();
    assert_eq!(err.kind(), BuildErrorKind::Internal);
    assert!(err.message().contains("toy/"));
    // Startup failure happens before any output file exists.
    assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn unsupported_construct_fails_the_library_without_partial_artifacts() {
    let engine = Engine::new().unwrap();
    let backend = engine.backend("x86").unwrap();
    let out = tempfile::tempdir().unwrap();
    let mut unit = kernel_unit();
    unit.methods.push(method(
        3,
        "Object_ctor",
        0,
        false,
        0,
        vec![op(OpcodeFamily::NewObject)],
    ));
    let report = build_library(
        &engine,
        backend,
        &unit,
        out.path(),
        ToolchainOptions {
            dry_run: true,
            master_iso: false,
        },
    );
    assert!(report.failed());
    assert_eq!(report.diagnostics().len(), 1);
    assert_eq!(report.diagnostics()[0].kind(), BuildErrorKind::Unsupported);
    assert!(!out.path().join("kernel").exists());
}

#[test]
fn missing_plug_file_reports_the_expected_path() {
    let engine = Engine::new().unwrap();
    let backend = engine.backend("x86").unwrap();
    let mut unit = kernel_unit();
    unit.plugs
        .insert(1, PathBuf::from("plugs/absent_io_port.asm"));
    let err = engine.lower_library(backend, &unit).unwrap_err();
    assert_eq!(err.kind(), BuildErrorKind::MissingInput);
    assert!(err.message().contains("plugs/absent_io_port.asm"));
}

#[test]
fn plug_bypasses_lowering_and_keeps_its_symbols() {
    let dir = tempfile::tempdir().unwrap();
    let plug_path = dir.path().join("write_port.asm");
    fs::write(
        &plug_path,
        "global Kernel_Main\nKernel_Main:\n    out 0x3F8, al\n    ret\n",
    )
    .unwrap();

    let engine = Engine::new().unwrap();
    let backend = engine.backend("x86").unwrap();
    let mut unit = kernel_unit();
    unit.plugs.insert(1, plug_path);
    let lowered = engine.lower_library(backend, &unit).unwrap();
    // The plug kept its hand-written body and raised the bytecode warning.
    assert!(lowered.blocks[0].text().contains("out 0x3F8, al"));
    assert_eq!(lowered.warnings.len(), 1);
    assert_eq!(lowered.warnings[0].severity, Severity::Warning);
}

#[test]
fn metadata_tables_land_in_data_and_bss() {
    let engine = Engine::new().unwrap();
    let backend = engine.backend("x86").unwrap();
    let mut unit = kernel_unit();
    unit.types.push(TypeDescriptor {
        id: 1,
        name: "Object".to_string(),
        size: 8,
        fields: vec![crate::bytecode::FieldDescriptor {
            name: "vtable".to_string(),
            offset: 0,
            size: 4,
        }],
    });
    let lowered = engine.lower_library(backend, &unit).unwrap();
    let blocks = sequence(lowered.blocks);
    let data = blocks.section(Section::Data);
    assert_eq!(data.len(), 1);
    assert!(data[0].text().contains("kernel_type_Object"));
    assert!(data[0].text().contains("dd 1, 8, 1"));
    let bss = blocks.section(Section::Bss);
    assert_eq!(bss.len(), 1);
    assert!(bss[0].text().contains("resb 8"));
}

#[test]
fn dry_run_writes_inputs_but_no_image() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = dir.path().join("build.json");
    let manifest = json!({
        "arch": "x86",
        "libraries": [{
            "name": "kernel",
            "base_address": "0x100000",
            "load_offset": "0xC0000000",
            "methods": [{
                "id": 1,
                "name": "Kernel_Main",
                "ops": [
                    {"op": "enter"},
                    {"op": "leave"}
                ]
            }]
        }]
    });
    fs::write(&manifest_path, manifest.to_string()).unwrap();
    let out_dir = dir.path().join("build");
    let reports = run_with_config(&dry_config(manifest_path, out_dir.clone())).unwrap();
    assert_eq!(reports.len(), 1);
    assert!(!reports[0].failed());

    let lib_dir = out_dir.join("kernel");
    assert!(lib_dir.join("asm/Kernel_Main.asm").exists());
    assert!(lib_dir.join("kernel.ld").exists());
    assert!(lib_dir.join("kernel.args").exists());
    assert!(!lib_dir.join("kernel.elf").exists());

    let script = fs::read_to_string(lib_dir.join("kernel.ld")).unwrap();
    assert!(script.contains("ENTRY(Kernel_Main)"));
    assert!(script.contains("AT(ADDR(.text) - 0xC0000000)"));
    assert!(script.contains("text_start = .;"));
    assert!(script.contains("text_end = .;"));

    let args = fs::read_to_string(lib_dir.join("kernel.args")).unwrap();
    assert!(args.contains("nasm: nasm -f elf -o"));
    assert!(args.contains("ld: ld --fatal-warnings -T"));
}

#[test]
fn sibling_libraries_survive_a_failing_one() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = dir.path().join("build.json");
    let manifest = json!({
        "arch": "x86",
        "libraries": [
            {
                "name": "broken",
                "base_address": 0,
                "methods": [{"id": 1, "name": "Ctor", "ops": [{"op": "newobj"}]}]
            },
            {
                "name": "healthy",
                "base_address": 0,
                "methods": [{"id": 1, "name": "Main", "ops": [{"op": "enter"}, {"op": "leave"}]}]
            }
        ]
    });
    fs::write(&manifest_path, manifest.to_string()).unwrap();
    let reports =
        run_with_config(&dry_config(manifest_path, dir.path().join("build"))).unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports[0].failed());
    assert!(!reports[1].failed());
}

#[test]
fn parallel_jobs_build_every_library() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = dir.path().join("build.json");
    let manifest = json!({
        "arch": "mips32",
        "libraries": [
            {
                "name": "rt",
                "kind": "library",
                "base_address": "0x200000",
                "methods": [{"id": 1, "name": "Rt_Init", "ops": [{"op": "enter"}, {"op": "leave"}]}]
            },
            {
                "name": "hw",
                "kind": "library",
                "base_address": "0x200000",
                "dependencies": ["rt"],
                "methods": [{"id": 1, "name": "Hw_Init", "ops": [{"op": "nop"}]}]
            }
        ]
    });
    fs::write(&manifest_path, manifest.to_string()).unwrap();
    let mut config = dry_config(manifest_path, dir.path().join("build"));
    config.jobs = 2;
    let reports = run_with_config(&config).unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|report| !report.failed()));
    // The dependent library slid its base by one slide unit.
    let script = fs::read_to_string(dir.path().join("build/hw/hw.ld")).unwrap();
    assert!(script.contains(". = 0x300000;"));
    assert!(script.contains("GROUP(rt.so)"));
}

#[test]
fn werror_escalates_the_plug_warning() {
    let dir = tempfile::tempdir().unwrap();
    let plug_path = dir.path().join("plug.asm");
    fs::write(&plug_path, "Plugged:\n    ret\n").unwrap();
    let manifest_path = dir.path().join("build.json");
    let manifest = json!({
        "arch": "x86",
        "libraries": [{
            "name": "kernel",
            "base_address": 0,
            "plugs": {"1": plug_path.to_string_lossy()},
            "methods": [{"id": 1, "name": "Plugged", "ops": [{"op": "nop"}]}]
        }]
    });
    fs::write(&manifest_path, manifest.to_string()).unwrap();
    let mut config = dry_config(manifest_path, dir.path().join("build"));
    config.warning_policy.treat_warnings_as_errors = true;
    let reports = run_with_config(&config).unwrap();
    assert!(reports[0].failed());
    assert_eq!(reports[0].diagnostics()[0].severity, Severity::Error);
}

#[test]
fn unknown_arch_is_a_run_error() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = dir.path().join("build.json");
    let manifest = json!({
        "arch": "m68k",
        "libraries": [{
            "name": "kernel",
            "base_address": 0,
            "methods": [{"id": 1, "name": "Main", "ops": []}]
        }]
    });
    fs::write(&manifest_path, manifest.to_string()).unwrap();
    let err = run_with_config(&dry_config(manifest_path, dir.path().join("build"))).unwrap_err();
    assert_eq!(err.error().kind(), BuildErrorKind::Cli);
    assert!(err.error().message().contains("m68k"));
}

#[test]
fn manifest_round_trips_through_the_parser() {
    let manifest = parse_manifest(&json!({
        "arch": "x86_64",
        "libraries": [{
            "name": "kernel",
            "base_address": 1048576,
            "methods": [{
                "id": 1,
                "name": "Main",
                "returns": true,
                "ops": [{"op": "enter"}, {"op": "ldc", "bytes": "0401000000"}, {"op": "leave"}]
            }]
        }]
    }))
    .unwrap();
    let engine = Engine::new().unwrap();
    let backend = engine.backend(&manifest.arch).unwrap();
    let unit = &manifest.libraries[0];
    let lowered = engine.lower_library(backend, unit).unwrap();
    assert_eq!(lowered.blocks.len(), 1);
    // The 4-byte literal landed in rdi's dword alias, then returned in rax.
    assert!(lowered.blocks[0].text().contains("mov edi, 1"));
    assert!(lowered.blocks[0].text().contains("mov rax, rdi"));
}

#[test]
fn x86_cleanup_separates_exports_from_imports() {
    let cleaned = X86Backend.cleanup(
        "[BITS 32]\nglobal A\nA:\nextern B\n    call B\nglobal A\n",
    );
    assert_eq!(cleaned.exported, vec!["A"]);
    assert_eq!(cleaned.imported, vec!["B"]);
    let bits_count = cleaned.text.matches("[BITS 32]").count();
    assert_eq!(bits_count, 1);
}

#[test]
fn arch_id_exposed_for_dispatch() {
    assert_eq!(x86::ARCH_ID.as_str(), "x86");
}
