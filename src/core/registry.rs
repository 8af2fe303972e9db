// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Backend registry and lowering dispatch.
//!
//! The registry is intentionally generic and has no knowledge of concrete
//! architectures. Backends register themselves at startup;
//! [`BackendRegistry::verify_coverage`] then checks the lowering tables
//! exhaustively against [`OpcodeFamily::ALL`], so a missing routine is a
//! fatal configuration error before any method is compiled, not a runtime
//! surprise on first use.

use std::collections::HashMap;

use crate::bytecode::OpcodeFamily;
use crate::core::arch::ArchId;
use crate::core::error::{BuildError, BuildErrorKind};
use crate::core::target::{LowerFn, TargetBackend};

#[derive(Default)]
pub struct BackendRegistry {
    backends: Vec<Box<dyn TargetBackend>>,
    lowerings: HashMap<(ArchId, OpcodeFamily), LowerFn>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one backend and its lowering table.
    ///
    /// Exactly one routine per family is allowed; a duplicate registration is
    /// a configuration error.
    pub fn register(&mut self, backend: Box<dyn TargetBackend>) -> Result<(), BuildError> {
        let arch = backend.id();
        if self.backends.iter().any(|known| known.id() == arch) {
            return Err(BuildError::new(
                BuildErrorKind::Internal,
                "Backend registered twice",
                Some(arch.as_str()),
            ));
        }
        for (family, lower) in backend.lowerings() {
            if self.lowerings.insert((arch, *family), *lower).is_some() {
                return Err(BuildError::new(
                    BuildErrorKind::Internal,
                    "Duplicate lowering routine",
                    Some(&format!("{arch}/{}", family.as_str())),
                ));
            }
        }
        self.backends.push(backend);
        Ok(())
    }

    /// Check every registered backend covers every opcode family.
    pub fn verify_coverage(&self) -> Result<(), BuildError> {
        for backend in &self.backends {
            for family in OpcodeFamily::ALL {
                if !self.lowerings.contains_key(&(backend.id(), *family)) {
                    return Err(BuildError::new(
                        BuildErrorKind::Internal,
                        "No lowering routine registered",
                        Some(&format!("{}/{}", backend.id(), family.as_str())),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Option<&dyn TargetBackend> {
        self.backends
            .iter()
            .map(|backend| backend.as_ref())
            .find(|backend| backend.id().as_str() == name)
    }

    pub fn lower_fn(&self, arch: ArchId, family: OpcodeFamily) -> Option<LowerFn> {
        self.lowerings.get(&(arch, family)).copied()
    }

    pub fn backends(&self) -> impl Iterator<Item = &dyn TargetBackend> {
        self.backends.iter().map(|backend| backend.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::target::{CleanupResult, DataDirectives, LowerTable, Section, ToolInvocation};
    use std::path::{Path, PathBuf};

    struct PartialBackend;

    const PARTIAL_ID: ArchId = ArchId::new("partial");
    const PARTIAL_TABLE: LowerTable = &[(OpcodeFamily::Nop, |_, _, _, emitter| {
        emitter.inst("nop");
        Ok(())
    })];

    impl TargetBackend for PartialBackend {
        fn id(&self) -> ArchId {
            PARTIAL_ID
        }
        fn describe(&self) -> &'static str {
            "test backend covering only nop"
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
        fn lowerings(&self) -> LowerTable {
            PARTIAL_TABLE
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
            CleanupResult {
                text: text.to_string(),
                ..CleanupResult::default()
            }
        }
        fn output_format(&self) -> &'static str {
            "elf32-i386"
        }
        fn output_arch(&self) -> &'static str {
            "i386"
        }
        fn assemble_command(&self, _input: &Path, _output: &Path) -> ToolInvocation {
            ToolInvocation::new("as", "true", Vec::new())
        }
        fn link_executable_command(
            &self,
            _script: &Path,
            _output: &Path,
            _objects: &[PathBuf],
        ) -> ToolInvocation {
            ToolInvocation::new("ld", "true", Vec::new())
        }
        fn link_library_command(
            &self,
            _script: &Path,
            _output: &Path,
            _objects: &[PathBuf],
        ) -> ToolInvocation {
            ToolInvocation::new("ld", "true", Vec::new())
        }
    }

    #[test]
    fn verify_coverage_reports_the_missing_pair() {
        let mut registry = BackendRegistry::new();
        registry.register(Box::new(PartialBackend)).unwrap();
        let err = registry.verify_coverage().unwrap_err();
        assert_eq!(err.kind(), BuildErrorKind::Internal);
        assert!(err.message().contains("partial/"));
    }

    #[test]
    fn duplicate_backend_registration_is_rejected() {
        let mut registry = BackendRegistry::new();
        registry.register(Box::new(PartialBackend)).unwrap();
        let err = registry.register(Box::new(PartialBackend)).unwrap_err();
        assert!(err.message().contains("partial"));
    }

    #[test]
    fn lower_fn_resolves_registered_routines() {
        let mut registry = BackendRegistry::new();
        registry.register(Box::new(PartialBackend)).unwrap();
        assert!(registry.lower_fn(PARTIAL_ID, OpcodeFamily::Nop).is_some());
        assert!(registry.lower_fn(PARTIAL_ID, OpcodeFamily::Call).is_none());
        assert!(registry.resolve("partial").is_some());
        assert!(registry.resolve("x99").is_none());
    }
}
