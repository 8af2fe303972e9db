// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Link plans: everything to assemble, link, and master for one library.

use std::path::{Path, PathBuf};

use crate::bytecode::{IsoSpec, LibraryUnit, OutputKind};
use crate::core::arch::ArchId;
use crate::targets::sanitize_symbol;

use super::sequence::SequencedBlocks;

/// Per-dependency base-address slide for co-loaded libraries.
pub const LIBRARY_SLIDE: u64 = 0x0010_0000;

/// One translation unit: assembly in, object out.
#[derive(Debug, Clone)]
pub struct ObjectUnit {
    pub name: String,
    pub asm_path: PathBuf,
    pub obj_path: PathBuf,
}

/// Resolved blocks plus output paths and parameters for one library link.
#[derive(Debug)]
pub struct LinkPlan {
    pub library: String,
    pub arch: ArchId,
    pub kind: OutputKind,
    pub base_address: u64,
    pub load_offset: u64,
    pub entry_symbol: Option<String>,
    pub dependencies: Vec<String>,
    pub blocks: SequencedBlocks,
    pub iso: Option<IsoSpec>,
    out_dir: PathBuf,
}

impl LinkPlan {
    pub fn new(
        unit: &LibraryUnit,
        arch: ArchId,
        blocks: SequencedBlocks,
        out_root: &Path,
    ) -> Self {
        Self {
            library: unit.name.clone(),
            arch,
            kind: unit.kind,
            base_address: unit.base_address,
            load_offset: unit.load_offset,
            entry_symbol: unit.entry_symbol.clone(),
            dependencies: unit.dependencies.clone(),
            blocks,
            iso: unit.iso.clone(),
            out_dir: out_root.join(&unit.name),
        }
    }

    /// Link-time base address. Libraries slide by their dependency count so
    /// co-loaded libraries never collide.
    pub fn link_base(&self) -> u64 {
        match self.kind {
            OutputKind::Executable => self.base_address,
            OutputKind::Library => {
                self.base_address + self.dependencies.len() as u64 * LIBRARY_SLIDE
            }
        }
    }

    /// Entry symbol for executable output: the configured one, or the first
    /// text block's symbol.
    pub fn resolved_entry(&self) -> Option<String> {
        if let Some(entry) = &self.entry_symbol {
            return Some(entry.clone());
        }
        self.blocks
            .section(crate::core::target::Section::Text)
            .first()
            .map(|block| sanitize_symbol(block.id()))
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn asm_dir(&self) -> PathBuf {
        self.out_dir.join("asm")
    }

    pub fn obj_dir(&self) -> PathBuf {
        self.out_dir.join("obj")
    }

    pub fn script_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}.ld", self.library))
    }

    pub fn args_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}.args", self.library))
    }

    pub fn image_path(&self) -> PathBuf {
        let extension = match self.kind {
            OutputKind::Executable => "elf",
            OutputKind::Library => "so",
        };
        self.out_dir.join(format!("{}.{extension}", self.library))
    }

    pub fn bin_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}.bin", self.library))
    }

    pub fn map_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}.map", self.library))
    }

    pub fn iso_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}.iso", self.library))
    }

    /// Translation units in deterministic section order (text, data, bss).
    pub fn object_units(&self) -> Vec<ObjectUnit> {
        let asm_dir = self.asm_dir();
        let obj_dir = self.obj_dir();
        self.blocks
            .iter_all()
            .map(|block| {
                let name = sanitize_symbol(block.id());
                ObjectUnit {
                    asm_path: asm_dir.join(format!("{name}.asm")),
                    obj_path: obj_dir.join(format!("{name}.o")),
                    name,
                }
            })
            .collect()
    }

    /// The object path of a unit, relative to the plan directory, as it
    /// appears inside the linker script.
    pub fn script_member(&self, unit_name: &str) -> String {
        format!("obj/{unit_name}.o")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sequence::{sequence, AssemblyBlock};
    use crate::core::target::Section;
    use std::collections::HashMap;

    fn unit(kind: OutputKind, dependencies: Vec<String>) -> LibraryUnit {
        LibraryUnit {
            name: "kernel".to_string(),
            kind,
            base_address: 0x0010_0000,
            load_offset: 0,
            entry_symbol: None,
            dependencies,
            methods: Vec::new(),
            types: Vec::new(),
            plugs: HashMap::new(),
            iso: None,
        }
    }

    #[test]
    fn library_base_slides_per_dependency() {
        let arch = ArchId::new("x86");
        let lib = unit(
            OutputKind::Library,
            vec!["rt".to_string(), "hw".to_string()],
        );
        let plan = LinkPlan::new(&lib, arch, SequencedBlocks::default(), Path::new("build"));
        assert_eq!(plan.link_base(), 0x0010_0000 + 2 * LIBRARY_SLIDE);

        let exe = unit(OutputKind::Executable, vec!["rt".to_string()]);
        let plan = LinkPlan::new(&exe, arch, SequencedBlocks::default(), Path::new("build"));
        assert_eq!(plan.link_base(), 0x0010_0000);
    }

    #[test]
    fn entry_falls_back_to_the_first_text_block() {
        let arch = ArchId::new("x86");
        let lib = unit(OutputKind::Executable, Vec::new());
        let blocks = sequence(vec![
            AssemblyBlock::new("Kernel_Main", Section::Text, 0, false, ""),
            AssemblyBlock::new("Helper", Section::Text, 10, false, ""),
        ]);
        let plan = LinkPlan::new(&lib, arch, blocks, Path::new("build"));
        assert_eq!(plan.resolved_entry().as_deref(), Some("Kernel_Main"));
    }

    #[test]
    fn paths_are_scoped_to_the_library_directory() {
        let arch = ArchId::new("x86");
        let lib = unit(OutputKind::Executable, Vec::new());
        let plan = LinkPlan::new(&lib, arch, SequencedBlocks::default(), Path::new("build"));
        assert_eq!(plan.script_path(), PathBuf::from("build/kernel/kernel.ld"));
        assert_eq!(plan.image_path(), PathBuf::from("build/kernel/kernel.elf"));
        assert_eq!(plan.script_member("m"), "obj/m.o");
    }
}
