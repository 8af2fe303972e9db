// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Bytecode data model consumed from the front end.
//!
//! The front end hands this crate fully resolved method, type, and field
//! descriptors per library; nothing here parses source or bytecode files.

pub mod literal;

use std::collections::HashMap;
use std::path::PathBuf;

/// Opcode families the lowering tables dispatch on.
///
/// Every backend must register exactly one lowering routine per family;
/// coverage is checked against [`OpcodeFamily::ALL`] at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpcodeFamily {
    Nop,
    LoadConst,
    Pop,
    Call,
    MethodStart,
    MethodEnd,
    NewObject,
}

impl OpcodeFamily {
    pub const ALL: &'static [OpcodeFamily] = &[
        OpcodeFamily::Nop,
        OpcodeFamily::LoadConst,
        OpcodeFamily::Pop,
        OpcodeFamily::Call,
        OpcodeFamily::MethodStart,
        OpcodeFamily::MethodEnd,
        OpcodeFamily::NewObject,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OpcodeFamily::Nop => "nop",
            OpcodeFamily::LoadConst => "ldc",
            OpcodeFamily::Pop => "pop",
            OpcodeFamily::Call => "call",
            OpcodeFamily::MethodStart => "enter",
            OpcodeFamily::MethodEnd => "leave",
            OpcodeFamily::NewObject => "newobj",
        }
    }

    /// Resolve a manifest mnemonic to a family.
    pub fn from_mnemonic(name: &str) -> Option<Self> {
        OpcodeFamily::ALL
            .iter()
            .copied()
            .find(|family| family.as_str() == name)
    }
}

/// One bytecode instruction: family, raw operand bytes, source offset.
///
/// Immutable, produced by the front end, consumed once by lowering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytecodeOperation {
    pub family: OpcodeFamily,
    pub operands: Vec<u8>,
    pub offset: u32,
}

impl BytecodeOperation {
    pub fn new(family: OpcodeFamily, operands: Vec<u8>, offset: u32) -> Self {
        Self {
            family,
            operands,
            offset,
        }
    }

    /// Decode the 4-byte little-endian method id operand of a call.
    pub fn call_target(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.operands.get(0..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }
}

/// One method body plus its placement parameters.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub id: u32,
    pub name: String,
    pub arg_count: u32,
    pub returns_value: bool,
    pub ops: Vec<BytecodeOperation>,
    pub priority: i64,
    pub page_align: bool,
}

/// One field of a described type.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub offset: u32,
    pub size: u32,
}

/// One type consumed for the metadata tables.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub id: u32,
    pub name: String,
    pub size: u32,
    pub fields: Vec<FieldDescriptor>,
}

/// Executable image or co-loadable library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Executable,
    Library,
}

/// Everything the front end supplies for one library.
#[derive(Debug, Clone)]
pub struct LibraryUnit {
    pub name: String,
    pub kind: OutputKind,
    pub base_address: u64,
    pub load_offset: u64,
    pub entry_symbol: Option<String>,
    pub dependencies: Vec<String>,
    pub methods: Vec<MethodDescriptor>,
    pub types: Vec<TypeDescriptor>,
    /// Plugged methods: id of a method whose body is externally supplied
    /// assembly, bypassing lowering.
    pub plugs: HashMap<u32, PathBuf>,
    /// Optional ISO mastering parameters for the bootable path.
    pub iso: Option<IsoSpec>,
}

/// Boot-file and include-directory arguments for ISO mastering.
#[derive(Debug, Clone)]
pub struct IsoSpec {
    pub boot_file: String,
    pub include_dir: PathBuf,
}

/// Call-resolution signature of one method.
#[derive(Debug, Clone)]
pub struct MethodSig {
    pub name: String,
    pub arg_count: u32,
    pub returns_value: bool,
}

/// Id-keyed lookup used by call lowering to resolve targets.
#[derive(Debug, Default)]
pub struct MethodIndex {
    sigs: HashMap<u32, MethodSig>,
}

impl MethodIndex {
    pub fn build(methods: &[MethodDescriptor]) -> Self {
        let mut sigs = HashMap::new();
        for method in methods {
            sigs.insert(
                method.id,
                MethodSig {
                    name: method.name.clone(),
                    arg_count: method.arg_count,
                    returns_value: method.returns_value,
                },
            );
        }
        Self { sigs }
    }

    pub fn resolve(&self, id: u32) -> Option<&MethodSig> {
        self.sigs.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_mnemonics_round_trip() {
        for family in OpcodeFamily::ALL {
            assert_eq!(OpcodeFamily::from_mnemonic(family.as_str()), Some(*family));
        }
        assert_eq!(OpcodeFamily::from_mnemonic("bogus"), None);
    }

    #[test]
    fn call_target_is_little_endian() {
        let op = BytecodeOperation::new(OpcodeFamily::Call, vec![0x2A, 0, 0, 0], 0);
        assert_eq!(op.call_target(), Some(42));
        let short = BytecodeOperation::new(OpcodeFamily::Call, vec![1, 2], 0);
        assert_eq!(short.call_target(), None);
    }

    #[test]
    fn method_index_resolves_by_id() {
        let methods = vec![MethodDescriptor {
            id: 7,
            name: "Console_Write".to_string(),
            arg_count: 1,
            returns_value: false,
            ops: Vec::new(),
            priority: 0,
            page_align: false,
        }];
        let index = MethodIndex::build(&methods);
        assert_eq!(index.resolve(7).unwrap().name, "Console_Write");
        assert!(index.resolve(8).is_none());
    }
}
