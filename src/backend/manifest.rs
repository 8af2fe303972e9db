// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Build-manifest loading.
//!
//! The manifest is the CLI stand-in for the in-process front end: a JSON
//! description of every library's methods, types, plugs, and link
//! parameters. The library API takes the same structures directly.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::bytecode::{
    BytecodeOperation, FieldDescriptor, IsoSpec, LibraryUnit, MethodDescriptor, OpcodeFamily,
    OutputKind, TypeDescriptor,
};
use crate::core::error::{BuildError, BuildErrorKind};

/// Everything one invocation builds.
#[derive(Debug)]
pub struct Manifest {
    pub arch: String,
    pub libraries: Vec<LibraryUnit>,
}

fn manifest_error(msg: &str, param: Option<&str>) -> BuildError {
    BuildError::new(BuildErrorKind::Manifest, msg, param)
}

pub fn load_manifest(path: &Path) -> Result<Manifest, BuildError> {
    let text = fs::read_to_string(path).map_err(|err| {
        BuildError::new(
            BuildErrorKind::MissingInput,
            &format!("Cannot read manifest {}", path.display()),
            Some(&err.to_string()),
        )
    })?;
    let root: Value = serde_json::from_str(&text)
        .map_err(|err| manifest_error("Manifest is not valid JSON", Some(&err.to_string())))?;
    parse_manifest(&root)
}

pub fn parse_manifest(root: &Value) -> Result<Manifest, BuildError> {
    let arch = expect_str(root, "arch")?.to_string();
    let libraries = root
        .get("libraries")
        .and_then(Value::as_array)
        .ok_or_else(|| manifest_error("Manifest is missing a `libraries` array", None))?;
    if libraries.is_empty() {
        return Err(manifest_error("Manifest declares no libraries", None));
    }
    let libraries = libraries
        .iter()
        .map(parse_library)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Manifest { arch, libraries })
}

fn parse_library(value: &Value) -> Result<LibraryUnit, BuildError> {
    let name = expect_str(value, "name")?.to_string();
    let context = name.as_str();

    let kind = match value.get("kind").and_then(Value::as_str) {
        Some("executable") | None => OutputKind::Executable,
        Some("library") => OutputKind::Library,
        Some(other) => {
            return Err(manifest_error(
                "Unknown library kind",
                Some(&format!("{other} in {context}")),
            ))
        }
    };

    let methods = value
        .get("methods")
        .and_then(Value::as_array)
        .ok_or_else(|| manifest_error("Library is missing a `methods` array", Some(context)))?
        .iter()
        .map(|method| parse_method(method, context))
        .collect::<Result<Vec<_>, _>>()?;

    let types = match value.get("types").and_then(Value::as_array) {
        Some(types) => types
            .iter()
            .map(parse_type)
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    let mut plugs = HashMap::new();
    if let Some(map) = value.get("plugs").and_then(Value::as_object) {
        for (id, path) in map {
            let id: u32 = id.parse().map_err(|_| {
                manifest_error("Plug key is not a method id", Some(&format!("{id} in {context}")))
            })?;
            let path = path.as_str().ok_or_else(|| {
                manifest_error("Plug path is not a string", Some(&format!("{id} in {context}")))
            })?;
            plugs.insert(id, PathBuf::from(path));
        }
    }

    let dependencies = match value.get("dependencies").and_then(Value::as_array) {
        Some(deps) => deps
            .iter()
            .map(|dep| {
                dep.as_str().map(str::to_string).ok_or_else(|| {
                    manifest_error("Dependency is not a string", Some(context))
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    let iso = match value.get("iso") {
        Some(iso) => Some(IsoSpec {
            boot_file: expect_str(iso, "boot_file")?.to_string(),
            include_dir: PathBuf::from(expect_str(iso, "dir")?),
        }),
        None => None,
    };

    Ok(LibraryUnit {
        kind,
        base_address: address_field(value, "base_address", context)?,
        load_offset: value
            .get("load_offset")
            .map(|_| address_field(value, "load_offset", context))
            .transpose()?
            .unwrap_or(0),
        entry_symbol: value
            .get("entry")
            .and_then(Value::as_str)
            .map(str::to_string),
        dependencies,
        methods,
        types,
        plugs,
        iso,
        name,
    })
}

fn parse_method(value: &Value, library: &str) -> Result<MethodDescriptor, BuildError> {
    let name = expect_str(value, "name")?.to_string();
    let ops = value
        .get("ops")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            manifest_error("Method is missing an `ops` array", Some(&format!("{name} in {library}")))
        })?
        .iter()
        .map(|op| parse_op(op, &name))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(MethodDescriptor {
        id: expect_u32(value, "id")?,
        arg_count: value.get("args").and_then(Value::as_u64).unwrap_or(0) as u32,
        returns_value: value.get("returns").and_then(Value::as_bool).unwrap_or(false),
        priority: value.get("priority").and_then(Value::as_i64).unwrap_or(0),
        page_align: value
            .get("page_align")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        ops,
        name,
    })
}

fn parse_op(value: &Value, method: &str) -> Result<BytecodeOperation, BuildError> {
    let mnemonic = expect_str(value, "op")?;
    let family = OpcodeFamily::from_mnemonic(mnemonic).ok_or_else(|| {
        manifest_error(
            "Unknown opcode mnemonic",
            Some(&format!("{mnemonic} in {method}")),
        )
    })?;
    let operands = match value.get("bytes").and_then(Value::as_str) {
        Some(hex) => decode_hex(hex).map_err(|err| {
            manifest_error("Bad operand bytes", Some(&format!("{err} in {method}")))
        })?,
        None => Vec::new(),
    };
    let offset = value.get("offset").and_then(Value::as_u64).unwrap_or(0) as u32;
    Ok(BytecodeOperation::new(family, operands, offset))
}

fn parse_type(value: &Value) -> Result<TypeDescriptor, BuildError> {
    let name = expect_str(value, "name")?.to_string();
    let fields = match value.get("fields").and_then(Value::as_array) {
        Some(fields) => fields
            .iter()
            .map(|field| {
                Ok(FieldDescriptor {
                    name: expect_str(field, "name")?.to_string(),
                    offset: expect_u32(field, "offset")?,
                    size: expect_u32(field, "size")?,
                })
            })
            .collect::<Result<Vec<_>, BuildError>>()?,
        None => Vec::new(),
    };
    Ok(TypeDescriptor {
        id: expect_u32(value, "id")?,
        size: expect_u32(value, "size")?,
        fields,
        name,
    })
}

fn expect_str<'a>(value: &'a Value, key: &str) -> Result<&'a str, BuildError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| manifest_error("Missing string field", Some(key)))
}

fn expect_u32(value: &Value, key: &str) -> Result<u32, BuildError> {
    value
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| manifest_error("Missing numeric field", Some(key)))
}

/// Addresses may be JSON numbers or `0x`-prefixed strings.
fn address_field(value: &Value, key: &str, context: &str) -> Result<u64, BuildError> {
    match value.get(key) {
        Some(Value::Number(number)) => number.as_u64().ok_or_else(|| {
            manifest_error("Address is not unsigned", Some(&format!("{key} in {context}")))
        }),
        Some(Value::String(text)) => {
            let digits = text.strip_prefix("0x").unwrap_or(text);
            u64::from_str_radix(digits, 16).map_err(|_| {
                manifest_error("Bad hex address", Some(&format!("{key} in {context}")))
            })
        }
        _ => Err(manifest_error(
            "Missing address field",
            Some(&format!("{key} in {context}")),
        )),
    }
}

fn decode_hex(hex: &str) -> Result<Vec<u8>, String> {
    if !hex.is_ascii() {
        return Err("non-ASCII hex string".to_string());
    }
    if hex.len() % 2 != 0 {
        return Err("odd hex digit count".to_string());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| format!("bad hex at byte {}", i / 2))
        })
        .collect()
}
