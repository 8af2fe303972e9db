// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Load-constant operand decoding.
//!
//! A load-constant operand is one tag byte followed by the literal bytes in
//! little-endian order. Integers sign-extend per encoded width; floats decode
//! as IEEE-754 single/double exactly as encoded. No truncation happens here.

use crate::core::error::{BuildError, BuildErrorKind};

pub const TAG_I8: u8 = 0x01;
pub const TAG_I32: u8 = 0x04;
pub const TAG_I64: u8 = 0x08;
pub const TAG_F32: u8 = 0x14;
pub const TAG_F64: u8 = 0x18;

/// A decoded load-constant literal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Int { value: i64, width: u32 },
    Float32(f32),
    Float64(f64),
}

impl Literal {
    /// Byte size of the value on the evaluation stack.
    pub fn width(&self) -> u32 {
        match self {
            Literal::Int { width, .. } => *width,
            Literal::Float32(_) => 4,
            Literal::Float64(_) => 8,
        }
    }

    /// Raw bit pattern, for backends that emit immediates as bit images.
    pub fn bits(&self) -> u64 {
        match self {
            Literal::Int { value, .. } => *value as u64,
            Literal::Float32(value) => u64::from(value.to_bits()),
            Literal::Float64(value) => value.to_bits(),
        }
    }
}

fn take<const N: usize>(operands: &[u8]) -> Result<[u8; N], BuildError> {
    operands
        .get(1..1 + N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| {
            BuildError::new(
                BuildErrorKind::Internal,
                "Truncated load-constant operand",
                Some(&format!("{} of {} bytes", operands.len().saturating_sub(1), N)),
            )
        })
}

/// Decode the operand bytes of a load-constant operation.
pub fn decode(operands: &[u8]) -> Result<Literal, BuildError> {
    let tag = *operands.first().ok_or_else(|| {
        BuildError::new(BuildErrorKind::Internal, "Empty load-constant operand", None)
    })?;
    match tag {
        TAG_I8 => Ok(Literal::Int {
            value: i64::from(i8::from_le_bytes(take::<1>(operands)?)),
            width: 1,
        }),
        TAG_I32 => Ok(Literal::Int {
            value: i64::from(i32::from_le_bytes(take::<4>(operands)?)),
            width: 4,
        }),
        TAG_I64 => Ok(Literal::Int {
            value: i64::from_le_bytes(take::<8>(operands)?),
            width: 8,
        }),
        TAG_F32 => Ok(Literal::Float32(f32::from_le_bytes(take::<4>(operands)?))),
        TAG_F64 => Ok(Literal::Float64(f64::from_le_bytes(take::<8>(operands)?))),
        other => Err(BuildError::new(
            BuildErrorKind::Internal,
            "Unknown load-constant tag",
            Some(&format!("0x{other:02X}")),
        )),
    }
}

/// Encode a literal back to operand bytes. Test and front-end helper.
pub fn encode(literal: &Literal) -> Vec<u8> {
    match literal {
        Literal::Int { value, width: 1 } => {
            let mut bytes = vec![TAG_I8];
            bytes.extend_from_slice(&(*value as i8).to_le_bytes());
            bytes
        }
        Literal::Int { value, width: 4 } => {
            let mut bytes = vec![TAG_I32];
            bytes.extend_from_slice(&(*value as i32).to_le_bytes());
            bytes
        }
        Literal::Int { value, .. } => {
            let mut bytes = vec![TAG_I64];
            bytes.extend_from_slice(&value.to_le_bytes());
            bytes
        }
        Literal::Float32(value) => {
            let mut bytes = vec![TAG_F32];
            bytes.extend_from_slice(&value.to_le_bytes());
            bytes
        }
        Literal::Float64(value) => {
            let mut bytes = vec![TAG_F64];
            bytes.extend_from_slice(&value.to_le_bytes());
            bytes
        }
    }
}
