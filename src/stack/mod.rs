// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Simulated evaluation-stack state for one method being lowered.
//!
//! The frame is the single source of truth for what is on the stack and
//! where. `push`/`pop` are the only mutators; the bookkeeping must mirror the
//! physical state exactly or subsequent codegen corrupts silently. The first
//! N pushed values (N = argument registers of the backend) stay register
//! resident; everything after spills to memory. Values wider than the native
//! register are never register-resident.

use crate::core::error::{BuildError, BuildErrorKind};

/// One abstract value on the evaluation stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackItem {
    pub size: u32,
    pub register: Option<&'static str>,
}

impl StackItem {
    pub fn is_register_resident(&self) -> bool {
        self.register.is_some()
    }
}

/// One recorded frame mutation, for determinism checks and debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEvent {
    Push {
        size: u32,
        register: Option<&'static str>,
    },
    Pop {
        size: u32,
        register: Option<&'static str>,
    },
}

/// Per-method operand-stack simulation.
///
/// Exactly one frame is active per method at a time; it is created when the
/// method prologue is lowered and discarded after its return instruction.
#[derive(Debug)]
pub struct StackFrame {
    method_id: u32,
    method_name: String,
    register_width: u32,
    arg_registers: &'static [&'static str],
    items: Vec<StackItem>,
    spilled_args: Vec<bool>,
    trace: Vec<StackEvent>,
}

impl StackFrame {
    pub fn new(
        method_id: u32,
        method_name: impl Into<String>,
        arg_registers: &'static [&'static str],
        register_width: u32,
    ) -> Self {
        Self {
            method_id,
            method_name: method_name.into(),
            register_width,
            arg_registers,
            items: Vec::new(),
            spilled_args: vec![false; arg_registers.len()],
            trace: Vec::new(),
        }
    }

    pub fn method_id(&self) -> u32 {
        self.method_id
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// Number of register-resident items currently on the frame.
    pub fn resident_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.register.is_some())
            .count()
    }

    pub fn depth(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn top(&self) -> Option<&StackItem> {
        self.items.last()
    }

    /// Push one value. Register-vs-memory is chosen purely from the count of
    /// items already register-resident; no liveness analysis happens here.
    pub fn push(&mut self, size: u32) -> StackItem {
        let register = if size <= self.register_width {
            self.arg_registers.get(self.resident_count()).copied()
        } else {
            None
        };
        let item = StackItem { size, register };
        self.items.push(item);
        self.trace.push(StackEvent::Push { size, register });
        item
    }

    /// Push an item already held in a fixed register (a call's return value).
    pub fn push_in_register(&mut self, size: u32, register: &'static str) -> StackItem {
        let item = StackItem {
            size,
            register: Some(register),
        };
        self.items.push(item);
        self.trace.push(StackEvent::Push {
            size,
            register: Some(register),
        });
        item
    }

    /// Push the prologue's frame-pointer placeholder. It lives in the frame
    /// itself, so it is always memory-resident.
    pub fn push_frame_placeholder(&mut self, size: u32) -> StackItem {
        let item = StackItem {
            size,
            register: None,
        };
        self.items.push(item);
        self.trace.push(StackEvent::Push {
            size,
            register: None,
        });
        item
    }

    /// Pop the top item. Popping an empty frame is a lowering bug, not a
    /// bytecode error.
    pub fn pop(&mut self) -> Result<StackItem, BuildError> {
        let item = self.items.pop().ok_or_else(|| {
            BuildError::new(
                BuildErrorKind::Internal,
                "Pop from empty evaluation stack",
                Some(&format!("method {} ({})", self.method_name, self.method_id)),
            )
        })?;
        self.trace.push(StackEvent::Pop {
            size: item.size,
            register: item.register,
        });
        Ok(item)
    }

    /// Index of a register inside the argument-register window.
    pub fn arg_register_index(&self, register: &str) -> Option<usize> {
        self.arg_registers.iter().position(|name| *name == register)
    }

    /// Flag an argument register whose value has been placed for the callee.
    pub fn mark_arg_spilled(&mut self, index: usize) {
        if let Some(flag) = self.spilled_args.get_mut(index) {
            *flag = true;
        }
    }

    pub fn arg_spilled(&self, index: usize) -> bool {
        self.spilled_args.get(index).copied().unwrap_or(false)
    }

    /// Reset the spill flags once a call has consumed the window.
    pub fn clear_spilled_args(&mut self) {
        self.spilled_args.iter_mut().for_each(|flag| *flag = false);
    }

    pub fn trace(&self) -> &[StackEvent] {
        &self.trace
    }

    /// Verify the frame emptied out after its return was lowered.
    pub fn finish(self) -> Result<Vec<StackEvent>, BuildError> {
        if !self.items.is_empty() {
            return Err(BuildError::new(
                BuildErrorKind::Internal,
                "Evaluation stack not empty at method end",
                Some(&format!(
                    "method {} ({}), {} item(s) left",
                    self.method_name,
                    self.method_id,
                    self.items.len()
                )),
            ));
        }
        Ok(self.trace)
    }
}
