// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Structured assembly emission.
//!
//! Lowering routines append structured items; text is rendered once, at the
//! end, so tests can assert on structure instead of diffing generated text.

/// One structured line of generated assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsmItem {
    /// Flush-left label, rendered with a trailing colon.
    Label(String),
    /// Indented instruction.
    Inst(String),
    /// Indented comment in the backend's comment syntax.
    Comment(String),
    /// Flush-left assembler directive.
    Directive(String),
    Blank,
}

/// Collects structured assembly for one method or data block.
#[derive(Debug)]
pub struct Emitter {
    comment_prefix: &'static str,
    items: Vec<AsmItem>,
}

impl Emitter {
    pub fn new(comment_prefix: &'static str) -> Self {
        Self {
            comment_prefix,
            items: Vec::new(),
        }
    }

    pub fn label(&mut self, name: impl Into<String>) {
        self.items.push(AsmItem::Label(name.into()));
    }

    pub fn inst(&mut self, text: impl Into<String>) {
        self.items.push(AsmItem::Inst(text.into()));
    }

    pub fn comment(&mut self, text: impl Into<String>) {
        self.items.push(AsmItem::Comment(text.into()));
    }

    pub fn directive(&mut self, text: impl Into<String>) {
        self.items.push(AsmItem::Directive(text.into()));
    }

    pub fn blank(&mut self) {
        self.items.push(AsmItem::Blank);
    }

    pub fn items(&self) -> &[AsmItem] {
        &self.items
    }

    /// Instructions emitted so far, without labels, comments, or directives.
    pub fn instructions(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter_map(|item| match item {
                AsmItem::Inst(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for item in &self.items {
            match item {
                AsmItem::Label(name) => {
                    out.push_str(name);
                    out.push_str(":\n");
                }
                AsmItem::Inst(text) => {
                    out.push_str("    ");
                    out.push_str(text);
                    out.push('\n');
                }
                AsmItem::Comment(text) => {
                    out.push_str("    ");
                    out.push_str(self.comment_prefix);
                    out.push_str(text);
                    out.push('\n');
                }
                AsmItem::Directive(text) => {
                    out.push_str(text);
                    out.push('\n');
                }
                AsmItem::Blank => out.push('\n'),
            }
        }
        out
    }
}
