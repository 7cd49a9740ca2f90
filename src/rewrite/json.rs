//! Streaming edits of named JSON string fields
//!
//! A small byte-level tokenizer tracks string and escape state, so only a
//! real object key equal to the field name (a string followed by `:`)
//! triggers an edit. The value is buffered until its closing quote, edited,
//! and emitted; everything else passes through untouched. Values that are
//! not strings (`null`, numbers, objects) are left alone.

use crate::rewrite::string::replace_all;
use crate::rewrite::Replacer;

#[derive(Debug, Clone)]
enum Edit {
    Replace { from: Vec<u8>, to: Vec<u8> },
    Prepend(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Scan,
    /// Inside a string that might be the key; `matched` counts bytes equal
    /// to the field name so far
    Key {
        matched: usize,
        mismatch: bool,
        escaped: bool,
    },
    AfterKey,
    AfterColon,
    Value {
        escaped: bool,
    },
}

/// Edits the string value of every key named `field`
#[derive(Debug, Clone)]
pub struct JsonFieldReplacer {
    field: Vec<u8>,
    edit: Edit,
    state: State,
    value: Vec<u8>,
}

impl JsonFieldReplacer {
    /// Replace occurrences of `from` with `to` inside the field's value
    pub fn replace(field: &str, from: &str, to: &str) -> Self {
        Self::with_edit(
            field,
            Edit::Replace {
                from: from.as_bytes().to_vec(),
                to: to.as_bytes().to_vec(),
            },
        )
    }

    /// Put `prefix` in front of the field's value
    pub fn prepend(field: &str, prefix: &str) -> Self {
        Self::with_edit(field, Edit::Prepend(prefix.as_bytes().to_vec()))
    }

    fn with_edit(field: &str, edit: Edit) -> Self {
        Self {
            field: field.as_bytes().to_vec(),
            edit,
            state: State::Scan,
            value: Vec::new(),
        }
    }

    fn apply(&self, out: &mut Vec<u8>) {
        match &self.edit {
            Edit::Replace { from, to } => out.extend(replace_all(&self.value, from, to)),
            Edit::Prepend(prefix) => {
                out.extend_from_slice(prefix);
                out.extend_from_slice(&self.value);
            }
        }
    }

    fn step(&mut self, byte: u8, out: &mut Vec<u8>) {
        match self.state {
            State::Scan => {
                out.push(byte);
                if byte == b'"' {
                    self.state = State::Key {
                        matched: 0,
                        mismatch: false,
                        escaped: false,
                    };
                }
            }
            State::Key {
                matched,
                mismatch,
                escaped,
            } => {
                out.push(byte);
                if byte == b'"' && !escaped {
                    self.state = if !mismatch && matched == self.field.len() {
                        State::AfterKey
                    } else {
                        State::Scan
                    };
                    return;
                }
                let equal = !mismatch && self.field.get(matched) == Some(&byte);
                self.state = State::Key {
                    matched: if equal { matched + 1 } else { matched },
                    mismatch: !equal,
                    escaped: !escaped && byte == b'\\',
                };
            }
            State::AfterKey => {
                if byte.is_ascii_whitespace() {
                    out.push(byte);
                } else if byte == b':' {
                    out.push(byte);
                    self.state = State::AfterColon;
                } else {
                    self.state = State::Scan;
                    self.step(byte, out);
                }
            }
            State::AfterColon => {
                if byte.is_ascii_whitespace() {
                    out.push(byte);
                } else if byte == b'"' {
                    out.push(byte);
                    self.value.clear();
                    self.state = State::Value { escaped: false };
                } else {
                    self.state = State::Scan;
                    self.step(byte, out);
                }
            }
            State::Value { escaped } => {
                if byte == b'"' && !escaped {
                    self.apply(out);
                    self.value.clear();
                    out.push(byte);
                    self.state = State::Scan;
                } else {
                    self.value.push(byte);
                    self.state = State::Value {
                        escaped: !escaped && byte == b'\\',
                    };
                }
            }
        }
    }
}

impl Replacer for JsonFieldReplacer {
    fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) {
        for &byte in input {
            self.step(byte, out);
        }
    }

    fn finish(&mut self, out: &mut Vec<u8>) {
        // Truncated document: emit the unterminated value as received.
        out.append(&mut self.value);
        self.state = State::Scan;
    }
}
