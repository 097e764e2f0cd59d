// Copyright 2025 Reflow project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use crate::node::{Binding, Key, State};
use crate::value::Value;

///
/// A node record: identity, lifecycle state, the last stored value, and the
/// optional computation binding.
///
/// The value slot outlives the state that produced it: a node leaving
/// `Uptodate` or `Error` keeps its last value for diagnostics, and the engine
/// simply stops treating it as authoritative. Only explicit paths (deletion,
/// re-declaration, reverting an input) clear it.
///
#[derive(Clone, Debug)]
pub struct Entry {
    key: Key,
    seq: u64,
    state: State,
    value: Option<Value>,
    binding: Option<Binding>,
    serialize: bool,
}

impl Entry {
    pub(crate) fn new(key: Key, seq: u64) -> Entry {
        Entry {
            key,
            seq,
            state: State::Placeholder,
            value: None,
            binding: None,
            serialize: true,
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Declaration sequence number, used to break scheduling ties.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn binding(&self) -> Option<&Binding> {
        self.binding.as_ref()
    }

    /// Whether external snapshotters should persist this node's value.
    /// Scheduling never consults this.
    pub fn serialize(&self) -> bool {
        self.serialize
    }

    pub(crate) fn set_state(&mut self, state: State) {
        self.state = state;
    }

    pub(crate) fn set_value(&mut self, value: Option<Value>) {
        self.value = value;
    }

    pub(crate) fn set_binding(&mut self, binding: Option<Binding>) {
        self.binding = binding;
    }

    pub(crate) fn set_serialize(&mut self, serialize: bool) {
        self.serialize = serialize;
    }
}
