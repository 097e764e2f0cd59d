// Copyright 2025 Reflow project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The boundary an external snapshotter reads and writes.
//!
//! Functions do not round-trip: a [`BindingRecord`] carries the function's
//! name and wiring, and restore reattaches the implementation by name from a
//! caller-supplied [`FuncRegistry`]. Restored states are applied verbatim,
//! never recomputed on load.

use std::collections::HashMap;

use serde_derive::{Deserialize, Serialize};

use graph::{Binding, Func, Key, ParamRole, State, Value};

use crate::error::Error;
use crate::Computation;

///
/// One node as seen by an external snapshotter.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeRecord {
    pub key: Key,
    pub state: State,
    /// Absent for nodes flagged `serialize = false`, and for values an
    /// external store cannot represent (opaque payloads, captured errors).
    pub value: Option<serde_json::Value>,
    pub serialize: bool,
    pub binding: Option<BindingRecord>,
}

///
/// A binding reduced to its function name and wiring.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BindingRecord {
    pub func: String,
    pub params: Vec<(ParamRole, Key)>,
}

///
/// Named functions for reattaching bindings on restore.
///
#[derive(Clone, Debug, Default)]
pub struct FuncRegistry {
    funcs: HashMap<String, Func>,
}

impl FuncRegistry {
    pub fn new() -> FuncRegistry {
        FuncRegistry::default()
    }

    /// Registers under the function's own name; the last registration wins.
    pub fn register(&mut self, func: Func) {
        self.funcs.insert(func.name().to_owned(), func);
    }

    pub fn get(&self, name: &str) -> Option<&Func> {
        self.funcs.get(name)
    }
}

impl Computation {
    ///
    /// Renders every node as a snapshot record, in declaration order.
    ///
    pub fn snapshot(&self) -> Vec<NodeRecord> {
        self.graph
            .entries()
            .map(|(_, entry)| NodeRecord {
                key: entry.key().clone(),
                state: entry.state(),
                value: if entry.serialize() {
                    entry.value().and_then(value_to_json)
                } else {
                    None
                },
                serialize: entry.serialize(),
                binding: entry.binding().map(|binding| BindingRecord {
                    func: binding.func.name().to_owned(),
                    params: binding.params.clone(),
                }),
            })
            .collect()
    }

    ///
    /// Rebuilds a computation from snapshot records. Stored states and values
    /// are applied verbatim, so downstream nodes keep whatever state was
    /// written, except that nodes whose value was withheld
    /// (`serialize = false`) come back uninitialized.
    ///
    pub fn restore(records: &[NodeRecord], funcs: &FuncRegistry) -> Result<Computation, Error> {
        let mut comp = Computation::new();

        // Declare structure first. Placeholders re-create themselves when a
        // binding references them.
        for record in records {
            if record.state == State::Placeholder {
                continue;
            }
            let binding = match &record.binding {
                Some(record) => {
                    let func = funcs
                        .get(&record.func)
                        .cloned()
                        .ok_or_else(|| Error::UnknownFunction(record.func.clone()))?;
                    Some(Binding {
                        func,
                        params: record.params.clone(),
                    })
                }
                None => None,
            };
            comp.upsert(record.key.clone(), binding, None, record.serialize)?;
        }

        // Stored states and values win over declaration-time propagation.
        for record in records {
            if record.state == State::Placeholder {
                continue;
            }
            let Some(id) = comp.graph.entry_id(&record.key) else {
                continue;
            };
            if record.serialize {
                comp.graph
                    .set_value(id, record.value.as_ref().and_then(value_from_json));
                comp.graph.set_state(id, record.state);
            } else {
                comp.graph.set_value(id, None);
                comp.graph.set_state(id, State::Uninitialized);
            }
        }
        Ok(comp)
    }
}

fn value_to_json(value: &Value) -> Option<serde_json::Value> {
    match value {
        Value::None => Some(serde_json::Value::Null),
        Value::Bool(b) => Some((*b).into()),
        Value::Int(i) => Some((*i).into()),
        Value::Float(x) => serde_json::Number::from_f64(*x).map(serde_json::Value::Number),
        Value::Str(s) => Some(s.clone().into()),
        Value::List(items) => items
            .iter()
            .map(value_to_json)
            .collect::<Option<Vec<_>>>()
            .map(serde_json::Value::Array),
        Value::Error(_) | Value::Opaque(_) => None,
    }
}

fn value_from_json(value: &serde_json::Value) -> Option<Value> {
    match value {
        serde_json::Value::Null => Some(Value::None),
        serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .or_else(|| n.as_f64().map(Value::Float)),
        serde_json::Value::String(s) => Some(Value::Str(s.clone())),
        serde_json::Value::Array(items) => items
            .iter()
            .map(value_from_json)
            .collect::<Option<Vec<_>>>()
            .map(Value::List),
        serde_json::Value::Object(_) => None,
    }
}
