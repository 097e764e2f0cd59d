// Copyright 2025 Reflow project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! A reactive computation graph.
//!
//! A [`Computation`] is a DAG of named nodes, each either an input value or a
//! pure function of other nodes. Structural edits and value insertions keep
//! every node's state consistent, and `compute`/`compute_all` run whatever is
//! runnable, capturing user-function failures on the failing node instead of
//! surfacing them.
//!
//! The engine is single-threaded and cooperative: exactly one compute
//! activity runs at a time, and user functions run to completion on the
//! caller.

mod binding;
pub mod error;
mod map;
mod scheduler;
pub mod snapshot;


use log::debug;

use graph::{Binding, EntryId, Graph, ParamRole};

pub use graph::{CallArgs, ErrorValue, Func, FuncError, Key, State, Value};

pub use crate::error::Error;
pub use crate::map::{MapError, MapOutcome};
pub use crate::snapshot::{BindingRecord, FuncRegistry, NodeRecord};

use crate::map::map_dispatch;

///
/// What happens to a node's stored value when the node is re-declared with a
/// new binding.
///
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RedefinePolicy {
    /// Drop the old value; the new binding starts from nothing.
    #[default]
    Discard,
    /// Keep the old value for diagnostics. The node's state still derives
    /// from the new binding, so the engine never trusts the kept value.
    Retain,
}

///
/// Declarative description of one node: an input, an input with an initial
/// value, or a computation with optional explicit wiring.
///
#[derive(Clone, Debug)]
pub struct NodeSpec {
    func: Option<Func>,
    args: Option<Vec<Key>>,
    kwds: Option<Vec<(String, Key)>>,
    value: Option<Value>,
    serialize: bool,
}

impl NodeSpec {
    /// A pure input node.
    pub fn input() -> NodeSpec {
        NodeSpec {
            func: None,
            args: None,
            kwds: None,
            value: None,
            serialize: true,
        }
    }

    /// An input node with an initial value.
    pub fn value(value: impl Into<Value>) -> NodeSpec {
        NodeSpec::input().with_value(value)
    }

    /// A computation node. Without explicit `args`/`kwds`, each of the
    /// function's declared parameters wires to the node of the same name.
    pub fn computed(func: Func) -> NodeSpec {
        NodeSpec {
            func: Some(func),
            ..NodeSpec::input()
        }
    }

    /// Explicit positional wiring, overriding implicit parameter discovery.
    pub fn args<I, K>(mut self, args: I) -> NodeSpec
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    /// Explicit keyword wiring: `(parameter, source node)` pairs.
    pub fn kwds<I, P, K>(mut self, kwds: I) -> NodeSpec
    where
        I: IntoIterator<Item = (P, K)>,
        P: Into<String>,
        K: Into<Key>,
    {
        self.kwds = Some(
            kwds.into_iter()
                .map(|(param, source)| (param.into(), source.into()))
                .collect(),
        );
        self
    }

    /// Adds a single keyword wiring entry.
    pub fn kwd(mut self, param: impl Into<String>, source: impl Into<Key>) -> NodeSpec {
        self.kwds
            .get_or_insert_with(Vec::new)
            .push((param.into(), source.into()));
        self
    }

    /// Sets the initial value.
    pub fn with_value(mut self, value: impl Into<Value>) -> NodeSpec {
        self.value = Some(value.into());
        self
    }

    /// Hints external snapshotters not to persist this node's value. Does not
    /// affect scheduling.
    pub fn transient(mut self) -> NodeSpec {
        self.serialize = false;
        self
    }
}

impl Default for NodeSpec {
    fn default() -> NodeSpec {
        NodeSpec::input()
    }
}

impl From<Func> for NodeSpec {
    fn from(func: Func) -> NodeSpec {
        NodeSpec::computed(func)
    }
}

///
/// The field names of a tuple-shaped value, for
/// [`Computation::add_named_tuple_expansion`].
///
#[derive(Clone, Debug)]
pub struct TupleShape {
    name: String,
    fields: Vec<String>,
}

impl TupleShape {
    pub fn new<N, I, S>(name: N, fields: I) -> TupleShape
    where
        N: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TupleShape {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

///
/// A DAG of named nodes, each an input value or a pure computation over
/// other nodes.
///
/// Every operation keeps node states consistent by re-deriving the states of
/// affected dependents; only `compute` and `compute_all` run user code. A
/// `Computation` owns its store exclusively, and `clone` produces a fully
/// independent copy (functions are shared, list values are deep-cloned, and
/// opaque payloads are shared by reference and treated as immutable).
///
#[derive(Clone, Debug, Default)]
pub struct Computation {
    pub(crate) graph: Graph,
    redefine_policy: RedefinePolicy,
}

impl Computation {
    pub fn new() -> Computation {
        Computation::default()
    }

    /// Sets what happens to an existing stored value when a node is
    /// re-declared with a new binding.
    pub fn set_redefine_policy(&mut self, policy: RedefinePolicy) {
        self.redefine_policy = policy;
    }

    /// The number of nodes, placeholders included.
    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    pub fn contains(&self, key: impl Into<Key>) -> bool {
        self.graph.contains(&key.into())
    }

    /// Node keys in declaration order, placeholders included.
    pub fn keys(&self) -> Vec<Key> {
        self.graph
            .entries()
            .map(|(_, entry)| entry.key().clone())
            .collect()
    }

    ///
    /// Upserts a node. Re-declaring an existing node replaces its binding,
    /// rewires its inputs, and re-derives downstream states; what happens to
    /// a previously stored value is governed by the [`RedefinePolicy`].
    ///
    pub fn add_node(&mut self, key: impl Into<Key>, spec: NodeSpec) -> Result<(), Error> {
        let key = key.into();
        let binding = match spec.func {
            Some(func) => Some(binding::build_binding(&key, func, spec.args, spec.kwds)?),
            None => {
                if spec.args.is_some() || spec.kwds.is_some() {
                    return Err(Error::BadBinding {
                        key,
                        func: "<none>".to_owned(),
                        reason: "args/kwds wiring requires a function".to_owned(),
                    });
                }
                None
            }
        };

        let retained = match self.redefine_policy {
            RedefinePolicy::Retain if binding.is_some() && spec.value.is_none() => self
                .graph
                .entry_id(&key)
                .and_then(|id| self.graph.get_value(id).cloned()),
            _ => None,
        };

        let id = self.upsert(key, binding, spec.value, spec.serialize)?;
        if let Some(value) = retained {
            self.graph.set_value(id, Some(value));
        }
        Ok(())
    }

    ///
    /// Stores a value and marks the node up to date, creating it as an input
    /// node if it does not exist. Dependent states re-derive immediately.
    ///
    pub fn insert(&mut self, key: impl Into<Key>, value: impl Into<Value>) {
        let id = self.graph.insert_value(key.into(), value.into());
        self.graph.propagate_from(&[id]);
    }

    ///
    /// Batch insert: every value lands first, then dependent states re-derive
    /// once. Nodes inserted in this batch stay up to date even when they
    /// depend on each other.
    ///
    pub fn insert_many<I, K, V>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Key>,
        V: Into<Value>,
    {
        let ids: Vec<EntryId> = pairs
            .into_iter()
            .map(|(key, value)| self.graph.insert_value(key.into(), value.into()))
            .collect();
        let exclude = ids.iter().copied().collect();
        self.graph.propagate_from_excluding(&ids, &exclude);
    }

    ///
    /// Copies values from `other` for every key the two graphs share where
    /// `other` holds an up-to-date value, then re-derives dependent states
    /// once.
    ///
    pub fn insert_from(&mut self, other: &Computation) {
        let keys: Vec<Key> = other
            .graph
            .entries()
            .filter(|(_, entry)| entry.state() == State::Uptodate)
            .map(|(_, entry)| entry.key().clone())
            .collect();
        self.insert_from_inner(other, keys);
    }

    /// As `insert_from`, restricted to the given keys.
    pub fn insert_from_keys<I, K>(&mut self, other: &Computation, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        let keys = keys.into_iter().map(Into::into).collect();
        self.insert_from_inner(other, keys);
    }

    fn insert_from_inner(&mut self, other: &Computation, keys: Vec<Key>) {
        let mut ids = Vec::new();
        for key in keys {
            if !self.graph.contains(&key) {
                continue;
            }
            let Some(other_id) = other.graph.entry_id(&key) else {
                continue;
            };
            if other.graph.get_state(other_id) != State::Uptodate {
                continue;
            }
            let Some(value) = other.graph.get_value(other_id).cloned() else {
                continue;
            };
            ids.push(self.graph.insert_value(key, value));
        }
        debug!("Copied {} values from another computation", ids.len());
        let exclude = ids.iter().copied().collect();
        self.graph.propagate_from_excluding(&ids, &exclude);
    }

    ///
    /// Deletes a node. A node that other nodes still reference is kept as a
    /// placeholder; dependents re-derive their states either way.
    ///
    pub fn delete_node(&mut self, key: impl Into<Key>) -> Result<(), Error> {
        let key = key.into();
        if !self.graph.delete_node(&key) {
            return Err(Error::UnknownNode(key));
        }
        Ok(())
    }

    ///
    /// Discards trust in the node's current value: a bound node drops back to
    /// computable or stale, a pure input reverts to uninitialized. Dependents
    /// re-derive their states.
    ///
    pub fn set_stale(&mut self, key: impl Into<Key>) -> Result<(), Error> {
        let key = key.into();
        let id = self
            .graph
            .entry_id(&key)
            .ok_or(Error::UnknownNode(key))?;
        if self.graph.entry(id).binding().is_some() {
            let state = if self.graph.predecessors_uptodate(id) {
                State::Computable
            } else {
                State::Stale
            };
            self.graph.set_state(id, state);
        } else if self.graph.get_state(id) != State::Placeholder {
            // A placeholder has no value to distrust.
            self.graph.set_value(id, None);
            self.graph.set_state(id, State::Uninitialized);
        }
        self.graph.propagate_from(&[id]);
        Ok(())
    }

    ///
    /// Computes the target and any of its not-up-to-date ancestors. User
    /// function failures land on their node as an [`ErrorValue`] and end the
    /// call; only engine errors (unknown node, unresolved placeholder, map
    /// shape) are returned.
    ///
    pub fn compute(&mut self, key: impl Into<Key>) -> Result<(), Error> {
        scheduler::compute_target(&mut self.graph, &key.into())
    }

    /// Computes every runnable node, continuing past failed branches.
    pub fn compute_all(&mut self) -> Result<(), Error> {
        scheduler::compute_all(&mut self.graph)
    }

    pub fn state(&self, key: impl Into<Key>) -> Result<State, Error> {
        let key = key.into();
        self.graph
            .entry_id(&key)
            .map(|id| self.graph.get_state(id))
            .ok_or(Error::UnknownNode(key))
    }

    pub fn value(&self, key: impl Into<Key>) -> Result<Option<Value>, Error> {
        let key = key.into();
        self.graph
            .entry_id(&key)
            .map(|id| self.graph.get_value(id).cloned())
            .ok_or(Error::UnknownNode(key))
    }

    /// State and value together.
    pub fn get(&self, key: impl Into<Key>) -> Result<(State, Option<Value>), Error> {
        let key = key.into();
        let id = self
            .graph
            .entry_id(&key)
            .ok_or(Error::UnknownNode(key))?;
        Ok((self.graph.get_state(id), self.graph.get_value(id).cloned()))
    }

    ///
    /// Declares one child node per field of `shape`, named `"{key}.{field}"`,
    /// each extracting its element from the tuple-shaped parent value.
    ///
    pub fn add_named_tuple_expansion(
        &mut self,
        key: impl Into<Key>,
        shape: &TupleShape,
    ) -> Result<(), Error> {
        let key = key.into();
        for (index, field) in shape.fields().iter().enumerate() {
            let field_name = field.clone();
            let func = Func::new(format!("{}.{field}", shape.name()), move |call| {
                let tuple = call.arg(0)?.expect_list()?;
                tuple
                    .get(index)
                    .cloned()
                    .ok_or_else(|| format!("tuple has no field {index} ({field_name})").into())
            });
            let child = Key::Str(format!("{key}.{field}"));
            let binding = Binding {
                func,
                params: vec![(ParamRole::Positional(0), key.clone())],
            };
            self.upsert(child, Some(binding), None, true)?;
        }
        Ok(())
    }

    ///
    /// Declares a map node: `source` must hold a list, and computing the node
    /// runs a copy of `template` once per element, inserting the element at
    /// `sub_input` and collecting `sub_output`. Failed elements turn the node
    /// into an error whose [`MapError`] carries the failed sub-graphs.
    ///
    pub fn add_map_node(
        &mut self,
        key: impl Into<Key>,
        source: impl Into<Key>,
        template: &Computation,
        sub_input: impl Into<Key>,
        sub_output: impl Into<Key>,
    ) -> Result<(), Error> {
        let key = key.into();
        let sub_output = sub_output.into();
        if !template.graph.contains(&sub_output) {
            return Err(Error::UnknownNode(sub_output));
        }
        let func = map_dispatch(key.clone(), template.clone(), sub_input.into(), sub_output);
        let binding = Binding {
            func,
            params: vec![(ParamRole::Positional(0), source.into())],
        };
        self.upsert(key, Some(binding), None, true)
            .map(|_| ())
    }

    fn upsert(
        &mut self,
        key: Key,
        binding: Option<Binding>,
        value: Option<Value>,
        serialize: bool,
    ) -> Result<EntryId, Error> {
        self.graph
            .add_or_replace_node(key, binding, value, serialize)
            .map_err(|rejected| Error::Cycle {
                key: rejected.key,
                through: rejected.through,
            })
    }
}
