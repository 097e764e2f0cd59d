// Copyright 2025 Reflow project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! A typed DAG of computation nodes with per-node state tracking.
//!
//! The store owns the structure (nodes, labeled edges, declaration order) and
//! the node state machine: every structural edit and value event re-derives
//! the states of the affected transitive successors so that a node's state
//! always says whether its value can be trusted. Running user functions is
//! the business of the `compute` crate layered on top.

pub mod entry;
pub mod node;
pub mod value;

#[cfg(test)]
mod tests;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use fixedbitset::FixedBitSet;
use fnv::{FnvHashMap as HashMap, FnvHashSet as HashSet};
use log::{debug, trace};
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::{EdgeRef, VisitMap, Visitable};
use petgraph::Direction;

pub use crate::entry::Entry;
pub use crate::node::{
    Binding, CallArgs, EdgeLabel, EntryId, Func, FuncError, Key, ParamRole, State,
};
pub use crate::value::{ErrorValue, Value};

type PGraph = StableDiGraph<Entry, EdgeLabel, u32>;

///
/// A cycle was rejected: wiring the given node's inputs would have made the
/// graph cyclic. The graph is left untouched.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CycleRejected {
    pub key: Key,
    /// The input that closes the cycle.
    pub through: Key,
}

///
/// A DAG of entries, indexed by key. Acyclicity is enforced on mutation.
///
#[derive(Clone, Debug)]
pub struct Graph {
    pg: PGraph,
    nodes: HashMap<Key, EntryId>,
    next_seq: u64,
}

impl Graph {
    pub fn new() -> Graph {
        Graph {
            pg: PGraph::with_capacity(0, 0),
            nodes: HashMap::default(),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn entry_id(&self, key: &Key) -> Option<EntryId> {
        self.nodes.get(key).copied()
    }

    pub fn entry(&self, id: EntryId) -> &Entry {
        self.pg
            .node_weight(id)
            .expect("EntryIds are only handed out for live entries")
    }

    fn entry_mut(&mut self, id: EntryId) -> &mut Entry {
        self.pg
            .node_weight_mut(id)
            .expect("EntryIds are only handed out for live entries")
    }

    /// All entries, in declaration order.
    pub fn entries(&self) -> impl Iterator<Item = (EntryId, &Entry)> + '_ {
        let mut ids: Vec<EntryId> = self.pg.node_indices().collect();
        ids.sort_by_key(|&id| self.entry(id).seq());
        ids.into_iter().map(move |id| (id, self.entry(id)))
    }

    pub fn get_state(&self, id: EntryId) -> State {
        self.entry(id).state()
    }

    pub fn set_state(&mut self, id: EntryId, state: State) {
        trace!("{}: {} -> {}", self.entry(id).key(), self.entry(id).state(), state);
        self.entry_mut(id).set_state(state);
    }

    pub fn get_value(&self, id: EntryId) -> Option<&Value> {
        self.entry(id).value()
    }

    pub fn set_value(&mut self, id: EntryId, value: Option<Value>) {
        self.entry_mut(id).set_value(value);
    }

    /// Predecessors in wiring order.
    pub fn predecessors(&self, id: EntryId) -> Vec<EntryId> {
        // petgraph iterates most-recently-added first; reverse to recover the
        // order the binding declared its sources in.
        let mut ids: Vec<EntryId> = self.pg.neighbors_directed(id, Direction::Incoming).collect();
        ids.reverse();
        ids
    }

    /// Successors in declaration order.
    pub fn successors(&self, id: EntryId) -> Vec<EntryId> {
        let mut ids: Vec<EntryId> = self.pg.neighbors_directed(id, Direction::Outgoing).collect();
        ids.sort_by_key(|&s| self.entry(s).seq());
        ids
    }

    /// The roles `src` fills on `dst`, if the edge exists.
    pub fn edge_label(&self, src: EntryId, dst: EntryId) -> Option<&EdgeLabel> {
        self.pg
            .find_edge(src, dst)
            .and_then(|edge| self.pg.edge_weight(edge))
    }

    /// True when every predecessor is up to date (vacuously true for none).
    pub fn predecessors_uptodate(&self, id: EntryId) -> bool {
        self.pg
            .neighbors_directed(id, Direction::Incoming)
            .all(|p| self.entry(p).state() == State::Uptodate)
    }

    fn ensure_entry(&mut self, key: Key) -> EntryId {
        if let Some(&id) = self.nodes.get(&key) {
            return id;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = self.pg.add_node(Entry::new(key.clone(), seq));
        self.nodes.insert(key, id);
        id
    }

    ///
    /// Upserts a node. A binding (re)wires the node's in-edges atomically:
    /// unknown sources become placeholders, stale edges are removed, and a
    /// failed cycle check leaves the graph untouched. Downstream states
    /// re-derive before returning.
    ///
    pub fn add_or_replace_node(
        &mut self,
        key: Key,
        binding: Option<Binding>,
        value: Option<Value>,
        serialize: bool,
    ) -> Result<EntryId, CycleRejected> {
        // Reject cycles before mutating anything: a new in-edge from `source`
        // closes a cycle exactly when `source` is reachable from this node.
        // A node not yet present has no dependents, so only a self-reference
        // can close a cycle through it.
        if let Some(binding) = &binding {
            let id = self.entry_id(&key);
            for source in binding.sources() {
                let cyclic = *source == key
                    || match (id, self.entry_id(source)) {
                        (Some(id), Some(src_id)) => self.reachable(id, src_id),
                        _ => false,
                    };
                if cyclic {
                    let through = source.clone();
                    return Err(CycleRejected { key, through });
                }
            }
        }

        let id = self.ensure_entry(key);

        // Rewire: drop the old in-edges, wire the new sources, then prune any
        // placeholder the old wiring was the last reason to keep.
        let old_edges: Vec<_> = self
            .pg
            .edges_directed(id, Direction::Incoming)
            .map(|e| (e.id(), e.source()))
            .collect();
        for &(edge, _) in &old_edges {
            self.pg.remove_edge(edge);
        }
        if let Some(binding) = &binding {
            for source in binding.sources() {
                let roles = binding.roles_for(source);
                let src_id = self.ensure_entry(source.clone());
                self.pg.add_edge(src_id, id, roles);
            }
        }
        for &(_, old_src) in &old_edges {
            self.prune_placeholder(old_src);
        }

        let state = self.declared_state(id, binding.is_some(), value.is_some());
        let entry = self.entry_mut(id);
        entry.set_binding(binding);
        entry.set_value(value);
        entry.set_serialize(serialize);
        entry.set_state(state);
        debug!("Declared {} as {}", self.entry(id).key(), state);

        self.propagate_from(&[id]);
        Ok(id)
    }

    ///
    /// Deletes a node. A node that still has successors is kept as a bare
    /// placeholder so its dependents' bindings stay resolvable; placeholder
    /// predecessors that lose their last successor go with it. Downstream
    /// states re-derive before returning.
    ///
    pub fn delete_node(&mut self, key: &Key) -> bool {
        let Some(id) = self.entry_id(key) else {
            return false;
        };

        let in_edges: Vec<_> = self
            .pg
            .edges_directed(id, Direction::Incoming)
            .map(|e| (e.id(), e.source()))
            .collect();
        for &(edge, _) in &in_edges {
            self.pg.remove_edge(edge);
        }

        let has_successors = self
            .pg
            .neighbors_directed(id, Direction::Outgoing)
            .next()
            .is_some();
        if has_successors {
            debug!("Deleted {key}, downgrading to a placeholder");
            let entry = self.entry_mut(id);
            entry.set_binding(None);
            entry.set_value(None);
            entry.set_state(State::Placeholder);
            self.propagate_from(&[id]);
        } else {
            debug!("Deleted {key}");
            self.pg.remove_node(id);
            self.nodes.remove(key);
        }
        for &(_, old_src) in &in_edges {
            self.prune_placeholder(old_src);
        }
        true
    }

    ///
    /// Stores a value at `key` (creating an input node if needed) and marks
    /// it up to date. Propagation is the caller's business, so batch inserts
    /// can run it once over the whole batch.
    ///
    pub fn insert_value(&mut self, key: Key, value: Value) -> EntryId {
        let id = self.ensure_entry(key);
        let entry = self.entry_mut(id);
        entry.set_value(Some(value));
        entry.set_state(State::Uptodate);
        id
    }

    ///
    /// Re-derives the state of every transitive successor of `roots` from its
    /// predecessors, in topological order. Returns the number of changes.
    ///
    pub fn propagate_from(&mut self, roots: &[EntryId]) -> usize {
        self.propagate_from_excluding(roots, &HashSet::default())
    }

    ///
    /// As `propagate_from`, but nodes in `exclude` keep their state: a batch
    /// insert passes the inserted set so fresh values stay up to date even
    /// when they depend on each other.
    ///
    /// The rule per bound successor: every predecessor up to date means
    /// computable; otherwise stale, except that a node which has never seen
    /// upstream activity (it is uninitialized, and so is everything above it)
    /// stays dormant. Nodes without a binding are never touched. One sweep in
    /// topological order reaches the fixed point.
    ///
    pub fn propagate_from_excluding(
        &mut self,
        roots: &[EntryId],
        exclude: &HashSet<EntryId>,
    ) -> usize {
        let mut seeds = VecDeque::new();
        for &root in roots {
            seeds.extend(self.pg.neighbors_directed(root, Direction::Outgoing));
        }
        let affected: HashSet<EntryId> = self.walk(seeds, Direction::Outgoing).collect();

        let mut changed = 0;
        for id in self.topo_order(&affected) {
            if exclude.contains(&id) || self.entry(id).binding().is_none() {
                continue;
            }
            let next = self.derived_state(id);
            let current = self.entry(id).state();
            if current != next {
                self.set_state(id, next);
                changed += 1;
            }
        }
        if changed > 0 {
            debug!("Propagation changed {changed} node states");
        }
        changed
    }

    ///
    /// Topologically orders the given ids, breaking ties by declaration order
    /// so identical graphs schedule identically.
    ///
    pub fn topo_order(&self, set: &HashSet<EntryId>) -> Vec<EntryId> {
        let mut indegree: HashMap<EntryId, usize> = HashMap::default();
        for &id in set {
            let within = self
                .pg
                .neighbors_directed(id, Direction::Incoming)
                .filter(|p| set.contains(p))
                .count();
            indegree.insert(id, within);
        }

        let mut ready: BinaryHeap<Reverse<(u64, EntryId)>> = indegree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&id, _)| Reverse((self.entry(id).seq(), id)))
            .collect();
        let mut order = Vec::with_capacity(set.len());
        while let Some(Reverse((_, id))) = ready.pop() {
            order.push(id);
            for succ in self.pg.neighbors_directed(id, Direction::Outgoing) {
                if let Some(degree) = indegree.get_mut(&succ) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse((self.entry(succ).seq(), succ)));
                    }
                }
            }
        }
        order
    }

    /// The state a node takes at declaration time.
    fn declared_state(&self, id: EntryId, has_binding: bool, has_value: bool) -> State {
        if has_value {
            return State::Uptodate;
        }
        if !has_binding {
            return State::Uninitialized;
        }
        self.bound_state(id, State::Uninitialized)
    }

    /// The state propagation re-derives for an already-bound node.
    fn derived_state(&self, id: EntryId) -> State {
        self.bound_state(id, self.entry(id).state())
    }

    ///
    /// The recompute rule for a node with a binding: computable when every
    /// predecessor is up to date (vacuously so for a zero-input function),
    /// stale once any upstream activity exists, and uninitialized while the
    /// node has only ever seen undeclared or valueless inputs.
    ///
    fn bound_state(&self, id: EntryId, current: State) -> State {
        let preds = self.predecessors(id);
        if preds
            .iter()
            .all(|&p| self.entry(p).state() == State::Uptodate)
        {
            return State::Computable;
        }
        let upstream_active = preds.iter().any(|&p| {
            !matches!(
                self.entry(p).state(),
                State::Placeholder | State::Uninitialized
            )
        });
        if upstream_active || current != State::Uninitialized {
            State::Stale
        } else {
            State::Uninitialized
        }
    }

    fn reachable(&self, from: EntryId, to: EntryId) -> bool {
        self.walk(VecDeque::from(vec![from]), Direction::Outgoing)
            .any(|id| id == to)
    }

    /// Removes a placeholder that no longer has any successor: it only ever
    /// existed because something referenced it.
    fn prune_placeholder(&mut self, id: EntryId) {
        let Some(entry) = self.pg.node_weight(id) else {
            return;
        };
        if entry.state() != State::Placeholder {
            return;
        }
        if self
            .pg
            .neighbors_directed(id, Direction::Outgoing)
            .next()
            .is_some()
        {
            return;
        }
        let key = entry.key().clone();
        debug!("Pruning unreferenced placeholder {key}");
        self.pg.remove_node(id);
        self.nodes.remove(&key);
    }

    ///
    /// Begins a Walk from the given roots. Yields every node reachable in the
    /// direction of traversal, roots included, in breadth-first order.
    ///
    fn walk(&self, roots: VecDeque<EntryId>, direction: Direction) -> Walk<'_> {
        Walk {
            graph: self,
            direction,
            deque: roots,
            walked: self.pg.visit_map(),
        }
    }
}

impl Default for Graph {
    fn default() -> Graph {
        Graph::new()
    }
}

///
/// A breadth-first traversal in one direction over the graph, borrowing it
/// for the duration of the iteration.
///
struct Walk<'a> {
    graph: &'a Graph,
    direction: Direction,
    deque: VecDeque<EntryId>,
    walked: FixedBitSet,
}

impl<'a> Iterator for Walk<'a> {
    type Item = EntryId;

    fn next(&mut self) -> Option<EntryId> {
        while let Some(id) = self.deque.pop_front() {
            if !self.walked.visit(id) {
                continue;
            }
            self.deque
                .extend(self.graph.pg.neighbors_directed(id, self.direction));
            return Some(id);
        }
        None
    }
}
