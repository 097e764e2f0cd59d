// Copyright 2025 Reflow project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Selecting what to run and running it.
//!
//! Node evaluations are strictly topological with declaration-order
//! tie-breaking, so identical graphs execute identically. User functions run
//! synchronously on the caller; a failure lands on its node as an
//! `ErrorValue` and never reaches the API caller.

use std::collections::VecDeque;
use std::sync::Arc;

use fnv::FnvHashSet as HashSet;
use log::{debug, trace};

use graph::{EntryId, ErrorValue, Graph, Key, State, Value};

use crate::binding::resolve_call;
use crate::error::Error;

enum RunOutcome {
    Success,
    Failed,
}

///
/// Runs every runnable node to a fixed point.
///
/// Each sweep takes the nodes currently computable or stale in topological
/// order, skips those whose inputs are not ready, and runs the rest,
/// continuing past failed branches. A sweep that runs nothing ends the call:
/// whatever is left is waiting on an error or a missing input. The extra
/// sweeps pick up nodes that only became runnable mid-run, such as an errored
/// node whose inputs were repaired by an upstream recompute; they also make
/// the whole call idempotent.
///
pub(crate) fn compute_all(graph: &mut Graph) -> Result<(), Error> {
    loop {
        let set: HashSet<EntryId> = graph
            .entries()
            .filter(|(_, entry)| {
                entry.binding().is_some()
                    && matches!(entry.state(), State::Computable | State::Stale)
            })
            .map(|(id, _)| id)
            .collect();

        let mut ran = 0;
        for id in graph.topo_order(&set) {
            if !matches!(graph.get_state(id), State::Computable | State::Stale) {
                // A sibling's failure staled this node after the sweep began.
                continue;
            }
            if !graph.predecessors_uptodate(id) {
                continue;
            }
            run_node(graph, id)?;
            ran += 1;
        }
        if ran == 0 {
            return Ok(());
        }
    }
}

///
/// Computes the ancestor cone of `target`: every node reachable from the
/// target walking back through not-up-to-date nodes, restricted to nodes
/// with a binding. A placeholder anywhere in that cone aborts the request.
/// The first failure ends the call, leaving the target stale unless the
/// target itself was the node that failed.
///
pub(crate) fn compute_target(graph: &mut Graph, target: &Key) -> Result<(), Error> {
    let target_id = graph
        .entry_id(target)
        .ok_or_else(|| Error::UnknownNode(target.clone()))?;
    if graph.get_state(target_id) == State::Placeholder {
        return Err(Error::UnresolvedPlaceholder(target.clone()));
    }

    let mut set: HashSet<EntryId> = HashSet::default();
    let mut seen: HashSet<EntryId> = HashSet::default();
    let mut deque = VecDeque::new();
    deque.push_back(target_id);
    while let Some(id) = deque.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        let entry = graph.entry(id);
        match entry.state() {
            // Satisfied: its ancestors are irrelevant to this request.
            State::Uptodate => continue,
            State::Placeholder => {
                return Err(Error::UnresolvedPlaceholder(entry.key().clone()));
            }
            _ => {}
        }
        if entry.binding().is_some() {
            set.insert(id);
        }
        deque.extend(graph.predecessors(id));
    }
    debug!("Computing {target}: {} nodes in the calc set", set.len());

    for id in graph.topo_order(&set) {
        if !graph.predecessors_uptodate(id) {
            continue;
        }
        match run_node(graph, id)? {
            RunOutcome::Success => {}
            RunOutcome::Failed => break,
        }
    }
    Ok(())
}

///
/// Resolves the node's binding and invokes its function. Success stores the
/// value and re-derives downstream states; failure stores an `ErrorValue`,
/// moves the node to `Error`, and stales everything downstream. Engine
/// aborts (a map node fed a non-list) surface to the caller instead of
/// landing on the node.
///
fn run_node(graph: &mut Graph, id: EntryId) -> Result<RunOutcome, Error> {
    let key = graph.entry(id).key().clone();
    let binding = match graph.entry(id).binding() {
        Some(binding) => binding.clone(),
        None => unreachable!("only bound nodes are scheduled"),
    };

    trace!("Running {key}");
    let result = resolve_call(graph, &binding).and_then(|call| binding.func.call(&call));
    match result {
        Ok(value) => {
            graph.set_value(id, Some(value));
            graph.set_state(id, State::Uptodate);
            graph.propagate_from(&[id]);
            Ok(RunOutcome::Success)
        }
        Err(failure) => match failure.downcast::<Error>() {
            Ok(abort) => Err(*abort),
            Err(failure) => {
                debug!("Node {key} failed: {failure}");
                let error = Arc::new(ErrorValue::new(failure, key));
                graph.set_value(id, Some(Value::Error(error)));
                graph.set_state(id, State::Error);
                stale_descendants(graph, id);
                Ok(RunOutcome::Failed)
            }
        },
    }
}

/// Every transitive successor of a failed node is out of reach until the
/// error is repaired: mark the bound ones stale.
fn stale_descendants(graph: &mut Graph, id: EntryId) {
    let mut deque: VecDeque<EntryId> = graph.successors(id).into();
    let mut seen: HashSet<EntryId> = HashSet::default();
    while let Some(node) = deque.pop_front() {
        if !seen.insert(node) {
            continue;
        }
        if graph.entry(node).binding().is_some() && graph.get_state(node) != State::Stale {
            graph.set_state(node, State::Stale);
        }
        deque.extend(graph.successors(node));
    }
}
