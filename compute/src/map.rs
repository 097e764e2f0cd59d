// Copyright 2025 Reflow project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The map operator: a node whose function runs a sub-graph once per element
//! of a list input.

use std::fmt;

use graph::{Func, FuncError, Key, State, Value};

use crate::error::Error;
use crate::Computation;

///
/// The failure stored on a map node when one or more per-element sub-runs
/// failed. `results` holds, in input order, either the successful output or
/// the entire failed sub-graph, so the caller can inspect what went wrong at
/// each index. Recovered by downcasting the node's `ErrorValue::exception`.
///
#[derive(Debug)]
pub struct MapError {
    pub results: Vec<MapOutcome>,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed = self
            .results
            .iter()
            .filter(|outcome| matches!(outcome, MapOutcome::Failed(_)))
            .count();
        write!(f, "{failed} of {} map elements failed", self.results.len())
    }
}

impl std::error::Error for MapError {}

///
/// One element's result: the sub-graph's output, or the sub-graph itself when
/// it did not finish cleanly.
///
#[derive(Clone, Debug)]
pub enum MapOutcome {
    Value(Value),
    Failed(Computation),
}

impl MapOutcome {
    pub fn value(&self) -> Option<&Value> {
        match self {
            MapOutcome::Value(value) => Some(value),
            MapOutcome::Failed(_) => None,
        }
    }

    pub fn failed(&self) -> Option<&Computation> {
        match self {
            MapOutcome::Value(_) => None,
            MapOutcome::Failed(comp) => Some(comp),
        }
    }
}

///
/// Builds the dispatch function for a map node: clone the template per
/// element, feed the element in at `sub_input`, run the copy to completion,
/// and read `sub_output` back out.
///
/// A non-list input is an engine abort, not a node failure: the scheduler
/// recognizes the boxed `Error` and surfaces it to the `compute` caller.
///
pub(crate) fn map_dispatch(
    node: Key,
    template: Computation,
    sub_input: Key,
    sub_output: Key,
) -> Func {
    let name = format!("map[{sub_input} -> {sub_output}]");
    Func::new(name, move |call| {
        let source = call.arg(0)?;
        let items = match source {
            Value::List(items) => items,
            other => {
                return Err(Box::new(Error::MapShape {
                    node: node.clone(),
                    found: format!("{other:?}"),
                }) as FuncError);
            }
        };

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let mut sub = template.clone();
            sub.insert(sub_input.clone(), item.clone());
            sub.compute_all().map_err(|e| Box::new(e) as FuncError)?;
            let finished = matches!(sub.state(sub_output.clone()), Ok(State::Uptodate));
            let output = if finished {
                sub.value(sub_output.clone()).ok().flatten()
            } else {
                None
            };
            match output {
                Some(value) => results.push(MapOutcome::Value(value)),
                None => results.push(MapOutcome::Failed(sub)),
            }
        }

        if results
            .iter()
            .all(|outcome| matches!(outcome, MapOutcome::Value(_)))
        {
            let outputs = results
                .into_iter()
                .filter_map(|outcome| match outcome {
                    MapOutcome::Value(value) => Some(value),
                    MapOutcome::Failed(_) => None,
                })
                .collect();
            Ok(Value::List(outputs))
        } else {
            Err(Box::new(MapError { results }) as FuncError)
        }
    })
}
