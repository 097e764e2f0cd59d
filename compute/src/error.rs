// Copyright 2025 Reflow project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use graph::Key;
use thiserror::Error;

///
/// Errors surfaced synchronously to API callers.
///
/// Failures raised by user functions are never surfaced this way: the
/// scheduler captures them as an `ErrorValue` on the failing node, and the
/// caller inspects node state and value instead.
///
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown node {0}")]
    UnknownNode(Key),

    #[error("node {0} is a placeholder: it was referenced but never declared")]
    UnresolvedPlaceholder(Key),

    #[error("declaring {key} would create a cycle through {through}")]
    Cycle { key: Key, through: Key },

    #[error("map node {node} requires a list input, got {found}")]
    MapShape { node: Key, found: String },

    #[error("binding for {key} does not fit {func}: {reason}")]
    BadBinding {
        key: Key,
        func: String,
        reason: String,
    },

    #[error("no function named {0} is registered")]
    UnknownFunction(String),
}
