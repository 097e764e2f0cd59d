// Copyright 2025 Reflow project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use petgraph::stable_graph;
use serde_derive::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::value::Value;

pub type EntryId = stable_graph::NodeIndex<u32>;

///
/// A node identifier. Strings, integers, and tuples of these are all valid
/// keys, and compare by value.
///
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum Key {
    Int(i64),
    Str(String),
    Tuple(Vec<Key>),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{i}"),
            Key::Str(s) => write!(f, "{s}"),
            Key::Tuple(keys) => {
                write!(f, "(")?;
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Key {
        Key::Str(s.to_owned())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Key {
        Key::Str(s)
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Key {
        Key::Int(i)
    }
}

impl From<i32> for Key {
    fn from(i: i32) -> Key {
        Key::Int(i64::from(i))
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Key {
        key.clone()
    }
}

impl<A: Into<Key>, B: Into<Key>> From<(A, B)> for Key {
    fn from((a, b): (A, B)) -> Key {
        Key::Tuple(vec![a.into(), b.into()])
    }
}

impl<A: Into<Key>, B: Into<Key>, C: Into<Key>> From<(A, B, C)> for Key {
    fn from((a, b, c): (A, B, C)) -> Key {
        Key::Tuple(vec![a.into(), b.into(), c.into()])
    }
}

///
/// The lifecycle state of a node.
///
/// A node is created either by explicit declaration, or implicitly as a
/// `Placeholder` when another node names it as an input. Once declared it is
/// `Uninitialized` until some upstream activity gives it a meaning:
/// `Computable` when every input is up to date, `Stale` when at least one is
/// not, `Uptodate` when its stored value reflects its current inputs, and
/// `Error` when its own function failed.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum State {
    Placeholder,
    Uninitialized,
    Computable,
    Stale,
    Uptodate,
    Error,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Placeholder => "placeholder",
            State::Uninitialized => "uninitialized",
            State::Computable => "computable",
            State::Stale => "stale",
            State::Uptodate => "uptodate",
            State::Error => "error",
        };
        write!(f, "{s}")
    }
}

///
/// The role a predecessor value plays in a successor's call shape: a declared
/// positional or keyword parameter, or an overflow entry in the variadic tail
/// or variadic keyword map.
///
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ParamRole {
    Positional(usize),
    Keyword(String),
    Variadic(usize),
    VariadicKeyword(String),
}

/// The roles one predecessor fills on one successor. A single predecessor may
/// feed several parameters of the same function.
pub type EdgeLabel = SmallVec<[ParamRole; 2]>;

/// Errors returned by user functions. These are never surfaced to API
/// callers: the scheduler captures them into the failing node's value slot.
pub type FuncError = Box<dyn std::error::Error + Send + Sync>;

type FuncImpl = Arc<dyn Fn(&CallArgs) -> Result<Value, FuncError> + Send + Sync>;

///
/// The assembled call shape for one invocation: positional arguments, the
/// variadic tail, and the two keyword maps, all in declaration order.
///
#[derive(Clone, Debug, Default)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub variadic: Vec<Value>,
    pub keyword: IndexMap<String, Value>,
    pub variadic_keyword: IndexMap<String, Value>,
}

impl CallArgs {
    /// The positional argument at `index`, not counting the variadic tail.
    pub fn arg(&self, index: usize) -> Result<&Value, FuncError> {
        self.positional
            .get(index)
            .ok_or_else(|| format!("missing positional argument {index}").into())
    }

    /// The keyword argument `name`, from either keyword map.
    pub fn kwd(&self, name: &str) -> Result<&Value, FuncError> {
        self.keyword
            .get(name)
            .or_else(|| self.variadic_keyword.get(name))
            .ok_or_else(|| format!("missing keyword argument {name}").into())
    }

    /// All positional values: declared positions followed by the variadic
    /// tail.
    pub fn all_positional(&self) -> impl Iterator<Item = &Value> {
        self.positional.iter().chain(self.variadic.iter())
    }
}

///
/// A named callable with its declared formal parameters.
///
/// Rust offers no signature reflection, so the formal parameter names ride
/// along explicitly. They drive implicit wiring when a node is declared
/// without `args`/`kwds`, and decide whether an explicit argument lands on a
/// declared parameter or in a variadic bucket.
///
#[derive(Clone)]
pub struct Func {
    name: String,
    params: Vec<String>,
    accepts_variadic: bool,
    accepts_variadic_keywords: bool,
    imp: FuncImpl,
}

impl Func {
    pub fn new<N, F>(name: N, f: F) -> Func
    where
        N: Into<String>,
        F: Fn(&CallArgs) -> Result<Value, FuncError> + Send + Sync + 'static,
    {
        Func {
            name: name.into(),
            params: Vec::new(),
            accepts_variadic: false,
            accepts_variadic_keywords: false,
            imp: Arc::new(f),
        }
    }

    /// Declares the formal parameter names, in order.
    pub fn params<I, S>(mut self, params: I) -> Func
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    /// Accepts overflow positional arguments beyond the declared formals.
    pub fn variadic(mut self) -> Func {
        self.accepts_variadic = true;
        self
    }

    /// Accepts keyword arguments beyond the declared formals.
    pub fn variadic_keywords(mut self) -> Func {
        self.accepts_variadic_keywords = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param_names(&self) -> &[String] {
        &self.params
    }

    pub fn accepts_variadic(&self) -> bool {
        self.accepts_variadic
    }

    pub fn accepts_variadic_keywords(&self) -> bool {
        self.accepts_variadic_keywords
    }

    pub fn call(&self, args: &CallArgs) -> Result<Value, FuncError> {
        (self.imp)(args)
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Func")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

///
/// A computation descriptor: the function to run, and how each of its
/// parameters is wired to an upstream node.
///
#[derive(Clone, Debug)]
pub struct Binding {
    pub func: Func,
    /// `(role, source)` wiring entries, in declaration order.
    pub params: Vec<(ParamRole, Key)>,
}

impl Binding {
    /// Unique source keys, in first-use order.
    pub fn sources(&self) -> Vec<&Key> {
        let mut seen: Vec<&Key> = Vec::new();
        for (_, key) in &self.params {
            if !seen.contains(&key) {
                seen.push(key);
            }
        }
        seen
    }

    /// The edge label for a given source: every role it fills.
    pub fn roles_for(&self, source: &Key) -> EdgeLabel {
        self.params
            .iter()
            .filter(|(_, key)| key == source)
            .map(|(role, _)| role.clone())
            .collect()
    }
}
