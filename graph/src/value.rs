// Copyright 2025 Reflow project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::sync::Arc;

use crate::node::{FuncError, Key};

///
/// A type-erased node value. The engine stores and forwards values without
/// interpreting them; the scalar variants keep ordinary data inspectable and
/// snapshot-friendly, and `Opaque` carries anything else.
///
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    /// A captured failure. Present exactly when the node's state is `Error`.
    Error(Arc<ErrorValue>),
    /// An arbitrary user payload, shared by reference and treated as
    /// immutable.
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl Value {
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Value {
        Value::Opaque(Arc::new(value))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&Arc<ErrorValue>> {
        match self {
            Value::Error(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn downcast_opaque<T: Any + Send + Sync>(&self) -> Option<&T> {
        match self {
            Value::Opaque(payload) => payload.downcast_ref(),
            _ => None,
        }
    }

    /// The integer payload, or a call-shaped error for use in user functions.
    pub fn expect_int(&self) -> Result<i64, FuncError> {
        self.as_int()
            .ok_or_else(|| format!("expected an integer, got {self:?}").into())
    }

    /// The float payload (integers coerce), or a call-shaped error.
    pub fn expect_float(&self) -> Result<f64, FuncError> {
        self.as_float()
            .ok_or_else(|| format!("expected a number, got {self:?}").into())
    }

    /// The string payload, or a call-shaped error.
    pub fn expect_str(&self) -> Result<&str, FuncError> {
        self.as_str()
            .ok_or_else(|| format!("expected a string, got {self:?}").into())
    }

    /// The list payload, or a call-shaped error.
    pub fn expect_list(&self) -> Result<&[Value], FuncError> {
        self.as_list()
            .ok_or_else(|| format!("expected a list, got {self:?}").into())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            // Errors and opaque payloads compare by identity.
            (Value::Error(a), Value::Error(b)) => Arc::ptr_eq(a, b),
            (Value::Opaque(a), Value::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Error(error) => write!(f, "Error({})", error.exception),
            Value::Opaque(_) => write!(f, "<opaque>"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Value {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Value {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Value {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::Str(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Value {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

///
/// The record stored in place of a value when a node's function failed.
///
#[derive(Debug)]
pub struct ErrorValue {
    /// The failure the function reported. Callers can downcast this to
    /// recover structured errors, for example the map operator's `MapError`.
    pub exception: FuncError,
    /// Best-effort captured backtrace, if the runtime produced one.
    pub traceback: Option<String>,
    /// The node whose function raised.
    pub source_node: Key,
}

impl ErrorValue {
    pub fn new(exception: FuncError, source_node: Key) -> ErrorValue {
        let backtrace = Backtrace::capture();
        let traceback = match backtrace.status() {
            BacktraceStatus::Captured => Some(backtrace.to_string()),
            _ => None,
        };
        ErrorValue {
            exception,
            traceback,
            source_node,
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.source_node, self.exception)
    }
}
