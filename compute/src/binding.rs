// Copyright 2025 Reflow project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Wiring a function's parameters to upstream nodes, and assembling the call
//! shape back out of their values at run time.

use graph::{Binding, CallArgs, Func, FuncError, Graph, Key, ParamRole, Value};

use crate::error::Error;

///
/// Builds the wiring for a node declaration.
///
/// Explicit `args` fill the declared formals positionally and spill into the
/// variadic tail; explicit `kwds` name a declared formal or spill into the
/// variadic keyword map. With neither given, each declared formal wires to
/// the node of the same name, which may not exist yet (a placeholder).
///
pub(crate) fn build_binding(
    key: &Key,
    func: Func,
    args: Option<Vec<Key>>,
    kwds: Option<Vec<(String, Key)>>,
) -> Result<Binding, Error> {
    let explicit = args.is_some() || kwds.is_some();
    let mut params: Vec<(ParamRole, Key)> = Vec::new();

    if let Some(args) = args {
        for (index, source) in args.into_iter().enumerate() {
            let role = if index < func.param_names().len() {
                ParamRole::Positional(index)
            } else if func.accepts_variadic() {
                ParamRole::Variadic(index)
            } else {
                return Err(Error::BadBinding {
                    key: key.clone(),
                    func: func.name().to_owned(),
                    reason: format!(
                        "{} positional arguments for {} parameters",
                        index + 1,
                        func.param_names().len()
                    ),
                });
            };
            params.push((role, source));
        }
    }

    if let Some(kwds) = kwds {
        for (name, source) in kwds {
            let role = if func.param_names().iter().any(|p| *p == name) {
                ParamRole::Keyword(name)
            } else if func.accepts_variadic_keywords() {
                ParamRole::VariadicKeyword(name)
            } else {
                return Err(Error::BadBinding {
                    key: key.clone(),
                    func: func.name().to_owned(),
                    reason: format!("unexpected keyword argument {name}"),
                });
            };
            params.push((role, source));
        }
    }

    if !explicit {
        for name in func.param_names() {
            params.push((ParamRole::Keyword(name.clone()), Key::Str(name.clone())));
        }
    }

    Ok(Binding { func, params })
}

///
/// Reads the bound upstream values out of the store and assembles the four
/// call buckets in declaration order. The scheduler only calls this once
/// every predecessor is up to date, so a missing value is reported as an
/// ordinary function error rather than a panic.
///
pub(crate) fn resolve_call(graph: &Graph, binding: &Binding) -> Result<CallArgs, FuncError> {
    let mut positional: Vec<(usize, Value)> = Vec::new();
    let mut variadic: Vec<(usize, Value)> = Vec::new();
    let mut call = CallArgs::default();

    for (role, source) in &binding.params {
        let id = graph
            .entry_id(source)
            .ok_or_else(|| format!("input node {source} is missing"))?;
        let value = graph
            .get_value(id)
            .cloned()
            .ok_or_else(|| format!("input node {source} has no value"))?;
        match role {
            ParamRole::Positional(index) => positional.push((*index, value)),
            ParamRole::Variadic(index) => variadic.push((*index, value)),
            ParamRole::Keyword(name) => {
                call.keyword.insert(name.clone(), value);
            }
            ParamRole::VariadicKeyword(name) => {
                call.variadic_keyword.insert(name.clone(), value);
            }
        }
    }

    positional.sort_by_key(|&(index, _)| index);
    variadic.sort_by_key(|&(index, _)| index);
    call.positional = positional.into_iter().map(|(_, value)| value).collect();
    call.variadic = variadic.into_iter().map(|(_, value)| value).collect();
    Ok(call)
}
