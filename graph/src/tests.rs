// Copyright 2025 Reflow project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use fnv::FnvHashSet as HashSet;

use crate::node::{Binding, Func, Key, ParamRole};
use crate::value::Value;
use crate::{Graph, State};

fn add_one() -> Func {
    Func::new("add_one", |call| {
        Ok(Value::Int(call.kwd("a")?.expect_int()? + 1))
    })
    .params(["a"])
}

fn keyword_binding(func: Func, wiring: &[(&str, &str)]) -> Binding {
    let params = wiring
        .iter()
        .map(|&(param, source)| (ParamRole::Keyword(param.to_owned()), Key::from(source)))
        .collect();
    Binding { func, params }
}

fn states(graph: &Graph) -> Vec<(Key, State)> {
    graph
        .entries()
        .map(|(_, e)| (e.key().clone(), e.state()))
        .collect()
}

#[test]
fn declare_creates_placeholders() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut graph = Graph::new();
    let binding = keyword_binding(add_one(), &[("a", "a")]);
    let b = graph
        .add_or_replace_node(Key::from("b"), Some(binding), None, true)
        .unwrap();

    assert_eq!(graph.get_state(b), State::Uninitialized);
    let a = graph.entry_id(&Key::from("a")).unwrap();
    assert_eq!(graph.get_state(a), State::Placeholder);
    assert_eq!(graph.predecessors(b), vec![a]);
    assert_eq!(graph.successors(a), vec![b]);
}

#[test]
fn edge_labels_preserve_roles() {
    let mut graph = Graph::new();
    let func = Func::new("pair", |call| {
        Ok(Value::List(vec![
            call.arg(0)?.clone(),
            call.kwd("y")?.clone(),
        ]))
    })
    .params(["x", "y"]);
    let binding = Binding {
        func,
        params: vec![
            (ParamRole::Positional(0), Key::from("src")),
            (ParamRole::Keyword("y".to_owned()), Key::from("src")),
        ],
    };
    let node = graph
        .add_or_replace_node(Key::from("pair"), Some(binding), None, true)
        .unwrap();

    let src = graph.entry_id(&Key::from("src")).unwrap();
    let label = graph.edge_label(src, node).unwrap();
    assert_eq!(
        label.as_slice(),
        &[
            ParamRole::Positional(0),
            ParamRole::Keyword("y".to_owned())
        ]
    );
}

#[test]
fn cycle_rejected_leaves_graph_untouched() {
    let mut graph = Graph::new();
    graph
        .add_or_replace_node(Key::from("a"), None, Some(Value::Int(1)), true)
        .unwrap();
    graph
        .add_or_replace_node(
            Key::from("b"),
            Some(keyword_binding(add_one(), &[("a", "a")])),
            None,
            true,
        )
        .unwrap();

    let before = states(&graph);
    let rejected = graph
        .add_or_replace_node(
            Key::from("a"),
            Some(keyword_binding(add_one(), &[("a", "b")])),
            None,
            true,
        )
        .unwrap_err();
    assert_eq!(rejected.key, Key::from("a"));
    assert_eq!(rejected.through, Key::from("b"));
    assert_eq!(states(&graph), before);

    // A self-edge is a cycle too.
    let rejected = graph
        .add_or_replace_node(
            Key::from("b"),
            Some(keyword_binding(add_one(), &[("a", "b")])),
            None,
            true,
        )
        .unwrap_err();
    assert_eq!(rejected.through, Key::from("b"));
    assert_eq!(states(&graph), before);
}

#[test]
fn insert_propagates_downstream() {
    let mut graph = Graph::new();
    graph
        .add_or_replace_node(Key::from("a"), None, None, true)
        .unwrap();
    graph
        .add_or_replace_node(
            Key::from("b"),
            Some(keyword_binding(add_one(), &[("a", "a")])),
            None,
            true,
        )
        .unwrap();
    graph
        .add_or_replace_node(
            Key::from("c"),
            Some(keyword_binding(add_one(), &[("a", "b")])),
            None,
            true,
        )
        .unwrap();

    // Nothing has happened upstream yet: the chain stays dormant.
    let b = graph.entry_id(&Key::from("b")).unwrap();
    let c = graph.entry_id(&Key::from("c")).unwrap();
    assert_eq!(graph.get_state(b), State::Uninitialized);
    assert_eq!(graph.get_state(c), State::Uninitialized);

    let a = graph.insert_value(Key::from("a"), Value::Int(1));
    graph.propagate_from(&[a]);
    assert_eq!(graph.get_state(b), State::Computable);
    assert_eq!(graph.get_state(c), State::Stale);
}

#[test]
fn batch_insert_excludes_fresh_values() {
    let mut graph = Graph::new();
    graph
        .add_or_replace_node(Key::from("a"), None, None, true)
        .unwrap();
    graph
        .add_or_replace_node(
            Key::from("b"),
            Some(keyword_binding(add_one(), &[("a", "a")])),
            None,
            true,
        )
        .unwrap();

    let a = graph.insert_value(Key::from("a"), Value::Int(1));
    let b = graph.insert_value(Key::from("b"), Value::Int(2));
    let exclude: HashSet<_> = [a, b].into_iter().collect();
    graph.propagate_from_excluding(&[a, b], &exclude);

    assert_eq!(graph.get_state(b), State::Uptodate);
}

#[test]
fn delete_with_successors_downgrades_to_placeholder() {
    let mut graph = Graph::new();
    let a = graph.insert_value(Key::from("a"), Value::Int(1));
    graph
        .add_or_replace_node(
            Key::from("b"),
            Some(keyword_binding(add_one(), &[("a", "a")])),
            None,
            true,
        )
        .unwrap();

    assert!(graph.delete_node(&Key::from("a")));
    assert_eq!(graph.get_state(a), State::Placeholder);
    assert_eq!(graph.get_value(a), None);
    let b = graph.entry_id(&Key::from("b")).unwrap();
    assert_eq!(graph.get_state(b), State::Stale);
}

#[test]
fn delete_prunes_orphaned_placeholders() {
    let mut graph = Graph::new();
    graph
        .add_or_replace_node(
            Key::from("b"),
            Some(keyword_binding(add_one(), &[("a", "a")])),
            None,
            true,
        )
        .unwrap();
    assert!(graph.contains(&Key::from("a")));

    // Deleting the only node that references the placeholder removes both.
    assert!(graph.delete_node(&Key::from("b")));
    assert!(!graph.contains(&Key::from("a")));
    assert!(graph.is_empty());
}

#[test]
fn delete_unknown_is_a_noop() {
    let mut graph = Graph::new();
    assert!(!graph.delete_node(&Key::from("missing")));
}

#[test]
fn rebind_rewires_edges() {
    let mut graph = Graph::new();
    graph.insert_value(Key::from("a"), Value::Int(1));
    graph.insert_value(Key::from("b"), Value::Int(2));
    graph
        .add_or_replace_node(
            Key::from("c"),
            Some(keyword_binding(add_one(), &[("a", "a")])),
            None,
            true,
        )
        .unwrap();

    graph
        .add_or_replace_node(
            Key::from("c"),
            Some(keyword_binding(add_one(), &[("a", "b")])),
            None,
            true,
        )
        .unwrap();

    let b = graph.entry_id(&Key::from("b")).unwrap();
    let c = graph.entry_id(&Key::from("c")).unwrap();
    assert_eq!(graph.predecessors(c), vec![b]);
    assert_eq!(graph.get_state(c), State::Computable);
}

#[test]
fn topo_order_breaks_ties_by_declaration() {
    let mut graph = Graph::new();
    // A diamond declared a, b, c, d. At each depth the earlier declaration
    // must run first.
    graph.insert_value(Key::from("a"), Value::Int(1));
    graph
        .add_or_replace_node(
            Key::from("b"),
            Some(keyword_binding(add_one(), &[("a", "a")])),
            None,
            true,
        )
        .unwrap();
    graph
        .add_or_replace_node(
            Key::from("c"),
            Some(keyword_binding(add_one(), &[("a", "a")])),
            None,
            true,
        )
        .unwrap();
    graph
        .add_or_replace_node(
            Key::from("d"),
            Some(Binding {
                func: add_one(),
                params: vec![
                    (ParamRole::Keyword("a".to_owned()), Key::from("b")),
                    (ParamRole::Keyword("a".to_owned()), Key::from("c")),
                ],
            }),
            None,
            true,
        )
        .unwrap();

    let set: HashSet<_> = graph.entries().map(|(id, _)| id).collect();
    let order: Vec<Key> = graph
        .topo_order(&set)
        .into_iter()
        .map(|id| graph.entry(id).key().clone())
        .collect();
    assert_eq!(
        order,
        vec![
            Key::from("a"),
            Key::from("b"),
            Key::from("c"),
            Key::from("d")
        ]
    );
}

#[test]
fn tuple_and_int_keys() {
    let mut graph = Graph::new();
    graph.insert_value(Key::from(7), Value::Int(7));
    graph.insert_value(Key::from(("fib", 1)), Value::Int(0));
    assert!(graph.contains(&Key::from(7)));
    assert!(graph.contains(&Key::from(("fib", 1))));
    assert_eq!(Key::from(("fib", 1)).to_string(), "(fib, 1)");
}
