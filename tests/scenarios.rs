//! End-to-end compilation of small Blueprints

use pbbc::{
    compile_blueprint, compile_graph, pins, Backend, Blueprint, BytecodeBackend, ClassInfo, CompileError,
    CompileOptions, ConnectionError, ContextFlags, ContextKind, ErrorKind, FunctionSignature, Graph, LiteralValue, MathOp,
    NodeId, PinType, RustSourceBackend, Schema, Severity, StatementKind, TerminalKind,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn schema() -> Schema {
    let mut schema = Schema::with_standard_library();
    schema.add_class(ClassInfo::new("Pawn").with_parent("Actor"));
    schema.add_library_function(FunctionSignature::new("LogFloat").param("value", PinType::Float));
    schema.add_library_function(FunctionSignature::new("LogInt").param("value", PinType::Integer));
    schema.add_library_function(FunctionSignature::new("SumFloats").param("values", PinType::Array(Box::new(PinType::Float))));
    schema
}

fn link(graph: &mut Graph, from: NodeId, from_pin: &str, to: NodeId, to_pin: &str) {
    let a = graph.find_pin(from, from_pin).unwrap();
    let b = graph.find_pin(to, to_pin).unwrap();
    graph.link_unchecked(a, b);
}

fn call_count(kinds: impl Iterator<Item = StatementKind>, name: &str) -> usize {
    kinds
        .filter(|k| matches!(k, StatementKind::CallFunction { function, .. } if function == name))
        .count()
}

#[test]
fn test_event_to_call() {
    init_tracing();
    let mut graph = Graph::new("EventGraph");
    let event = graph.add_event("BeginPlay");
    let print = graph.add_call("PrintString", &[("in_string", PinType::String)], None, false);
    link(&mut graph, event, pins::THEN, print, pins::EXEC);

    let function = compile_graph(&graph, &schema()).unwrap();
    assert_eq!(function.kind(), ContextKind::Ubergraph);
    assert_eq!(function.linear_execution_list(), &[event, print]);

    let kinds: Vec<StatementKind> = function.statements().iter().map(|s| s.kind.clone()).collect();
    assert_eq!(
        kinds,
        vec![
            StatementKind::CallFunction {
                function: "PrintString".to_string(),
                pure: false
            },
            StatementKind::EndOfThread,
            StatementKind::Return,
        ]
    );
    assert_eq!(function.entry_points()[0].address, 0);
    assert_eq!(function.epilogue(), 2);
}

#[test]
fn test_branch_without_condition_fails() {
    init_tracing();
    let mut graph = Graph::new("Check");
    let entry = graph.add_function_entry(&[]);
    let branch = graph.add_branch();
    link(&mut graph, entry, pins::THEN, branch, pins::EXEC);

    let error = compile_graph(&graph, &schema()).unwrap_err();
    assert_eq!(
        error,
        CompileError::MissingRequiredPin {
            node: branch,
            pin: pins::CONDITION.to_string()
        }
    );
}

#[test]
fn test_unknown_member_reports_upstream_note() {
    init_tracing();
    let mut graph = Graph::new("ReportHealth");
    let entry = graph.add_function_entry(&[]);
    let log = graph.add_call("LogFloat", &[("value", PinType::Float)], None, false);
    let get = graph.add_variable_get("Health", PinType::Float);
    link(&mut graph, entry, pins::THEN, log, pins::EXEC);
    link(&mut graph, get, pins::VALUE, log, "value");

    let mut blueprint = Blueprint::new("Hero").with_class("Pawn");
    blueprint.add_function(graph, ContextFlags::default());
    let compiled = compile_blueprint(&blueprint, &schema(), &CompileOptions::default()).unwrap();

    assert_eq!(compiled.failures, vec!["ReportHealth".to_string()]);
    assert!(compiled.function("ReportHealth").is_none());

    let diagnostics = compiled.diagnostics.snapshot();
    let errors: Vec<_> = diagnostics.iter().filter(|d| d.severity == Severity::Error).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].node, Some(get));
    assert!(errors[0].message.contains("Health"));
    assert!(diagnostics
        .iter()
        .any(|d| d.severity == Severity::Note && d.node == Some(log)));
}

#[test]
fn test_pure_node_recomputed_per_use() {
    init_tracing();
    let mut graph = Graph::new("Twice");
    let entry = graph.add_function_entry(&[("x", PinType::Integer)]);
    let add = graph.add_math(MathOp::Add, PinType::Integer);
    let first = graph.add_call("LogInt", &[("value", PinType::Integer)], None, false);
    let second = graph.add_call("LogInt", &[("value", PinType::Integer)], None, false);
    link(&mut graph, entry, "x", add, pins::A);
    link(&mut graph, entry, "x", add, pins::B);
    link(&mut graph, add, pins::RESULT, first, "value");
    link(&mut graph, add, pins::RESULT, second, "value");
    link(&mut graph, entry, pins::THEN, first, pins::EXEC);
    link(&mut graph, first, pins::THEN, second, pins::EXEC);

    let function = compile_graph(&graph, &schema()).unwrap();
    let kinds = function.statements().iter().map(|s| s.kind.clone());
    assert_eq!(call_count(kinds, "Add_IntegerInteger"), 2);
    assert!(!function.linear_execution_list().contains(&add));
}

#[test]
fn test_conflicting_wildcard_array() {
    init_tracing();
    let mut graph = Graph::new("Sum");
    let entry = graph.add_function_entry(&[("ints", PinType::Array(Box::new(PinType::Integer)))]);
    let identity = graph.add_call(
        "Identity",
        &[("in", PinType::Array(Box::new(PinType::Wildcard)))],
        Some(PinType::Array(Box::new(PinType::Wildcard))),
        true,
    );
    let sum = graph.add_call("SumFloats", &[("values", PinType::Array(Box::new(PinType::Float)))], None, false);
    link(&mut graph, entry, pins::THEN, sum, pins::EXEC);
    link(&mut graph, entry, "ints", identity, "in");
    link(&mut graph, identity, pins::RETURN_VALUE, sum, "values");

    let error = compile_graph(&graph, &schema()).unwrap_err();
    assert!(matches!(
        error,
        CompileError::Connection(ConnectionError::AmbiguousWildcard { node, .. }) if node == identity
    ));
}

#[test]
fn test_jump_to_disabled_node() {
    init_tracing();
    let mut graph = Graph::new("Skip");
    let entry = graph.add_function_entry(&[]);
    let print = graph.add_call("PrintString", &[("in_string", PinType::String)], None, false);
    link(&mut graph, entry, pins::THEN, print, pins::EXEC);
    graph.set_enabled(print, false);

    let error = compile_graph(&graph, &schema()).unwrap_err();
    assert_eq!(error, CompileError::UnreachableTarget { node: entry, target: print });
}

#[test]
fn test_event_graphs_merge_into_ubergraph() {
    init_tracing();
    let mut begin = Graph::new("Page1");
    let event = begin.add_event("BeginPlay");
    let print = begin.add_call("PrintString", &[("in_string", PinType::String)], None, false);
    link(&mut begin, event, pins::THEN, print, pins::EXEC);

    let mut hit = Graph::new("Page2");
    let on_hit = hit.add_custom_event("OnHit", &[("damage", PinType::Float)]);
    let log = hit.add_call("LogFloat", &[("value", PinType::Float)], None, false);
    link(&mut hit, on_hit, pins::THEN, log, pins::EXEC);
    link(&mut hit, on_hit, "damage", log, "value");

    let mut blueprint = Blueprint::new("Hero").with_class("Pawn");
    blueprint.add_event_graph(begin);
    blueprint.add_event_graph(hit);
    let compiled = compile_blueprint(&blueprint, &schema(), &CompileOptions::default()).unwrap();
    assert!(compiled.is_success());

    let ubergraph = compiled.function("ExecuteUbergraph_Hero").unwrap();
    assert_eq!(ubergraph.entry_points().len(), 2);
    assert!(ubergraph
        .terminals()
        .iter()
        .any(|t| t.name == "OnHit_damage" && t.kind == TerminalKind::EventGraphLocal));

    let entry = ubergraph.entry_points().iter().find(|e| e.name == "OnHit").unwrap();
    let stub = compiled.function("OnHit").unwrap();
    assert_eq!(stub.kind(), ContextKind::EventStub);

    let kinds: Vec<&StatementKind> = stub.statements().iter().map(|s| &s.kind).collect();
    assert_eq!(kinds[0], &StatementKind::Assignment);
    assert_eq!(
        kinds[1],
        &StatementKind::CallFunction {
            function: "ExecuteUbergraph_Hero".to_string(),
            pure: false
        }
    );
    assert_eq!(kinds[2], &StatementKind::Return);

    let address = stub.terminal(stub.statements()[1].inputs[0]).unwrap();
    assert_eq!(address.kind, TerminalKind::Literal(LiteralValue::Int(entry.address as i32)));
    assert!(compiled.function("BeginPlay").is_some());
}

#[test]
fn test_networked_event_graph_replicates() {
    init_tracing();
    let mut page = Graph::new("Page");
    let event = page.add_event("Tick");
    let print = page.add_call("PrintString", &[("in_string", PinType::String)], None, false);
    link(&mut page, event, pins::THEN, print, pins::EXEC);

    let mut blueprint = Blueprint::new("Hero");
    blueprint.ubergraph_flags.networked = true;
    blueprint.add_event_graph(page);
    let compiled = compile_blueprint(&blueprint, &schema(), &CompileOptions::default()).unwrap();

    let ubergraph = compiled.function("ExecuteUbergraph_Hero").unwrap();
    let statements = ubergraph.statements();
    assert_eq!(statements[0].kind, StatementKind::ReplicationCheck);
    let epilogue = ubergraph.epilogue();
    assert_eq!(statements[epilogue].kind, StatementKind::ReplicationFlush);
    assert_eq!(statements[epilogue + 1].kind, StatementKind::Return);
}

#[test]
fn test_compilation_is_deterministic() {
    init_tracing();
    let build = || {
        let mut graph = Graph::new("Loop");
        let entry = graph.add_function_entry(&[("count", PinType::Integer)]);
        let for_loop = graph.add_for_loop();
        let log = graph.add_call("LogInt", &[("value", PinType::Integer)], None, false);
        let done = graph.add_call("PrintString", &[("in_string", PinType::String)], None, false);
        link(&mut graph, entry, pins::THEN, for_loop, pins::EXEC);
        link(&mut graph, entry, "count", for_loop, pins::LAST);
        link(&mut graph, for_loop, pins::LOOP_BODY, log, pins::EXEC);
        link(&mut graph, for_loop, pins::INDEX, log, "value");
        link(&mut graph, for_loop, pins::COMPLETED, done, pins::EXEC);
        graph
    };

    let first = compile_graph(&build(), &schema()).unwrap();
    let second = compile_graph(&build(), &schema()).unwrap();
    assert_eq!(first.statements(), second.statements());
    assert_eq!(first.terminals(), second.terminals());

    let bytes_a = BytecodeBackend::new().emit(&first).unwrap();
    let bytes_b = BytecodeBackend::new().emit(&second).unwrap();
    assert_eq!(bytes_a, bytes_b);

    let source = RustSourceBackend::new().emit(&first).unwrap();
    assert!(source.contains("LessEqual_IntegerInteger(this, "));
    assert!(source.contains("flow_stack.push("));
}

#[test]
fn test_incompatible_link_is_rejected() {
    init_tracing();
    let mut graph = Graph::new("Log");
    let entry = graph.add_function_entry(&[("flag", PinType::Boolean)]);
    let log = graph.add_call("LogInt", &[("value", PinType::Integer)], None, false);
    link(&mut graph, entry, pins::THEN, log, pins::EXEC);
    link(&mut graph, entry, "flag", log, "value");

    let error = compile_graph(&graph, &schema()).unwrap_err();
    assert_eq!(
        error,
        CompileError::Connection(ConnectionError::IncompatibleTypes {
            from: graph.find_pin(entry, "flag").unwrap(),
            to: graph.find_pin(log, "value").unwrap(),
            from_type: PinType::Boolean,
            to_type: PinType::Integer,
        })
    );
}

#[test]
fn test_illegal_links_are_all_reported() {
    init_tracing();
    let mut graph = Graph::new("Tangled");
    let entry = graph.add_function_entry(&[("flag", PinType::Boolean)]);
    let first = graph.add_call("LogInt", &[("value", PinType::Integer)], None, false);
    let second = graph.add_call("LogInt", &[("value", PinType::Integer)], None, false);
    let third = graph.add_call("LogInt", &[("value", PinType::Integer)], None, false);
    link(&mut graph, entry, pins::THEN, first, pins::EXEC);
    link(&mut graph, first, pins::THEN, second, pins::EXEC);
    // bool into an integer input
    link(&mut graph, entry, "flag", first, "value");
    // exec output into a data input
    link(&mut graph, entry, pins::THEN, second, "value");
    // two inputs
    link(&mut graph, first, "value", third, "value");

    let mut blueprint = Blueprint::new("Hero");
    blueprint.add_function(graph, ContextFlags::default());
    let compiled = compile_blueprint(&blueprint, &schema(), &CompileOptions::default()).unwrap();
    assert_eq!(compiled.failures, vec!["Tangled".to_string()]);

    let errors = compiled.diagnostics.errors_for("Tangled");
    assert_eq!(errors.len(), 3);
    assert!(errors.iter().all(|d| d.kind == Some(ErrorKind::Structural) && d.node_guid.is_some()));

    let at = |prefix: &str| errors.iter().find(|d| d.message.starts_with(prefix)).and_then(|d| d.node);
    assert_eq!(at("Incompatible types"), Some(first));
    assert_eq!(at("Cannot connect execution pin"), Some(second));
    assert_eq!(at("Direction mismatch"), Some(first));
}

#[test]
fn test_every_conflicting_wildcard_is_reported() {
    init_tracing();
    let ints = || PinType::Array(Box::new(PinType::Integer));
    let wild = || PinType::Array(Box::new(PinType::Wildcard));
    let floats = || PinType::Array(Box::new(PinType::Float));

    let mut graph = Graph::new("SumTwice");
    let entry = graph.add_function_entry(&[("a", ints()), ("b", ints())]);
    let mut previous = (entry, pins::THEN);
    let mut identities = Vec::new();
    for param in ["a", "b"] {
        let identity = graph.add_call("Identity", &[("in", wild())], Some(wild()), true);
        let sum = graph.add_call("SumFloats", &[("values", floats())], None, false);
        link(&mut graph, previous.0, previous.1, sum, pins::EXEC);
        link(&mut graph, entry, param, identity, "in");
        link(&mut graph, identity, pins::RETURN_VALUE, sum, "values");
        previous = (sum, pins::THEN);
        identities.push(identity);
    }

    let mut blueprint = Blueprint::new("Hero");
    blueprint.add_function(graph, ContextFlags::default());
    let compiled = compile_blueprint(&blueprint, &schema(), &CompileOptions::default()).unwrap();
    assert_eq!(compiled.failures, vec!["SumTwice".to_string()]);

    let ambiguous: Vec<NodeId> = compiled
        .diagnostics
        .errors_for("SumTwice")
        .iter()
        .filter(|d| d.message.starts_with("Ambiguous wildcard"))
        .filter_map(|d| d.node)
        .collect();
    assert_eq!(ambiguous, identities);
}

#[test]
fn test_return_nodes_share_result_slot() {
    init_tracing();
    let mut graph = Graph::new("Pick");
    let entry = graph.add_function_entry(&[("flag", PinType::Boolean), ("x", PinType::Integer)]);
    let branch = graph.add_branch();
    let on_true = graph.add_function_result(&[("y", PinType::Integer)]);
    let on_false = graph.add_function_result(&[("y", PinType::Integer)]);
    link(&mut graph, entry, pins::THEN, branch, pins::EXEC);
    link(&mut graph, entry, "flag", branch, pins::CONDITION);
    link(&mut graph, branch, pins::THEN, on_true, pins::EXEC);
    link(&mut graph, branch, pins::ELSE, on_false, pins::EXEC);
    link(&mut graph, entry, "x", on_true, "y");
    graph.set_default(graph.find_pin(on_false, "y").unwrap(), LiteralValue::Int(0));

    let function = compile_graph(&graph, &schema()).unwrap();
    let results: Vec<_> = function
        .terminals()
        .iter()
        .filter(|t| t.kind == TerminalKind::Result)
        .collect();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].name, "y");

    let writes = function
        .statements()
        .iter()
        .filter(|s| s.kind == StatementKind::Assignment && s.output == Some(results[0].id))
        .count();
    assert_eq!(writes, 2);

    let source = RustSourceBackend::new().emit(&function).unwrap();
    assert!(source.contains("x: i32) -> i32 {"));
}
