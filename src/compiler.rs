//! # Blueprint Compiler
//!
//! Main entry points for compiling Blueprint graphs into resolved functions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::{CompileOptions, ContextFlags};
use crate::context::{ContextKind, FunctionContext};
use crate::diagnostics::{Diagnostic, DiagnosticSink, Severity};
use crate::error::{CompileError, ConnectionError, ErrorKind, Result};
use crate::expansion::{expand_graph, merge_ubergraph};
use crate::graph::{Graph, NodeKind, Schema};
use crate::lowering::{run_lowering, run_net_registration, HandlerRegistry};
use crate::resolution::{resolve, ResolvedFunction};

/// A function graph together with its compilation flags
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionGraph {
    pub graph: Graph,
    #[serde(default)]
    pub flags: ContextFlags,
}

/// One compilation unit: a class's function graphs, event-graph pages and macros
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Blueprint {
    pub name: String,
    /// Class that `self` resolves to
    pub class_name: Option<String>,
    pub function_graphs: Vec<FunctionGraph>,
    pub event_graphs: Vec<Graph>,
    #[serde(default)]
    pub ubergraph_flags: ContextFlags,
    #[serde(default)]
    pub macros: HashMap<String, Graph>,
}

impl Blueprint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    pub fn add_function(&mut self, graph: Graph, flags: ContextFlags) {
        self.function_graphs.push(FunctionGraph { graph, flags });
    }

    pub fn add_event_graph(&mut self, graph: Graph) {
        self.event_graphs.push(graph);
    }

    pub fn add_macro(&mut self, name: impl Into<String>, graph: Graph) {
        self.macros.insert(name.into(), graph);
    }

    /// Name of the merged event-graph function
    pub fn ubergraph_name(&self) -> String {
        format!("ExecuteUbergraph_{}", self.name)
    }
}

/// Output of [`compile_blueprint`]
#[derive(Debug, Clone)]
pub struct CompiledBlueprint {
    /// Resolved functions, followed by the event stubs
    pub functions: Vec<ResolvedFunction>,
    /// Names of contexts that produced no output
    pub failures: Vec<String>,
    pub diagnostics: DiagnosticSink,
}

impl CompiledBlueprint {
    pub fn function(&self, name: &str) -> Option<&ResolvedFunction> {
        self.functions.iter().find(|f| f.name() == name)
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A context ready for the parallel phase
struct PreparedContext {
    name: String,
    kind: ContextKind,
    flags: ContextFlags,
    graph: Graph,
}

/// Compile a single Blueprint graph
///
/// A graph with a function entry node compiles as a function; otherwise its
/// events compile as an ubergraph.
///
/// # Arguments
///
/// * `graph` - The Blueprint graph to compile
/// * `schema` - Class registry and function library the graph refers to
///
/// # Returns
///
/// * `Ok(ResolvedFunction)` - The resolved statement list
/// * `Err(CompileError)` - The first error that stopped compilation
///
/// # Examples
///
/// ```rust
/// use pbbc::{compile_graph, Graph, Schema};
///
/// let mut graph = Graph::new("BeginPlay");
/// let event = graph.add_event("BeginPlay");
/// let print = graph.add_call("PrintString", &[], None, false);
/// let then = graph.find_pin(event, "then").unwrap();
/// let exec = graph.find_pin(print, "exec").unwrap();
/// graph.link_unchecked(then, exec);
///
/// let function = compile_graph(&graph, &Schema::with_standard_library()).unwrap();
/// assert_eq!(function.linear_execution_list(), &[event, print]);
/// ```
pub fn compile_graph(graph: &Graph, schema: &Schema) -> Result<ResolvedFunction> {
    compile_graph_with_options(graph, schema, &CompileOptions::default(), ContextFlags::default())
}

/// Compile a single graph with explicit options and context flags
pub fn compile_graph_with_options(
    graph: &Graph,
    schema: &Schema,
    options: &CompileOptions,
    flags: ContextFlags,
) -> Result<ResolvedFunction> {
    options.validate()?;
    let kind = if graph.nodes().any(|n| n.kind == NodeKind::FunctionEntry) {
        ContextKind::Function
    } else {
        ContextKind::Ubergraph
    };
    flags.validate(&graph.name, kind)?;

    tracing::info!("[PBBC] Starting Blueprint compilation");
    tracing::info!("[PBBC] Graph: {} ({} nodes)", graph.name, graph.node_count());

    let diagnostics = DiagnosticSink::new();
    let prepared = prepare_graph(
        graph.name.clone(),
        kind,
        flags,
        graph.clone(),
        &HashMap::new(),
        schema,
        options,
        &diagnostics,
    )?;

    let handlers = HandlerRegistry::standard();
    compile_context(&prepared, schema, None, &handlers, &diagnostics, options)
}

/// Compile every function and the merged event graph of a Blueprint
///
/// Configuration errors abort the whole request. Any other failure only
/// removes the affected context from the output; its diagnostics are kept in
/// [`CompiledBlueprint::diagnostics`].
///
/// # Arguments
///
/// * `blueprint` - The compilation unit
/// * `schema` - Class registry and function library
/// * `options` - Compiler options
///
/// # Returns
///
/// * `Ok(CompiledBlueprint)` - Resolved functions plus failures and diagnostics
/// * `Err(CompileError)` - A configuration error
pub fn compile_blueprint(blueprint: &Blueprint, schema: &Schema, options: &CompileOptions) -> Result<CompiledBlueprint> {
    options.validate()?;
    for function in &blueprint.function_graphs {
        function.flags.validate(&function.graph.name, ContextKind::Function)?;
    }
    let ubergraph_name = blueprint.ubergraph_name();
    blueprint.ubergraph_flags.validate(&ubergraph_name, ContextKind::Ubergraph)?;

    tracing::info!(
        "[PBBC] Compiling Blueprint '{}' ({} functions, {} event graphs, {} macros)",
        blueprint.name,
        blueprint.function_graphs.len(),
        blueprint.event_graphs.len(),
        blueprint.macros.len()
    );

    let diagnostics = DiagnosticSink::new();
    let mut failures = Vec::new();

    // Phase 1: expansion mutates graphs, so it runs on this thread
    tracing::info!("[PBBC] Phase 1: Expanding macros and composites...");
    let mut sources: Vec<(String, ContextKind, ContextFlags, Graph)> = blueprint
        .function_graphs
        .iter()
        .map(|f| (f.graph.name.clone(), ContextKind::Function, f.flags, f.graph.clone()))
        .collect();
    if !blueprint.event_graphs.is_empty() {
        let ubergraph = merge_ubergraph(&ubergraph_name, &blueprint.event_graphs);
        sources.push((ubergraph_name.clone(), ContextKind::Ubergraph, blueprint.ubergraph_flags, ubergraph));
    }

    let mut prepared = Vec::new();
    for (name, kind, flags, graph) in sources {
        match prepare_graph(name.clone(), kind, flags, graph, &blueprint.macros, schema, options, &diagnostics) {
            Ok(context) => prepared.push(context),
            Err(_) => failures.push(name),
        }
    }

    // Phase 2: contexts own disjoint state and compile independently
    tracing::info!("[PBBC] Phase 2: Compiling {} contexts...", prepared.len());
    let handlers = HandlerRegistry::standard();
    let class_name = blueprint.class_name.as_deref();
    let results: Vec<Result<ResolvedFunction>> = if options.parallel && prepared.len() > 1 {
        crossbeam::thread::scope(|scope| {
            let workers: Vec<_> = prepared
                .iter()
                .map(|context| {
                    let handlers = &handlers;
                    let diagnostics = &diagnostics;
                    scope.spawn(move |_| compile_context(context, schema, class_name, handlers, diagnostics, options))
                })
                .collect();
            workers
                .into_iter()
                .map(|worker| {
                    worker
                        .join()
                        .unwrap_or_else(|_| Err(CompileError::Internal("context worker panicked".to_string())))
                })
                .collect::<Vec<_>>()
        })
        .map_err(|_| CompileError::Internal("context worker panicked".to_string()))?
    } else {
        prepared
            .iter()
            .map(|context| compile_context(context, schema, class_name, &handlers, &diagnostics, options))
            .collect()
    };

    let mut functions = Vec::new();
    for (context, result) in prepared.iter().zip(results) {
        match result {
            Ok(function) => functions.push(function),
            Err(_) => failures.push(context.name.clone()),
        }
    }

    // Phase 3: one callable stub per ubergraph event
    if options.emit_event_stubs {
        let mut stubs = Vec::new();
        for ubergraph in functions.iter().filter(|f| f.kind() == ContextKind::Ubergraph) {
            for entry in ubergraph.entry_points() {
                match ResolvedFunction::event_stub(ubergraph, entry) {
                    Ok(stub) => stubs.push(stub),
                    Err(error) => {
                        diagnostics.error(Some(&entry.name), None, &error);
                        failures.push(entry.name.clone());
                    }
                }
            }
        }
        tracing::info!("[PBBC] Phase 3: Generated {} event stubs", stubs.len());
        functions.extend(stubs);
    }

    if failures.is_empty() {
        tracing::info!("[PBBC] Compilation successful! ({} functions)", functions.len());
    } else {
        tracing::warn!("[PBBC] Compilation finished with {} failed contexts", failures.len());
    }

    Ok(CompiledBlueprint {
        functions,
        failures,
        diagnostics,
    })
}

/// Expand a graph, infer its wildcard types and check every link.
///
/// Every structural problem is reported to `diagnostics`; the first one is
/// returned.
#[allow(clippy::too_many_arguments)]
fn prepare_graph(
    name: String,
    kind: ContextKind,
    flags: ContextFlags,
    mut graph: Graph,
    macros: &HashMap<String, Graph>,
    schema: &Schema,
    options: &CompileOptions,
    diagnostics: &DiagnosticSink,
) -> Result<PreparedContext> {
    if let Err(error) = expand_graph(&mut graph, macros, options) {
        let guid = error.node().and_then(|node| graph.node(node)).map(|node| node.guid);
        diagnostics.error(Some(&name), guid, &error);
        return Err(error);
    }

    // Links are checked against the inferred types
    let mut errors = schema.infer_wildcards(&mut graph);
    errors.extend(schema.validate_links(&graph));

    for error in &errors {
        report_connection_error(diagnostics, &name, &graph, error);
    }
    if !errors.is_empty() {
        tracing::warn!("[PBBC] '{}': {} invalid connections", name, errors.len());
    }

    match errors.into_iter().next() {
        Some(first) => Err(first.into()),
        None => Ok(PreparedContext {
            name,
            kind,
            flags,
            graph,
        }),
    }
}

/// Structural diagnostic attributed to the node owning the offending pin
fn report_connection_error(diagnostics: &DiagnosticSink, function: &str, graph: &Graph, error: &ConnectionError) {
    let owner = match error {
        ConnectionError::AmbiguousWildcard { node, .. } => graph.node(*node),
        other => graph.pin(other.primary_pin()).and_then(|pin| graph.node(pin.owner)),
    };

    let mut diagnostic = Diagnostic::new(Severity::Error, error.to_string()).in_function(function);
    diagnostic.kind = Some(ErrorKind::Structural);
    if let Some(node) = owner {
        diagnostic = diagnostic.at_node(node.id, Some(node.guid));
    }
    diagnostics.report(diagnostic);
}

/// Run every phase of one function context
fn compile_context(
    prepared: &PreparedContext,
    schema: &Schema,
    class_name: Option<&str>,
    handlers: &HandlerRegistry,
    diagnostics: &DiagnosticSink,
    options: &CompileOptions,
) -> Result<ResolvedFunction> {
    let mut ctx = FunctionContext::new(
        prepared.name.clone(),
        prepared.kind,
        prepared.flags,
        &prepared.graph,
        schema,
        handlers,
        diagnostics.clone(),
    )
    .with_class(class_name.map(str::to_string));

    tracing::info!("[PBBC] Compiling '{}' ({} nodes)", prepared.name, prepared.graph.node_count());

    if let Err(error) = ctx.compute_reachability(options.prune_isolated_nodes) {
        diagnostics.error(Some(&prepared.name), None, &error);
        return Err(error);
    }
    run_net_registration(&mut ctx);
    run_lowering(&mut ctx);

    if let Some(error) = ctx.errors().first() {
        tracing::warn!(
            "[PBBC] '{}' failed with {} errors; no output produced",
            prepared.name,
            ctx.errors().len()
        );
        return Err(error.clone());
    }

    resolve(ctx, options.enable_peephole).map_err(|error| {
        let guid = error
            .node()
            .and_then(|node| prepared.graph.node(node))
            .map(|node| node.guid);
        diagnostics.error(Some(&prepared.name), guid, &error);
        error
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{pins, PinType};

    fn print_chain(name: &str) -> Graph {
        let mut graph = Graph::new(name);
        let entry = graph.add_function_entry(&[]);
        let print = graph.add_call("PrintString", &[("in_string", PinType::String)], None, false);
        graph.link_unchecked(
            graph.find_pin(entry, pins::THEN).unwrap(),
            graph.find_pin(print, pins::EXEC).unwrap(),
        );
        graph
    }

    #[test]
    fn test_configuration_errors_are_fatal() {
        let mut blueprint = Blueprint::new("Hero");
        let flags = ContextFlags {
            const_enforcement: true,
            interface_stub: true,
            networked: false,
        };
        blueprint.add_function(print_chain("Broken"), flags);
        blueprint.add_function(print_chain("Fine"), ContextFlags::default());

        let result = compile_blueprint(&blueprint, &Schema::with_standard_library(), &CompileOptions::default());
        assert!(matches!(result, Err(CompileError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_failed_context_does_not_affect_others() {
        let mut blueprint = Blueprint::new("Hero");
        let mut broken = Graph::new("Broken");
        let entry = broken.add_function_entry(&[]);
        let call = broken.add_call("DoesNotExist", &[], None, false);
        broken.link_unchecked(
            broken.find_pin(entry, pins::THEN).unwrap(),
            broken.find_pin(call, pins::EXEC).unwrap(),
        );
        blueprint.add_function(broken, ContextFlags::default());
        blueprint.add_function(print_chain("Fine"), ContextFlags::default());

        let compiled = compile_blueprint(&blueprint, &Schema::with_standard_library(), &CompileOptions::default()).unwrap();
        assert_eq!(compiled.failures, vec!["Broken".to_string()]);
        assert!(compiled.function("Fine").is_some());
        assert!(compiled.function("Broken").is_none());
        assert_eq!(compiled.diagnostics.errors_for("Broken").len(), 1);
    }

    #[test]
    fn test_interface_stub_is_an_empty_shell() {
        let flags = ContextFlags {
            interface_stub: true,
            ..Default::default()
        };
        let function = compile_graph_with_options(
            &print_chain("Interface"),
            &Schema::with_standard_library(),
            &CompileOptions::default(),
            flags,
        )
        .unwrap();
        assert!(function.linear_execution_list().is_empty());
        assert_eq!(function.statements().len(), 1);
        assert_eq!(function.entry_points()[0].address, 0);
    }

    #[test]
    fn test_sequential_and_parallel_agree() {
        let mut blueprint = Blueprint::new("Hero");
        for name in ["A", "B", "C"] {
            blueprint.add_function(print_chain(name), ContextFlags::default());
        }
        let schema = Schema::with_standard_library();
        let parallel = compile_blueprint(&blueprint, &schema, &CompileOptions::default()).unwrap();
        let sequential = compile_blueprint(
            &blueprint,
            &schema,
            &CompileOptions {
                parallel: false,
                ..Default::default()
            },
        )
        .unwrap();

        let names = |c: &CompiledBlueprint| c.functions.iter().map(|f| f.name().to_string()).collect::<Vec<_>>();
        assert_eq!(names(&parallel), names(&sequential));
        for (a, b) in parallel.functions.iter().zip(&sequential.functions) {
            assert_eq!(a.statements(), b.statements());
        }
    }
}
