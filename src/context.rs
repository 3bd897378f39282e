//! # Function Context
//!
//! All mutable compilation state for one function or ubergraph.
//!
//! A context owns its terminals and the per-node statement lists produced by
//! lowering. It borrows the (already expanded) graph, the schema and the
//! handler table read-only, so independent contexts can compile in parallel.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use uuid::Uuid;

use crate::config::ContextFlags;
use crate::diagnostics::{Diagnostic, DiagnosticSink, Severity};
use crate::error::{CompileError, Result};
use crate::graph::{Graph, LiteralValue, Node, NodeId, NodeKind, PinId, PinType, Schema};
use crate::lowering::HandlerRegistry;
use crate::metadata::node_metadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TerminalId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatementId(pub u32);

impl fmt::Display for TerminalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TerminalKind {
    Local,
    Parameter,
    Result,
    Literal(LiteralValue),
    /// Class member; component members are looked up through the construction system
    VariableReference {
        member: String,
        owner_class: String,
        is_component: bool,
    },
    /// Local shared by every event of an ubergraph
    EventGraphLocal,
}

/// A storage location bound to a net
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Terminal {
    pub id: TerminalId,
    pub name: String,
    pub ty: PinType,
    pub kind: TerminalKind,
    /// Pin the terminal was registered for
    pub source: Option<PinId>,
}

impl Terminal {
    /// Non-local storage that outlives the function call
    pub fn is_member(&self) -> bool {
        matches!(self.kind, TerminalKind::VariableReference { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextKind {
    Function,
    Ubergraph,
    EventStub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextState {
    Unresolved,
    GotosLinked,
    Linearized,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JumpTarget {
    /// Fixup request: first statement of the node
    Node(NodeId),
    /// Label inside a node's own statement list
    Statement(StatementId),
    /// Start of the function epilogue
    Epilogue,
    /// Resolved index into the linear statement list
    Address(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementKind {
    Nop,
    CallFunction { function: String, pure: bool },
    /// output <- inputs[0]
    Assignment,
    Goto,
    /// Jump when inputs[0] is false
    GotoIfNot,
    GotoReturn,
    /// Push the jump target onto the flow stack
    PushState,
    /// Pop the flow stack, or run the epilogue when it is empty
    EndOfThread,
    /// EndOfThread when inputs[0] is false
    EndOfThreadIfNot,
    Return,
    DynamicCast { class: String },
    ObjectToBool,
    SpawnObject { class: String },
    /// Skip to the epilogue when not running with authority
    ReplicationCheck,
    ReplicationFlush,
}

impl StatementKind {
    pub fn is_jump(&self) -> bool {
        matches!(
            self,
            StatementKind::Goto
                | StatementKind::GotoIfNot
                | StatementKind::GotoReturn
                | StatementKind::PushState
                | StatementKind::EndOfThread
                | StatementKind::EndOfThreadIfNot
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledStatement {
    pub id: StatementId,
    pub kind: StatementKind,
    /// Generating node; `None` for synthesized epilogue and stub statements
    pub node: Option<NodeId>,
    pub inputs: Vec<TerminalId>,
    pub output: Option<TerminalId>,
    pub jump: Option<JumpTarget>,
}

pub struct FunctionContext<'a> {
    pub name: String,
    pub kind: ContextKind,
    pub flags: ContextFlags,
    pub graph: &'a Graph,
    pub schema: &'a Schema,
    /// Class that owns `self`-scoped members and functions
    pub class_name: Option<String>,
    pub(crate) handlers: &'a HandlerRegistry,
    pub(crate) diagnostics: DiagnosticSink,
    pub(crate) state: ContextState,
    pub(crate) entry_points: Vec<NodeId>,
    pub(crate) terminals: Vec<Terminal>,
    pub(crate) net_map: HashMap<PinId, TerminalId>,
    /// Destination terminals of function result pins
    pub(crate) result_terms: HashMap<PinId, TerminalId>,
    /// Result slots by pin name; every return node writes the same slot
    pub(crate) result_slots: HashMap<String, TerminalId>,
    pub(crate) statements_per_node: BTreeMap<NodeId, Vec<CompiledStatement>>,
    pub(crate) reachable: BTreeSet<NodeId>,
    pub(crate) disabled: BTreeSet<NodeId>,
    pub(crate) failed_nodes: HashSet<NodeId>,
    pub(crate) errors: Vec<CompileError>,
    next_statement: u32,
    current: Option<NodeId>,
    pure_stack: Vec<NodeId>,
    name_counts: HashMap<String, usize>,
}

impl<'a> FunctionContext<'a> {
    pub fn new(
        name: impl Into<String>,
        kind: ContextKind,
        flags: ContextFlags,
        graph: &'a Graph,
        schema: &'a Schema,
        handlers: &'a HandlerRegistry,
        diagnostics: DiagnosticSink,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            flags,
            graph,
            schema,
            class_name: None,
            handlers,
            diagnostics,
            state: ContextState::Unresolved,
            entry_points: Vec::new(),
            terminals: Vec::new(),
            net_map: HashMap::new(),
            result_terms: HashMap::new(),
            result_slots: HashMap::new(),
            statements_per_node: BTreeMap::new(),
            reachable: BTreeSet::new(),
            disabled: BTreeSet::new(),
            failed_nodes: HashSet::new(),
            errors: Vec::new(),
            next_statement: 0,
            current: None,
            pure_stack: Vec::new(),
            name_counts: HashMap::new(),
        }
    }

    pub fn with_class(mut self, class_name: Option<String>) -> Self {
        self.class_name = class_name;
        self
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn entry_points(&self) -> &[NodeId] {
        &self.entry_points
    }

    pub fn terminals(&self) -> &[Terminal] {
        &self.terminals
    }

    pub fn terminal(&self, id: TerminalId) -> Option<&Terminal> {
        self.terminals.get(id.0 as usize)
    }

    /// Terminal registered for a pin's net
    pub fn terminal_for_pin(&self, pin: PinId) -> Option<TerminalId> {
        self.net_map.get(&pin).copied()
    }

    pub fn statements_for(&self, node: NodeId) -> &[CompiledStatement] {
        self.statements_per_node.get(&node).map(|s| s.as_slice()).unwrap_or(&[])
    }

    pub fn is_reachable(&self, node: NodeId) -> bool {
        self.reachable.contains(&node)
    }

    pub fn has_failed(&self, node: NodeId) -> bool {
        self.failed_nodes.contains(&node)
    }

    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    pub fn node(&self, id: NodeId) -> Result<&'a Node> {
        self.graph.node(id).ok_or(CompileError::NodeNotFound(id))
    }

    /// Pin of `node` by name
    pub fn pin_named(&self, node: NodeId, name: &str) -> Result<PinId> {
        self.graph
            .find_pin(node, name)
            .ok_or_else(|| CompileError::Internal(format!("{} has no pin '{}'", node, name)))
    }

    /// Class that `self` member lookups resolve against
    pub fn scope_class(&self, explicit: Option<&str>) -> Option<String> {
        explicit.map(str::to_string).or_else(|| self.class_name.clone())
    }

    // ---------------------------------------------------------------------
    // Reachability
    // ---------------------------------------------------------------------

    /// Find entry points and every node they reach.
    ///
    /// Exec edges are followed from each entry; disabled nodes stop the walk.
    /// Pure producers feeding a reached node are reached as well.
    pub fn compute_reachability(&mut self, warn_isolated: bool) -> Result<()> {
        let graph = self.graph;
        for node in graph.nodes() {
            if !node_metadata(node.kind.tag()).is_entry_point || self.is_foreign_entry(&node.kind) {
                continue;
            }
            if node.enabled {
                self.entry_points.push(node.id);
            } else {
                self.disabled.insert(node.id);
            }
        }

        if self.entry_points.is_empty() {
            return Err(CompileError::MissingEntryPoint {
                function: self.name.clone(),
            });
        }

        let mut stack: Vec<NodeId> = self.entry_points.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if !self.reachable.insert(id) {
                continue;
            }
            let mut successors = Vec::new();
            for pin in graph.exec_outputs(id) {
                let fan_out = graph.pin(pin).map(|p| p.links.len()).unwrap_or(0);
                if fan_out > 1 {
                    let message = format!(
                        "Exec pin {} of '{}' has {} links; only the first is followed",
                        pin,
                        self.node(id)?.title,
                        fan_out
                    );
                    self.warn_node(id, message);
                }
                if let Some(target) = graph.exec_target(pin) {
                    successors.push(target);
                }
            }
            for input in graph.data_inputs(id) {
                if let Some(source) = graph.data_source(input).and_then(|p| graph.pin(p)) {
                    if graph.is_pure(source.owner) {
                        successors.push(source.owner);
                    }
                }
            }
            for target in successors.into_iter().rev() {
                match graph.node(target) {
                    Some(node) if !node.enabled => {
                        self.disabled.insert(target);
                    }
                    Some(_) => stack.push(target),
                    None => {}
                }
            }
        }

        for id in self.disabled.clone() {
            let title = self.node(id)?.title.clone();
            self.warn_node(id, format!("Node '{}' is disabled and will not be compiled", title));
        }

        if warn_isolated {
            let isolated: Vec<(NodeId, String)> = graph
                .nodes()
                .filter(|n| !self.reachable.contains(&n.id) && !self.disabled.contains(&n.id))
                .filter(|n| n.kind != NodeKind::Knot)
                .filter(|n| !self.is_foreign_entry(&n.kind))
                .map(|n| (n.id, n.title.clone()))
                .collect();
            for (id, title) in isolated {
                self.warn_node(
                    id,
                    format!("Node '{}' is not reachable from any entry point and was pruned", title),
                );
            }
        }

        tracing::debug!(
            "[PBBC] '{}': {} entry points, {} reachable nodes",
            self.name,
            self.entry_points.len(),
            self.reachable.len()
        );
        Ok(())
    }

    /// Entry nodes that belong to a different context kind
    fn is_foreign_entry(&self, kind: &NodeKind) -> bool {
        matches!(
            (self.kind, kind),
            (ContextKind::Ubergraph, NodeKind::FunctionEntry)
                | (ContextKind::Function, NodeKind::Event { .. } | NodeKind::CustomEvent { .. })
        )
    }

    // ---------------------------------------------------------------------
    // Terminals
    // ---------------------------------------------------------------------

    pub fn create_terminal(
        &mut self,
        name: &str,
        ty: PinType,
        kind: TerminalKind,
        source: Option<PinId>,
    ) -> TerminalId {
        let id = TerminalId(self.terminals.len() as u32);
        let name = self.unique_name(name);
        self.terminals.push(Terminal {
            id,
            name,
            ty,
            kind,
            source,
        });
        id
    }

    /// Scratch storage; shared event-graph storage inside an ubergraph
    pub fn create_local(&mut self, name: &str, ty: PinType) -> TerminalId {
        let kind = self.local_kind();
        self.create_terminal(name, ty, kind, None)
    }

    pub fn create_literal(&mut self, name: &str, ty: PinType, value: LiteralValue) -> TerminalId {
        self.create_terminal(name, ty, TerminalKind::Literal(value), None)
    }

    pub fn local_kind(&self) -> TerminalKind {
        if self.kind == ContextKind::Ubergraph {
            TerminalKind::EventGraphLocal
        } else {
            TerminalKind::Local
        }
    }

    fn unique_name(&mut self, base: &str) -> String {
        let mut sanitized: String = base
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        if sanitized.is_empty() || sanitized.starts_with(|c: char| c.is_ascii_digit()) {
            sanitized.insert(0, '_');
        }
        let count = self.name_counts.entry(sanitized.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            sanitized
        } else {
            format!("{}_{}", sanitized, *count - 1)
        }
    }

    /// Value of a data input, lowering its pure producer in place.
    ///
    /// Pure producers are lowered again at every use.
    pub fn input_term(&mut self, node: NodeId, pin_name: &str) -> Result<TerminalId> {
        let pin = self.pin_named(node, pin_name)?;
        let graph = self.graph;

        if let Some(source) = graph.data_source(pin).and_then(|p| graph.pin(p)) {
            let producer = source.owner;
            if graph.node(producer).map(|n| !n.enabled).unwrap_or(false) || self.failed_nodes.contains(&producer) {
                return Err(CompileError::UpstreamFailed { node, upstream: producer });
            }
            if graph.is_pure(producer) {
                self.inline_pure(producer)?;
            }
        }

        match self.net_map.get(&pin) {
            Some(term) => Ok(*term),
            None => {
                let required = graph.pin(pin).map(|p| p.required).unwrap_or(false);
                if required {
                    Err(CompileError::MissingRequiredPin {
                        node,
                        pin: pin_name.to_string(),
                    })
                } else {
                    Err(CompileError::Internal(format!(
                        "pin '{}' of {} was never registered",
                        pin_name, node
                    )))
                }
            }
        }
    }

    fn inline_pure(&mut self, producer: NodeId) -> Result<()> {
        if self.pure_stack.contains(&producer) {
            return Err(CompileError::CyclicPureDependency { node: producer });
        }
        let handlers = self.handlers;
        let tag = self.node(producer)?.kind.tag();
        let handler = handlers
            .get(tag)
            .ok_or_else(|| CompileError::Internal(format!("no handler for {:?}", tag)))?;

        self.pure_stack.push(producer);
        let result = handler.compile(self, producer);
        self.pure_stack.pop();
        result
    }

    pub fn output_term(&self, node: NodeId, pin_name: &str) -> Result<TerminalId> {
        let pin = self.pin_named(node, pin_name)?;
        self.net_map
            .get(&pin)
            .copied()
            .ok_or_else(|| CompileError::Internal(format!("output '{}' of {} was never registered", pin_name, node)))
    }

    pub fn result_term(&self, pin: PinId) -> Option<TerminalId> {
        self.result_terms.get(&pin).copied()
    }

    // ---------------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------------

    /// Id the next appended statement will receive
    pub fn peek_statement_id(&self) -> StatementId {
        StatementId(self.next_statement)
    }

    /// Append an empty statement to the list of the node being lowered
    pub fn append_statement(&mut self, node: NodeId, kind: StatementKind) -> StatementId {
        let id = StatementId(self.next_statement);
        self.next_statement += 1;
        let owner = self.current.unwrap_or(node);
        self.statements_per_node.entry(owner).or_default().push(CompiledStatement {
            id,
            kind,
            node: Some(node),
            inputs: Vec::new(),
            output: None,
            jump: None,
        });
        id
    }

    pub fn statement_mut(&mut self, id: StatementId) -> Option<&mut CompiledStatement> {
        self.statements_per_node
            .values_mut()
            .flat_map(|list| list.iter_mut())
            .find(|s| s.id == id)
    }

    pub fn set_jump(&mut self, id: StatementId, target: JumpTarget) -> Result<()> {
        let statement = self
            .statement_mut(id)
            .ok_or_else(|| CompileError::Internal(format!("statement {} does not exist", id)))?;
        statement.jump = Some(target);
        Ok(())
    }

    /// Append a data statement, enforcing const-ness of the written terminal
    pub fn emit(
        &mut self,
        node: NodeId,
        kind: StatementKind,
        inputs: Vec<TerminalId>,
        output: Option<TerminalId>,
    ) -> Result<StatementId> {
        if let Some(output) = output {
            self.check_write(node, output)?;
        }
        let id = self.append_statement(node, kind);
        if let Some(statement) = self.statement_mut(id) {
            statement.inputs = inputs;
            statement.output = output;
        }
        Ok(id)
    }

    pub fn assign(&mut self, node: NodeId, destination: TerminalId, source: TerminalId) -> Result<StatementId> {
        self.emit(node, StatementKind::Assignment, vec![source], Some(destination))
    }

    pub fn jump(
        &mut self,
        node: NodeId,
        kind: StatementKind,
        inputs: Vec<TerminalId>,
        target: JumpTarget,
    ) -> Result<StatementId> {
        let id = self.emit(node, kind, inputs, None)?;
        self.set_jump(id, target)?;
        Ok(id)
    }

    /// Jump along an exec output pin.
    ///
    /// An unconnected pin ends the thread instead: `Goto` becomes
    /// `EndOfThread`, `GotoIfNot` becomes `EndOfThreadIfNot` and `PushState`
    /// emits nothing.
    pub fn goto_pin(
        &mut self,
        node: NodeId,
        pin_name: &str,
        kind: StatementKind,
        inputs: Vec<TerminalId>,
    ) -> Result<Option<StatementId>> {
        let pin = self.pin_named(node, pin_name)?;
        match self.graph.exec_target(pin) {
            Some(target) => self.jump(node, kind, inputs, JumpTarget::Node(target)).map(Some),
            None => match kind {
                StatementKind::Goto => self.emit(node, StatementKind::EndOfThread, inputs, None).map(Some),
                StatementKind::GotoIfNot => self.emit(node, StatementKind::EndOfThreadIfNot, inputs, None).map(Some),
                _ => Ok(None),
            },
        }
    }

    /// Terminating jump through the node's `then` pin
    pub fn generate_then_goto(&mut self, node: NodeId) -> Result<()> {
        self.goto_pin(node, crate::graph::pins::THEN, StatementKind::Goto, Vec::new())?;
        Ok(())
    }

    fn check_write(&self, node: NodeId, output: TerminalId) -> Result<()> {
        if !self.flags.const_enforcement {
            return Ok(());
        }
        match self.terminal(output).map(|t| &t.kind) {
            Some(TerminalKind::VariableReference { member, .. }) => Err(CompileError::ConstViolation {
                node,
                member: member.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Set the node whose statement list receives appended statements
    pub(crate) fn begin_node(&mut self, node: NodeId) {
        self.current = Some(node);
    }

    pub(crate) fn end_node(&mut self) {
        self.current = None;
    }

    // ---------------------------------------------------------------------
    // Diagnostics
    // ---------------------------------------------------------------------

    fn guid_of(&self, node: NodeId) -> Option<Uuid> {
        self.graph.node(node).map(|n| n.guid)
    }

    /// Record a failure of `node`; the error is reported once even when
    /// several consumers hit it
    pub fn record_error(&mut self, node: NodeId, error: CompileError) {
        self.failed_nodes.insert(node);
        if let Some(origin) = error.node() {
            self.failed_nodes.insert(origin);
        }

        let guid = error.node().or(Some(node)).and_then(|n| self.guid_of(n));
        if let CompileError::UpstreamFailed { .. } = error {
            let mut note = Diagnostic::new(Severity::Note, error.to_string()).in_function(self.name.clone());
            note = note.at_node(node, guid);
            self.diagnostics.report(note);
            return;
        }

        if self.errors.contains(&error) {
            return;
        }
        self.diagnostics.error(Some(&self.name), guid, &error);
        self.errors.push(error);
    }

    pub fn warn_node(&self, node: NodeId, message: impl Into<String>) {
        let identity = self.guid_of(node).map(|guid| (node, guid));
        self.diagnostics.warning(Some(&self.name), identity, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.diagnostics.warning(Some(&self.name), None, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::pins;

    fn context<'a>(graph: &'a Graph, schema: &'a Schema, handlers: &'a HandlerRegistry) -> FunctionContext<'a> {
        FunctionContext::new(
            "Test",
            ContextKind::Function,
            ContextFlags::default(),
            graph,
            schema,
            handlers,
            DiagnosticSink::new(),
        )
    }

    #[test]
    fn test_unique_terminal_names() {
        let graph = Graph::new("test");
        let schema = Schema::new();
        let handlers = HandlerRegistry::standard();
        let mut ctx = context(&graph, &schema, &handlers);

        let a = ctx.create_local("Branch condition", PinType::Boolean);
        let b = ctx.create_local("Branch condition", PinType::Boolean);
        let c = ctx.create_local("1st", PinType::Integer);
        assert_eq!(ctx.terminal(a).unwrap().name, "Branch_condition");
        assert_eq!(ctx.terminal(b).unwrap().name, "Branch_condition_1");
        assert_eq!(ctx.terminal(c).unwrap().name, "_1st");
    }

    #[test]
    fn test_reachability_stops_at_disabled_nodes() {
        let mut graph = Graph::new("test");
        let entry = graph.add_function_entry(&[]);
        let first = graph.add_call("PrintString", &[], None, false);
        let disabled = graph.add_call("PrintString", &[], None, false);
        let after = graph.add_call("PrintString", &[], None, false);
        let isolated = graph.add_call("PrintString", &[], None, false);
        for (from, to) in [(entry, first), (first, disabled), (disabled, after)] {
            let then = graph.find_pin(from, pins::THEN).unwrap();
            let exec = graph.find_pin(to, pins::EXEC).unwrap();
            graph.link_unchecked(then, exec);
        }
        graph.set_enabled(disabled, false);

        let schema = Schema::with_standard_library();
        let handlers = HandlerRegistry::standard();
        let sink = DiagnosticSink::new();
        let mut ctx = FunctionContext::new(
            "Test",
            ContextKind::Function,
            ContextFlags::default(),
            &graph,
            &schema,
            &handlers,
            sink.clone(),
        );
        ctx.compute_reachability(true).unwrap();

        assert!(ctx.is_reachable(entry));
        assert!(ctx.is_reachable(first));
        assert!(!ctx.is_reachable(disabled));
        assert!(!ctx.is_reachable(after));
        assert!(!ctx.is_reachable(isolated));
        // disabled + two pruned nodes
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn test_missing_entry_point() {
        let mut graph = Graph::new("test");
        graph.add_call("PrintString", &[], None, false);
        let schema = Schema::new();
        let handlers = HandlerRegistry::standard();
        let mut ctx = context(&graph, &schema, &handlers);
        assert!(matches!(
            ctx.compute_reachability(false),
            Err(CompileError::MissingEntryPoint { .. })
        ));
    }

    #[test]
    fn test_const_enforcement_rejects_member_writes() {
        let graph = Graph::new("test");
        let schema = Schema::new();
        let handlers = HandlerRegistry::standard();
        let mut ctx = context(&graph, &schema, &handlers);
        ctx.flags.const_enforcement = true;

        let member = ctx.create_terminal(
            "Health",
            PinType::Float,
            TerminalKind::VariableReference {
                member: "Health".into(),
                owner_class: "Pawn".into(),
                is_component: false,
            },
            None,
        );
        let local = ctx.create_local("tmp", PinType::Float);
        assert!(matches!(
            ctx.assign(NodeId(0), member, local),
            Err(CompileError::ConstViolation { .. })
        ));
        assert!(ctx.assign(NodeId(0), local, member).is_ok());
    }
}
