//! # Statement Resolution
//!
//! Turns the per-node statement lists of a lowered [`FunctionContext`] into
//! one linear, immutable [`ResolvedFunction`].
//!
//! The context moves through `Unresolved -> GotosLinked -> Linearized ->
//! Resolved`. Only a resolved function is handed to a backend.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::config::ContextFlags;
use crate::context::{
    CompiledStatement, ContextKind, ContextState, FunctionContext, JumpTarget, StatementId, StatementKind,
    Terminal, TerminalId, TerminalKind,
};
use crate::error::{CompileError, Result};
use crate::graph::{NodeId, NodeKind};

/// Where execution of a function or event begins
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryPoint {
    pub name: String,
    pub node: Option<NodeId>,
    pub address: usize,
    /// Parameter pin names and the terminals they are stored in
    pub parameters: Vec<(String, TerminalId)>,
}

/// Fully resolved function ready for emission
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedFunction {
    name: String,
    kind: ContextKind,
    flags: ContextFlags,
    terminals: Vec<Terminal>,
    statements: Vec<CompiledStatement>,
    linear_execution_list: Vec<NodeId>,
    entry_points: Vec<EntryPoint>,
    epilogue: usize,
}

impl ResolvedFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn flags(&self) -> ContextFlags {
        self.flags
    }

    pub fn state(&self) -> ContextState {
        ContextState::Resolved
    }

    pub fn terminals(&self) -> &[Terminal] {
        &self.terminals
    }

    pub fn terminal(&self, id: TerminalId) -> Option<&Terminal> {
        self.terminals.get(id.0 as usize)
    }

    pub fn statements(&self) -> &[CompiledStatement] {
        &self.statements
    }

    /// Node execution order
    pub fn linear_execution_list(&self) -> &[NodeId] {
        &self.linear_execution_list
    }

    pub fn entry_points(&self) -> &[EntryPoint] {
        &self.entry_points
    }

    /// Address of the first epilogue statement
    pub fn epilogue(&self) -> usize {
        self.epilogue
    }

    /// Stub for one ubergraph event: copies the event's parameters into the
    /// shared event-graph locals and calls the ubergraph at the event's address
    pub fn event_stub(ubergraph: &ResolvedFunction, entry: &EntryPoint) -> Result<ResolvedFunction> {
        let address = i32::try_from(entry.address).map_err(|_| {
            CompileError::Internal(format!(
                "address {} of event '{}' does not fit an integer literal",
                entry.address, entry.name
            ))
        })?;
        let mut terminals = Vec::new();
        let mut statements = Vec::new();
        let mut next_statement = 0u32;
        let mut statement = |kind, inputs, output, jump| {
            let id = StatementId(next_statement);
            next_statement += 1;
            CompiledStatement {
                id,
                kind,
                node: None,
                inputs,
                output,
                jump,
            }
        };

        for (param, local) in &entry.parameters {
            let Some(local) = ubergraph.terminal(*local) else { continue };
            let input = push_terminal(&mut terminals, param.clone(), local, TerminalKind::Parameter);
            let shared = push_terminal(&mut terminals, local.name.clone(), local, TerminalKind::EventGraphLocal);
            statements.push(statement(StatementKind::Assignment, vec![input], Some(shared), None));
        }

        let address_id = TerminalId(terminals.len() as u32);
        terminals.push(Terminal {
            id: address_id,
            name: "entry_point".to_string(),
            ty: crate::graph::PinType::Integer,
            kind: TerminalKind::Literal(crate::graph::LiteralValue::Int(address)),
            source: None,
        });
        let call = StatementKind::CallFunction {
            function: ubergraph.name.clone(),
            pure: false,
        };
        statements.push(statement(call, vec![address_id], None, None));
        let epilogue = statements.len();
        statements.push(statement(StatementKind::Return, Vec::new(), None, None));

        let parameters = terminals
            .iter()
            .filter(|t| t.kind == TerminalKind::Parameter)
            .map(|t| (t.name.clone(), t.id))
            .collect();

        Ok(ResolvedFunction {
            name: entry.name.clone(),
            kind: ContextKind::EventStub,
            flags: ContextFlags::default(),
            terminals,
            statements,
            linear_execution_list: Vec::new(),
            entry_points: vec![EntryPoint {
                name: entry.name.clone(),
                node: None,
                address: 0,
                parameters,
            }],
            epilogue,
        })
    }
}

/// Rewrite every node jump target to the first statement of that node.
///
/// Fails with `UnreachableTarget` when the target produced no statements.
pub fn link_gotos(ctx: &mut FunctionContext<'_>) -> Result<()> {
    expect_state(ctx, ContextState::Unresolved)?;

    let first_statement: HashMap<NodeId, StatementId> = ctx
        .statements_per_node
        .iter()
        .filter_map(|(node, list)| list.first().map(|s| (*node, s.id)))
        .collect();

    let mut linked = 0;
    for statement in ctx.statements_per_node.values_mut().flat_map(|l| l.iter_mut()) {
        if let Some(JumpTarget::Node(target)) = statement.jump {
            let resolved = first_statement.get(&target).ok_or(CompileError::UnreachableTarget {
                node: statement.node.unwrap_or(target),
                target,
            })?;
            statement.jump = Some(JumpTarget::Statement(*resolved));
            linked += 1;
        }
    }

    tracing::debug!("[PBBC] '{}': linked {} gotos", ctx.name, linked);
    ctx.state = ContextState::GotosLinked;
    Ok(())
}

/// Execution order of the nodes that generated statements.
///
/// Depth-first from each entry point in handle order, visiting exec outputs
/// in pin declaration order.
pub fn linearize(ctx: &mut FunctionContext<'_>) -> Result<Vec<NodeId>> {
    expect_state(ctx, ContextState::GotosLinked)?;
    let graph = ctx.graph;

    let mut order = Vec::new();
    let mut visited = HashSet::new();
    let mut stack: Vec<NodeId> = ctx.entry_points.iter().rev().copied().collect();
    while let Some(node) = stack.pop() {
        if !visited.insert(node) {
            continue;
        }
        if ctx.statements_per_node.contains_key(&node) {
            order.push(node);
        }
        let successors: Vec<NodeId> = graph
            .exec_outputs(node)
            .into_iter()
            .filter_map(|pin| graph.exec_target(pin))
            .collect();
        stack.extend(successors.into_iter().rev().filter(|n| !visited.contains(n)));
    }

    // Lowered nodes the exec walk missed still need a home
    for node in ctx.statements_per_node.keys() {
        if !visited.contains(node) {
            order.push(*node);
        }
    }

    ctx.state = ContextState::Linearized;
    Ok(order)
}

/// Remove every unconditional jump to the statement right after it when
/// nothing else jumps there. Repeats until no jump can be removed.
///
/// Entry and epilogue addresses are remapped alongside the jumps. Returns the
/// number of removed statements.
pub fn merge_adjacent(statements: &mut Vec<CompiledStatement>, anchors: &mut [&mut usize]) -> usize {
    let mut removed = 0;
    loop {
        let mut incoming: HashMap<usize, usize> = HashMap::new();
        for statement in statements.iter() {
            if let Some(JumpTarget::Address(target)) = statement.jump {
                *incoming.entry(target).or_insert(0) += 1;
            }
        }

        let candidate = statements.iter().enumerate().position(|(index, s)| {
            s.kind == StatementKind::Goto
                && s.jump == Some(JumpTarget::Address(index + 1))
                && incoming.get(&(index + 1)).copied() == Some(1)
        });
        let Some(index) = candidate else { break };

        statements.remove(index);
        let remap = |address: usize| if address > index { address - 1 } else { address };
        for statement in statements.iter_mut() {
            if let Some(JumpTarget::Address(target)) = statement.jump {
                statement.jump = Some(JumpTarget::Address(remap(target)));
            }
        }
        for anchor in anchors.iter_mut() {
            **anchor = remap(**anchor);
        }
        removed += 1;
    }
    removed
}

/// Run every resolution step and consume the context
pub fn resolve(mut ctx: FunctionContext<'_>, enable_peephole: bool) -> Result<ResolvedFunction> {
    link_gotos(&mut ctx)?;
    let linear_execution_list = linearize(&mut ctx)?;

    let entry_starts: HashMap<NodeId, StatementId> = ctx
        .entry_points
        .iter()
        .filter_map(|node| {
            let first = ctx.statements_per_node.get(node)?.first()?;
            Some((*node, first.id))
        })
        .collect();

    let mut statements = Vec::new();
    for node in &linear_execution_list {
        if let Some(list) = ctx.statements_per_node.remove(node) {
            statements.extend(list);
        }
    }

    let epilogue_start = statements.len();
    let mut next_id = statements.iter().map(|s| s.id.0 + 1).max().unwrap_or(0);
    let mut synthesize = |kind| {
        let statement = CompiledStatement {
            id: StatementId(next_id),
            kind,
            node: None,
            inputs: Vec::new(),
            output: None,
            jump: None,
        };
        next_id += 1;
        statement
    };
    if ctx.flags.networked {
        statements.push(synthesize(StatementKind::ReplicationFlush));
    }
    statements.push(synthesize(StatementKind::Return));

    let addresses: HashMap<StatementId, usize> = statements.iter().enumerate().map(|(i, s)| (s.id, i)).collect();
    for statement in statements.iter_mut() {
        statement.jump = match statement.jump {
            Some(JumpTarget::Statement(id)) => Some(JumpTarget::Address(*addresses.get(&id).ok_or_else(|| {
                CompileError::Internal(format!("jump to {} which was never placed", id))
            })?)),
            Some(JumpTarget::Epilogue) => Some(JumpTarget::Address(epilogue_start)),
            Some(JumpTarget::Node(target)) => {
                return Err(CompileError::Internal(format!("unlinked jump to {}", target)));
            }
            other => other,
        };
    }

    let graph = ctx.graph;
    let mut entry_points = Vec::new();
    for node in &ctx.entry_points {
        let Some(entry) = graph.node(*node) else { continue };
        let address = entry_starts
            .get(node)
            .and_then(|id| addresses.get(id))
            .copied()
            .unwrap_or(epilogue_start);
        let name = match &entry.kind {
            NodeKind::FunctionEntry => ctx.name.clone(),
            kind => kind.event_name().unwrap_or(&entry.title).to_string(),
        };
        let parameters = graph
            .data_outputs(*node)
            .into_iter()
            .filter_map(|pin| {
                let term = ctx.terminal_for_pin(pin)?;
                Some((graph.pin(pin)?.name.clone(), term))
            })
            .collect();
        entry_points.push(EntryPoint {
            name,
            node: Some(*node),
            address,
            parameters,
        });
    }

    let mut epilogue = epilogue_start;
    if enable_peephole {
        let mut anchors: Vec<&mut usize> = entry_points.iter_mut().map(|e| &mut e.address).collect();
        anchors.push(&mut epilogue);
        let merged = merge_adjacent(&mut statements, &mut anchors);
        tracing::debug!("[PBBC] '{}': peephole removed {} jumps", ctx.name, merged);
    }

    tracing::info!(
        "[PBBC] Resolved '{}': {} nodes, {} terminals, {} statements",
        ctx.name,
        linear_execution_list.len(),
        ctx.terminals.len(),
        statements.len()
    );

    Ok(ResolvedFunction {
        name: ctx.name,
        kind: ctx.kind,
        flags: ctx.flags,
        terminals: ctx.terminals,
        statements,
        linear_execution_list,
        entry_points,
        epilogue,
    })
}

fn push_terminal(terminals: &mut Vec<Terminal>, name: String, like: &Terminal, kind: TerminalKind) -> TerminalId {
    let id = TerminalId(terminals.len() as u32);
    terminals.push(Terminal {
        id,
        name,
        ty: like.ty.clone(),
        kind,
        source: None,
    });
    id
}

fn expect_state(ctx: &FunctionContext<'_>, expected: ContextState) -> Result<()> {
    if ctx.state == expected {
        Ok(())
    } else {
        Err(CompileError::Internal(format!(
            "'{}' is {:?}, expected {:?}",
            ctx.name, ctx.state, expected
        )))
    }
}
