//! # Node Lowering
//!
//! Handler dispatch from node kinds to statement generation.
//!
//! Every node kind has a [`NodeHandler`] in the [`HandlerRegistry`]. The
//! handler registers the node's nets and appends its statements to the
//! node's own list; the final order is decided during resolution.

mod node_handlers;

pub use node_handlers::*;

use std::collections::HashMap;

use crate::context::FunctionContext;
use crate::error::{CompileError, Result};
use crate::graph::NodeId;
use crate::metadata::{node_metadata, NodeKindTag};
use crate::nets;

/// Lowering behaviour of one node kind
pub trait NodeHandler: Send + Sync {
    /// Bind the node's pins to terminals
    fn register_nets(&self, ctx: &mut FunctionContext<'_>, node: NodeId) -> Result<()> {
        nets::register_default(ctx, node)
    }

    /// Append the node's statements
    fn compile(&self, ctx: &mut FunctionContext<'_>, node: NodeId) -> Result<()>;
}

/// Table of handlers keyed by node kind
pub struct HandlerRegistry {
    handlers: HashMap<NodeKindTag, Box<dyn NodeHandler>>,
}

impl HandlerRegistry {
    /// Registry with no handlers
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with a handler for every built-in node kind
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(NodeKindTag::FunctionEntry, Box::new(EntryHandler));
        registry.register(NodeKindTag::Event, Box::new(EntryHandler));
        registry.register(NodeKindTag::CustomEvent, Box::new(EntryHandler));
        registry.register(NodeKindTag::FunctionResult, Box::new(FunctionResultHandler));
        registry.register(NodeKindTag::CallFunction, Box::new(CallFunctionHandler));
        registry.register(NodeKindTag::VariableGet, Box::new(PassiveHandler));
        registry.register(NodeKindTag::VariableSet, Box::new(VariableSetHandler));
        registry.register(NodeKindTag::Branch, Box::new(BranchHandler));
        registry.register(NodeKindTag::Sequence, Box::new(SequenceHandler));
        registry.register(NodeKindTag::ForLoop, Box::new(ForLoopHandler));
        registry.register(NodeKindTag::WhileLoop, Box::new(WhileLoopHandler));
        registry.register(NodeKindTag::Cast, Box::new(CastHandler));
        registry.register(NodeKindTag::Spawn, Box::new(SpawnHandler));
        registry.register(NodeKindTag::MathExpression, Box::new(MathExpressionHandler));
        registry.register(NodeKindTag::Knot, Box::new(PassiveHandler));
        registry.register(NodeKindTag::SelfRef, Box::new(PassiveHandler));
        registry.register(NodeKindTag::MacroInstance, Box::new(UnexpandedHandler));
        registry.register(NodeKindTag::Composite, Box::new(UnexpandedHandler));
        registry.register(NodeKindTag::Tunnel, Box::new(UnexpandedHandler));
        registry
    }

    /// Install or replace the handler for `tag`
    pub fn register(&mut self, tag: NodeKindTag, handler: Box<dyn NodeHandler>) {
        self.handlers.insert(tag, handler);
    }

    pub fn get(&self, tag: NodeKindTag) -> Option<&dyn NodeHandler> {
        self.handlers.get(&tag).map(|h| h.as_ref())
    }

    fn require(&self, tag: NodeKindTag) -> Result<&dyn NodeHandler> {
        self.get(tag)
            .ok_or_else(|| CompileError::Internal(format!("no handler registered for {:?}", tag)))
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Register nets of every reachable node: early kinds first, then the rest
pub fn run_net_registration(ctx: &mut FunctionContext<'_>) {
    let handlers = ctx.handlers;
    let nodes: Vec<NodeId> = ctx.reachable.iter().copied().collect();

    for early in [true, false] {
        for &id in &nodes {
            let tag = match ctx.node(id) {
                Ok(node) => node.kind.tag(),
                Err(error) => {
                    ctx.record_error(id, error);
                    continue;
                }
            };
            if node_metadata(tag).registers_nets_early != early {
                continue;
            }
            let result = handlers.require(tag).and_then(|h| h.register_nets(ctx, id));
            if let Err(error) = result {
                // A producer's failure surfaces again on every consumer of its net;
                // only the producer is marked failed here.
                let origin = error.node().unwrap_or(id);
                ctx.record_error(origin, error);
            }
        }
    }

    tracing::debug!(
        "[PBBC] '{}': registered {} terminals for {} pins",
        ctx.name,
        ctx.terminals.len(),
        ctx.net_map.len()
    );
}

/// Lower every reachable impure node in handle order.
///
/// Failures are recorded and lowering continues with the next node, so one
/// pass reports every independent problem. Pure nodes are lowered on demand
/// by their consumers.
pub fn run_lowering(ctx: &mut FunctionContext<'_>) {
    if ctx.flags.interface_stub {
        tracing::debug!("[PBBC] '{}': interface stub, lowering skipped", ctx.name);
        return;
    }

    let handlers = ctx.handlers;
    let graph = ctx.graph;
    let nodes: Vec<NodeId> = ctx
        .reachable
        .iter()
        .copied()
        .filter(|id| !graph.is_pure(*id))
        .collect();

    for id in nodes {
        if ctx.has_failed(id) {
            continue;
        }
        let tag = match ctx.node(id) {
            Ok(node) => node.kind.tag(),
            Err(error) => {
                ctx.record_error(id, error);
                continue;
            }
        };
        tracing::debug!("[PBBC] Lowering {} ({:?})", id, tag);

        ctx.begin_node(id);
        let result = handlers.require(tag).and_then(|h| h.compile(ctx, id));
        ctx.end_node();

        if let Err(error) = result {
            // Statements of a failed node are never resolved
            ctx.statements_per_node.remove(&id);
            ctx.record_error(id, error);
        }
    }
}
