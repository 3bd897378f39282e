//! # Net Registration
//!
//! Binds every data pin of a node to a [`Terminal`](crate::context::Terminal).
//!
//! Linked pins form a net and share one terminal. The node that produces
//! the net's value decides what kind of storage it is: entry outputs are
//! parameters, variable getters read the member directly, `self` nodes are a
//! literal, everything else is a local. Unconnected inputs read a literal
//! built from their default value.
//!
//! Registration is idempotent: a pin that already has a terminal keeps it.

use std::collections::{HashSet, VecDeque};

use crate::context::{ContextKind, FunctionContext, TerminalId, TerminalKind};
use crate::error::{CompileError, ConnectionError, Result};
use crate::graph::{pins, Graph, LiteralValue, NodeId, NodeKind, Pin, PinId, PinType};

/// Register every data pin of `node`
pub fn register_default(ctx: &mut FunctionContext<'_>, node: NodeId) -> Result<()> {
    let graph = ctx.graph;
    let owner = ctx.node(node)?;

    for pin in graph.node_pins(node) {
        if pin.is_exec() || ctx.net_map.contains_key(&pin.id) {
            continue;
        }
        if pin.pin_type.contains_wildcard() {
            ctx.warn_node(
                node,
                format!(
                    "Pin '{}' of '{}' is still a wildcard; its type could not be inferred",
                    pin.name, owner.title
                ),
            );
        }
        if pin.is_input() && !pin.is_linked() {
            register_unlinked_input(ctx, &owner.title, pin);
        } else {
            register_net(ctx, pin.id)?;
        }
    }

    if owner.kind == NodeKind::FunctionResult {
        register_results(ctx, node)?;
    }
    Ok(())
}

/// Terminal of the net containing `pin`, creating it on first use
pub fn register_net(ctx: &mut FunctionContext<'_>, pin: PinId) -> Result<TerminalId> {
    if let Some(term) = ctx.net_map.get(&pin) {
        return Ok(*term);
    }
    let graph = ctx.graph;
    let members = collect_net(graph, pin);
    let producer = members
        .iter()
        .filter_map(|id| graph.pin(*id))
        .find(|p| p.is_output() && !is_knot(graph, p.owner))
        .or_else(|| graph.pin(pin))
        .ok_or_else(|| CompileError::Internal(format!("{} does not exist", pin)))?;

    let term = create_net_terminal(ctx, producer)?;
    for member in members {
        ctx.net_map.insert(member, term);
    }
    Ok(term)
}

/// Every pin sharing storage with `start`: links followed transitively,
/// with reroute knots joining their input and output
pub fn collect_net(graph: &Graph, start: PinId) -> Vec<PinId> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    seen.insert(start);
    queue.push_back(start);

    while let Some(current) = queue.pop_front() {
        let Some(pin) = graph.pin(current) else { continue };
        let mut next: Vec<PinId> = pin.links.clone();
        if is_knot(graph, pin.owner) {
            next.extend(graph.node_pins(pin.owner).iter().map(|p| p.id));
        }
        for id in next {
            if seen.insert(id) {
                queue.push_back(id);
            }
        }
    }

    let mut net: Vec<PinId> = seen.into_iter().collect();
    net.sort();
    net
}

fn is_knot(graph: &Graph, node: NodeId) -> bool {
    graph.node(node).map(|n| n.kind == NodeKind::Knot).unwrap_or(false)
}

fn create_net_terminal(ctx: &mut FunctionContext<'_>, producer: &Pin) -> Result<TerminalId> {
    let owner = ctx.node(producer.owner)?;
    let ty = producer.pin_type.clone();
    let source = Some(producer.id);

    let term = match &owner.kind {
        NodeKind::FunctionEntry if producer.is_output() => {
            ctx.create_terminal(&producer.name, ty, TerminalKind::Parameter, source)
        }
        NodeKind::Event { name } | NodeKind::CustomEvent { name } if producer.is_output() => {
            if ctx.kind == ContextKind::Ubergraph {
                let local = format!("{}_{}", name, producer.name);
                ctx.create_terminal(&local, ty, TerminalKind::EventGraphLocal, source)
            } else {
                ctx.create_terminal(&producer.name, ty, TerminalKind::Parameter, source)
            }
        }
        NodeKind::VariableGet { member, owner_class } | NodeKind::VariableSet { member, owner_class }
            if producer.is_output() =>
        {
            register_member(ctx, producer.owner, member, owner_class.as_deref())?
        }
        NodeKind::SelfRef => ctx.create_terminal("self", ty, TerminalKind::Literal(LiteralValue::SelfRef), source),
        _ => {
            let name = format!("{}_{}", owner.title, producer.name);
            let kind = ctx.local_kind();
            ctx.create_terminal(&name, ty, kind, source)
        }
    };
    Ok(term)
}

/// Member storage for a variable node; fails when the class has no such member
fn register_member(
    ctx: &mut FunctionContext<'_>,
    node: NodeId,
    member: &str,
    owner_class: Option<&str>,
) -> Result<TerminalId> {
    let schema = ctx.schema;
    let class = ctx.scope_class(owner_class).unwrap_or_else(|| "<none>".to_string());
    let info = schema
        .find_member(&class, member)
        .ok_or_else(|| CompileError::UnknownMember {
            node,
            class: class.clone(),
            member: member.to_string(),
        })?;

    let kind = TerminalKind::VariableReference {
        member: info.name.clone(),
        owner_class: class,
        is_component: info.is_component,
    };
    Ok(ctx.create_terminal(&info.name, info.ty.clone(), kind, None))
}

fn register_unlinked_input(ctx: &mut FunctionContext<'_>, title: &str, pin: &Pin) {
    let value = match (&pin.default_value, &pin.pin_type) {
        (Some(value), _) => Some(value.clone()),
        (None, _) if pin.required => None,
        // An unconnected target pin means `self`
        (None, PinType::Object(_)) if pin.name == pins::SELF => Some(LiteralValue::SelfRef),
        (None, ty) => ty.implicit_default(),
    };
    if let Some(value) = value {
        let name = format!("{}_{}", title, pin.name);
        let term = ctx.create_literal(&name, pin.pin_type.clone(), value);
        ctx.net_map.insert(pin.id, term);
    }
}

/// Result slots written by a function result node.
///
/// Slots are shared by name across every result node of the function; a
/// second node must declare the same type for the pin.
fn register_results(ctx: &mut FunctionContext<'_>, node: NodeId) -> Result<()> {
    let graph = ctx.graph;
    for id in graph.data_inputs(node) {
        if ctx.result_terms.contains_key(&id) {
            continue;
        }
        let pin = graph
            .pin(id)
            .ok_or_else(|| CompileError::Internal(format!("{} does not exist", id)))?;

        let term = match ctx.result_slots.get(&pin.name).copied() {
            Some(slot) => {
                let existing = ctx
                    .terminal(slot)
                    .ok_or_else(|| CompileError::Internal(format!("result slot '{}' has no terminal", pin.name)))?;
                if existing.ty != pin.pin_type {
                    return Err(ConnectionError::IncompatibleTypes {
                        from: existing.source.unwrap_or(id),
                        to: id,
                        from_type: existing.ty.clone(),
                        to_type: pin.pin_type.clone(),
                    }
                    .into());
                }
                slot
            }
            None => {
                let slot = ctx.create_terminal(&pin.name, pin.pin_type.clone(), TerminalKind::Result, Some(id));
                ctx.result_slots.insert(pin.name.clone(), slot);
                slot
            }
        };
        ctx.result_terms.insert(id, term);
    }
    Ok(())
}
