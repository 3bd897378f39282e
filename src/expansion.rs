//! # Graph Expansion
//!
//! Splices macro instances and collapsed composites into their host graph
//! before any function context is built.
//!
//! A body graph talks to the outside through tunnel nodes: the entry
//! tunnel's outputs mirror the instance's inputs, the exit tunnel's inputs
//! mirror its outputs, matched by pin name. Splicing copies the body with
//! fresh node identities, connects each outer link straight to the inner
//! pins behind the tunnel, then deletes the tunnels and the instance.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::config::CompileOptions;
use crate::error::{CompileError, Result};
use crate::graph::{Graph, NodeId, NodeKind, PinDirection, PinId, TunnelBoundary};
use crate::metadata::node_metadata;

/// Expand every macro instance and composite of `graph`, including instances
/// uncovered by earlier splices. Returns the number of spliced instances.
pub fn expand_graph(
    graph: &mut Graph,
    macros: &HashMap<String, Graph>,
    options: &CompileOptions,
) -> Result<usize> {
    let mut expanded = 0;
    let mut depth = 0;

    loop {
        let instances: Vec<NodeId> = graph
            .nodes()
            .filter(|n| node_metadata(n.kind.tag()).expands_from_body)
            .map(|n| n.id)
            .collect();
        let Some(first) = instances.first() else { break };

        depth += 1;
        if depth > options.max_expansion_depth {
            return Err(CompileError::ExpansionDepthExceeded {
                node: *first,
                depth: options.max_expansion_depth,
            });
        }

        for instance in instances {
            let body = instance_body(graph, macros, instance)?;
            splice(graph, instance, &body)?;
            expanded += 1;
        }
    }

    if expanded > 0 {
        tracing::debug!(
            "[PBBC] Expanded {} instances in '{}' ({} levels)",
            expanded,
            graph.name,
            depth
        );
    }
    Ok(expanded)
}

fn instance_body(graph: &Graph, macros: &HashMap<String, Graph>, instance: NodeId) -> Result<Graph> {
    let node = graph.node(instance).ok_or(CompileError::NodeNotFound(instance))?;
    match &node.kind {
        NodeKind::MacroInstance { macro_name } => {
            macros
                .get(macro_name)
                .cloned()
                .ok_or_else(|| CompileError::UnresolvedMacro {
                    node: instance,
                    name: macro_name.clone(),
                })
        }
        NodeKind::Composite { subgraph } => graph.subgraphs.get(*subgraph).cloned().ok_or_else(|| {
            CompileError::Internal(format!("{} references missing subgraph {}", instance, subgraph))
        }),
        _ => Err(CompileError::Internal(format!("{} is not expandable", instance))),
    }
}

/// Replace `instance` with a copy of `body`
pub fn splice(graph: &mut Graph, instance: NodeId, body: &Graph) -> Result<()> {
    let host = graph.node(instance).ok_or(CompileError::NodeNotFound(instance))?.clone();
    let map = graph.absorb(body, true);

    let mut copied: Vec<NodeId> = map.nodes.values().copied().collect();
    copied.sort();
    let tunnels: Vec<(NodeId, TunnelBoundary)> = copied
        .iter()
        .filter_map(|id| match graph.node(*id)?.kind {
            NodeKind::Tunnel { boundary } => Some((*id, boundary)),
            _ => None,
        })
        .collect();

    // Pins that disappear with the splice: the instance's and the tunnels'
    let mut removable: HashSet<PinId> = host.pins.iter().copied().collect();
    for (tunnel, _) in &tunnels {
        removable.extend(graph.node_pins(*tunnel).iter().map(|p| p.id));
    }

    // Pair each instance pin with the tunnel pin that mirrors it
    let mut pairs: HashMap<PinId, Vec<PinId>> = HashMap::new();
    for pin in host.pins.iter().filter_map(|id| graph.pin(*id)) {
        let (boundary, mirrored) = match pin.direction {
            PinDirection::Input => (TunnelBoundary::Entry, PinDirection::Output),
            PinDirection::Output => (TunnelBoundary::Exit, PinDirection::Input),
        };
        let partner = tunnels
            .iter()
            .filter(|(_, b)| *b == boundary)
            .filter_map(|(tunnel, _)| graph.find_pin(*tunnel, &pin.name))
            .find(|id| graph.pin(*id).map(|p| p.direction == mirrored).unwrap_or(false));
        match partner {
            Some(partner) => {
                pairs.entry(pin.id).or_default().push(partner);
                pairs.entry(partner).or_default().push(pin.id);
            }
            None => tracing::warn!(
                "[PBBC] Pin '{}' of '{}' has no matching tunnel pin and is dropped",
                pin.name,
                host.title
            ),
        }
    }

    let mut visited = HashSet::new();
    let mut rewires: Vec<(PinId, PinId)> = Vec::new();
    let mut defaults = Vec::new();
    let mut order: Vec<PinId> = removable.iter().copied().collect();
    order.sort();
    for start in order {
        if !visited.insert(start) {
            continue;
        }

        // Group of removable pins joined by pairing or by direct links
        let mut group = vec![start];
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            let mut next = pairs.get(&current).cloned().unwrap_or_default();
            if let Some(pin) = graph.pin(current) {
                next.extend(pin.links.iter().filter(|l| removable.contains(*l)));
            }
            for id in next {
                if visited.insert(id) {
                    group.push(id);
                    queue.push_back(id);
                }
            }
        }

        let mut sources = Vec::new();
        let mut sinks = Vec::new();
        for id in &group {
            let Some(pin) = graph.pin(*id) else { continue };
            for link in pin.links.iter().filter(|l| !removable.contains(*l)) {
                match graph.pin(*link).map(|p| p.direction) {
                    Some(PinDirection::Output) => sources.push(*link),
                    Some(PinDirection::Input) => sinks.push(*link),
                    None => {}
                }
            }
        }

        for source in &sources {
            for sink in &sinks {
                rewires.push((*source, *sink));
            }
        }

        if sources.is_empty() {
            let default = group
                .iter()
                .filter(|id| host.pins.contains(*id))
                .find_map(|id| graph.pin(*id).and_then(|p| p.default_value.clone()));
            if let Some(default) = default {
                defaults.extend(sinks.iter().map(|sink| (*sink, default.clone())));
            }
        }
    }

    for (source, sink) in rewires {
        graph.link_unchecked(source, sink);
    }
    for (pin, value) in defaults {
        graph.set_default(pin, value);
    }
    for (tunnel, _) in tunnels {
        graph.remove_node(tunnel);
    }
    graph.remove_node(instance);

    if !host.enabled {
        for id in copied {
            graph.set_enabled(id, false);
        }
    }

    tracing::debug!("[PBBC] Spliced '{}' ({} nodes)", host.title, map.nodes.len());
    Ok(())
}

/// Combine event-graph pages into one graph; node identities are preserved
pub fn merge_ubergraph(name: &str, pages: &[Graph]) -> Graph {
    let mut merged = Graph::new(name);
    for page in pages {
        merged.absorb(page, false);
    }
    merged
}
