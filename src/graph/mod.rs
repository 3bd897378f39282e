//! # Blueprint Graph Model
//!
//! Arena-backed representation of a Blueprint function or event graph.
//!
//! Nodes and pins live in per-graph arenas and are addressed by [`NodeId`] and
//! [`PinId`] handles. A pin refers back to its owning node by handle only, so
//! the model has no reference cycles. Removing a node leaves a tombstone in
//! the arena, keeping every other handle stable.

mod builder;
pub mod schema;
pub mod types;

pub use builder::pins;
pub use schema::{ClassInfo, FunctionSignature, MemberInfo, ParamInfo, Schema};
pub use types::{Binding, LiteralValue, PinType};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::error::ConnectionError;
use crate::metadata::NodeKindTag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PinId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pin#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinDirection {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TunnelBoundary {
    /// Outputs mirror the instance's inputs
    Entry,
    /// Inputs mirror the instance's outputs
    Exit,
}

/// Operators available to math-expression nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MathOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
    And,
    Or,
    Not,
    Negate,
}

impl MathOp {
    pub fn is_unary(&self) -> bool {
        matches!(self, MathOp::Not | MathOp::Negate)
    }

    /// Comparisons and logical operators produce booleans
    pub fn yields_bool(&self) -> bool {
        matches!(
            self,
            MathOp::Less
                | MathOp::LessEqual
                | MathOp::Greater
                | MathOp::GreaterEqual
                | MathOp::Equal
                | MathOp::NotEqual
                | MathOp::And
                | MathOp::Or
                | MathOp::Not
        )
    }

    fn verb(&self) -> &'static str {
        match self {
            MathOp::Add => "Add",
            MathOp::Subtract => "Subtract",
            MathOp::Multiply => "Multiply",
            MathOp::Divide => "Divide",
            MathOp::Modulo => "Percent",
            MathOp::Less => "Less",
            MathOp::LessEqual => "LessEqual",
            MathOp::Greater => "Greater",
            MathOp::GreaterEqual => "GreaterEqual",
            MathOp::Equal => "EqualEqual",
            MathOp::NotEqual => "NotEqual",
            MathOp::And => "BooleanAND",
            MathOp::Or => "BooleanOR",
            MathOp::Not => "Not",
            MathOp::Negate => "Negate",
        }
    }

    /// Library intrinsic implementing this operator for `operand`
    pub fn function_name(&self, operand: &PinType) -> String {
        let ty = operand.intrinsic_name();
        if self.is_unary() {
            format!("{}_Pre{}", self.verb(), ty)
        } else {
            format!("{}_{}{}", self.verb(), ty, ty)
        }
    }
}

/// Closed set of node variants understood by the compiler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    FunctionEntry,
    FunctionResult,
    Event { name: String },
    CustomEvent { name: String },
    CallFunction { function: String, target_class: Option<String> },
    VariableGet { member: String, owner_class: Option<String> },
    VariableSet { member: String, owner_class: Option<String> },
    Branch,
    Sequence,
    ForLoop,
    WhileLoop,
    Cast { target_class: String },
    Spawn { class: String },
    MathExpression { op: MathOp },
    MacroInstance { macro_name: String },
    Composite { subgraph: usize },
    Tunnel { boundary: TunnelBoundary },
    Knot,
    SelfRef,
}

impl NodeKind {
    pub fn tag(&self) -> NodeKindTag {
        match self {
            NodeKind::FunctionEntry => NodeKindTag::FunctionEntry,
            NodeKind::FunctionResult => NodeKindTag::FunctionResult,
            NodeKind::Event { .. } => NodeKindTag::Event,
            NodeKind::CustomEvent { .. } => NodeKindTag::CustomEvent,
            NodeKind::CallFunction { .. } => NodeKindTag::CallFunction,
            NodeKind::VariableGet { .. } => NodeKindTag::VariableGet,
            NodeKind::VariableSet { .. } => NodeKindTag::VariableSet,
            NodeKind::Branch => NodeKindTag::Branch,
            NodeKind::Sequence => NodeKindTag::Sequence,
            NodeKind::ForLoop => NodeKindTag::ForLoop,
            NodeKind::WhileLoop => NodeKindTag::WhileLoop,
            NodeKind::Cast { .. } => NodeKindTag::Cast,
            NodeKind::Spawn { .. } => NodeKindTag::Spawn,
            NodeKind::MathExpression { .. } => NodeKindTag::MathExpression,
            NodeKind::MacroInstance { .. } => NodeKindTag::MacroInstance,
            NodeKind::Composite { .. } => NodeKindTag::Composite,
            NodeKind::Tunnel { .. } => NodeKindTag::Tunnel,
            NodeKind::Knot => NodeKindTag::Knot,
            NodeKind::SelfRef => NodeKindTag::SelfRef,
        }
    }

    /// Event name for event entry points
    pub fn event_name(&self) -> Option<&str> {
        match self {
            NodeKind::Event { name } | NodeKind::CustomEvent { name } => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pin {
    pub id: PinId,
    pub owner: NodeId,
    pub name: String,
    pub direction: PinDirection,
    /// Current type; wildcards are replaced once resolved
    pub pin_type: PinType,
    /// Type as authored, possibly containing wildcards
    pub declared_type: PinType,
    pub links: Vec<PinId>,
    pub default_value: Option<LiteralValue>,
    /// Unconnected required inputs are an error instead of reading an implicit default
    pub required: bool,
}

impl Pin {
    pub fn is_exec(&self) -> bool {
        self.pin_type.is_exec()
    }

    pub fn is_input(&self) -> bool {
        self.direction == PinDirection::Input
    }

    pub fn is_output(&self) -> bool {
        self.direction == PinDirection::Output
    }

    /// Authored as a wildcard (resolved or not)
    pub fn is_wildcard(&self) -> bool {
        self.declared_type.contains_wildcard()
    }

    pub fn is_linked(&self) -> bool {
        !self.links.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub guid: Uuid,
    pub kind: NodeKind,
    pub title: String,
    pub pins: Vec<PinId>,
    pub enabled: bool,
    pub position: Position,
}

/// Maps produced when one graph's contents are copied into another
#[derive(Debug, Default, Clone)]
pub struct AbsorbMap {
    pub nodes: HashMap<NodeId, NodeId>,
    pub pins: HashMap<PinId, PinId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    pub name: String,
    nodes: Vec<Option<Node>>,
    pins: Vec<Option<Pin>>,
    /// Bodies of composite nodes, addressed by index
    pub subgraphs: Vec<Graph>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            pins: Vec::new(),
            subgraphs: Vec::new(),
        }
    }

    /// Add a node with no pins
    pub fn add_node(&mut self, kind: NodeKind, title: impl Into<String>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(Node {
            id,
            guid: Uuid::new_v4(),
            kind,
            title: title.into(),
            pins: Vec::new(),
            enabled: true,
            position: Position::default(),
        }));
        id
    }

    /// Append a pin to `node`; pins keep their declaration order
    pub fn add_pin(
        &mut self,
        node: NodeId,
        name: impl Into<String>,
        direction: PinDirection,
        pin_type: PinType,
    ) -> PinId {
        let id = PinId(self.pins.len() as u32);
        self.pins.push(Some(Pin {
            id,
            owner: node,
            name: name.into(),
            direction,
            declared_type: pin_type.clone(),
            pin_type,
            links: Vec::new(),
            default_value: None,
            required: false,
        }));
        if let Some(owner) = self.node_mut(node) {
            owner.pins.push(id);
        }
        id
    }

    pub fn add_input(&mut self, node: NodeId, name: impl Into<String>, pin_type: PinType) -> PinId {
        self.add_pin(node, name, PinDirection::Input, pin_type)
    }

    pub fn add_output(&mut self, node: NodeId, name: impl Into<String>, pin_type: PinType) -> PinId {
        self.add_pin(node, name, PinDirection::Output, pin_type)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize).and_then(|n| n.as_ref())
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0 as usize).and_then(|n| n.as_mut())
    }

    pub fn pin(&self, id: PinId) -> Option<&Pin> {
        self.pins.get(id.0 as usize).and_then(|p| p.as_ref())
    }

    pub fn pin_mut(&mut self, id: PinId) -> Option<&mut Pin> {
        self.pins.get_mut(id.0 as usize).and_then(|p| p.as_mut())
    }

    /// Live nodes in handle order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter_map(|n| n.as_ref())
    }

    /// Live pins in handle order
    pub fn pins(&self) -> impl Iterator<Item = &Pin> {
        self.pins.iter().filter_map(|p| p.as_ref())
    }

    pub fn node_count(&self) -> usize {
        self.nodes().count()
    }

    pub fn find_pin(&self, node: NodeId, name: &str) -> Option<PinId> {
        let node = self.node(node)?;
        node.pins
            .iter()
            .copied()
            .find(|id| self.pin(*id).map(|p| p.name == name).unwrap_or(false))
    }

    /// Pins of `node` in declaration order
    pub fn node_pins(&self, node: NodeId) -> Vec<&Pin> {
        self.node(node)
            .map(|n| n.pins.iter().filter_map(|id| self.pin(*id)).collect())
            .unwrap_or_default()
    }

    pub fn exec_outputs(&self, node: NodeId) -> Vec<PinId> {
        self.node_pins(node)
            .into_iter()
            .filter(|p| p.is_exec() && p.is_output())
            .map(|p| p.id)
            .collect()
    }

    pub fn data_inputs(&self, node: NodeId) -> Vec<PinId> {
        self.node_pins(node)
            .into_iter()
            .filter(|p| !p.is_exec() && p.is_input())
            .map(|p| p.id)
            .collect()
    }

    pub fn data_outputs(&self, node: NodeId) -> Vec<PinId> {
        self.node_pins(node)
            .into_iter()
            .filter(|p| !p.is_exec() && p.is_output())
            .map(|p| p.id)
            .collect()
    }

    /// A node without execution pins
    pub fn is_pure(&self, node: NodeId) -> bool {
        !self.node_pins(node).iter().any(|p| p.is_exec())
    }

    /// Node reached through the first link of an exec output pin, passing
    /// through reroute knots
    pub fn exec_target(&self, pin: PinId) -> Option<NodeId> {
        let mut current = pin;
        for _ in 0..=self.pins.len() {
            let first = *self.pin(current)?.links.first()?;
            let owner = self.pin(first)?.owner;
            if self.node(owner)?.kind != NodeKind::Knot {
                return Some(owner);
            }
            current = self.find_pin(owner, pins::KNOT_OUT)?;
        }
        // Knot cycle
        None
    }

    /// Output pin whose value reaches a data input, passing through reroute knots
    pub fn data_source(&self, input: PinId) -> Option<PinId> {
        let mut current = input;
        for _ in 0..=self.pins.len() {
            let first = *self.pin(current)?.links.first()?;
            let owner = self.pin(first)?.owner;
            if self.node(owner)?.kind != NodeKind::Knot {
                return Some(first);
            }
            current = self.find_pin(owner, pins::KNOT_IN)?;
        }
        None
    }

    /// Link two pins after checking the schema's connection rules
    pub fn link(&mut self, schema: &Schema, a: PinId, b: PinId) -> Result<(), ConnectionError> {
        schema.validate_connection(self, a, b)?;
        self.link_unchecked(a, b);
        Ok(())
    }

    /// Link two pins without validation; graph providers use this when
    /// loading already-validated assets
    pub fn link_unchecked(&mut self, a: PinId, b: PinId) {
        if let Some(pin) = self.pin_mut(a) {
            if !pin.links.contains(&b) {
                pin.links.push(b);
            }
        }
        if let Some(pin) = self.pin_mut(b) {
            if !pin.links.contains(&a) {
                pin.links.push(a);
            }
        }
    }

    pub fn unlink(&mut self, a: PinId, b: PinId) {
        if let Some(pin) = self.pin_mut(a) {
            pin.links.retain(|l| *l != b);
        }
        if let Some(pin) = self.pin_mut(b) {
            pin.links.retain(|l| *l != a);
        }
    }

    pub fn break_all_links(&mut self, pin: PinId) {
        let links = self.pin(pin).map(|p| p.links.clone()).unwrap_or_default();
        for other in links {
            self.unlink(pin, other);
        }
    }

    /// Remove a node and its pins, breaking every link first
    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        let pins = self.node(id)?.pins.clone();
        for pin in &pins {
            self.break_all_links(*pin);
        }
        for pin in pins {
            if let Some(slot) = self.pins.get_mut(pin.0 as usize) {
                *slot = None;
            }
        }
        self.nodes.get_mut(id.0 as usize).and_then(|slot| slot.take())
    }

    pub fn set_default(&mut self, pin: PinId, value: LiteralValue) {
        if let Some(pin) = self.pin_mut(pin) {
            pin.default_value = Some(value);
        }
    }

    pub fn set_required(&mut self, pin: PinId, required: bool) {
        if let Some(pin) = self.pin_mut(pin) {
            pin.required = required;
        }
    }

    pub fn set_enabled(&mut self, node: NodeId, enabled: bool) {
        if let Some(node) = self.node_mut(node) {
            node.enabled = enabled;
        }
    }

    pub fn set_position(&mut self, node: NodeId, x: f32, y: f32) {
        if let Some(node) = self.node_mut(node) {
            node.position = Position { x, y };
        }
    }

    /// Copy every node, pin, link and composite body of `other` into this graph.
    ///
    /// Composite indices are rebased onto this graph's `subgraphs`. With
    /// `fresh_guids` each copied node receives a new identity; otherwise the
    /// source GUIDs are preserved.
    pub fn absorb(&mut self, other: &Graph, fresh_guids: bool) -> AbsorbMap {
        let mut map = AbsorbMap::default();
        let subgraph_base = self.subgraphs.len();
        self.subgraphs.extend(other.subgraphs.iter().cloned());

        for node in other.nodes() {
            let kind = match &node.kind {
                NodeKind::Composite { subgraph } => NodeKind::Composite {
                    subgraph: subgraph + subgraph_base,
                },
                kind => kind.clone(),
            };
            let new_id = self.add_node(kind, node.title.clone());
            if let Some(copy) = self.node_mut(new_id) {
                copy.enabled = node.enabled;
                copy.position = node.position;
                if !fresh_guids {
                    copy.guid = node.guid;
                }
            }
            map.nodes.insert(node.id, new_id);

            for pin in node.pins.iter().filter_map(|id| other.pin(*id)) {
                let new_pin = self.add_pin(new_id, pin.name.clone(), pin.direction, pin.pin_type.clone());
                if let Some(copy) = self.pin_mut(new_pin) {
                    copy.declared_type = pin.declared_type.clone();
                    copy.default_value = pin.default_value.clone();
                    copy.required = pin.required;
                }
                map.pins.insert(pin.id, new_pin);
            }
        }

        for pin in other.pins() {
            for link in &pin.links {
                if pin.id < *link {
                    if let (Some(a), Some(b)) = (map.pins.get(&pin.id), map.pins.get(link)) {
                        self.link_unchecked(*a, *b);
                    }
                }
            }
        }

        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_node_breaks_links() {
        let mut graph = Graph::new("test");
        let a = graph.add_node(NodeKind::Knot, "a");
        let b = graph.add_node(NodeKind::Knot, "b");
        let out = graph.add_output(a, "out", PinType::Integer);
        let input = graph.add_input(b, "in", PinType::Integer);
        graph.link_unchecked(out, input);

        assert!(graph.remove_node(a).is_some());
        assert!(graph.node(a).is_none());
        assert!(graph.pin(out).is_none());
        assert!(graph.pin(input).map(|p| p.links.is_empty()).unwrap_or(false));
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn test_absorb_preserves_links_and_rebases_composites() {
        let mut source = Graph::new("source");
        source.subgraphs.push(Graph::new("inner"));
        let a = source.add_node(NodeKind::Composite { subgraph: 0 }, "collapsed");
        let b = source.add_node(NodeKind::Knot, "knot");
        let out = source.add_output(a, "out", PinType::Float);
        let input = source.add_input(b, "in", PinType::Float);
        source.link_unchecked(out, input);

        let mut target = Graph::new("target");
        target.subgraphs.push(Graph::new("existing"));
        let map = target.absorb(&source, false);

        let new_a = map.nodes[&a];
        assert_eq!(
            target.node(new_a).map(|n| n.kind.clone()),
            Some(NodeKind::Composite { subgraph: 1 })
        );
        let new_out = map.pins[&out];
        let new_in = map.pins[&input];
        assert_eq!(target.pin(new_out).map(|p| p.links.clone()), Some(vec![new_in]));
        assert_eq!(target.node(new_a).map(|n| n.guid), source.node(a).map(|n| n.guid));
    }

    #[test]
    fn test_knots_are_transparent() {
        let mut graph = Graph::new("test");
        let event = graph.add_event("BeginPlay");
        let knot = graph.add_knot(PinType::Exec);
        let branch = graph.add_branch();
        let then = graph.find_pin(event, pins::THEN).unwrap();
        graph.link_unchecked(then, graph.find_pin(knot, pins::KNOT_IN).unwrap());
        graph.link_unchecked(
            graph.find_pin(knot, pins::KNOT_OUT).unwrap(),
            graph.find_pin(branch, pins::EXEC).unwrap(),
        );
        assert_eq!(graph.exec_target(then), Some(branch));

        let getter = graph.add_variable_get("Alive", PinType::Boolean);
        let data_knot = graph.add_knot(PinType::Boolean);
        let value = graph.find_pin(getter, pins::VALUE).unwrap();
        let condition = graph.find_pin(branch, pins::CONDITION).unwrap();
        graph.link_unchecked(value, graph.find_pin(data_knot, pins::KNOT_IN).unwrap());
        graph.link_unchecked(graph.find_pin(data_knot, pins::KNOT_OUT).unwrap(), condition);
        assert_eq!(graph.data_source(condition), Some(value));
    }

    #[test]
    fn test_math_op_function_names() {
        assert_eq!(MathOp::Add.function_name(&PinType::Integer), "Add_IntegerInteger");
        assert_eq!(MathOp::Not.function_name(&PinType::Boolean), "Not_PreBool");
        assert!(MathOp::LessEqual.yields_bool());
        assert!(!MathOp::Multiply.yields_bool());
    }
}
