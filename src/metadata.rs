//! # Node Kind Metadata
//!
//! Static descriptors for every node kind: what the compiler needs to know
//! about a kind before dispatching it to a handler.

use serde::{Deserialize, Serialize};

/// Fieldless mirror of [`crate::graph::NodeKind`], used as the handler table key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKindTag {
    FunctionEntry,
    FunctionResult,
    Event,
    CustomEvent,
    CallFunction,
    VariableGet,
    VariableSet,
    Branch,
    Sequence,
    ForLoop,
    WhileLoop,
    Cast,
    Spawn,
    MathExpression,
    MacroInstance,
    Composite,
    Tunnel,
    Knot,
    SelfRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindDescriptor {
    pub tag: NodeKindTag,
    pub name: &'static str,
    /// Nets must be registered before ordinary nodes (entry/result nodes)
    pub registers_nets_early: bool,
    /// Replaced by the body graph it instantiates before lowering
    pub expands_from_body: bool,
    /// Execution starts at nodes of this kind
    pub is_entry_point: bool,
}

const fn descriptor(
    tag: NodeKindTag,
    name: &'static str,
    registers_nets_early: bool,
    expands_from_body: bool,
    is_entry_point: bool,
) -> KindDescriptor {
    KindDescriptor {
        tag,
        name,
        registers_nets_early,
        expands_from_body,
        is_entry_point,
    }
}

static DESCRIPTORS: [KindDescriptor; 19] = [
    descriptor(NodeKindTag::FunctionEntry, "function_entry", true, false, true),
    descriptor(NodeKindTag::FunctionResult, "function_result", true, false, false),
    descriptor(NodeKindTag::Event, "event", true, false, true),
    descriptor(NodeKindTag::CustomEvent, "custom_event", true, false, true),
    descriptor(NodeKindTag::CallFunction, "call_function", false, false, false),
    descriptor(NodeKindTag::VariableGet, "variable_get", false, false, false),
    descriptor(NodeKindTag::VariableSet, "variable_set", false, false, false),
    descriptor(NodeKindTag::Branch, "branch", false, false, false),
    descriptor(NodeKindTag::Sequence, "sequence", false, false, false),
    descriptor(NodeKindTag::ForLoop, "for_loop", false, false, false),
    descriptor(NodeKindTag::WhileLoop, "while_loop", false, false, false),
    descriptor(NodeKindTag::Cast, "cast", false, false, false),
    descriptor(NodeKindTag::Spawn, "spawn", false, false, false),
    descriptor(NodeKindTag::MathExpression, "math_expression", false, false, false),
    descriptor(NodeKindTag::MacroInstance, "macro_instance", false, true, false),
    descriptor(NodeKindTag::Composite, "composite", false, true, false),
    descriptor(NodeKindTag::Tunnel, "tunnel", false, false, false),
    descriptor(NodeKindTag::Knot, "knot", false, false, false),
    descriptor(NodeKindTag::SelfRef, "self", false, false, false),
];

/// All node kind descriptors
pub fn get_node_metadata() -> &'static [KindDescriptor] {
    &DESCRIPTORS
}

/// Descriptor for one node kind
pub fn node_metadata(tag: NodeKindTag) -> &'static KindDescriptor {
    // The table is declared in tag order
    &DESCRIPTORS[tag as usize]
}
