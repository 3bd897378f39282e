//! # Compiler Errors
//!
//! Every failure the pipeline can raise, classified into the structural /
//! reference / flow / configuration taxonomy the diagnostics sink reports.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::{NodeId, PinDirection, PinId, PinType};

/// Error category used for diagnostics and propagation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Pin/type/graph shape problems; accumulated
    Structural,
    /// Missing members, functions, pins or macros; accumulated
    Reference,
    /// Jump resolution failures; fatal for the containing context
    Flow,
    /// Invalid options or flag combinations; fatal for the whole request
    Configuration,
    Internal,
}

/// Connection legality failures raised by the schema
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("Incompatible types: {from} ({from_type}) cannot connect to {to} ({to_type})")]
    IncompatibleTypes {
        from: PinId,
        to: PinId,
        from_type: PinType,
        to_type: PinType,
    },

    #[error("Direction mismatch: {a} and {b} are both {direction:?} pins")]
    DirectionMismatch {
        a: PinId,
        b: PinId,
        direction: PinDirection,
    },

    #[error("Cannot connect execution pin {exec} to data pin {data}")]
    ExecDataMixed { exec: PinId, data: PinId },

    #[error("Ambiguous wildcard: {pin} on {node} infers both {first} and {second}")]
    AmbiguousWildcard {
        pin: PinId,
        node: NodeId,
        first: PinType,
        second: PinType,
    },

    #[error("Pin not found: {0}")]
    UnknownPin(PinId),
}

impl ConnectionError {
    /// The pin a diagnostic should point at
    pub fn primary_pin(&self) -> PinId {
        match self {
            ConnectionError::IncompatibleTypes { to, .. } => *to,
            ConnectionError::DirectionMismatch { a, .. } => *a,
            ConnectionError::ExecDataMixed { data, .. } => *data,
            ConnectionError::AmbiguousWildcard { pin, .. } => *pin,
            ConnectionError::UnknownPin(pin) => *pin,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Unknown member '{member}' on class '{class}' referenced by {node}")]
    UnknownMember {
        node: NodeId,
        class: String,
        member: String,
    },

    #[error("Unresolved function reference '{function}' in {node}")]
    UnresolvedFunctionReference { node: NodeId, function: String },

    #[error("Unknown class '{class}' referenced by {node}")]
    UnknownClass { node: NodeId, class: String },

    #[error("Required pin '{pin}' on {node} has neither a connection nor a default value")]
    MissingRequiredPin { node: NodeId, pin: String },

    #[error("Macro '{name}' used by {node} could not be found")]
    UnresolvedMacro { node: NodeId, name: String },

    #[error("Expansion of {node} exceeded the maximum depth of {depth}")]
    ExpansionDepthExceeded { node: NodeId, depth: usize },

    #[error("Pure node {node} depends on its own output")]
    CyclicPureDependency { node: NodeId },

    #[error("Const function writes to member '{member}' in {node}")]
    ConstViolation { node: NodeId, member: String },

    #[error("{node} cannot be compiled because upstream {upstream} failed")]
    UpstreamFailed { node: NodeId, upstream: NodeId },

    #[error("Function '{function}' has no entry point")]
    MissingEntryPoint { function: String },

    #[error("Jump in {node} targets {target}, which generated no statements")]
    UnreachableTarget { node: NodeId, target: NodeId },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Internal compiler error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for CompileError {
    fn from(error: serde_json::Error) -> Self {
        CompileError::Serialization(error.to_string())
    }
}

impl CompileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompileError::Connection(_)
            | CompileError::ExpansionDepthExceeded { .. }
            | CompileError::CyclicPureDependency { .. }
            | CompileError::MissingEntryPoint { .. } => ErrorKind::Structural,
            CompileError::UnknownMember { .. }
            | CompileError::UnresolvedFunctionReference { .. }
            | CompileError::UnknownClass { .. }
            | CompileError::MissingRequiredPin { .. }
            | CompileError::UnresolvedMacro { .. }
            | CompileError::ConstViolation { .. }
            | CompileError::UpstreamFailed { .. } => ErrorKind::Reference,
            CompileError::UnreachableTarget { .. } => ErrorKind::Flow,
            CompileError::InvalidConfiguration(_) | CompileError::Serialization(_) => ErrorKind::Configuration,
            CompileError::NodeNotFound(_) | CompileError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Originating node, when the error is attributable to one
    pub fn node(&self) -> Option<NodeId> {
        match self {
            CompileError::Connection(ConnectionError::AmbiguousWildcard { node, .. }) => Some(*node),
            CompileError::UnknownMember { node, .. }
            | CompileError::UnresolvedFunctionReference { node, .. }
            | CompileError::UnknownClass { node, .. }
            | CompileError::MissingRequiredPin { node, .. }
            | CompileError::UnresolvedMacro { node, .. }
            | CompileError::ExpansionDepthExceeded { node, .. }
            | CompileError::CyclicPureDependency { node }
            | CompileError::ConstViolation { node, .. }
            | CompileError::UpstreamFailed { node, .. }
            | CompileError::UnreachableTarget { node, .. } => Some(*node),
            CompileError::NodeNotFound(node) => Some(*node),
            _ => None,
        }
    }

    /// Whether the whole compilation request must stop
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }
}

pub type Result<T> = std::result::Result<T, CompileError>;
