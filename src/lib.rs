//! # Pulsar Blueprint Bytecode Compiler (PBBC)
//!
//! Compiler back half for Pulsar Blueprint visual scripts. It takes validated
//! node graphs (functions, event graphs, macros) and lowers them into
//! linear statement lists with resolved jump addresses, ready for the
//! bytecode or Rust source backends.
//!
//! PBBC provides:
//! - A typed node graph with wildcard pins, knots and macro tunnels
//! - Macro and composite expansion before lowering
//! - Per-function compilation contexts compiled in parallel
//! - Event graph merging into a single ubergraph with per-event stubs
//! - Diagnostics that let independent functions fail in isolation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pbbc::{compile_graph, pins, Backend, BytecodeBackend, Graph, PinType, Schema};
//!
//! let mut graph = Graph::new("Greet");
//! let entry = graph.add_function_entry(&[]);
//! let print = graph.add_call("PrintString", &[("in_string", PinType::String)], None, false);
//! let then = graph.find_pin(entry, pins::THEN).unwrap();
//! let exec = graph.find_pin(print, pins::EXEC).unwrap();
//! graph.link_unchecked(then, exec);
//!
//! match compile_graph(&graph, &Schema::with_standard_library()) {
//!     Ok(function) => {
//!         let bytes = BytecodeBackend::new().emit(&function)?;
//!         std::fs::write("greet.pbbc", bytes)?;
//!     }
//!     Err(e) => eprintln!("Compilation failed: {}", e),
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! PBBC follows a multi-phase compilation pipeline:
//!
//! 1. **Expansion** - Splice macro instances and composites, infer wildcards
//! 2. **Reachability** - Walk from entry points, prune isolated nodes
//! 3. **Net Registration** - Bind every data net to a terminal
//! 4. **Lowering** - Node handlers emit statements with symbolic jumps
//! 5. **Resolution** - Link gotos, linearize, assign addresses, peephole
//! 6. **Emission** - Backends consume resolved functions

pub mod codegen;
pub mod compiler;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod expansion;
pub mod graph;
pub mod lowering;
pub mod metadata;
pub mod nets;
pub mod resolution;

// Re-export the main compilation API
pub use compiler::{
    compile_blueprint,
    compile_graph,
    compile_graph_with_options,
    Blueprint,
    CompiledBlueprint,
    FunctionGraph,
};

pub use config::{CompileOptions, ContextFlags};

pub use graph::{
    pins, ClassInfo, FunctionSignature, Graph, LiteralValue, MathOp, MemberInfo, Node, NodeId, NodeKind, Pin,
    PinDirection, PinId, PinType, Schema, TunnelBoundary,
};

pub use error::{CompileError, ConnectionError, ErrorKind, Result};
pub use diagnostics::{Diagnostic, DiagnosticSink, Severity};

pub use context::{
    CompiledStatement, ContextKind, ContextState, FunctionContext, JumpTarget, StatementId, StatementKind, Terminal,
    TerminalId, TerminalKind,
};
pub use resolution::{EntryPoint, ResolvedFunction};

pub use codegen::{Backend, BytecodeBackend, RustSourceBackend};
pub use lowering::{HandlerRegistry, NodeHandler};
pub use metadata::{get_node_metadata, node_metadata, KindDescriptor, NodeKindTag};
