//! # Bytecode Backend
//!
//! Little-endian binary encoding of a resolved function.
//!
//! ```text
//! "PBBC" u16:version
//! str:name u8:kind
//! u32:terminal_count  { u8:kind str:name str:type [literal] }*
//! u32:entry_count     { str:name u32:address }*
//! u32:epilogue
//! u32:statement_count { u8:opcode [operand] u8:input_count u32:input* u32:output u32:jump }*
//! ```
//!
//! Strings are a `u32` byte length followed by UTF-8. Absent outputs and
//! jumps are written as `u32::MAX`.

use super::Backend;
use crate::context::{ContextKind, JumpTarget, StatementKind, TerminalKind};
use crate::error::{CompileError, Result};
use crate::graph::LiteralValue;
use crate::resolution::ResolvedFunction;

pub const MAGIC: &[u8; 4] = b"PBBC";
pub const VERSION: u16 = 1;
pub const NONE: u32 = u32::MAX;

pub mod opcodes {
    pub const NOP: u8 = 0x00;
    pub const CALL: u8 = 0x01;
    pub const CALL_PURE: u8 = 0x02;
    pub const ASSIGN: u8 = 0x03;
    pub const GOTO: u8 = 0x10;
    pub const GOTO_IF_NOT: u8 = 0x11;
    pub const GOTO_RETURN: u8 = 0x12;
    pub const PUSH_STATE: u8 = 0x13;
    pub const END_OF_THREAD: u8 = 0x14;
    pub const END_OF_THREAD_IF_NOT: u8 = 0x15;
    pub const RETURN: u8 = 0x16;
    pub const DYNAMIC_CAST: u8 = 0x20;
    pub const OBJECT_TO_BOOL: u8 = 0x21;
    pub const SPAWN_OBJECT: u8 = 0x22;
    pub const REPLICATION_CHECK: u8 = 0x30;
    pub const REPLICATION_FLUSH: u8 = 0x31;
}

/// Emits one self-contained byte buffer per function
#[derive(Debug, Default)]
pub struct BytecodeBackend {
    emitted: usize,
}

impl BytecodeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of functions emitted so far
    pub fn emitted(&self) -> usize {
        self.emitted
    }
}

impl Backend for BytecodeBackend {
    type Artifact = Vec<u8>;

    fn emit(&mut self, function: &ResolvedFunction) -> Result<Vec<u8>> {
        let mut writer = Writer::default();
        writer.bytes(MAGIC);
        writer.u16(VERSION);
        writer.str(function.name());
        writer.u8(match function.kind() {
            ContextKind::Function => 0,
            ContextKind::Ubergraph => 1,
            ContextKind::EventStub => 2,
        });

        writer.u32(narrow(function.terminals().len(), "terminal count")?);
        for terminal in function.terminals() {
            match &terminal.kind {
                TerminalKind::Local => writer.u8(0),
                TerminalKind::Parameter => writer.u8(1),
                TerminalKind::Result => writer.u8(2),
                TerminalKind::Literal(_) => writer.u8(3),
                TerminalKind::VariableReference { is_component: false, .. } => writer.u8(4),
                TerminalKind::VariableReference { is_component: true, .. } => writer.u8(5),
                TerminalKind::EventGraphLocal => writer.u8(6),
            }
            writer.str(&terminal.name);
            writer.str(&terminal.ty.to_string());
            if let TerminalKind::Literal(value) = &terminal.kind {
                writer.literal(value);
            }
        }

        writer.u32(narrow(function.entry_points().len(), "entry point count")?);
        for entry in function.entry_points() {
            writer.str(&entry.name);
            writer.u32(narrow(entry.address, "entry address")?);
        }
        writer.u32(narrow(function.epilogue(), "epilogue address")?);

        writer.u32(narrow(function.statements().len(), "statement count")?);
        for statement in function.statements() {
            match &statement.kind {
                StatementKind::Nop => writer.u8(opcodes::NOP),
                StatementKind::CallFunction { function, pure } => {
                    writer.u8(if *pure { opcodes::CALL_PURE } else { opcodes::CALL });
                    writer.str(function);
                }
                StatementKind::Assignment => writer.u8(opcodes::ASSIGN),
                StatementKind::Goto => writer.u8(opcodes::GOTO),
                StatementKind::GotoIfNot => writer.u8(opcodes::GOTO_IF_NOT),
                StatementKind::GotoReturn => writer.u8(opcodes::GOTO_RETURN),
                StatementKind::PushState => writer.u8(opcodes::PUSH_STATE),
                StatementKind::EndOfThread => writer.u8(opcodes::END_OF_THREAD),
                StatementKind::EndOfThreadIfNot => writer.u8(opcodes::END_OF_THREAD_IF_NOT),
                StatementKind::Return => writer.u8(opcodes::RETURN),
                StatementKind::DynamicCast { class } => {
                    writer.u8(opcodes::DYNAMIC_CAST);
                    writer.str(class);
                }
                StatementKind::ObjectToBool => writer.u8(opcodes::OBJECT_TO_BOOL),
                StatementKind::SpawnObject { class } => {
                    writer.u8(opcodes::SPAWN_OBJECT);
                    writer.str(class);
                }
                StatementKind::ReplicationCheck => writer.u8(opcodes::REPLICATION_CHECK),
                StatementKind::ReplicationFlush => writer.u8(opcodes::REPLICATION_FLUSH),
            }

            writer.u8(narrow(statement.inputs.len(), "input count")?);
            for input in &statement.inputs {
                writer.u32(input.0);
            }
            writer.u32(statement.output.map(|t| t.0).unwrap_or(NONE));
            let jump = match statement.jump {
                None => NONE,
                Some(JumpTarget::Address(address)) => narrow(address, "jump address")?,
                Some(other) => {
                    return Err(CompileError::Internal(format!(
                        "statement {} of '{}' has unresolved jump {:?}",
                        statement.id,
                        function.name(),
                        other
                    )))
                }
            };
            writer.u32(jump);
        }

        self.emitted += 1;
        tracing::debug!("[PBBC] Emitted {} bytes of bytecode for '{}'", writer.buf.len(), function.name());
        Ok(writer.buf)
    }
}

/// Narrow a count or address to its encoded width
fn narrow<T: TryFrom<usize>>(value: usize, what: &str) -> Result<T> {
    T::try_from(value)
        .map_err(|_| CompileError::Internal(format!("{} {} does not fit the bytecode encoding", what, value)))
}

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn u16(&mut self, value: u16) {
        self.bytes(&value.to_le_bytes());
    }

    fn u32(&mut self, value: u32) {
        self.bytes(&value.to_le_bytes());
    }

    fn str(&mut self, value: &str) {
        self.u32(value.len() as u32);
        self.bytes(value.as_bytes());
    }

    fn literal(&mut self, value: &LiteralValue) {
        match value {
            LiteralValue::Bool(v) => {
                self.u8(0);
                self.u8(*v as u8);
            }
            LiteralValue::Byte(v) => {
                self.u8(1);
                self.u8(*v);
            }
            LiteralValue::Int(v) => {
                self.u8(2);
                self.bytes(&v.to_le_bytes());
            }
            LiteralValue::Int64(v) => {
                self.u8(3);
                self.bytes(&v.to_le_bytes());
            }
            LiteralValue::Float(v) => {
                self.u8(4);
                self.bytes(&v.to_le_bytes());
            }
            LiteralValue::Double(v) => {
                self.u8(5);
                self.bytes(&v.to_le_bytes());
            }
            LiteralValue::Name(v) => {
                self.u8(6);
                self.str(v);
            }
            LiteralValue::String(v) => {
                self.u8(7);
                self.str(v);
            }
            LiteralValue::Null => self.u8(8),
            LiteralValue::SelfRef => self.u8(9),
            LiteralValue::Class(v) => {
                self.u8(10);
                self.str(v);
            }
            LiteralValue::Empty => self.u8(11),
        }
    }
}
