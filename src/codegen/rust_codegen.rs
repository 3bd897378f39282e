//! # Rust Code Generator for Blueprints
//!
//! Renders resolved functions as Rust source. Every function becomes a
//! `pc`/`flow_stack` state machine with one match arm per statement, so the
//! emitted control flow mirrors the bytecode exactly.

use super::Backend;
use crate::context::{CompiledStatement, ContextKind, JumpTarget, StatementKind, Terminal, TerminalId, TerminalKind};
use crate::error::{CompileError, Result};
use crate::graph::{LiteralValue, PinType};
use crate::resolution::ResolvedFunction;

/// Identifiers the generated state machine reserves for itself
const RESERVED: &[&str] = &["this", "pc", "flow_stack", "entry_point"];

const KEYWORDS: &[&str] = &[
    "as", "break", "const", "continue", "crate", "else", "enum", "extern", "false", "fn", "for", "if", "impl", "in",
    "let", "loop", "match", "mod", "move", "mut", "pub", "ref", "return", "self", "Self", "static", "struct",
    "super", "trait", "true", "type", "unsafe", "use", "where", "while", "async", "await", "dyn",
];

/// Blueprint-specific Rust code generator
#[derive(Debug, Default)]
pub struct RustSourceBackend {
    /// Runtime type passed as `this` to every generated function
    instance_type: Option<String>,
}

impl RustSourceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instance_type(mut self, ty: impl Into<String>) -> Self {
        self.instance_type = Some(ty.into());
        self
    }

    fn instance_type(&self) -> &str {
        self.instance_type.as_deref().unwrap_or("BlueprintInstance")
    }

    /// Generate a complete Rust module from a set of resolved functions
    pub fn generate_program(&mut self, functions: &[ResolvedFunction]) -> Result<String> {
        let mut code = String::new();

        // Add header
        code.push_str("// Auto-generated code from Pulsar Blueprint\n");
        code.push_str("// DO NOT EDIT - Changes will be overwritten\n");
        code.push_str("// Compiled with PBBC (Pulsar Blueprint Bytecode Compiler)\n\n");

        code.push_str("// NOTE: Replace with actual pulsar_std import in production\n");
        code.push_str("// use pulsar_std::*;\n\n");

        for function in functions {
            code.push_str(&self.emit(function)?);
            code.push('\n');
        }

        Ok(code)
    }

    fn generate_function(&self, function: &ResolvedFunction) -> Result<String> {
        let mut code = String::new();
        let results: Vec<&Terminal> = function
            .terminals()
            .iter()
            .filter(|t| t.kind == TerminalKind::Result)
            .collect();

        // Signature
        let mut params = vec![format!("this: &mut {}", self.instance_type())];
        let start = match function.kind() {
            ContextKind::Ubergraph => {
                params.push("entry_point: i32".to_string());
                "entry_point as usize".to_string()
            }
            _ => {
                if let Some(entry) = function.entry_points().first() {
                    for (_, id) in &entry.parameters {
                        let term = lookup(function, *id)?;
                        params.push(format!("{}: {}", ident(&term.name), rust_type(&term.ty)));
                    }
                }
                function
                    .entry_points()
                    .first()
                    .map(|e| e.address)
                    .unwrap_or(0)
                    .to_string()
            }
        };
        let return_type = match results.as_slice() {
            [] => String::new(),
            [single] => format!(" -> {}", rust_type(&single.ty)),
            many => format!(
                " -> ({})",
                many.iter().map(|t| rust_type(&t.ty)).collect::<Vec<_>>().join(", ")
            ),
        };
        code.push_str(&format!(
            "pub fn {}({}){} {{\n",
            ident(function.name()),
            params.join(", "),
            return_type
        ));

        // Storage
        for term in function.terminals() {
            if matches!(term.kind, TerminalKind::Local | TerminalKind::Result) {
                code.push_str(&format!(
                    "{}let mut {}: {} = {};\n",
                    indent(1),
                    ident(&term.name),
                    rust_type(&term.ty),
                    get_default_value(&term.ty)
                ));
            }
        }
        code.push_str(&format!("{}let mut flow_stack: Vec<usize> = Vec::new();\n", indent(1)));
        code.push_str(&format!("{}let mut pc: usize = {};\n", indent(1), start));

        // Dispatch loop
        code.push_str(&format!("{}loop {{\n", indent(1)));
        code.push_str(&format!("{}match pc {{\n", indent(2)));
        for (address, statement) in function.statements().iter().enumerate() {
            code.push_str(&format!("{}{} => {{\n", indent(3), address));
            for line in self.generate_statement(function, address, statement, &results)? {
                code.push_str(&format!("{}{}\n", indent(4), line));
            }
            code.push_str(&format!("{}}}\n", indent(3)));
        }
        code.push_str(&format!(
            "{}_ => unreachable!(\"invalid statement address {{}}\", pc),\n",
            indent(3)
        ));
        code.push_str(&format!("{}}}\n", indent(2)));
        code.push_str(&format!("{}}}\n", indent(1)));
        code.push_str("}\n");

        Ok(code)
    }

    fn generate_statement(
        &self,
        function: &ResolvedFunction,
        address: usize,
        statement: &CompiledStatement,
        results: &[&Terminal],
    ) -> Result<Vec<String>> {
        let next = address + 1;
        let epilogue = function.epilogue();
        let read = |index: usize| -> Result<String> {
            let id = statement.inputs.get(index).copied().ok_or_else(|| {
                CompileError::Internal(format!(
                    "statement {} of '{}' is missing input {}",
                    statement.id,
                    function.name(),
                    index
                ))
            })?;
            rvalue(function, id)
        };
        let args = || -> Result<Vec<String>> {
            let mut args = vec!["this".to_string()];
            for id in &statement.inputs {
                args.push(rvalue(function, *id)?);
            }
            Ok(args)
        };
        let store = |expr: String| -> Result<String> {
            Ok(match statement.output {
                Some(id) => format!("{} = {};", lvalue(function, id)?, expr),
                None => format!("{};", expr),
            })
        };

        let lines = match &statement.kind {
            StatementKind::Nop => vec![format!("pc = {};", next)],
            StatementKind::CallFunction { function: callee, .. } => vec![
                store(format!("{}({})", callee, args()?.join(", ")))?,
                format!("pc = {};", next),
            ],
            StatementKind::Assignment => vec![store(read(0)?)?, format!("pc = {};", next)],
            StatementKind::Goto | StatementKind::GotoReturn => {
                vec![format!("pc = {};", target(function, statement)?)]
            }
            StatementKind::GotoIfNot => vec![format!(
                "pc = if {} {{ {} }} else {{ {} }};",
                read(0)?,
                next,
                target(function, statement)?
            )],
            StatementKind::PushState => vec![
                format!("flow_stack.push({});", target(function, statement)?),
                format!("pc = {};", next),
            ],
            StatementKind::EndOfThread => vec![format!("pc = flow_stack.pop().unwrap_or({});", epilogue)],
            StatementKind::EndOfThreadIfNot => vec![format!(
                "pc = if {} {{ {} }} else {{ flow_stack.pop().unwrap_or({}) }};",
                read(0)?,
                next,
                epilogue
            )],
            StatementKind::Return => match results {
                [] => vec!["return;".to_string()],
                [single] => vec![format!("return {};", ident(&single.name))],
                many => vec![format!(
                    "return ({});",
                    many.iter().map(|t| ident(&t.name)).collect::<Vec<_>>().join(", ")
                )],
            },
            StatementKind::DynamicCast { class } => vec![
                store(format!("dynamic_cast({}, {:?})", read(0)?, class))?,
                format!("pc = {};", next),
            ],
            StatementKind::ObjectToBool => vec![store(format!("{}.is_some()", read(0)?))?, format!("pc = {};", next)],
            StatementKind::SpawnObject { class } => {
                let mut spawn_args = args()?;
                spawn_args.insert(1, format!("{:?}", class));
                vec![
                    store(format!("spawn_object({})", spawn_args.join(", ")))?,
                    format!("pc = {};", next),
                ]
            }
            StatementKind::ReplicationCheck => vec![format!(
                "pc = if this.has_authority() {{ {} }} else {{ {} }};",
                next,
                target(function, statement)?
            )],
            StatementKind::ReplicationFlush => vec!["this.flush_replication();".to_string(), format!("pc = {};", next)],
        };
        Ok(lines)
    }
}

impl Backend for RustSourceBackend {
    type Artifact = String;

    fn emit(&mut self, function: &ResolvedFunction) -> Result<String> {
        let code = self.generate_function(function)?;
        tracing::debug!("[PBBC] Generated {} bytes of Rust for '{}'", code.len(), function.name());
        Ok(code)
    }
}

fn lookup(function: &ResolvedFunction, id: TerminalId) -> Result<&Terminal> {
    function
        .terminal(id)
        .ok_or_else(|| CompileError::Internal(format!("terminal {} missing from '{}'", id, function.name())))
}

fn target(function: &ResolvedFunction, statement: &CompiledStatement) -> Result<usize> {
    match statement.jump {
        Some(JumpTarget::Address(address)) => Ok(address),
        other => Err(CompileError::Internal(format!(
            "statement {} of '{}' has unresolved jump {:?}",
            statement.id,
            function.name(),
            other
        ))),
    }
}

/// Expression reading a terminal
fn rvalue(function: &ResolvedFunction, id: TerminalId) -> Result<String> {
    let term = lookup(function, id)?;
    let expr = match &term.kind {
        TerminalKind::Literal(value) => return Ok(literal(value, &term.ty)),
        TerminalKind::VariableReference { member, is_component: true, .. } => {
            return Ok(format!("this.component({:?})", member))
        }
        TerminalKind::VariableReference { member, .. } => format!("this.{}", ident(member)),
        TerminalKind::EventGraphLocal => format!("this.frame.{}", ident(&term.name)),
        TerminalKind::Local | TerminalKind::Parameter | TerminalKind::Result => ident(&term.name),
    };
    if is_copy_type(&rust_type(&term.ty)) {
        Ok(expr)
    } else {
        Ok(format!("{}.clone()", expr))
    }
}

/// Place expression writing a terminal
fn lvalue(function: &ResolvedFunction, id: TerminalId) -> Result<String> {
    let term = lookup(function, id)?;
    match &term.kind {
        TerminalKind::Literal(_) => Err(CompileError::Internal(format!(
            "literal '{}' is written in '{}'",
            term.name,
            function.name()
        ))),
        TerminalKind::VariableReference { member, is_component: true, .. } => {
            Ok(format!("*this.component_mut({:?})", member))
        }
        TerminalKind::VariableReference { member, .. } => Ok(format!("this.{}", ident(member))),
        TerminalKind::EventGraphLocal => Ok(format!("this.frame.{}", ident(&term.name))),
        TerminalKind::Local | TerminalKind::Parameter | TerminalKind::Result => Ok(ident(&term.name)),
    }
}

fn ident(name: &str) -> String {
    if RESERVED.contains(&name) || KEYWORDS.contains(&name) {
        format!("{}_", name)
    } else {
        name.to_string()
    }
}

fn indent(level: usize) -> String {
    "    ".repeat(level)
}

fn rust_type(ty: &PinType) -> String {
    match ty {
        PinType::Exec | PinType::Wildcard => "()".to_string(),
        PinType::Boolean => "bool".to_string(),
        PinType::Byte => "u8".to_string(),
        PinType::Integer => "i32".to_string(),
        PinType::Integer64 => "i64".to_string(),
        PinType::Float => "f32".to_string(),
        PinType::Double => "f64".to_string(),
        PinType::Name | PinType::String => "String".to_string(),
        PinType::Object(_) => "Option<ObjectRef>".to_string(),
        PinType::Struct(name) => name.clone(),
        PinType::Array(inner) => format!("Vec<{}>", rust_type(inner)),
        PinType::Set(inner) => format!("std::collections::HashSet<{}>", rust_type(inner)),
        PinType::Map(key, value) => format!(
            "std::collections::HashMap<{}, {}>",
            rust_type(key),
            rust_type(value)
        ),
    }
}

fn literal(value: &LiteralValue, ty: &PinType) -> String {
    match value {
        LiteralValue::Bool(v) => v.to_string(),
        LiteralValue::Byte(v) => format!("{}u8", v),
        LiteralValue::Int(v) => format!("{}i32", v),
        LiteralValue::Int64(v) => format!("{}i64", v),
        LiteralValue::Float(v) => format!("{:?}f32", v),
        LiteralValue::Double(v) => format!("{:?}f64", v),
        LiteralValue::Name(v) | LiteralValue::String(v) => format!("String::from({:?})", v),
        LiteralValue::Null => "None".to_string(),
        LiteralValue::SelfRef => "this.self_ref()".to_string(),
        LiteralValue::Class(name) => format!("class_of({:?})", name),
        LiteralValue::Empty => get_default_value(ty),
    }
}

/// Check if a type is Copy (read directly) or not (cloned on read)
fn is_copy_type(type_str: &str) -> bool {
    matches!(
        type_str,
        "i32" | "i64" | "u32" | "u64" | "f32" | "f64" | "bool" | "char" |
        "usize" | "isize" | "i8" | "i16" | "u8" | "u16" | "()"
    )
}

/// Get default value for a pin type
fn get_default_value(ty: &PinType) -> String {
    match ty {
        PinType::Exec | PinType::Wildcard => "()".to_string(),
        PinType::Boolean => "false".to_string(),
        PinType::Byte | PinType::Integer | PinType::Integer64 => "0".to_string(),
        PinType::Float | PinType::Double => "0.0".to_string(),
        PinType::Name | PinType::String => "String::new()".to_string(),
        PinType::Object(_) => "None".to_string(),
        _ => "Default::default()".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_graph;
    use crate::graph::{pins, Graph, Schema};

    #[test]
    fn test_function_state_machine() {
        let mut graph = Graph::new("Greet");
        let entry = graph.add_function_entry(&[("times", PinType::Integer)]);
        let print = graph.add_call("PrintString", &[("in_string", PinType::String)], None, false);
        graph.link_unchecked(
            graph.find_pin(entry, pins::THEN).unwrap(),
            graph.find_pin(print, pins::EXEC).unwrap(),
        );
        let function = compile_graph(&graph, &Schema::with_standard_library()).unwrap();

        let code = RustSourceBackend::new().generate_program(&[function]).unwrap();
        assert!(code.starts_with("// Auto-generated code from Pulsar Blueprint\n"));
        assert!(code.contains("pub fn Greet(this: &mut BlueprintInstance, times: i32) {"));
        assert!(code.contains("PrintString(this, String::from(\"\"));"));
        assert!(code.contains("pc = flow_stack.pop().unwrap_or("));
        assert!(code.contains("return;"));
    }

    #[test]
    fn test_branch_renders_conditional_jump() {
        let mut graph = Graph::new("Check");
        let entry = graph.add_function_entry(&[("flag", PinType::Boolean)]);
        let branch = graph.add_branch();
        graph.link_unchecked(
            graph.find_pin(entry, pins::THEN).unwrap(),
            graph.find_pin(branch, pins::EXEC).unwrap(),
        );
        graph.link_unchecked(
            graph.find_pin(entry, "flag").unwrap(),
            graph.find_pin(branch, pins::CONDITION).unwrap(),
        );
        let function = compile_graph(&graph, &Schema::with_standard_library()).unwrap();

        let code = RustSourceBackend::new()
            .with_instance_type("Hero")
            .emit(&function)
            .unwrap();
        assert!(code.contains("pub fn Check(this: &mut Hero, flag: bool) {"));
        assert!(code.contains("pc = if flag { 1 } else { flow_stack.pop().unwrap_or("));
    }

    #[test]
    fn test_identifiers_avoid_keywords() {
        assert_eq!(ident("type"), "type_");
        assert_eq!(ident("pc"), "pc_");
        assert_eq!(ident("Health"), "Health");
    }
}
