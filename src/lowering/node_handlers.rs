//! # Node-Specific Handlers
//!
//! Statement generation for each built-in node kind.

use super::NodeHandler;
use crate::context::{FunctionContext, JumpTarget, StatementKind};
use crate::error::{CompileError, Result};
use crate::graph::{pins, LiteralValue, NodeId, NodeKind, PinType};

/// Function entry and event nodes
pub struct EntryHandler;

impl NodeHandler for EntryHandler {
    fn compile(&self, ctx: &mut FunctionContext<'_>, node: NodeId) -> Result<()> {
        if ctx.flags.networked {
            ctx.jump(node, StatementKind::ReplicationCheck, Vec::new(), JumpTarget::Epilogue)?;
        }
        ctx.generate_then_goto(node)
    }
}

pub struct FunctionResultHandler;

impl NodeHandler for FunctionResultHandler {
    fn compile(&self, ctx: &mut FunctionContext<'_>, node: NodeId) -> Result<()> {
        let graph = ctx.graph;
        for pin in graph.data_inputs(node) {
            let Some(name) = graph.pin(pin).map(|p| p.name.clone()) else { continue };
            let value = ctx.input_term(node, &name)?;
            let slot = ctx
                .result_term(pin)
                .ok_or_else(|| CompileError::Internal(format!("result '{}' of {} has no slot", name, node)))?;
            ctx.assign(node, slot, value)?;
        }
        ctx.jump(node, StatementKind::GotoReturn, Vec::new(), JumpTarget::Epilogue)?;
        Ok(())
    }
}

pub struct CallFunctionHandler;

impl NodeHandler for CallFunctionHandler {
    fn compile(&self, ctx: &mut FunctionContext<'_>, node: NodeId) -> Result<()> {
        let graph = ctx.graph;
        let schema = ctx.schema;
        let NodeKind::CallFunction { function, target_class } = &ctx.node(node)?.kind else {
            return Err(CompileError::Internal(format!("{} is not a function call", node)));
        };

        let class = ctx.scope_class(target_class.as_deref());
        let signature = schema.find_function(class.as_deref(), function).ok_or_else(|| {
            CompileError::UnresolvedFunctionReference {
                node,
                function: function.clone(),
            }
        })?;

        let pure = graph.is_pure(node);
        if ctx.flags.const_enforcement
            && !signature.is_pure
            && !signature.is_const
            && !schema.is_library_function(function)
        {
            return Err(CompileError::ConstViolation {
                node,
                member: function.clone(),
            });
        }

        let mut inputs = Vec::new();
        for pin in graph.data_inputs(node) {
            let Some(name) = graph.pin(pin).map(|p| p.name.clone()) else { continue };
            inputs.push(ctx.input_term(node, &name)?);
        }
        let output = match graph.find_pin(node, pins::RETURN_VALUE) {
            Some(_) => Some(ctx.output_term(node, pins::RETURN_VALUE)?),
            None => None,
        };

        let kind = StatementKind::CallFunction {
            function: function.clone(),
            pure,
        };
        ctx.emit(node, kind, inputs, output)?;

        if !pure {
            ctx.generate_then_goto(node)?;
        }
        Ok(())
    }
}

pub struct VariableSetHandler;

impl NodeHandler for VariableSetHandler {
    fn compile(&self, ctx: &mut FunctionContext<'_>, node: NodeId) -> Result<()> {
        let value = ctx.input_term(node, pins::VALUE)?;
        let member = ctx.output_term(node, &format!("{}_out", pins::VALUE))?;
        ctx.assign(node, member, value)?;
        ctx.generate_then_goto(node)
    }
}

/// Nodes whose value is fully described by their terminals
/// (variable getters, `self` and reroute knots)
pub struct PassiveHandler;

impl NodeHandler for PassiveHandler {
    fn compile(&self, _ctx: &mut FunctionContext<'_>, _node: NodeId) -> Result<()> {
        Ok(())
    }
}

pub struct BranchHandler;

impl NodeHandler for BranchHandler {
    fn compile(&self, ctx: &mut FunctionContext<'_>, node: NodeId) -> Result<()> {
        let condition = ctx.input_term(node, pins::CONDITION)?;
        ctx.goto_pin(node, pins::ELSE, StatementKind::GotoIfNot, vec![condition])?;
        ctx.goto_pin(node, pins::THEN, StatementKind::Goto, Vec::new())?;
        Ok(())
    }
}

/// Runs each arm to completion before the next: arms after the first are
/// pushed onto the flow stack in reverse
pub struct SequenceHandler;

impl NodeHandler for SequenceHandler {
    fn compile(&self, ctx: &mut FunctionContext<'_>, node: NodeId) -> Result<()> {
        let graph = ctx.graph;
        let arms: Vec<String> = graph
            .exec_outputs(node)
            .into_iter()
            .filter_map(|pin| graph.pin(pin).map(|p| p.name.clone()))
            .collect();

        let Some((first, rest)) = arms.split_first() else {
            ctx.emit(node, StatementKind::EndOfThread, Vec::new(), None)?;
            return Ok(());
        };
        for arm in rest.iter().rev() {
            ctx.goto_pin(node, arm, StatementKind::PushState, Vec::new())?;
        }
        ctx.goto_pin(node, first, StatementKind::Goto, Vec::new())?;
        Ok(())
    }
}

/// ```text
///         index = first
/// head:   cond = index <= last
///         if !cond goto exit
///         push inc
///         goto loop_body
/// inc:    index = index + 1
///         goto head
/// exit:   goto completed
/// ```
pub struct ForLoopHandler;

impl NodeHandler for ForLoopHandler {
    fn compile(&self, ctx: &mut FunctionContext<'_>, node: NodeId) -> Result<()> {
        let first = ctx.input_term(node, pins::FIRST)?;
        let index = ctx.output_term(node, pins::INDEX)?;
        ctx.assign(node, index, first)?;

        let head = ctx.peek_statement_id();
        let last = ctx.input_term(node, pins::LAST)?;
        let title = ctx.node(node)?.title.clone();
        let condition = ctx.create_local(&format!("{}_condition", title), PinType::Boolean);
        let less_equal = StatementKind::CallFunction {
            function: crate::graph::MathOp::LessEqual.function_name(&PinType::Integer),
            pure: true,
        };
        ctx.emit(node, less_equal, vec![index, last], Some(condition))?;
        let exit_jump = ctx.jump(node, StatementKind::GotoIfNot, vec![condition], JumpTarget::Epilogue)?;
        let push = ctx.jump(node, StatementKind::PushState, Vec::new(), JumpTarget::Epilogue)?;
        ctx.goto_pin(node, pins::LOOP_BODY, StatementKind::Goto, Vec::new())?;

        let increment = ctx.peek_statement_id();
        let one = ctx.create_literal(&format!("{}_step", title), PinType::Integer, LiteralValue::Int(1));
        let add = StatementKind::CallFunction {
            function: crate::graph::MathOp::Add.function_name(&PinType::Integer),
            pure: true,
        };
        ctx.emit(node, add, vec![index, one], Some(index))?;
        ctx.jump(node, StatementKind::Goto, Vec::new(), JumpTarget::Statement(head))?;

        let exit = ctx.peek_statement_id();
        ctx.goto_pin(node, pins::COMPLETED, StatementKind::Goto, Vec::new())?;

        ctx.set_jump(exit_jump, JumpTarget::Statement(exit))?;
        ctx.set_jump(push, JumpTarget::Statement(increment))?;
        Ok(())
    }
}

/// The condition is re-evaluated at the loop head on every iteration
pub struct WhileLoopHandler;

impl NodeHandler for WhileLoopHandler {
    fn compile(&self, ctx: &mut FunctionContext<'_>, node: NodeId) -> Result<()> {
        let head = ctx.peek_statement_id();
        let condition = ctx.input_term(node, pins::CONDITION)?;
        let exit_jump = ctx.jump(node, StatementKind::GotoIfNot, vec![condition], JumpTarget::Epilogue)?;
        ctx.jump(node, StatementKind::PushState, Vec::new(), JumpTarget::Statement(head))?;
        ctx.goto_pin(node, pins::LOOP_BODY, StatementKind::Goto, Vec::new())?;

        let exit = ctx.peek_statement_id();
        ctx.goto_pin(node, pins::COMPLETED, StatementKind::Goto, Vec::new())?;
        ctx.set_jump(exit_jump, JumpTarget::Statement(exit))
    }
}

pub struct CastHandler;

impl NodeHandler for CastHandler {
    fn compile(&self, ctx: &mut FunctionContext<'_>, node: NodeId) -> Result<()> {
        let NodeKind::Cast { target_class } = &ctx.node(node)?.kind else {
            return Err(CompileError::Internal(format!("{} is not a cast", node)));
        };
        if ctx.schema.class(target_class).is_none() {
            return Err(CompileError::UnknownClass {
                node,
                class: target_class.clone(),
            });
        }

        let object = ctx.input_term(node, pins::OBJECT)?;
        let result = ctx.output_term(node, pins::CAST_RESULT)?;
        let success = ctx.output_term(node, pins::SUCCESS)?;
        let cast = StatementKind::DynamicCast {
            class: target_class.clone(),
        };
        ctx.emit(node, cast, vec![object], Some(result))?;
        ctx.emit(node, StatementKind::ObjectToBool, vec![result], Some(success))?;
        ctx.goto_pin(node, pins::CAST_FAILED, StatementKind::GotoIfNot, vec![success])?;
        ctx.generate_then_goto(node)
    }
}

pub struct SpawnHandler;

impl NodeHandler for SpawnHandler {
    fn compile(&self, ctx: &mut FunctionContext<'_>, node: NodeId) -> Result<()> {
        let NodeKind::Spawn { class } = &ctx.node(node)?.kind else {
            return Err(CompileError::Internal(format!("{} is not a spawn", node)));
        };
        if ctx.schema.class(class).is_none() {
            return Err(CompileError::UnknownClass {
                node,
                class: class.clone(),
            });
        }
        let spawned = ctx.output_term(node, pins::SPAWNED)?;
        let spawn = StatementKind::SpawnObject { class: class.clone() };
        ctx.emit(node, spawn, Vec::new(), Some(spawned))?;
        ctx.generate_then_goto(node)
    }
}

/// Lowered as a pure call to the operator's library intrinsic
pub struct MathExpressionHandler;

impl NodeHandler for MathExpressionHandler {
    fn compile(&self, ctx: &mut FunctionContext<'_>, node: NodeId) -> Result<()> {
        let graph = ctx.graph;
        let NodeKind::MathExpression { op } = ctx.node(node)?.kind else {
            return Err(CompileError::Internal(format!("{} is not a math expression", node)));
        };
        let operand = ctx.pin_named(node, pins::A)?;
        let operand_type = graph
            .pin(operand)
            .map(|p| p.pin_type.clone())
            .unwrap_or(PinType::Wildcard);

        let mut inputs = vec![ctx.input_term(node, pins::A)?];
        if !op.is_unary() {
            inputs.push(ctx.input_term(node, pins::B)?);
        }
        let result = ctx.output_term(node, pins::RESULT)?;
        let call = StatementKind::CallFunction {
            function: op.function_name(&operand_type),
            pure: true,
        };
        ctx.emit(node, call, inputs, Some(result))?;
        Ok(())
    }
}

/// Macro instances, composites and tunnels are spliced away before lowering
pub struct UnexpandedHandler;

impl NodeHandler for UnexpandedHandler {
    fn compile(&self, ctx: &mut FunctionContext<'_>, node: NodeId) -> Result<()> {
        let title = ctx.node(node)?.title.clone();
        Err(CompileError::Internal(format!(
            "'{}' ({}) reached lowering without being expanded",
            title, node
        )))
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ContextFlags;
    use crate::context::{ContextKind, FunctionContext, StatementKind};
    use crate::diagnostics::DiagnosticSink;
    use crate::graph::{pins, ClassInfo, Graph, MathOp, PinType, Schema};
    use crate::lowering::{run_lowering, run_net_registration, HandlerRegistry};

    fn lower<'a>(graph: &'a Graph, schema: &'a Schema, handlers: &'a HandlerRegistry) -> FunctionContext<'a> {
        let mut ctx = FunctionContext::new(
            "Test",
            ContextKind::Function,
            ContextFlags::default(),
            graph,
            schema,
            handlers,
            DiagnosticSink::new(),
        )
        .with_class(Some("Pawn".to_string()));
        ctx.compute_reachability(false).unwrap();
        run_net_registration(&mut ctx);
        run_lowering(&mut ctx);
        ctx
    }

    fn kinds(ctx: &FunctionContext<'_>, node: crate::graph::NodeId) -> Vec<StatementKind> {
        ctx.statements_for(node).iter().map(|s| s.kind.clone()).collect()
    }

    fn schema() -> Schema {
        let mut schema = Schema::with_standard_library();
        schema.add_class(ClassInfo::new("Pawn").with_parent("Actor").member("Health", PinType::Float));
        schema
    }

    #[test]
    fn test_sequence_pushes_later_arms_in_reverse() {
        let mut graph = Graph::new("test");
        let entry = graph.add_function_entry(&[]);
        let sequence = graph.add_sequence(3);
        graph.link_unchecked(
            graph.find_pin(entry, pins::THEN).unwrap(),
            graph.find_pin(sequence, pins::EXEC).unwrap(),
        );
        let mut calls = Vec::new();
        for arm in 0..3 {
            let call = graph.add_call("PrintString", &[("in_string", PinType::String)], None, false);
            graph.link_unchecked(
                graph.find_pin(sequence, &pins::sequence_arm(arm)).unwrap(),
                graph.find_pin(call, pins::EXEC).unwrap(),
            );
            calls.push(call);
        }

        let schema = schema();
        let handlers = HandlerRegistry::standard();
        let ctx = lower(&graph, &schema, &handlers);
        assert!(ctx.errors().is_empty());

        let statements = ctx.statements_for(sequence);
        assert_eq!(statements.len(), 3);
        assert_eq!(statements[0].jump, Some(crate::context::JumpTarget::Node(calls[2])));
        assert_eq!(statements[1].jump, Some(crate::context::JumpTarget::Node(calls[1])));
        assert_eq!(statements[2].kind, StatementKind::Goto);
        assert_eq!(statements[2].jump, Some(crate::context::JumpTarget::Node(calls[0])));
        assert_eq!(kinds(&ctx, calls[0]).last(), Some(&StatementKind::EndOfThread));
    }

    #[test]
    fn test_pure_nodes_lowered_per_use() {
        let mut graph = Graph::new("test");
        let entry = graph.add_function_entry(&[("x", PinType::Integer)]);
        let add = graph.add_math(MathOp::Add, PinType::Integer);
        let first = graph.add_call("RandomInteger", &[("max", PinType::Integer)], Some(PinType::Integer), false);
        let second = graph.add_call("RandomInteger", &[("max", PinType::Integer)], Some(PinType::Integer), false);
        graph.link_unchecked(
            graph.find_pin(entry, pins::THEN).unwrap(),
            graph.find_pin(first, pins::EXEC).unwrap(),
        );
        graph.link_unchecked(
            graph.find_pin(first, pins::THEN).unwrap(),
            graph.find_pin(second, pins::EXEC).unwrap(),
        );
        let x = graph.find_pin(entry, "x").unwrap();
        graph.link_unchecked(x, graph.find_pin(add, pins::A).unwrap());
        graph.link_unchecked(x, graph.find_pin(add, pins::B).unwrap());
        let sum = graph.find_pin(add, pins::RESULT).unwrap();
        graph.link_unchecked(sum, graph.find_pin(first, "max").unwrap());
        graph.link_unchecked(sum, graph.find_pin(second, "max").unwrap());

        let schema = schema();
        let handlers = HandlerRegistry::standard();
        let ctx = lower(&graph, &schema, &handlers);
        assert!(ctx.errors().is_empty());

        let add_call = StatementKind::CallFunction {
            function: "Add_IntegerInteger".to_string(),
            pure: true,
        };
        for call in [first, second] {
            let statements = kinds(&ctx, call);
            assert_eq!(statements[0], add_call);
            assert!(matches!(statements[1], StatementKind::CallFunction { pure: false, .. }));
        }
        assert!(ctx.statements_for(add).is_empty());
    }

    #[test]
    fn test_unresolved_function_reference() {
        let mut graph = Graph::new("test");
        let entry = graph.add_function_entry(&[]);
        let call = graph.add_call("Explode", &[], None, false);
        graph.link_unchecked(
            graph.find_pin(entry, pins::THEN).unwrap(),
            graph.find_pin(call, pins::EXEC).unwrap(),
        );

        let schema = schema();
        let handlers = HandlerRegistry::standard();
        let ctx = lower(&graph, &schema, &handlers);
        assert!(matches!(
            ctx.errors(),
            [crate::error::CompileError::UnresolvedFunctionReference { node, .. }] if *node == call
        ));
        assert!(ctx.statements_for(call).is_empty());
    }

    #[test]
    fn test_for_loop_labels() {
        let mut graph = Graph::new("test");
        let entry = graph.add_function_entry(&[]);
        let for_loop = graph.add_for_loop();
        graph.link_unchecked(
            graph.find_pin(entry, pins::THEN).unwrap(),
            graph.find_pin(for_loop, pins::EXEC).unwrap(),
        );

        let schema = schema();
        let handlers = HandlerRegistry::standard();
        let ctx = lower(&graph, &schema, &handlers);
        assert!(ctx.errors().is_empty());

        let statements = ctx.statements_for(for_loop);
        let kinds: Vec<_> = statements.iter().map(|s| s.kind.clone()).collect();
        assert_eq!(kinds[0], StatementKind::Assignment);
        assert_eq!(kinds[2], StatementKind::GotoIfNot);
        assert_eq!(kinds[3], StatementKind::PushState);
        // unconnected body and completed pins end the thread
        assert_eq!(kinds[4], StatementKind::EndOfThread);
        assert_eq!(kinds.last(), Some(&StatementKind::EndOfThread));
        assert_eq!(statements[2].jump, Some(crate::context::JumpTarget::Statement(statements[7].id)));
        assert_eq!(statements[3].jump, Some(crate::context::JumpTarget::Statement(statements[5].id)));
        assert_eq!(statements[6].jump, Some(crate::context::JumpTarget::Statement(statements[1].id)));
    }
}
