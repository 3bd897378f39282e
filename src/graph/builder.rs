//! Convenience constructors that create nodes with their standard pin layout.

use super::{Graph, MathOp, NodeId, NodeKind, PinType, TunnelBoundary};

/// Standard pin names
pub mod pins {
    pub const EXEC: &str = "exec";
    pub const THEN: &str = "then";
    pub const ELSE: &str = "else";
    pub const CONDITION: &str = "condition";
    pub const SELF: &str = "self";
    pub const RETURN_VALUE: &str = "ReturnValue";
    pub const VALUE: &str = "value";
    pub const LOOP_BODY: &str = "loop_body";
    pub const INDEX: &str = "index";
    pub const FIRST: &str = "first";
    pub const LAST: &str = "last";
    pub const COMPLETED: &str = "completed";
    pub const OBJECT: &str = "object";
    pub const CAST_RESULT: &str = "cast_result";
    pub const CAST_FAILED: &str = "cast_failed";
    pub const SUCCESS: &str = "success";
    pub const SPAWNED: &str = "spawned";
    pub const A: &str = "a";
    pub const B: &str = "b";
    pub const RESULT: &str = "result";
    pub const KNOT_IN: &str = "in";
    pub const KNOT_OUT: &str = "out";

    /// Name of the n-th sequence arm
    pub fn sequence_arm(index: usize) -> String {
        format!("then_{}", index)
    }
}

impl Graph {
    pub fn add_function_entry(&mut self, params: &[(&str, PinType)]) -> NodeId {
        let node = self.add_node(NodeKind::FunctionEntry, "Entry");
        self.add_output(node, pins::THEN, PinType::Exec);
        for (name, ty) in params {
            self.add_output(node, *name, ty.clone());
        }
        node
    }

    pub fn add_function_result(&mut self, results: &[(&str, PinType)]) -> NodeId {
        let node = self.add_node(NodeKind::FunctionResult, "Return");
        self.add_input(node, pins::EXEC, PinType::Exec);
        for (name, ty) in results {
            self.add_input(node, *name, ty.clone());
        }
        node
    }

    pub fn add_event(&mut self, name: &str) -> NodeId {
        let node = self.add_node(NodeKind::Event { name: name.to_string() }, name);
        self.add_output(node, pins::THEN, PinType::Exec);
        node
    }

    pub fn add_custom_event(&mut self, name: &str, params: &[(&str, PinType)]) -> NodeId {
        let node = self.add_node(NodeKind::CustomEvent { name: name.to_string() }, name);
        self.add_output(node, pins::THEN, PinType::Exec);
        for (param, ty) in params {
            self.add_output(node, *param, ty.clone());
        }
        node
    }

    /// Call a library or self function. Pure calls get no exec pins.
    pub fn add_call(
        &mut self,
        function: &str,
        params: &[(&str, PinType)],
        return_type: Option<PinType>,
        pure: bool,
    ) -> NodeId {
        let kind = NodeKind::CallFunction {
            function: function.to_string(),
            target_class: None,
        };
        self.add_call_node(kind, function, params, return_type, pure)
    }

    /// Call a member function of `class` through an explicit `self` target pin
    pub fn add_member_call(
        &mut self,
        class: &str,
        function: &str,
        params: &[(&str, PinType)],
        return_type: Option<PinType>,
        pure: bool,
    ) -> NodeId {
        let kind = NodeKind::CallFunction {
            function: function.to_string(),
            target_class: Some(class.to_string()),
        };
        let node = self.add_call_node(kind, function, &[], None, pure);
        self.add_input(node, pins::SELF, PinType::object(class));
        for (name, ty) in params {
            self.add_input(node, *name, ty.clone());
        }
        if let Some(ty) = return_type {
            self.add_output(node, pins::RETURN_VALUE, ty);
        }
        node
    }

    fn add_call_node(
        &mut self,
        kind: NodeKind,
        title: &str,
        params: &[(&str, PinType)],
        return_type: Option<PinType>,
        pure: bool,
    ) -> NodeId {
        let node = self.add_node(kind, title);
        if !pure {
            self.add_input(node, pins::EXEC, PinType::Exec);
            self.add_output(node, pins::THEN, PinType::Exec);
        }
        for (name, ty) in params {
            self.add_input(node, *name, ty.clone());
        }
        if let Some(ty) = return_type {
            self.add_output(node, pins::RETURN_VALUE, ty);
        }
        node
    }

    pub fn add_variable_get(&mut self, member: &str, ty: PinType) -> NodeId {
        let kind = NodeKind::VariableGet {
            member: member.to_string(),
            owner_class: None,
        };
        let node = self.add_node(kind, format!("Get_{}", member));
        self.add_output(node, pins::VALUE, ty);
        node
    }

    pub fn add_variable_set(&mut self, member: &str, ty: PinType) -> NodeId {
        let kind = NodeKind::VariableSet {
            member: member.to_string(),
            owner_class: None,
        };
        let node = self.add_node(kind, format!("Set_{}", member));
        self.add_input(node, pins::EXEC, PinType::Exec);
        self.add_output(node, pins::THEN, PinType::Exec);
        self.add_input(node, pins::VALUE, ty.clone());
        self.add_output(node, format!("{}_out", pins::VALUE), ty);
        node
    }

    pub fn add_branch(&mut self) -> NodeId {
        let node = self.add_node(NodeKind::Branch, "Branch");
        self.add_input(node, pins::EXEC, PinType::Exec);
        let condition = self.add_input(node, pins::CONDITION, PinType::Boolean);
        self.set_required(condition, true);
        self.add_output(node, pins::THEN, PinType::Exec);
        self.add_output(node, pins::ELSE, PinType::Exec);
        node
    }

    pub fn add_sequence(&mut self, arms: usize) -> NodeId {
        let node = self.add_node(NodeKind::Sequence, "Sequence");
        self.add_input(node, pins::EXEC, PinType::Exec);
        for arm in 0..arms {
            self.add_output(node, pins::sequence_arm(arm), PinType::Exec);
        }
        node
    }

    pub fn add_for_loop(&mut self) -> NodeId {
        let node = self.add_node(NodeKind::ForLoop, "ForLoop");
        self.add_input(node, pins::EXEC, PinType::Exec);
        self.add_input(node, pins::FIRST, PinType::Integer);
        self.add_input(node, pins::LAST, PinType::Integer);
        self.add_output(node, pins::LOOP_BODY, PinType::Exec);
        self.add_output(node, pins::INDEX, PinType::Integer);
        self.add_output(node, pins::COMPLETED, PinType::Exec);
        node
    }

    pub fn add_while_loop(&mut self) -> NodeId {
        let node = self.add_node(NodeKind::WhileLoop, "WhileLoop");
        self.add_input(node, pins::EXEC, PinType::Exec);
        let condition = self.add_input(node, pins::CONDITION, PinType::Boolean);
        self.set_required(condition, true);
        self.add_output(node, pins::LOOP_BODY, PinType::Exec);
        self.add_output(node, pins::COMPLETED, PinType::Exec);
        node
    }

    pub fn add_cast(&mut self, target_class: &str) -> NodeId {
        let kind = NodeKind::Cast {
            target_class: target_class.to_string(),
        };
        let node = self.add_node(kind, format!("CastTo{}", target_class));
        self.add_input(node, pins::EXEC, PinType::Exec);
        let object = self.add_input(node, pins::OBJECT, PinType::object("Object"));
        self.set_required(object, true);
        self.add_output(node, pins::THEN, PinType::Exec);
        self.add_output(node, pins::CAST_FAILED, PinType::Exec);
        self.add_output(node, pins::CAST_RESULT, PinType::object(target_class));
        self.add_output(node, pins::SUCCESS, PinType::Boolean);
        node
    }

    pub fn add_spawn(&mut self, class: &str) -> NodeId {
        let kind = NodeKind::Spawn { class: class.to_string() };
        let node = self.add_node(kind, format!("Spawn{}", class));
        self.add_input(node, pins::EXEC, PinType::Exec);
        self.add_output(node, pins::THEN, PinType::Exec);
        self.add_output(node, pins::SPAWNED, PinType::object(class));
        node
    }

    pub fn add_math(&mut self, op: MathOp, operand: PinType) -> NodeId {
        let node = self.add_node(NodeKind::MathExpression { op }, format!("{:?}", op));
        self.add_input(node, pins::A, operand.clone());
        if !op.is_unary() {
            self.add_input(node, pins::B, operand.clone());
        }
        let result = if op.yields_bool() { PinType::Boolean } else { operand };
        self.add_output(node, pins::RESULT, result);
        node
    }

    /// Reroute node; its input and output share one net
    pub fn add_knot(&mut self, ty: PinType) -> NodeId {
        let node = self.add_node(NodeKind::Knot, "Knot");
        self.add_input(node, pins::KNOT_IN, ty.clone());
        self.add_output(node, pins::KNOT_OUT, ty);
        node
    }

    pub fn add_self(&mut self, class: &str) -> NodeId {
        let node = self.add_node(NodeKind::SelfRef, "Self");
        self.add_output(node, pins::SELF, PinType::object(class));
        node
    }

    /// Pins must mirror the macro's tunnel pins by name
    pub fn add_macro_instance(&mut self, macro_name: &str) -> NodeId {
        let kind = NodeKind::MacroInstance {
            macro_name: macro_name.to_string(),
        };
        self.add_node(kind, macro_name)
    }

    pub fn add_composite(&mut self, subgraph: usize, title: &str) -> NodeId {
        self.add_node(NodeKind::Composite { subgraph }, title)
    }

    pub fn add_tunnel(&mut self, boundary: TunnelBoundary) -> NodeId {
        let title = match boundary {
            TunnelBoundary::Entry => "Inputs",
            TunnelBoundary::Exit => "Outputs",
        };
        self.add_node(NodeKind::Tunnel { boundary }, title)
    }
}
