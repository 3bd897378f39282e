//! # Graph Schema
//!
//! Connection legality rules and the class registry the compiler resolves
//! members and functions against.
//!
//! The schema is read-only during compilation. The only graph mutation it
//! performs is wildcard resolution, which rewrites pin types in place and
//! runs before any function context is built.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

use super::types::{Binding, PinType};
use super::{Graph, PinDirection, PinId};
use crate::error::ConnectionError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamInfo {
    pub name: String,
    pub ty: PinType,
}

impl ParamInfo {
    pub fn new(name: impl Into<String>, ty: PinType) -> Self {
        Self { name: name.into(), ty }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub name: String,
    pub params: Vec<ParamInfo>,
    pub return_type: Option<PinType>,
    pub is_pure: bool,
    /// May be called from const functions
    pub is_const: bool,
}

impl FunctionSignature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            return_type: None,
            is_pure: false,
            is_const: false,
        }
    }

    pub fn param(mut self, name: &str, ty: PinType) -> Self {
        self.params.push(ParamInfo::new(name, ty));
        self
    }

    pub fn returns(mut self, ty: PinType) -> Self {
        self.return_type = Some(ty);
        self
    }

    pub fn pure(mut self) -> Self {
        self.is_pure = true;
        self
    }

    pub fn constant(mut self) -> Self {
        self.is_const = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub name: String,
    pub ty: PinType,
    /// Resolved through the construction system's component lookup
    pub is_component: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    pub parent: Option<String>,
    pub members: Vec<MemberInfo>,
    pub functions: Vec<FunctionSignature>,
}

impl ClassInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            members: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn member(mut self, name: &str, ty: PinType) -> Self {
        self.members.push(MemberInfo {
            name: name.to_string(),
            ty,
            is_component: false,
        });
        self
    }

    pub fn component(mut self, name: &str, class: &str) -> Self {
        self.members.push(MemberInfo {
            name: name.to_string(),
            ty: PinType::object(class),
            is_component: true,
        });
        self
    }

    pub fn function(mut self, signature: FunctionSignature) -> Self {
        self.functions.push(signature);
        self
    }
}

/// Class registry plus the global function library
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    classes: HashMap<String, ClassInfo>,
    library: Vec<FunctionSignature>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schema preloaded with the root `Object`/`Actor` classes and the
    /// utility functions graphs commonly call
    pub fn with_standard_library() -> Self {
        let mut schema = Self::new();
        schema.add_class(ClassInfo::new("Object"));
        schema.add_class(ClassInfo::new("Actor").with_parent("Object"));
        schema.add_library_function(FunctionSignature::new("PrintString").param("in_string", PinType::String));
        schema.add_library_function(
            FunctionSignature::new("IsValid")
                .param("object", PinType::object("Object"))
                .returns(PinType::Boolean)
                .pure(),
        );
        schema.add_library_function(
            FunctionSignature::new("RandomInteger")
                .param("max", PinType::Integer)
                .returns(PinType::Integer),
        );
        schema.add_library_function(
            FunctionSignature::new("Conv_IntToString")
                .param("value", PinType::Integer)
                .returns(PinType::String)
                .pure(),
        );
        schema
    }

    pub fn add_class(&mut self, class: ClassInfo) {
        self.classes.insert(class.name.clone(), class);
    }

    pub fn add_library_function(&mut self, signature: FunctionSignature) {
        self.library.push(signature);
    }

    pub fn class(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(name)
    }

    /// `child` is `parent` or derives from it
    pub fn is_child_of(&self, child: &str, parent: &str) -> bool {
        let mut current = Some(child);
        let mut guard = 0;
        while let Some(name) = current {
            if name == parent {
                return true;
            }
            guard += 1;
            if guard > self.classes.len() {
                // Malformed parent chain
                return false;
            }
            current = self.classes.get(name).and_then(|c| c.parent.as_deref());
        }
        false
    }

    /// Find a member on `class` or any of its ancestors
    pub fn find_member(&self, class: &str, member: &str) -> Option<&MemberInfo> {
        self.walk_class_chain(class)
            .into_iter()
            .find_map(|c| c.members.iter().find(|m| m.name == member))
    }

    /// Find a function on `class` (and ancestors) falling back to the library
    pub fn find_function(&self, class: Option<&str>, name: &str) -> Option<&FunctionSignature> {
        class
            .map(|c| self.walk_class_chain(c))
            .unwrap_or_default()
            .into_iter()
            .find_map(|c| c.functions.iter().find(|f| f.name == name))
            .or_else(|| self.library.iter().find(|f| f.name == name))
    }

    /// Whether `name` is a function of the library rather than of a class
    pub fn is_library_function(&self, name: &str) -> bool {
        self.library.iter().any(|f| f.name == name)
    }

    fn walk_class_chain(&self, class: &str) -> Vec<&ClassInfo> {
        let mut chain = Vec::new();
        let mut current = self.classes.get(class);
        while let Some(info) = current {
            if chain.iter().any(|c: &&ClassInfo| c.name == info.name) {
                break;
            }
            chain.push(info);
            current = info.parent.as_deref().and_then(|p| self.classes.get(p));
        }
        chain
    }

    /// Data compatibility from an output of type `from` into an input of type `to`
    pub fn types_compatible(&self, from: &PinType, to: &PinType) -> bool {
        if from == to || from.widens_to(to) {
            return true;
        }
        match (from, to) {
            (PinType::Object(source), PinType::Object(target)) => self.is_child_of(source, target),
            _ => false,
        }
    }

    /// Check whether two pins may be linked
    pub fn validate_connection(&self, graph: &Graph, a: PinId, b: PinId) -> Result<(), ConnectionError> {
        let pin_a = graph.pin(a).ok_or(ConnectionError::UnknownPin(a))?;
        let pin_b = graph.pin(b).ok_or(ConnectionError::UnknownPin(b))?;

        if pin_a.direction == pin_b.direction {
            return Err(ConnectionError::DirectionMismatch {
                a,
                b,
                direction: pin_a.direction,
            });
        }

        match (pin_a.is_exec(), pin_b.is_exec()) {
            (true, true) => return Ok(()),
            (true, false) => return Err(ConnectionError::ExecDataMixed { exec: a, data: b }),
            (false, true) => return Err(ConnectionError::ExecDataMixed { exec: b, data: a }),
            (false, false) => {}
        }

        let (source, target) = if pin_a.direction == PinDirection::Output {
            (pin_a, pin_b)
        } else {
            (pin_b, pin_a)
        };

        let compatible = if source.pin_type.contains_wildcard() {
            source.pin_type.bind(&target.pin_type) != Binding::Mismatch
        } else if target.pin_type.contains_wildcard() {
            target.pin_type.bind(&source.pin_type) != Binding::Mismatch
        } else {
            self.types_compatible(&source.pin_type, &target.pin_type)
        };

        if compatible {
            Ok(())
        } else {
            Err(ConnectionError::IncompatibleTypes {
                from: source.id,
                to: target.id,
                from_type: source.pin_type.clone(),
                to_type: target.pin_type.clone(),
            })
        }
    }

    /// Wildcard pins that must share one concrete type with `start`:
    /// wildcard siblings on the same node and wildcard pins linked to any member
    pub fn wildcard_component(&self, graph: &Graph, start: PinId) -> Vec<PinId> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        if graph.pin(start).map(|p| p.is_wildcard()).unwrap_or(false) {
            seen.insert(start);
            queue.push_back(start);
        }

        while let Some(current) = queue.pop_front() {
            let Some(pin) = graph.pin(current) else { continue };
            let siblings = graph.node(pin.owner).map(|n| n.pins.clone()).unwrap_or_default();
            for next in siblings.into_iter().chain(pin.links.iter().copied()) {
                let is_wildcard = graph.pin(next).map(|p| p.is_wildcard()).unwrap_or(false);
                if is_wildcard && seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }

        let mut component: Vec<PinId> = seen.into_iter().collect();
        component.sort();
        component
    }

    /// Propagate `binding` to every wildcard pin connected to `pin`.
    ///
    /// Fails with `AmbiguousWildcard` when a pin of the component (or one of its
    /// concrete neighbours) already implies a different type. Returns the number
    /// of pins rewritten.
    pub fn resolve_wildcard(
        &self,
        graph: &mut Graph,
        pin: PinId,
        binding: &PinType,
    ) -> Result<usize, ConnectionError> {
        if graph.pin(pin).is_none() {
            return Err(ConnectionError::UnknownPin(pin));
        }
        let component = self.wildcard_component(graph, pin);
        let members: HashSet<PinId> = component.iter().copied().collect();

        for id in &component {
            let Some(member) = graph.pin(*id) else { continue };

            if !member.pin_type.contains_wildcard() {
                if let Binding::Bound(existing) = member.declared_type.bind(&member.pin_type) {
                    if &existing != binding {
                        return Err(ConnectionError::AmbiguousWildcard {
                            pin: *id,
                            node: member.owner,
                            first: existing,
                            second: binding.clone(),
                        });
                    }
                }
            }

            for link in member.links.iter().filter(|l| !members.contains(l)) {
                let Some(neighbour) = graph.pin(*link) else { continue };
                match member.declared_type.bind(&neighbour.pin_type) {
                    Binding::Bound(implied) if &implied != binding => {
                        return Err(ConnectionError::AmbiguousWildcard {
                            pin: *id,
                            node: member.owner,
                            first: implied,
                            second: binding.clone(),
                        });
                    }
                    Binding::Mismatch => {
                        return Err(ConnectionError::IncompatibleTypes {
                            from: *link,
                            to: *id,
                            from_type: neighbour.pin_type.clone(),
                            to_type: member.declared_type.clone(),
                        });
                    }
                    _ => {}
                }
            }
        }

        for id in &component {
            if let Some(member) = graph.pin_mut(*id) {
                member.pin_type = member.declared_type.substitute(binding);
            }
        }

        tracing::debug!("[PBBC] Resolved {} wildcard pins to {}", component.len(), binding);
        Ok(component.len())
    }

    /// Infer every wildcard component from its first concrete neighbour.
    ///
    /// Components without a concrete neighbour stay unresolved.
    pub fn infer_wildcards(&self, graph: &mut Graph) -> Vec<ConnectionError> {
        let mut errors = Vec::new();
        let mut visited = HashSet::new();
        let wildcard_pins: Vec<PinId> = graph.pins().filter(|p| p.is_wildcard()).map(|p| p.id).collect();

        for start in wildcard_pins {
            if visited.contains(&start) {
                continue;
            }
            let component = self.wildcard_component(graph, start);
            visited.extend(component.iter().copied());
            let members: HashSet<PinId> = component.iter().copied().collect();

            let binding = component.iter().find_map(|id| {
                let member = graph.pin(*id)?;
                member
                    .links
                    .iter()
                    .filter(|l| !members.contains(l))
                    .filter_map(|l| graph.pin(*l))
                    .find_map(|neighbour| match member.declared_type.bind(&neighbour.pin_type) {
                        Binding::Bound(ty) => Some(ty),
                        _ => None,
                    })
            });

            if let Some(binding) = binding {
                if let Err(error) = self.resolve_wildcard(graph, start, &binding) {
                    errors.push(error);
                }
            }
        }

        errors
    }

    /// Check every link of `graph` against the connection rules.
    ///
    /// Each link is visited once, from its lower pin handle. Graphs loaded
    /// from assets or built with [`Graph::link_unchecked`] are only validated here.
    pub fn validate_links(&self, graph: &Graph) -> Vec<ConnectionError> {
        graph
            .pins()
            .flat_map(|pin| {
                pin.links
                    .iter()
                    .filter(move |other| pin.id < **other)
                    .map(move |other| (pin.id, *other))
            })
            .filter_map(|(a, b)| self.validate_connection(graph, a, b).err())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKind;

    fn schema() -> Schema {
        let mut schema = Schema::with_standard_library();
        schema.add_class(ClassInfo::new("Pawn").with_parent("Actor").member("Health", PinType::Float));
        schema
    }

    #[test]
    fn test_inheritance_compatibility() {
        let schema = schema();
        assert!(schema.types_compatible(&PinType::object("Pawn"), &PinType::object("Actor")));
        assert!(schema.types_compatible(&PinType::object("Pawn"), &PinType::object("Object")));
        assert!(!schema.types_compatible(&PinType::object("Actor"), &PinType::object("Pawn")));
    }

    #[test]
    fn test_member_lookup_walks_parents() {
        let schema = schema();
        let mut with_child = schema.clone();
        with_child.add_class(ClassInfo::new("Hero").with_parent("Pawn"));
        assert!(with_child.find_member("Hero", "Health").is_some());
        assert!(with_child.find_member("Hero", "Mana").is_none());
        assert!(with_child.find_function(Some("Hero"), "PrintString").is_some());
    }

    #[test]
    fn test_validate_connection_errors() {
        let schema = schema();
        let mut graph = Graph::new("test");
        let a = graph.add_node(NodeKind::Knot, "a");
        let b = graph.add_node(NodeKind::Knot, "b");
        let exec_out = graph.add_output(a, "then", PinType::Exec);
        let int_out = graph.add_output(a, "int", PinType::Integer);
        let bool_out = graph.add_output(a, "bool", PinType::Boolean);
        let float_in = graph.add_input(b, "float", PinType::Float);
        let int_in = graph.add_input(b, "int", PinType::Integer);

        assert!(schema.validate_connection(&graph, int_out, float_in).is_ok());
        assert!(matches!(
            schema.validate_connection(&graph, int_out, bool_out),
            Err(ConnectionError::DirectionMismatch { .. })
        ));
        assert!(matches!(
            schema.validate_connection(&graph, exec_out, int_in),
            Err(ConnectionError::ExecDataMixed { .. })
        ));
        assert!(matches!(
            schema.validate_connection(&graph, bool_out, int_in),
            Err(ConnectionError::IncompatibleTypes { .. })
        ));
    }

    #[test]
    fn test_validate_links_visits_each_link_once() {
        let schema = schema();
        let mut graph = Graph::new("test");
        let a = graph.add_node(NodeKind::Knot, "a");
        let b = graph.add_node(NodeKind::Knot, "b");
        let bool_out = graph.add_output(a, "bool", PinType::Boolean);
        let int_out = graph.add_output(a, "int", PinType::Integer);
        let int_in = graph.add_input(b, "int", PinType::Integer);
        let float_in = graph.add_input(b, "float", PinType::Float);
        graph.link_unchecked(int_out, float_in);
        assert!(schema.validate_links(&graph).is_empty());

        graph.link_unchecked(bool_out, int_in);
        let errors = schema.validate_links(&graph);
        assert_eq!(
            errors,
            vec![ConnectionError::IncompatibleTypes {
                from: bool_out,
                to: int_in,
                from_type: PinType::Boolean,
                to_type: PinType::Integer,
            }]
        );
    }

    #[test]
    fn test_resolve_wildcard_propagates_across_node_and_links() {
        let schema = schema();
        let mut graph = Graph::new("test");
        let array_fn = graph.add_node(NodeKind::Knot, "array_fn");
        let input = graph.add_input(array_fn, "items", PinType::array_of(PinType::Wildcard));
        let item = graph.add_output(array_fn, "item", PinType::Wildcard);
        let knot = graph.add_knot(PinType::Wildcard);
        let knot_in = graph.find_pin(knot, "in").unwrap();
        graph.link_unchecked(item, knot_in);

        let resolved = schema.resolve_wildcard(&mut graph, input, &PinType::Integer).unwrap();
        assert_eq!(resolved, 4);
        assert_eq!(graph.pin(input).unwrap().pin_type, PinType::array_of(PinType::Integer));
        assert_eq!(graph.pin(item).unwrap().pin_type, PinType::Integer);
        assert_eq!(graph.pin(knot_in).unwrap().pin_type, PinType::Integer);
    }

    #[test]
    fn test_resolve_wildcard_rejects_conflicting_binding() {
        let schema = schema();
        let mut graph = Graph::new("test");
        let node = graph.add_node(NodeKind::Knot, "identity");
        let input = graph.add_input(node, "in", PinType::Wildcard);
        let _output = graph.add_output(node, "out", PinType::Wildcard);
        schema.resolve_wildcard(&mut graph, input, &PinType::String).unwrap();

        let result = schema.resolve_wildcard(&mut graph, input, &PinType::Integer);
        assert!(matches!(result, Err(ConnectionError::AmbiguousWildcard { .. })));
    }
}
