//! C header generation from a decoded type database.
//!
//! The generator works on its own mutable copy of the type map: names are
//! made unique, struct padding is made explicit, a dependency tree between
//! top-level declarations is built and broken where circular, and the
//! resulting emission queue is rendered with full C declarator syntax.

mod emit;
mod fixup;

use std::collections::{BTreeMap, BTreeSet};

use crate::btf::{Btf, Fwd, Type};
use crate::error::{Error, Result};

/// Render the database as a self-consistent C header.
///
/// Fails when the database is empty or when its type graph cannot be laid
/// out as a sequence of compilable declarations.
pub fn generate_header(btf: &Btf) -> Result<String> {
    let mut context = Context::new(btf.types().clone())?;
    fixup::run(&mut context)?;
    emit::generate(&mut context)
}

/// Whether a dependency edge needs the full definition of its target ahead
/// of the referent, or is satisfied by a forward declaration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Link {
    Strong,
    Weak,
}

/// All generator state: the working copy of the type map, the dependency
/// structures built by the fixup passes and the emitter's declarator stacks.
pub(crate) struct Context {
    types: BTreeMap<u32, Type>,

    /// Named Struct/Union/Enum/Typedef/Fwd ids, eligible for file scope.
    top_level: BTreeSet<u32>,
    /// Forward declarations by tag name, pre-existing and synthesized.
    fwd_types: BTreeMap<String, u32>,
    padding_byte_id: u32,
    id_generator: u32,

    /// Parent id -> child id -> link strength.
    type_tree: BTreeMap<u32, BTreeMap<u32, Link>>,
    /// Child id -> ids depending on it.
    inverse_type_tree: BTreeMap<u32, BTreeSet<u32>>,
    visited: BTreeSet<u32>,
    type_queue: Vec<u32>,

    modifier_stack: Vec<Vec<u32>>,
    modifiers: Vec<u32>,
    typedef_name_stack: Vec<Option<String>>,
    typedef_name: Option<String>,
    variable_name_stack: Vec<Option<String>>,
    variable_name: Option<String>,
    indent: usize,
}

impl Context {
    fn new(types: BTreeMap<u32, Type>) -> Result<Context> {
        if types.is_empty() {
            return Err(Error::Generation("the type map is empty".to_string()));
        }

        Ok(Context {
            types,
            top_level: BTreeSet::new(),
            fwd_types: BTreeMap::new(),
            padding_byte_id: 0,
            id_generator: 0,
            type_tree: BTreeMap::new(),
            inverse_type_tree: BTreeMap::new(),
            visited: BTreeSet::new(),
            type_queue: Vec::new(),
            modifier_stack: Vec::new(),
            modifiers: Vec::new(),
            typedef_name_stack: Vec::new(),
            typedef_name: None,
            variable_name_stack: Vec::new(),
            variable_name: None,
            indent: 0,
        })
    }

    fn next_type_id(&mut self) -> u32 {
        self.id_generator += 1;
        self.id_generator
    }

    /// Name a type declares at file scope, if any.
    fn type_name(&self, id: u32) -> Option<&str> {
        match self.types.get(&id)? {
            Type::Struct(r#struct) | Type::Union(r#struct) => r#struct.name.as_deref(),
            Type::Enum(r#enum) => r#enum.name.as_deref(),
            Type::Typedef(typedef) => Some(&typedef.name),
            Type::Fwd(fwd) => Some(&fwd.name),
            Type::Int(int) => Some(&int.name),
            _ => None,
        }
    }

    fn set_type_name(&mut self, id: u32, name: &str) -> Result<()> {
        match self.types.get_mut(&id) {
            Some(Type::Struct(r#struct)) | Some(Type::Union(r#struct)) => {
                r#struct.name = Some(name.to_string())
            }
            Some(Type::Enum(r#enum)) => r#enum.name = Some(name.to_string()),
            Some(Type::Typedef(typedef)) => typedef.name = name.to_string(),
            _ => {
                return Err(Error::Generation(format!(
                    "type #{id} cannot be renamed"
                )))
            }
        }

        Ok(())
    }

    fn is_top_level(&self, id: u32) -> bool {
        self.top_level.contains(&id)
    }

    fn get_or_create_fwd(&mut self, is_union: bool, name: &str) -> u32 {
        if let Some(&id) = self.fwd_types.get(name) {
            return id;
        }

        let id = self.next_type_id();
        self.types.insert(
            id,
            Type::Fwd(Fwd {
                name: name.to_string(),
                is_union,
            }),
        );
        self.fwd_types.insert(name.to_string(), id);

        id
    }

    /// Size of a type in bits, following typedefs and cv-qualifiers. Types
    /// with no storage size yield `None`.
    fn type_size_bits(&self, id: u32) -> Option<u64> {
        match self.types.get(&id)? {
            Type::Int(int) => Some(int.size as u64 * 8),
            Type::Struct(r#struct) | Type::Union(r#struct) => Some(r#struct.size as u64 * 8),
            Type::Enum(r#enum) => Some(r#enum.size as u64 * 8),
            Type::Float(float) => Some(float.size as u64 * 8),
            // The kernel target has 64-bit pointers.
            Type::Ptr(_) => Some(64),
            Type::Array(array) => {
                Some(self.type_size_bits(array.type_id)? * array.nelems as u64)
            }
            Type::Typedef(typedef) => self.type_size_bits(typedef.type_id),
            Type::Volatile(modifier) | Type::Const(modifier) => {
                self.type_size_bits(modifier.type_id)
            }
            _ => None,
        }
    }

    fn set_variable_name(&mut self, name: &str) {
        self.variable_name = Some(name.to_string());
    }

    fn take_variable_name(&mut self) -> Option<String> {
        self.variable_name.take()
    }

    fn push_variable_name(&mut self) {
        self.variable_name_stack.push(self.variable_name.take());
    }

    fn pop_variable_name(&mut self) {
        self.variable_name = self.variable_name_stack.pop().flatten();
    }

    fn set_typedef_name(&mut self, name: &str) {
        self.typedef_name = Some(name.to_string());
    }

    fn take_typedef_name(&mut self) -> Option<String> {
        self.typedef_name.take()
    }

    fn push_typedef_name(&mut self) {
        self.typedef_name_stack.push(self.typedef_name.take());
    }

    fn pop_typedef_name(&mut self) {
        self.typedef_name = self.typedef_name_stack.pop().flatten();
    }

    fn push_modifier(&mut self, id: u32) {
        self.modifiers.push(id);
    }

    fn push_modifier_list(&mut self) {
        self.modifier_stack.push(std::mem::take(&mut self.modifiers));
    }

    fn pop_modifier_list(&mut self) {
        self.modifiers = self.modifier_stack.pop().unwrap_or_default();
    }

    /// Pair around any recursive descent into a member's or parameter's
    /// type so outer identifier slots are not consumed by the inner walk.
    fn push_state(&mut self) {
        self.push_variable_name();
        self.push_modifier_list();
        self.push_typedef_name();
    }

    fn pop_state(&mut self) {
        self.pop_variable_name();
        self.pop_modifier_list();
        self.pop_typedef_name();
    }

    fn reset_state(&mut self) {
        self.modifier_stack.clear();
        self.modifiers.clear();
        self.typedef_name_stack.clear();
        self.typedef_name = None;
        self.variable_name_stack.clear();
        self.variable_name = None;
    }

    /// Volatile qualifiers are spurious on a function declarator.
    fn filter_func_proto_modifiers(&mut self) {
        let types = &self.types;
        self.modifiers
            .retain(|id| !matches!(types.get(id), Some(Type::Volatile(_))));
    }

    fn increase_indent(&mut self) {
        self.indent += 1;
    }

    fn decrease_indent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btf::*;

    // typedef struct S S_t; struct S { S_t *next; int v; };
    // struct User { S_t t; };
    fn sample_types() -> BTreeMap<u32, Type> {
        BTreeMap::from([
            (
                1,
                Type::Typedef(Typedef {
                    name: "S_t".to_string(),
                    type_id: 2,
                }),
            ),
            (
                2,
                Type::Struct(Struct {
                    name: Some("S".to_string()),
                    size: 12,
                    members: vec![
                        Member {
                            name: Some("next".to_string()),
                            type_id: 3,
                            offset: 0,
                            bitfield_size: None,
                        },
                        Member {
                            name: Some("v".to_string()),
                            type_id: 4,
                            offset: 64,
                            bitfield_size: None,
                        },
                    ],
                }),
            ),
            (3, Type::Ptr(Ptr { type_id: 1 })),
            (
                4,
                Type::Int(Int {
                    name: "int".to_string(),
                    size: 4,
                    encoding: IntEncoding::Signed,
                    offset: 0,
                    bits: 32,
                }),
            ),
            (
                5,
                Type::Struct(Struct {
                    name: Some("User".to_string()),
                    size: 12,
                    members: vec![Member {
                        name: Some("t".to_string()),
                        type_id: 1,
                        offset: 0,
                        bitfield_size: None,
                    }],
                }),
            ),
        ])
    }

    #[test]
    fn fixup_twice_is_a_fixed_point() {
        let mut first = Context::new(sample_types()).unwrap();
        fixup::run(&mut first).unwrap();

        let mut second = Context::new(first.types.clone()).unwrap();
        fixup::run(&mut second).unwrap();

        assert_eq!(first.types, second.types);
        assert_eq!(first.type_queue, second.type_queue);
    }

    #[test]
    fn typedef_loop_is_broken_with_a_forward_declaration() {
        let mut context = Context::new(sample_types()).unwrap();
        fixup::run(&mut context).unwrap();

        let fwd_id = *context.fwd_types.get("S").unwrap();
        match context.types.get(&fwd_id) {
            Some(Type::Fwd(fwd)) => {
                assert_eq!(fwd.name, "S");
                assert!(!fwd.is_union);
            }
            other => panic!("expected a synthetic forward declaration, got {other:?}"),
        }

        // S_t now depends on the forward declaration, not on S itself.
        let typedef_links = context.type_tree.get(&1).unwrap();
        assert!(typedef_links.contains_key(&fwd_id));
        assert!(!typedef_links.contains_key(&2));

        // The external user of S_t was rewired onto the real struct.
        assert_eq!(
            context.type_tree.get(&5).unwrap().get(&2),
            Some(&Link::Strong)
        );

        // The typedef is emitted before the struct, the fwd before both.
        let queue = &context.type_queue;
        let pos = |id: u32| queue.iter().position(|&q| q == id).unwrap();
        assert!(pos(fwd_id) < pos(1));
        assert!(pos(1) < pos(2));
        assert!(pos(2) < pos(5));
    }

    #[test]
    fn padding_reuses_an_existing_byte_type() {
        let mut types = sample_types();
        types.insert(
            6,
            Type::Int(Int {
                name: "unsigned char".to_string(),
                size: 1,
                encoding: IntEncoding::None,
                offset: 0,
                bits: 8,
            }),
        );

        let mut context = Context::new(types).unwrap();
        fixup::run(&mut context).unwrap();

        assert_eq!(context.padding_byte_id, 6);
    }

    #[test]
    fn queued_definitions_topologically_order_strong_links() {
        let mut context = Context::new(sample_types()).unwrap();
        fixup::run(&mut context).unwrap();

        let queue = &context.type_queue;
        for (pos, id) in queue.iter().enumerate() {
            let Some(links) = context.type_tree.get(id) else {
                continue;
            };

            for (child, link) in links {
                if *link == Link::Strong {
                    let child_pos = queue.iter().position(|q| q == child).unwrap();
                    assert!(child_pos < pos, "#{child} must precede #{id}");
                }
            }
        }
    }
}
