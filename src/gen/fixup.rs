//! Fixup passes run over the generator's type map before emission: name
//! uniquification, padding materialization, dependency tree construction,
//! typedef dependency-loop breaking and emission queue ordering.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::{Context, Link};
use crate::btf::{Int, IntEncoding, Kind, Member, Type};
use crate::error::{Error, Result};

pub(super) fn run(context: &mut Context) -> Result<()> {
    adjust_type_names(context)?;
    scan_types(context);
    materialize_padding(context)?;
    create_type_tree(context)?;
    adjust_typedef_dependency_loops(context)?;
    create_type_queue(context)
}

/// Make every file-scope name unique. Struct, union and enum tags live in a
/// separate namespace from typedefs and do not collide with them; colliding
/// renameable types get an `_<id>` suffix, anything else is an error.
fn adjust_type_names(context: &mut Context) -> Result<()> {
    let mut seen = HashSet::new();
    let ids: Vec<u32> = context.types.keys().copied().collect();

    for id in ids {
        let Some(r#type) = context.types.get(&id) else {
            continue;
        };

        let kind = r#type.kind();
        let (can_name, can_rename, tagged) = match kind {
            Kind::Struct | Kind::Union | Kind::Enum => (true, true, true),
            Kind::Typedef => (true, true, false),
            Kind::Int => (true, false, false),
            _ => (false, false, false),
        };
        let is_enum = kind == Kind::Enum;

        if can_name {
            let existing = context.type_name(id).map(str::to_string);
            let name = match existing {
                Some(name) => name,
                None if is_enum => {
                    // Anonymous enums are still declared at file scope so
                    // their values become visible; name them after their id.
                    let name = format!("AnonymousEnum{id}");
                    context.set_type_name(id, &name)?;
                    name
                }
                None => continue,
            };

            let tag_key = |name: &str| match tagged {
                true => format!("tag-{name}"),
                false => name.to_string(),
            };

            let mut key = tag_key(&name);
            if seen.contains(&key) {
                if !can_rename {
                    return Err(Error::Generation(format!(
                        "duplicate type name `{name}`"
                    )));
                }

                let renamed = format!("{name}_{id}");
                context.set_type_name(id, &renamed)?;
                key = tag_key(&renamed);
            }

            seen.insert(key);
        }

        if is_enum {
            let (collides, prefix) = match context.types.get(&id) {
                Some(Type::Enum(r#enum)) => (
                    r#enum.values.iter().any(|value| seen.contains(&value.name)),
                    r#enum.name.clone(),
                ),
                _ => (false, None),
            };

            if let Some(Type::Enum(r#enum)) = context.types.get_mut(&id) {
                if collides {
                    let prefix = prefix.ok_or_else(|| {
                        Error::Generation(format!("enum #{id} has colliding values but no name"))
                    })?;

                    for value in &mut r#enum.values {
                        value.name = format!("{prefix}_{}", value.name);
                    }
                }

                for value in &r#enum.values {
                    seen.insert(value.name.clone());
                }
            }
        }
    }

    Ok(())
}

/// Collect the ids eligible for a file-scope declaration and seed the
/// synthetic id generator past the highest id in use.
fn scan_types(context: &mut Context) {
    let mut top_level = BTreeSet::new();
    let mut fwd_types = BTreeMap::new();
    let mut highest = 0;

    for (&id, r#type) in &context.types {
        highest = highest.max(id);

        match r#type.kind() {
            Kind::Struct | Kind::Union | Kind::Enum | Kind::Typedef | Kind::Fwd => (),
            _ => continue,
        }

        let Some(name) = context.type_name(id) else {
            continue;
        };

        if let Type::Fwd(_) = r#type {
            fwd_types.entry(name.to_string()).or_insert(id);
        }

        top_level.insert(id);
    }

    context.top_level = top_level;
    context.fwd_types = fwd_types;
    context.id_generator = highest + 1;
}

/// Rewrite every struct's member list so all padding is explicit.
fn materialize_padding(context: &mut Context) -> Result<()> {
    context.padding_byte_id = padding_byte_type(context);

    let ids: Vec<u32> = context
        .types
        .iter()
        .filter(|(_, r#type)| matches!(r#type, Type::Struct(_)))
        .map(|(&id, _)| id)
        .collect();

    for id in ids {
        let (size, members) = match context.types.get_mut(&id) {
            Some(Type::Struct(r#struct)) => (r#struct.size, std::mem::take(&mut r#struct.members)),
            _ => continue,
        };

        let padded = pad_members(context, id, size, members)?;

        if let Some(Type::Struct(r#struct)) = context.types.get_mut(&id) {
            r#struct.members = padded;
        }
    }

    Ok(())
}

/// The byte type padding members are made of. An existing plain 8-bit
/// `unsigned char` is reused so that running the fixups on an already
/// fixed-up map does not grow it; one is synthesized otherwise.
fn padding_byte_type(context: &mut Context) -> u32 {
    for (&id, r#type) in &context.types {
        if let Type::Int(int) = r#type {
            if int.name == "unsigned char"
                && int.size == 1
                && int.encoding == IntEncoding::None
                && int.offset == 0
                && int.bits == 8
            {
                return id;
            }
        }
    }

    let id = context.next_type_id();
    context.types.insert(
        id,
        Type::Int(Int {
            name: "unsigned char".to_string(),
            size: 1,
            encoding: IntEncoding::None,
            offset: 0,
            bits: 8,
        }),
    );

    id
}

fn is_bitfield(member: &Member) -> bool {
    matches!(member.bitfield_size, Some(bits) if bits != 0)
}

fn pad_members(
    context: &Context,
    id: u32,
    size: u32,
    members: Vec<Member>,
) -> Result<Vec<Member>> {
    let total_bits = size as u64 * 8;
    let mut padded = Vec::with_capacity(members.len());
    let mut cursor = 0u64;

    for member in members {
        if cursor > member.offset as u64 {
            return Err(Error::Generation(format!(
                "struct #{id} members overlap at bit offset {}",
                member.offset
            )));
        }

        if cursor < member.offset as u64 {
            let gap = member.offset as u64 - cursor;
            push_padding(&mut padded, context.padding_byte_id, &mut cursor, gap);
        }

        let advance = match is_bitfield(&member) {
            true => member.bitfield_size.unwrap_or_default() as u64,
            false => context.type_size_bits(member.type_id).ok_or_else(|| {
                Error::Generation(format!(
                    "cannot compute the size of type #{}",
                    member.type_id
                ))
            })?,
        };

        padded.push(member);
        cursor += advance;
    }

    if cursor > total_bits {
        return Err(Error::Generation(format!(
            "struct #{id} members overrun its {size} byte size"
        )));
    }

    if cursor < total_bits {
        let gap = total_bits - cursor;
        push_padding(&mut padded, context.padding_byte_id, &mut cursor, gap);
    }

    Ok(padded)
}

/// Fill a gap with whole-byte bitfield members plus one sub-byte remainder.
fn push_padding(members: &mut Vec<Member>, type_id: u32, cursor: &mut u64, gap_bits: u64) {
    for _ in 0..gap_bits / 8 {
        members.push(Member {
            name: None,
            type_id,
            offset: *cursor as u32,
            bitfield_size: Some(8),
        });
        *cursor += 8;
    }

    let rest = gap_bits % 8;
    if rest != 0 {
        members.push(Member {
            name: None,
            type_id,
            offset: *cursor as u32,
            bitfield_size: Some(rest as u8),
        });
        *cursor += rest;
    }
}

/// Direct dependencies of a type: the ids its declaration mentions, with
/// typedefs looking through anonymous aggregates.
fn type_dependencies(context: &Context, id: u32) -> Result<Vec<u32>> {
    let mut dependencies = Vec::new();
    collect_dependencies(context, id, &mut dependencies)?;
    Ok(dependencies)
}

fn collect_dependencies(context: &Context, id: u32, dependencies: &mut Vec<u32>) -> Result<()> {
    let r#type = context
        .types
        .get(&id)
        .ok_or_else(|| Error::Generation(format!("unknown type id #{id}")))?;

    match r#type {
        Type::Ptr(ptr) => dependencies.push(ptr.type_id),
        Type::Array(array) => dependencies.push(array.type_id),
        Type::Struct(r#struct) | Type::Union(r#struct) => {
            dependencies.extend(r#struct.members.iter().map(|member| member.type_id));
        }
        Type::Typedef(typedef) => {
            dependencies.push(typedef.type_id);

            if typedef.type_id != 0 {
                let target = context.types.get(&typedef.type_id).ok_or_else(|| {
                    Error::Generation(format!("unknown type id #{}", typedef.type_id))
                })?;

                // A typedef of an anonymous aggregate depends on whatever
                // the aggregate's members depend on.
                let recurse = match target {
                    Type::Struct(r#struct) | Type::Union(r#struct) => r#struct.name.is_none(),
                    _ => false,
                };

                if recurse {
                    collect_dependencies(context, typedef.type_id, dependencies)?;
                }
            }
        }
        Type::Volatile(modifier) | Type::Const(modifier) | Type::Restrict(modifier) => {
            dependencies.push(modifier.type_id);
        }
        Type::FuncProto(proto) => {
            dependencies.push(proto.return_type_id);
            dependencies.extend(proto.params.iter().map(|param| param.type_id));
        }
        _ => (),
    }

    Ok(())
}

fn create_type_tree(context: &mut Context) -> Result<()> {
    context.type_tree.clear();
    context.visited = BTreeSet::from([0]);

    for id in context.top_level.clone() {
        for dependency in type_dependencies(context, id)? {
            type_tree_helper(context, false, id, dependency)?;
        }
    }

    Ok(())
}

fn modifier_target(context: &Context, id: u32) -> u32 {
    match context.types.get(&id) {
        Some(Type::Ptr(ptr)) => ptr.type_id,
        Some(Type::Array(array)) => array.type_id,
        Some(Type::Volatile(modifier))
        | Some(Type::Const(modifier))
        | Some(Type::Restrict(modifier)) => modifier.type_id,
        _ => 0,
    }
}

/// Walk one dependency chain from `parent`, recording an edge when it lands
/// on a top-level type. Only a path through a pointer to a forward
/// declarable aggregate makes the edge weak.
fn type_tree_helper(context: &mut Context, inside_pointer: bool, parent: u32, id: u32) -> Result<()> {
    if id == 0 {
        return Ok(());
    }

    let kind = context
        .types
        .get(&id)
        .ok_or_else(|| Error::Generation(format!("unknown type id #{id}")))?
        .kind();

    match kind {
        Kind::Ptr => {
            let target = modifier_target(context, id);
            return type_tree_helper(context, true, parent, target);
        }
        Kind::Array | Kind::Volatile | Kind::Const | Kind::Restrict => {
            let target = modifier_target(context, id);
            return type_tree_helper(context, inside_pointer, parent, target);
        }
        Kind::FuncProto => {
            let targets: Vec<u32> = match context.types.get(&id) {
                Some(Type::FuncProto(proto)) => {
                    let mut targets = vec![proto.return_type_id];
                    targets.extend(proto.params.iter().map(|param| param.type_id));
                    targets
                }
                _ => Vec::new(),
            };

            for target in targets {
                type_tree_helper(context, inside_pointer, parent, target)?;
            }

            return Ok(());
        }
        _ => (),
    }

    if !context.is_top_level(id) {
        return match kind {
            // Anonymous aggregates are walked through; they can never have
            // been visited before since nothing can name them twice. The
            // pointer flag resets because their members are laid out inline.
            Kind::Struct | Kind::Union => {
                for dependency in type_dependencies(context, id)? {
                    type_tree_helper(context, false, parent, dependency)?;
                }
                Ok(())
            }
            Kind::Int | Kind::Float | Kind::Enum => Ok(()),
            _ => Err(Error::Generation(format!(
                "unexpected {kind} type #{id} in a dependency walk"
            ))),
        };
    }

    let weak = inside_pointer && matches!(kind, Kind::Struct | Kind::Union);
    let links = context.type_tree.entry(parent).or_default();
    links
        .entry(id)
        .and_modify(|link| {
            // A strong link never downgrades back to weak.
            if *link == Link::Weak && !weak {
                *link = Link::Strong;
            }
        })
        .or_insert(match weak {
            true => Link::Weak,
            false => Link::Strong,
        });

    if !context.visited.insert(id) {
        return Ok(());
    }

    for dependency in type_dependencies(context, id)? {
        type_tree_helper(context, false, id, dependency)?;
    }

    Ok(())
}

fn create_inverse_type_tree(context: &mut Context) {
    let mut inverse: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();

    for (&parent, links) in &context.type_tree {
        for &child in links.keys() {
            inverse.entry(child).or_default().insert(parent);
        }
    }

    context.inverse_type_tree = inverse;
}

/// Every id reachable from `start` through dependency links, `start`
/// included.
fn collect_child_nodes(
    type_tree: &BTreeMap<u32, BTreeMap<u32, Link>>,
    start: u32,
) -> BTreeSet<u32> {
    let mut visited = BTreeSet::new();
    let mut queue = vec![start];

    while let Some(id) = queue.pop() {
        if !visited.insert(id) {
            continue;
        }

        if let Some(links) = type_tree.get(&id) {
            queue.extend(links.keys().copied());
        }
    }

    visited
}

/// Break `struct S { S_t *...; }` / `typedef ... S_t` cycles: the typedef is
/// rewired onto a synthetic forward declaration of the struct, and users of
/// the typedef outside the struct's own subtree gain a strong link to the
/// struct so its real definition still precedes them.
fn adjust_typedef_dependency_loops(context: &mut Context) -> Result<()> {
    let mut typedef_map: BTreeMap<u32, u32> = BTreeMap::new();

    loop {
        let mut try_again = false;

        for struct_id in context.top_level.clone() {
            let is_union = match context.types.get(&struct_id).map(Type::kind) {
                Some(Kind::Struct) => false,
                Some(Kind::Union) => true,
                _ => continue,
            };

            let dependencies: Vec<u32> = match context.type_tree.get(&struct_id) {
                Some(links) if !links.is_empty() => links.keys().copied().collect(),
                _ => continue,
            };

            let struct_name = context
                .type_name(struct_id)
                .ok_or_else(|| {
                    Error::Generation(format!("top-level type #{struct_id} has no name"))
                })?
                .to_string();

            for typedef_id in dependencies {
                if context.types.get(&typedef_id).map(Type::kind) != Some(Kind::Typedef) {
                    continue;
                }

                let depends_back = context
                    .type_tree
                    .get(&typedef_id)
                    .is_some_and(|links| links.contains_key(&struct_id));
                if !depends_back {
                    continue;
                }

                let fwd_id = context.get_or_create_fwd(is_union, &struct_name);
                if let Some(links) = context.type_tree.get_mut(&typedef_id) {
                    links.remove(&struct_id);
                    links.insert(fwd_id, Link::Strong);
                }

                typedef_map.entry(typedef_id).or_insert(struct_id);
                try_again = true;
            }
        }

        if !try_again {
            break;
        }
    }

    create_inverse_type_tree(context);

    let mut child_nodes_cache: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();

    for (&typedef_id, &struct_id) in &typedef_map {
        let Some(users) = context.inverse_type_tree.get(&typedef_id) else {
            continue;
        };
        let users: Vec<u32> = users.iter().copied().collect();

        if !child_nodes_cache.contains_key(&struct_id) {
            let children = collect_child_nodes(&context.type_tree, struct_id);
            child_nodes_cache.insert(struct_id, children);
        }
        let children = &child_nodes_cache[&struct_id];

        for user in users {
            if user == struct_id || children.contains(&user) {
                continue;
            }

            if let Some(links) = context.type_tree.get_mut(&user) {
                links.insert(struct_id, Link::Strong);
            }
        }
    }

    Ok(())
}

fn create_type_queue(context: &mut Context) -> Result<()> {
    context.type_queue.clear();
    context.visited = BTreeSet::from([0]);

    for id in context.top_level.clone() {
        type_queue_helper(context, id)?;
    }

    Ok(())
}

/// Post-order DFS: strong children are queued ahead of their parent, weak
/// children are replaced by a forward declaration of the pointee.
fn type_queue_helper(context: &mut Context, id: u32) -> Result<()> {
    if id == 0 || !context.visited.insert(id) {
        return Ok(());
    }

    let links: Vec<(u32, Link)> = context
        .type_tree
        .get(&id)
        .map(|links| links.iter().map(|(&child, &link)| (child, link)).collect())
        .unwrap_or_default();

    for (child, link) in links {
        let mut target = child;

        if link == Link::Weak {
            let is_union = match context.types.get(&child).map(Type::kind) {
                Some(Kind::Union) => true,
                Some(Kind::Struct) => false,
                _ => {
                    return Err(Error::Generation(format!(
                        "type #{child} cannot be forward declared"
                    )))
                }
            };

            let name = context
                .type_name(child)
                .ok_or_else(|| Error::Generation(format!("type #{child} has no name")))?
                .to_string();

            let fwd_id = context.get_or_create_fwd(is_union, &name);
            type_queue_helper(context, fwd_id)?;
            target = fwd_id;
        }

        type_queue_helper(context, target)?;
    }

    context.type_queue.push(id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btf::Struct;

    fn byte_member(type_id: u32, offset: u32) -> Member {
        Member {
            name: Some(format!("m{offset}")),
            type_id,
            offset,
            bitfield_size: None,
        }
    }

    fn context_with_char(size: u32) -> Context {
        let types = BTreeMap::from([
            (
                1,
                Type::Int(Int {
                    name: "char".to_string(),
                    size: 1,
                    encoding: IntEncoding::Char,
                    offset: 0,
                    bits: 8,
                }),
            ),
            (
                2,
                Type::Struct(Struct {
                    name: Some("s".to_string()),
                    size,
                    members: Vec::new(),
                }),
            ),
        ]);

        let mut context = Context::new(types).unwrap();
        scan_types(&mut context);
        context
    }

    #[test]
    fn interior_gap_becomes_whole_byte_padding() {
        let mut context = context_with_char(4);
        context.padding_byte_id = padding_byte_type(&mut context);

        let members = vec![byte_member(1, 0), byte_member(1, 24)];
        let padded = pad_members(&context, 2, 4, members).unwrap();

        assert_eq!(padded.len(), 4);
        assert_eq!(padded[1].offset, 8);
        assert_eq!(padded[1].bitfield_size, Some(8));
        assert_eq!(padded[2].offset, 16);
        assert_eq!(padded[3].offset, 24);
    }

    #[test]
    fn sub_byte_remainder_gets_a_single_bitfield() {
        let mut context = context_with_char(1);
        context.padding_byte_id = padding_byte_type(&mut context);

        let members = vec![Member {
            name: Some("flag".to_string()),
            type_id: 1,
            offset: 0,
            bitfield_size: Some(3),
        }];
        let padded = pad_members(&context, 2, 1, members).unwrap();

        assert_eq!(padded.len(), 2);
        assert_eq!(padded[1].offset, 3);
        assert_eq!(padded[1].bitfield_size, Some(5));
    }

    #[test]
    fn decreasing_offsets_are_rejected() {
        let mut context = context_with_char(2);
        context.padding_byte_id = padding_byte_type(&mut context);

        let members = vec![byte_member(1, 8), byte_member(1, 0)];
        assert!(matches!(
            pad_members(&context, 2, 2, members),
            Err(Error::Generation(_))
        ));
    }

    #[test]
    fn overrunning_members_are_rejected() {
        let mut context = context_with_char(1);
        context.padding_byte_id = padding_byte_type(&mut context);

        let members = vec![byte_member(1, 0), byte_member(1, 8)];
        assert!(matches!(
            pad_members(&context, 2, 1, members),
            Err(Error::Generation(_))
        ));
    }
}
