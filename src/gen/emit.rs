//! Declarator emission. Each queued id is rendered as a definition; member,
//! parameter and typedef-target types are rendered as references. Modifier
//! types accumulate on the context's stack while descending to the base
//! type, then drain in three passes around the identifier slot.

use std::fmt::Write;

use super::Context;
use crate::btf::{Enum, Fwd, FuncProto, Struct, Type, Typedef};
use crate::error::{Error, Result};

pub(super) fn generate(context: &mut Context) -> Result<String> {
    let mut out = String::new();
    out.push_str("#pragma pack(push, 1)\n");

    for id in context.type_queue.clone() {
        context.reset_state();

        let name = context
            .type_name(id)
            .ok_or_else(|| Error::Generation(format!("queued type #{id} has no name")))?;
        if name.starts_with("__builtin_") {
            continue;
        }

        emit_type(context, &mut out, id, true)?;
        out.push_str(";\n\n");
    }

    out.push_str("#pragma pack(pop)\n");
    Ok(out)
}

fn emit_type(context: &mut Context, out: &mut String, id: u32, as_definition: bool) -> Result<()> {
    if id == 0 {
        return emit_base_name(context, out, 0, "void");
    }

    let r#type = context
        .types
        .get(&id)
        .ok_or_else(|| Error::Generation(format!("unknown type id #{id}")))?
        .clone();

    match &r#type {
        Type::Struct(r#struct) => {
            emit_struct_or_union(context, out, id, r#struct, false, as_definition)
        }
        Type::Union(r#union) => emit_struct_or_union(context, out, id, r#union, true, as_definition),
        Type::Enum(r#enum) => emit_enum(context, out, id, r#enum, as_definition),
        Type::Typedef(typedef) => emit_typedef(context, out, id, typedef, as_definition),
        Type::Int(int) => emit_base_name(context, out, id, &int.name),
        Type::Float(float) => emit_base_name(context, out, id, &float.name),
        Type::FuncProto(proto) => emit_func_proto(context, out, id, proto),
        Type::Fwd(fwd) => emit_fwd(context, out, id, fwd),
        Type::Ptr(ptr) => {
            context.push_modifier(id);
            emit_type(context, out, ptr.type_id, as_definition)
        }
        Type::Array(array) => {
            context.push_modifier(id);
            emit_type(context, out, array.type_id, as_definition)
        }
        Type::Volatile(modifier) | Type::Const(modifier) | Type::Restrict(modifier) => {
            context.push_modifier(id);
            emit_type(context, out, modifier.type_id, as_definition)
        }
        Type::Func(_) | Type::Var(_) | Type::DataSec(_) | Type::Void => Ok(()),
    }
}

fn emit_indent(context: &Context, out: &mut String) {
    for _ in 0..context.indent {
        out.push_str("  ");
    }
}

fn emit_type_comment(context: &Context, out: &mut String, id: u32) {
    emit_indent(context, out);
    let _ = writeln!(out, "/* BTF Type #{id} */");
}

/// Fill the identifier slot: a member's variable name wins over a pending
/// typedef name.
fn emit_identifier(context: &mut Context, out: &mut String) {
    let name = context
        .take_variable_name()
        .or_else(|| context.take_typedef_name());

    if let Some(name) = name {
        let _ = write!(out, " {name}");
    }
}

/// Qualifiers on the outermost side of the declarator, emitted before the
/// base type name.
fn emit_left_modifiers(context: &mut Context, out: &mut String) {
    let mut words = Vec::new();

    for id in context.modifiers.iter().rev() {
        match context.types.get(id) {
            Some(Type::Volatile(_)) => words.push("volatile"),
            Some(Type::Const(_)) => words.push("const"),
            Some(Type::Restrict(_)) => words.push("restrict"),
            _ => break,
        }
    }

    let keep = context.modifiers.len() - words.len();
    context.modifiers.truncate(keep);

    if !words.is_empty() {
        out.push(' ');
    }

    for word in &words {
        let _ = write!(out, "{word} ");
    }
}

/// Pointers and their qualifiers, emitted between the base type name and
/// the identifier.
fn emit_middle_modifiers(context: &mut Context, out: &mut String) {
    let mut words = Vec::new();

    for id in context.modifiers.iter().rev() {
        match context.types.get(id) {
            Some(Type::Const(_)) => words.push("const"),
            Some(Type::Ptr(_)) => words.push("*"),
            _ => break,
        }
    }

    let keep = context.modifiers.len() - words.len();
    context.modifiers.truncate(keep);

    if !words.is_empty() {
        out.push(' ');
    }

    for (i, word) in words.iter().enumerate() {
        out.push_str(word);
        if i + 1 != words.len() {
            out.push(' ');
        }
    }
}

/// Array extents after the identifier. Anything left on the stack after the
/// three passes is surfaced in a comment rather than silently dropped.
fn emit_right_modifiers(context: &mut Context, out: &mut String) {
    let mut consumed = 0;
    let mut is_array = false;

    for id in context.modifiers.iter().rev() {
        match context.types.get(id) {
            Some(Type::Array(array)) => {
                is_array = true;
                let _ = write!(out, "[{}]", array.nelems);
                consumed += 1;
            }
            // cv-qualifiers adjacent to an array extent trip gcc and clang;
            // see https://gcc.gnu.org/bugzilla/show_bug.cgi?id=8354
            Some(Type::Const(_)) | Some(Type::Volatile(_)) if is_array => {
                consumed += 1;
            }
            _ => break,
        }
    }

    let keep = context.modifiers.len() - consumed;
    context.modifiers.truncate(keep);

    if !context.modifiers.is_empty() {
        out.push_str(" /* Unused modifiers: ");

        for (i, id) in context.modifiers.iter().enumerate() {
            let _ = write!(out, "{id}");
            if i + 1 != context.modifiers.len() {
                out.push_str(", ");
            }
        }

        out.push_str(" */ ");
        context.modifiers.clear();
    }
}

/// Int, Float, Void and typedef references all reduce to a bare name with
/// the usual modifier and identifier machinery around it.
fn emit_base_name(context: &mut Context, out: &mut String, id: u32, name: &str) -> Result<()> {
    emit_type_comment(context, out, id);
    emit_indent(context, out);
    emit_left_modifiers(context, out);

    out.push_str(name);

    emit_middle_modifiers(context, out);
    emit_identifier(context, out);
    emit_right_modifiers(context, out);

    Ok(())
}

fn emit_struct_or_union(
    context: &mut Context,
    out: &mut String,
    id: u32,
    r#struct: &Struct,
    is_union: bool,
    as_definition: bool,
) -> Result<()> {
    emit_type_comment(context, out, id);
    emit_indent(context, out);
    emit_left_modifiers(context, out);

    out.push_str(match is_union {
        true => "union",
        false => "struct",
    });

    if let Some(name) = r#struct.name.as_ref().filter(|name| !name.is_empty()) {
        let _ = write!(out, " {name}");
    }

    let emit_body = as_definition || r#struct.name.is_none();
    if emit_body {
        context.push_state();
        out.push_str(" {\n");
        context.increase_indent();

        for member in &r#struct.members {
            if let Some(name) = &member.name {
                context.set_variable_name(name);
            }

            emit_type(context, out, member.type_id, false)?;

            if let Some(bits) = member.bitfield_size.filter(|bits| *bits != 0) {
                let _ = write!(out, " : {bits}");
            }

            out.push_str(";\n");
        }

        context.decrease_indent();
        emit_indent(context, out);
        out.push('}');
        context.pop_state();
    }

    emit_middle_modifiers(context, out);
    emit_identifier(context, out);
    emit_right_modifiers(context, out);

    Ok(())
}

fn emit_enum(
    context: &mut Context,
    out: &mut String,
    id: u32,
    r#enum: &Enum,
    as_definition: bool,
) -> Result<()> {
    emit_type_comment(context, out, id);
    emit_indent(context, out);
    emit_left_modifiers(context, out);

    out.push_str("enum");
    if let Some(name) = &r#enum.name {
        let _ = write!(out, " {name}");
    }

    let emit_body = (as_definition && !r#enum.values.is_empty())
        || (!as_definition && r#enum.name.is_none());

    if emit_body {
        out.push_str(" {\n");
        context.increase_indent();

        for (i, value) in r#enum.values.iter().enumerate() {
            emit_indent(context, out);
            let _ = write!(out, "{} = {}", value.name, value.val);

            if i + 1 != r#enum.values.len() {
                out.push(',');
            }
            out.push('\n');
        }

        context.decrease_indent();
        emit_indent(context, out);
        out.push('}');
    }

    emit_middle_modifiers(context, out);
    emit_identifier(context, out);
    emit_right_modifiers(context, out);

    Ok(())
}

fn emit_typedef(
    context: &mut Context,
    out: &mut String,
    id: u32,
    typedef: &Typedef,
    as_definition: bool,
) -> Result<()> {
    if !as_definition {
        return emit_base_name(context, out, id, &typedef.name);
    }

    emit_type_comment(context, out, id);
    out.push_str("typedef\n");
    context.increase_indent();

    // The target's base type consumes the typedef name as its identifier.
    context.set_typedef_name(&typedef.name);
    emit_type(context, out, typedef.type_id, false)?;

    if let Some(name) = context.take_typedef_name() {
        let _ = write!(out, " {name}");
    }

    context.decrease_indent();
    Ok(())
}

fn emit_fwd(context: &mut Context, out: &mut String, id: u32, fwd: &Fwd) -> Result<()> {
    emit_type_comment(context, out, id);
    emit_indent(context, out);
    emit_left_modifiers(context, out);

    let _ = write!(
        out,
        "{} {}",
        match fwd.is_union {
            true => "union",
            false => "struct",
        },
        fwd.name
    );

    emit_middle_modifiers(context, out);
    emit_identifier(context, out);
    emit_right_modifiers(context, out);

    Ok(())
}

fn emit_func_proto(
    context: &mut Context,
    out: &mut String,
    id: u32,
    proto: &FuncProto,
) -> Result<()> {
    context.filter_func_proto_modifiers();
    emit_type_comment(context, out, id);
    context.increase_indent();

    context.push_state();
    emit_type(context, out, proto.return_type_id, false)?;
    context.pop_state();

    context.increase_indent();
    emit_indent(context, out);
    out.push('\n');
    emit_indent(context, out);
    out.push('(');

    emit_left_modifiers(context, out);
    emit_middle_modifiers(context, out);
    emit_identifier(context, out);
    emit_right_modifiers(context, out);

    out.push_str(")(\n");
    context.increase_indent();

    context.push_state();
    for (i, param) in proto.params.iter().enumerate() {
        emit_type(context, out, param.type_id, false)?;

        let is_last = i + 1 == proto.params.len();
        if !is_last || proto.is_variadic {
            out.push(',');
        }
        out.push('\n');
    }
    context.pop_state();

    if proto.is_variadic {
        emit_indent(context, out);
        out.push_str("...\n");
    }

    context.decrease_indent();
    emit_indent(context, out);
    out.push(')');

    context.decrease_indent();
    context.decrease_indent();
    Ok(())
}
