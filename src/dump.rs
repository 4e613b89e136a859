//! `bpftool btf dump file`-compatible rendering of decoded types.
//!
//! The per-kind templates match `bpftool`'s output byte for byte so the
//! `dump-btf` wrapper can be diffed against it directly.

use std::fmt;

use crate::btf::*;

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Void => "VOID",
            Kind::Int => "INT",
            Kind::Ptr => "PTR",
            Kind::Array => "ARRAY",
            Kind::Struct => "STRUCT",
            Kind::Union => "UNION",
            Kind::Enum => "ENUM",
            Kind::Fwd => "FWD",
            Kind::Typedef => "TYPEDEF",
            Kind::Volatile => "VOLATILE",
            Kind::Const => "CONST",
            Kind::Restrict => "RESTRICT",
            Kind::Func => "FUNC",
            Kind::FuncProto => "FUNC_PROTO",
            Kind::Var => "VAR",
            Kind::DataSec => "DATASEC",
            Kind::Float => "FLOAT",
        };

        f.write_str(name)
    }
}

impl fmt::Display for IntEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IntEncoding::None => "(none)",
            IntEncoding::Signed => "SIGNED",
            IntEncoding::Char => "CHAR",
            IntEncoding::Bool => "BOOL",
        };

        f.write_str(name)
    }
}

impl fmt::Display for FuncLinkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FuncLinkage::Static => "static",
            FuncLinkage::Global => "global",
            FuncLinkage::Extern => "extern",
        };

        f.write_str(name)
    }
}

fn opt_name(name: &Option<String>) -> &str {
    name.as_deref().unwrap_or("(anon)")
}

fn fmt_struct(f: &mut fmt::Formatter<'_>, r#struct: &Struct) -> fmt::Result {
    write!(
        f,
        "'{}' size={} vlen={}",
        opt_name(&r#struct.name),
        r#struct.size,
        r#struct.members.len()
    )?;

    if !r#struct.members.is_empty() {
        writeln!(f)?;
    }

    for (i, member) in r#struct.members.iter().enumerate() {
        write!(
            f,
            "\t'{}' type_id={} bits_offset={}",
            opt_name(&member.name),
            member.type_id,
            member.offset
        )?;

        if let Some(bitfield_size) = member.bitfield_size {
            if bitfield_size != 0 {
                write!(f, " bitfield_size={bitfield_size}")?;
            }
        }

        if i + 1 != r#struct.members.len() {
            writeln!(f)?;
        }
    }

    Ok(())
}

fn fmt_enum(f: &mut fmt::Formatter<'_>, r#enum: &Enum) -> fmt::Result {
    write!(
        f,
        "'{}' size={} vlen={}",
        opt_name(&r#enum.name),
        r#enum.size,
        r#enum.values.len()
    )?;

    if !r#enum.values.is_empty() {
        writeln!(f)?;
    }

    for (i, value) in r#enum.values.iter().enumerate() {
        // `val` is signed in the BTF documentation but `bpftool` prints it
        // as unsigned.
        write!(f, "\t'{}' val={}", value.name, value.val as u32)?;

        if i + 1 != r#enum.values.len() {
            writeln!(f)?;
        }
    }

    Ok(())
}

// The decoder absorbs the trailing unnamed parameter of a variadic function
// into `is_variadic`; re-materialize it the way `bpftool` prints it.
fn fmt_func_proto(f: &mut fmt::Formatter<'_>, proto: &FuncProto) -> fmt::Result {
    let mut vlen = proto.params.len();
    if proto.is_variadic {
        vlen += 1;
    }

    write!(
        f,
        "'(anon)' ret_type_id={} vlen={}",
        proto.return_type_id, vlen
    )?;

    if !proto.params.is_empty() {
        writeln!(f)?;
    }

    for (i, param) in proto.params.iter().enumerate() {
        write!(f, "\t'{}' type_id={}", opt_name(&param.name), param.type_id)?;

        if i + 1 != proto.params.len() {
            writeln!(f)?;
        }
    }

    if proto.is_variadic {
        if !proto.params.is_empty() {
            writeln!(f)?;
        }

        write!(f, "\t'(anon)' type_id=0")?;
    }

    Ok(())
}

fn fmt_data_sec(f: &mut fmt::Formatter<'_>, sec: &DataSec) -> fmt::Result {
    write!(
        f,
        "'{}' size={} vlen={}",
        sec.name,
        sec.size,
        sec.variables.len()
    )?;

    if !sec.variables.is_empty() {
        writeln!(f)?;
    }

    for (i, variable) in sec.variables.iter().enumerate() {
        write!(
            f,
            "\ttype_id={} offset={} size={}",
            variable.type_id, variable.offset, variable.size
        )?;

        if i + 1 != sec.variables.len() {
            writeln!(f)?;
        }
    }

    Ok(())
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => Ok(()),
            Type::Int(int) => write!(
                f,
                "'{}' size={} bits_offset={} nr_bits={} encoding={}",
                int.name, int.size, int.offset, int.bits, int.encoding
            ),
            Type::Ptr(ptr) => write!(f, "'(anon)' type_id={}", ptr.type_id),
            Type::Array(array) => write!(
                f,
                "'(anon)' type_id={} index_type_id={} nr_elems={}",
                array.type_id, array.index_type_id, array.nelems
            ),
            Type::Struct(r#struct) | Type::Union(r#struct) => fmt_struct(f, r#struct),
            Type::Enum(r#enum) => fmt_enum(f, r#enum),
            Type::Fwd(fwd) => write!(
                f,
                "'{}' fwd_kind={}",
                fwd.name,
                if fwd.is_union { "union" } else { "struct" }
            ),
            Type::Typedef(typedef) => {
                write!(f, "'{}' type_id={}", typedef.name, typedef.type_id)
            }
            Type::Volatile(modifier) | Type::Const(modifier) | Type::Restrict(modifier) => {
                write!(f, "'(anon)' type_id={}", modifier.type_id)
            }
            Type::Func(func) => write!(
                f,
                "'{}' type_id={} linkage={}",
                func.name, func.type_id, func.linkage
            ),
            Type::FuncProto(proto) => fmt_func_proto(f, proto),
            Type::Var(var) => {
                write!(f, "'{}' type_id={}, linkage=", var.name, var.type_id)?;
                match var.linkage {
                    0 => f.write_str("static"),
                    1 => f.write_str("global-alloc"),
                    linkage => write!(f, "{linkage}"),
                }
            }
            Type::DataSec(sec) => fmt_data_sec(f, sec),
            Type::Float(float) => write!(f, "'{}' size={}", float.name, float.size),
        }
    }
}
