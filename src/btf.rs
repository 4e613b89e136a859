//! Decoded representation of BTF types and the [`Btf`] database.
//!
//! Each wire record is decoded into one [`Type`] variant with its names
//! resolved and its per-kind encoding rules checked. The per-kind
//! constructors validate as they parse; a record that fails validation
//! aborts the whole decode.

use std::collections::BTreeMap;
use std::path::Path;

use crate::cbtf;
use crate::error::{Error, FileRange, Result};
use crate::obj::BlobList;
use crate::reader::Reader;

/// Tag identifying a [`Type`] variant. Ordinals match the on-wire kind
/// encoding.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Kind {
    Void = 0,
    Int = 1,
    Ptr = 2,
    Array = 3,
    Struct = 4,
    Union = 5,
    Enum = 6,
    Fwd = 7,
    Typedef = 8,
    Volatile = 9,
    Const = 10,
    Restrict = 11,
    Func = 12,
    FuncProto = 13,
    Var = 14,
    DataSec = 15,
    Float = 16,
}

impl Kind {
    /// Map an on-wire kind ordinal to a [`Kind`]. Returns `None` for values
    /// outside the defined range.
    pub(crate) fn from_wire(kind: u32) -> Option<Kind> {
        Some(match kind {
            0 => Kind::Void,
            1 => Kind::Int,
            2 => Kind::Ptr,
            3 => Kind::Array,
            4 => Kind::Struct,
            5 => Kind::Union,
            6 => Kind::Enum,
            7 => Kind::Fwd,
            8 => Kind::Typedef,
            9 => Kind::Volatile,
            10 => Kind::Const,
            11 => Kind::Restrict,
            12 => Kind::Func,
            13 => Kind::FuncProto,
            14 => Kind::Var,
            15 => Kind::DataSec,
            16 => Kind::Float,
            _ => return None,
        })
    }
}

/// Decoded representation of a BTF type record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Type {
    Void,
    Int(Int),
    Ptr(Ptr),
    Array(Array),
    Struct(Struct),
    Union(Union),
    Enum(Enum),
    Fwd(Fwd),
    Typedef(Typedef),
    Volatile(Volatile),
    Const(Const),
    Restrict(Restrict),
    Func(Func),
    FuncProto(FuncProto),
    Var(Var),
    DataSec(DataSec),
    Float(Float),
}

impl Type {
    pub fn kind(&self) -> Kind {
        match self {
            Type::Void => Kind::Void,
            Type::Int(_) => Kind::Int,
            Type::Ptr(_) => Kind::Ptr,
            Type::Array(_) => Kind::Array,
            Type::Struct(_) => Kind::Struct,
            Type::Union(_) => Kind::Union,
            Type::Enum(_) => Kind::Enum,
            Type::Fwd(_) => Kind::Fwd,
            Type::Typedef(_) => Kind::Typedef,
            Type::Volatile(_) => Kind::Volatile,
            Type::Const(_) => Kind::Const,
            Type::Restrict(_) => Kind::Restrict,
            Type::Func(_) => Kind::Func,
            Type::FuncProto(_) => Kind::FuncProto,
            Type::Var(_) => Kind::Var,
            Type::DataSec(_) => Kind::DataSec,
            Type::Float(_) => Kind::Float,
        }
    }
}

fn invalid(kind: Kind, offset: u64, size: usize) -> Error {
    Error::InvalidEncoding {
        kind,
        range: FileRange { offset, size },
    }
}

fn reserve<T>(records: u32) -> Result<Vec<T>> {
    let mut list = Vec::new();
    list.try_reserve(records as usize)
        .map_err(|_| Error::MemoryAllocation)?;
    Ok(list)
}

/// Integer encoding flag. At most one is set per `Int` record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IntEncoding {
    None,
    Signed,
    Char,
    Bool,
}

/// Decoded `BTF_KIND_INT`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Int {
    pub name: String,
    /// Size in bytes, one of 1, 2, 4, 8 or 16.
    pub size: u32,
    pub encoding: IntEncoding,
    /// Bit offset of the value inside its storage unit.
    pub offset: u8,
    pub bits: u8,
}

impl Int {
    pub(crate) fn from_wire(
        blobs: &mut BlobList,
        cur: usize,
        hdr: &cbtf::btf_type,
        start: u64,
    ) -> Result<Int> {
        let size = cbtf::BTF_TYPE_HEADER_LEN + cbtf::BTF_INT_LEN;
        if hdr.kind_flag() || hdr.vlen() != 0 {
            return Err(invalid(Kind::Int, start, size));
        }

        match hdr.size() {
            1 | 2 | 4 | 8 | 16 => (),
            _ => return Err(invalid(Kind::Int, start, size)),
        }

        let name = blobs.string(hdr.name_off as u64)?;
        let info = cbtf::btf_int::from_reader(blobs.reader(cur))?;

        let is_signed = info.encoding() & cbtf::BTF_INT_SIGNED != 0;
        let is_char = info.encoding() & cbtf::BTF_INT_CHAR != 0;
        let is_bool = info.encoding() & cbtf::BTF_INT_BOOL != 0;

        if is_signed as u32 + is_char as u32 + is_bool as u32 > 1 {
            return Err(invalid(Kind::Int, start, size));
        }

        let encoding = if is_signed {
            IntEncoding::Signed
        } else if is_char {
            IntEncoding::Char
        } else if is_bool {
            IntEncoding::Bool
        } else {
            IntEncoding::None
        };

        let bits = info.bits();
        if bits > 128 || bits > hdr.size() * 8 {
            return Err(invalid(Kind::Int, start, size));
        }

        let offset = info.offset();
        if offset + bits > hdr.size() * 8 {
            return Err(invalid(Kind::Int, start, size));
        }

        Ok(Int {
            name,
            size: hdr.size(),
            encoding,
            offset: offset as u8,
            bits: bits as u8,
        })
    }
}

/// Decoded `BTF_KIND_PTR`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Ptr {
    pub type_id: u32,
}

impl Ptr {
    pub(crate) fn from_wire(hdr: &cbtf::btf_type, start: u64) -> Result<Ptr> {
        if hdr.name_off != 0 || hdr.kind_flag() || hdr.vlen() != 0 {
            return Err(invalid(Kind::Ptr, start, cbtf::BTF_TYPE_HEADER_LEN));
        }

        Ok(Ptr {
            type_id: hdr.r#type(),
        })
    }
}

/// Decoded `BTF_KIND_ARRAY`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Array {
    pub type_id: u32,
    pub index_type_id: u32,
    pub nelems: u32,
}

impl Array {
    pub(crate) fn from_wire(
        blobs: &mut BlobList,
        cur: usize,
        hdr: &cbtf::btf_type,
        start: u64,
    ) -> Result<Array> {
        if hdr.name_off != 0 || hdr.kind_flag() || hdr.vlen() != 0 || hdr.size() != 0 {
            return Err(invalid(
                Kind::Array,
                start,
                cbtf::BTF_TYPE_HEADER_LEN + cbtf::BTF_ARRAY_LEN,
            ));
        }

        let array = cbtf::btf_array::from_reader(blobs.reader(cur))?;
        Ok(Array {
            type_id: array.r#type,
            index_type_id: array.index_type,
            nelems: array.nelems,
        })
    }
}

/// A [`Struct`] (or union) member. `offset` is in bits.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Member {
    pub name: Option<String>,
    pub type_id: u32,
    pub offset: u32,
    /// Present iff the record used the bitfield member encoding. May be
    /// `Some(0)` for non-bitfield members of such records.
    pub bitfield_size: Option<u8>,
}

/// Decoded `BTF_KIND_STRUCT`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Struct {
    pub name: Option<String>,
    pub size: u32,
    pub members: Vec<Member>,
}

/// Decoded `BTF_KIND_UNION`.
pub type Union = Struct;

impl Struct {
    pub(crate) fn from_wire(
        blobs: &mut BlobList,
        cur: usize,
        hdr: &cbtf::btf_type,
    ) -> Result<Struct> {
        let name = blobs.opt_string(hdr.name_off)?;
        let mut members = reserve(hdr.vlen())?;

        for _ in 0..hdr.vlen() {
            let member = cbtf::btf_member::from_reader(blobs.reader(cur))?;
            let member_name = blobs.opt_string(member.name_off)?;

            let (offset, bitfield_size) = match hdr.kind_flag() {
                true => (member.offset & 0xffffff, Some((member.offset >> 24) as u8)),
                false => (member.offset, None),
            };

            members.push(Member {
                name: member_name,
                type_id: member.r#type,
                offset,
                bitfield_size,
            });
        }

        Ok(Struct {
            name,
            size: hdr.size(),
            members,
        })
    }
}

/// One [`Enum`] value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnumValue {
    pub name: String,
    pub val: i32,
}

/// Decoded `BTF_KIND_ENUM`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Enum {
    pub name: Option<String>,
    /// Size in bytes, one of 1, 2, 4 or 8.
    pub size: u32,
    pub values: Vec<EnumValue>,
}

impl Enum {
    pub(crate) fn from_wire(
        blobs: &mut BlobList,
        cur: usize,
        hdr: &cbtf::btf_type,
        start: u64,
    ) -> Result<Enum> {
        let size = cbtf::BTF_TYPE_HEADER_LEN + hdr.vlen() as usize * cbtf::BTF_ENUM_LEN;
        if hdr.kind_flag() {
            return Err(invalid(Kind::Enum, start, size));
        }

        match hdr.size() {
            1 | 2 | 4 | 8 => (),
            _ => return Err(invalid(Kind::Enum, start, size)),
        }

        let name = blobs.opt_string(hdr.name_off)?;
        let mut values = reserve(hdr.vlen())?;

        for _ in 0..hdr.vlen() {
            let value = cbtf::btf_enum::from_reader(blobs.reader(cur))?;
            if value.name_off == 0 {
                return Err(invalid(Kind::Enum, start, size));
            }

            values.push(EnumValue {
                name: blobs.string(value.name_off as u64)?,
                val: value.val,
            });
        }

        Ok(Enum {
            name,
            size: hdr.size(),
            values,
        })
    }
}

/// Decoded `BTF_KIND_FWD`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Fwd {
    pub name: String,
    pub is_union: bool,
}

impl Fwd {
    pub(crate) fn from_wire(
        blobs: &mut BlobList,
        hdr: &cbtf::btf_type,
        start: u64,
    ) -> Result<Fwd> {
        if hdr.name_off == 0 || hdr.vlen() != 0 || hdr.size() != 0 {
            return Err(invalid(Kind::Fwd, start, cbtf::BTF_TYPE_HEADER_LEN));
        }

        Ok(Fwd {
            name: blobs.string(hdr.name_off as u64)?,
            is_union: hdr.kind_flag(),
        })
    }
}

/// Decoded `BTF_KIND_TYPEDEF`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Typedef {
    pub name: String,
    pub type_id: u32,
}

impl Typedef {
    pub(crate) fn from_wire(
        blobs: &mut BlobList,
        hdr: &cbtf::btf_type,
        start: u64,
    ) -> Result<Typedef> {
        if hdr.name_off == 0 || hdr.kind_flag() || hdr.vlen() != 0 {
            return Err(invalid(Kind::Typedef, start, cbtf::BTF_TYPE_HEADER_LEN));
        }

        Ok(Typedef {
            name: blobs.string(hdr.name_off as u64)?,
            type_id: hdr.r#type(),
        })
    }
}

/// Decoded `BTF_KIND_VOLATILE`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Volatile {
    pub type_id: u32,
}

/// Decoded `BTF_KIND_CONST`.
pub type Const = Volatile;

/// Decoded `BTF_KIND_RESTRICT`.
pub type Restrict = Volatile;

impl Volatile {
    pub(crate) fn from_wire(kind: Kind, hdr: &cbtf::btf_type, start: u64) -> Result<Volatile> {
        if hdr.name_off != 0 || hdr.kind_flag() || hdr.vlen() != 0 {
            return Err(invalid(kind, start, cbtf::BTF_TYPE_HEADER_LEN));
        }

        Ok(Volatile {
            type_id: hdr.r#type(),
        })
    }
}

/// `Func` linkage, encoded in the record's `vlen`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FuncLinkage {
    Static,
    Global,
    Extern,
}

/// Decoded `BTF_KIND_FUNC`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Func {
    pub name: String,
    /// Id of the function's `FuncProto`.
    pub type_id: u32,
    pub linkage: FuncLinkage,
}

impl Func {
    pub(crate) fn from_wire(
        blobs: &mut BlobList,
        hdr: &cbtf::btf_type,
        start: u64,
    ) -> Result<Func> {
        let linkage = match hdr.vlen() {
            0 => FuncLinkage::Static,
            1 => FuncLinkage::Global,
            2 => FuncLinkage::Extern,
            _ => return Err(invalid(Kind::Func, start, cbtf::BTF_TYPE_HEADER_LEN)),
        };

        if hdr.name_off == 0 || hdr.kind_flag() {
            return Err(invalid(Kind::Func, start, cbtf::BTF_TYPE_HEADER_LEN));
        }

        Ok(Func {
            name: blobs.string(hdr.name_off as u64)?,
            type_id: hdr.r#type(),
            linkage,
        })
    }
}

/// A [`FuncProto`] parameter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Param {
    pub name: Option<String>,
    pub type_id: u32,
}

/// Decoded `BTF_KIND_FUNC_PROTO`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FuncProto {
    pub return_type_id: u32,
    pub params: Vec<Param>,
    pub is_variadic: bool,
}

impl FuncProto {
    pub(crate) fn from_wire(
        blobs: &mut BlobList,
        cur: usize,
        hdr: &cbtf::btf_type,
        start: u64,
    ) -> Result<FuncProto> {
        if hdr.name_off != 0 || hdr.kind_flag() {
            return Err(invalid(Kind::FuncProto, start, cbtf::BTF_TYPE_HEADER_LEN));
        }

        let mut params = reserve(hdr.vlen())?;
        for _ in 0..hdr.vlen() {
            let param = cbtf::btf_param::from_reader(blobs.reader(cur))?;
            params.push(Param {
                name: blobs.opt_string(param.name_off)?,
                type_id: param.r#type,
            });
        }

        // A trailing unnamed parameter of type 0 marks a variadic function.
        let mut is_variadic = false;
        if let Some(last) = params.last() {
            if last.name.is_none() && last.type_id == 0 {
                params.pop();
                is_variadic = true;
            }
        }

        Ok(FuncProto {
            return_type_id: hdr.r#type(),
            params,
            is_variadic,
        })
    }
}

/// Decoded `BTF_KIND_VAR`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Var {
    pub name: String,
    pub type_id: u32,
    pub linkage: u32,
}

impl Var {
    pub(crate) fn from_wire(
        blobs: &mut BlobList,
        cur: usize,
        hdr: &cbtf::btf_type,
        start: u64,
    ) -> Result<Var> {
        if hdr.name_off == 0 || hdr.kind_flag() || hdr.vlen() != 0 {
            return Err(invalid(
                Kind::Var,
                start,
                cbtf::BTF_TYPE_HEADER_LEN + cbtf::BTF_VAR_LEN,
            ));
        }

        let name = blobs.string(hdr.name_off as u64)?;
        let var = cbtf::btf_var::from_reader(blobs.reader(cur))?;

        Ok(Var {
            name,
            type_id: hdr.r#type(),
            linkage: var.linkage,
        })
    }
}

/// A [`DataSec`] entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VarSecinfo {
    pub type_id: u32,
    pub offset: u32,
    pub size: u32,
}

/// Decoded `BTF_KIND_DATASEC`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DataSec {
    pub name: String,
    pub size: u32,
    pub variables: Vec<VarSecinfo>,
}

impl DataSec {
    pub(crate) fn from_wire(
        blobs: &mut BlobList,
        cur: usize,
        hdr: &cbtf::btf_type,
        start: u64,
    ) -> Result<DataSec> {
        let size = cbtf::BTF_TYPE_HEADER_LEN + hdr.vlen() as usize * cbtf::BTF_VAR_SECINFO_LEN;
        if hdr.name_off == 0 || hdr.kind_flag() {
            return Err(invalid(Kind::DataSec, start, size));
        }

        let name = blobs.string(hdr.name_off as u64)?;
        let mut variables = reserve(hdr.vlen())?;

        for _ in 0..hdr.vlen() {
            let secinfo = cbtf::btf_var_secinfo::from_reader(blobs.reader(cur))?;
            variables.push(VarSecinfo {
                type_id: secinfo.r#type,
                offset: secinfo.offset,
                size: secinfo.size,
            });
        }

        Ok(DataSec {
            name,
            size: hdr.size(),
            variables,
        })
    }
}

/// Decoded `BTF_KIND_FLOAT`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Float {
    pub name: String,
    /// Size in bytes, one of 2, 4, 8, 12 or 16.
    pub size: u32,
}

impl Float {
    pub(crate) fn from_wire(
        blobs: &mut BlobList,
        hdr: &cbtf::btf_type,
        start: u64,
    ) -> Result<Float> {
        if hdr.name_off == 0 || hdr.kind_flag() || hdr.vlen() != 0 {
            return Err(invalid(Kind::Float, start, cbtf::BTF_TYPE_HEADER_LEN));
        }

        match hdr.size() {
            2 | 4 | 8 | 12 | 16 => (),
            _ => return Err(invalid(Kind::Float, start, cbtf::BTF_TYPE_HEADER_LEN)),
        }

        Ok(Float {
            name: blobs.string(hdr.name_off as u64)?,
            size: hdr.size(),
        })
    }
}

static VOID: Type = Type::Void;

/// Which reader adapter backs a [`Btf`] built from a file.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Backend {
    /// Stream the file through a plain read/seek cursor.
    #[default]
    File,
    /// Map the whole file and decode from memory.
    Mmap,
}

/// Parsed BTF type database with a single id space across all input blobs.
///
/// Ids are assigned in reading order, starting at 1; id 0 is the implicit
/// `void` type and is not stored. The database is immutable once built.
pub struct Btf {
    types: BTreeMap<u32, Type>,
}

impl Btf {
    /// Parse a single BTF file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Btf> {
        Btf::from_file_with_backend(path, Backend::File)
    }

    /// Parse a single BTF file using an explicit reader adapter.
    pub fn from_file_with_backend<P: AsRef<Path>>(path: P, backend: Backend) -> Result<Btf> {
        let reader = match backend {
            Backend::File => Reader::from_file(path.as_ref())?,
            Backend::Mmap => Reader::from_mmap(path.as_ref())?,
        };

        Btf::from_readers(vec![reader])
    }

    /// Parse an ordered list of BTF files into a single database. Ids and
    /// string offsets continue across blobs in input order.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Btf> {
        let mut readers = Vec::with_capacity(paths.len());
        for path in paths {
            readers.push(Reader::from_file(path.as_ref())?);
        }

        Btf::from_readers(readers)
    }

    /// Performs the same actions as `from_file()`, but fed with a byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Result<Btf> {
        Btf::from_readers(vec![Reader::from_bytes(bytes.to_vec())])
    }

    /// Performs the same actions as `from_files()`, but fed with byte slices.
    pub fn from_bytes_list(blobs: &[&[u8]]) -> Result<Btf> {
        let readers = blobs
            .iter()
            .map(|b| Reader::from_bytes(b.to_vec()))
            .collect();

        Btf::from_readers(readers)
    }

    fn from_readers(readers: Vec<Reader>) -> Result<Btf> {
        Ok(Btf {
            types: BlobList::new(readers)?.parse()?,
        })
    }

    /// Look up a type by id. Id 0 resolves to [`Type::Void`].
    pub fn get(&self, id: u32) -> Option<&Type> {
        match id {
            0 => Some(&VOID),
            id => self.types.get(&id),
        }
    }

    /// Look up the kind of a type by id.
    pub fn kind(&self, id: u32) -> Option<Kind> {
        self.get(id).map(Type::kind)
    }

    /// Number of decoded types, the implicit void excluded.
    pub fn count(&self) -> u32 {
        self.types.len() as u32
    }

    /// Iterate over `(id, type)` pairs in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Type)> + '_ {
        self.types.iter().map(|(id, r#type)| (*id, r#type))
    }

    pub(crate) fn types(&self) -> &BTreeMap<u32, Type> {
        &self.types
    }
}
