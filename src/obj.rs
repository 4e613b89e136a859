//! Multi-blob decoding driver. Opens every input through the stream reader,
//! detects endianness, validates headers and walks each type section into a
//! single map with a unified id space.

use std::collections::BTreeMap;

use crate::btf::*;
use crate::cbtf;
use crate::error::{Error, FileRange, Result};
use crate::reader::{Endianness, Reader};

/// One input blob: its reader plus the parsed file header.
pub(crate) struct Blob {
    reader: Reader,
    header: cbtf::btf_header,
}

/// Ordered list of input blobs. String offsets are resolved as if every
/// blob's string section were concatenated in input order.
pub(crate) struct BlobList {
    blobs: Vec<Blob>,
}

impl BlobList {
    pub(crate) fn new(readers: Vec<Reader>) -> Result<BlobList> {
        let mut blobs = Vec::with_capacity(readers.len());

        for mut reader in readers {
            // The magic tells the byte order before any other multi-byte
            // read can be made.
            reader.set_endianness(Endianness::Little);
            reader.seek(0)?;

            let endianness = match reader.u16()? {
                cbtf::BTF_MAGIC => Endianness::Little,
                cbtf::BTF_MAGIC_SWAPPED => Endianness::Big,
                _ => return Err(Error::InvalidMagic),
            };

            reader.set_endianness(endianness);
            reader.seek(0)?;

            let header = cbtf::btf_header::from_reader(&mut reader)?;
            blobs.push(Blob { reader, header });
        }

        Ok(BlobList { blobs })
    }

    pub(crate) fn reader(&mut self, blob: usize) -> &mut Reader {
        &mut self.blobs[blob].reader
    }

    /// Resolve a string offset against the concatenated string sections.
    /// The owning blob's cursor is restored before returning.
    pub(crate) fn string(&mut self, offset: u64) -> Result<String> {
        let mut start = 0u64;

        for blob in self.blobs.iter_mut() {
            let str_len = blob.header.str_len as u64;

            if offset < start + str_len {
                let absolute =
                    blob.header.hdr_len as u64 + blob.header.str_off as u64 + (offset - start);
                return read_cstr(&mut blob.reader, absolute, offset);
            }

            start += str_len;
        }

        Err(Error::InvalidStringOffset(offset))
    }

    /// `name_off = 0` means unnamed.
    pub(crate) fn opt_string(&mut self, name_off: u32) -> Result<Option<String>> {
        match name_off {
            0 => Ok(None),
            off => Ok(Some(self.string(off as u64)?)),
        }
    }

    /// Walk every blob's type section in input order, assigning consecutive
    /// ids from 1.
    pub(crate) fn parse(mut self) -> Result<BTreeMap<u32, Type>> {
        let mut types = BTreeMap::new();
        let mut id = 1u32;

        for cur in 0..self.blobs.len() {
            let header = &self.blobs[cur].header;
            let section_start = header.hdr_len as u64 + header.type_off as u64;
            let section_end = section_start + header.type_len as u64;

            self.reader(cur).seek(section_start)?;

            loop {
                let start = self.reader(cur).offset();
                if start >= section_end {
                    break;
                }

                let hdr = cbtf::btf_type::from_reader(self.reader(cur))?;
                let range = FileRange {
                    offset: start,
                    size: cbtf::BTF_TYPE_HEADER_LEN,
                };

                let kind = Kind::from_wire(hdr.kind()).ok_or(Error::InvalidKind(range))?;
                let r#type = match kind {
                    // Kind 0 is reserved for void, which is never encoded as
                    // a record.
                    Kind::Void => return Err(Error::UnsupportedKind(range)),
                    Kind::Int => Type::Int(Int::from_wire(&mut self, cur, &hdr, start)?),
                    Kind::Ptr => Type::Ptr(Ptr::from_wire(&hdr, start)?),
                    Kind::Array => Type::Array(Array::from_wire(&mut self, cur, &hdr, start)?),
                    Kind::Struct => Type::Struct(Struct::from_wire(&mut self, cur, &hdr)?),
                    Kind::Union => Type::Union(Struct::from_wire(&mut self, cur, &hdr)?),
                    Kind::Enum => Type::Enum(Enum::from_wire(&mut self, cur, &hdr, start)?),
                    Kind::Fwd => Type::Fwd(Fwd::from_wire(&mut self, &hdr, start)?),
                    Kind::Typedef => Type::Typedef(Typedef::from_wire(&mut self, &hdr, start)?),
                    Kind::Volatile => {
                        Type::Volatile(Volatile::from_wire(Kind::Volatile, &hdr, start)?)
                    }
                    Kind::Const => Type::Const(Volatile::from_wire(Kind::Const, &hdr, start)?),
                    Kind::Restrict => {
                        Type::Restrict(Volatile::from_wire(Kind::Restrict, &hdr, start)?)
                    }
                    Kind::Func => Type::Func(Func::from_wire(&mut self, &hdr, start)?),
                    Kind::FuncProto => {
                        Type::FuncProto(FuncProto::from_wire(&mut self, cur, &hdr, start)?)
                    }
                    Kind::Var => Type::Var(Var::from_wire(&mut self, cur, &hdr, start)?),
                    Kind::DataSec => Type::DataSec(DataSec::from_wire(&mut self, cur, &hdr, start)?),
                    Kind::Float => Type::Float(Float::from_wire(&mut self, &hdr, start)?),
                };

                types.insert(id, r#type);
                id += 1;
            }
        }

        Ok(types)
    }
}

/// Read a NUL-terminated string at an absolute offset, restoring the cursor
/// afterwards.
fn read_cstr(reader: &mut Reader, absolute: u64, string_offset: u64) -> Result<String> {
    let saved = reader.offset();
    reader.seek(absolute)?;

    let mut bytes = Vec::new();
    loop {
        match reader.u8()? {
            0 => break,
            b => bytes.push(b),
        }
    }

    reader.seek(saved)?;

    String::from_utf8(bytes).map_err(|_| Error::InvalidStringOffset(string_offset))
}
