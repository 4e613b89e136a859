//! Shared helpers: a byte-level builder for synthetic BTF blobs and
//! loaders covering every input adapter.

#![allow(dead_code)]

use std::io::Write;

use btfc::{Backend, Btf};

pub const KIND_INT: u32 = 1;
pub const KIND_PTR: u32 = 2;
pub const KIND_ARRAY: u32 = 3;
pub const KIND_STRUCT: u32 = 4;
pub const KIND_UNION: u32 = 5;
pub const KIND_ENUM: u32 = 6;
pub const KIND_FWD: u32 = 7;
pub const KIND_TYPEDEF: u32 = 8;
pub const KIND_VOLATILE: u32 = 9;
pub const KIND_CONST: u32 = 10;
pub const KIND_RESTRICT: u32 = 11;
pub const KIND_FUNC: u32 = 12;
pub const KIND_FUNC_PROTO: u32 = 13;
pub const KIND_VAR: u32 = 14;
pub const KIND_DATASEC: u32 = 15;
pub const KIND_FLOAT: u32 = 16;

pub const INT_SIGNED: u32 = 1;
pub const INT_CHAR: u32 = 2;
pub const INT_BOOL: u32 = 4;

/// Builds one self-contained blob: header, type section, string section.
pub struct BlobBuilder {
    little: bool,
    types: Vec<u8>,
    strings: Vec<u8>,
}

impl BlobBuilder {
    pub fn new() -> BlobBuilder {
        BlobBuilder {
            little: true,
            // String sections start with an empty string so that offset 0
            // reads as "unnamed".
            strings: vec![0],
            types: Vec::new(),
        }
    }

    pub fn big_endian() -> BlobBuilder {
        BlobBuilder {
            little: false,
            strings: vec![0],
            types: Vec::new(),
        }
    }

    /// Append a NUL-terminated string, returning its blob-local offset.
    pub fn string(&mut self, s: &str) -> u32 {
        let offset = self.strings.len() as u32;
        self.strings.extend_from_slice(s.as_bytes());
        self.strings.push(0);
        offset
    }

    /// Grow the string section to an exact length, for tests that pin
    /// cross-blob offset arithmetic.
    pub fn pad_strings_to(&mut self, len: usize) {
        assert!(self.strings.len() <= len);
        self.strings.resize(len, 0);
    }

    /// Append one type record: the fixed header plus `extra` trailing words.
    pub fn record(
        &mut self,
        name_off: u32,
        vlen: u32,
        kind: u32,
        kind_flag: bool,
        size_or_type: u32,
        extra: &[u32],
    ) {
        let info = (vlen & 0xffff) | (kind << 24) | ((kind_flag as u32) << 31);

        let mut words = vec![name_off, info, size_or_type];
        words.extend_from_slice(extra);

        for word in words {
            let bytes = match self.little {
                true => word.to_le_bytes(),
                false => word.to_be_bytes(),
            };
            self.types.extend_from_slice(&bytes);
        }
    }

    pub fn int(&mut self, name: &str, size: u32, encoding: u32, bits: u32) {
        let name_off = self.string(name);
        self.record(name_off, 0, KIND_INT, false, size, &[(encoding << 24) | bits]);
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();

        let u16_bytes = |v: u16| match self.little {
            true => v.to_le_bytes(),
            false => v.to_be_bytes(),
        };
        let u32_bytes = |v: u32| match self.little {
            true => v.to_le_bytes(),
            false => v.to_be_bytes(),
        };

        out.extend_from_slice(&u16_bytes(0xeb9f));
        out.push(1); // version
        out.push(0); // flags
        out.extend_from_slice(&u32_bytes(24)); // hdr_len
        out.extend_from_slice(&u32_bytes(0)); // type_off
        out.extend_from_slice(&u32_bytes(self.types.len() as u32)); // type_len
        out.extend_from_slice(&u32_bytes(self.types.len() as u32)); // str_off
        out.extend_from_slice(&u32_bytes(self.strings.len() as u32)); // str_len

        out.extend_from_slice(&self.types);
        out.extend_from_slice(&self.strings);
        out
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Loader {
    Bytes,
    File,
    Mmap,
}

/// Decode a blob through the chosen input adapter.
pub fn load(loader: Loader, blob: &[u8]) -> btfc::Result<Btf> {
    match loader {
        Loader::Bytes => Btf::from_bytes(blob),
        Loader::File | Loader::Mmap => {
            let mut file = tempfile::NamedTempFile::new().expect("could not create a temp file");
            file.write_all(blob).expect("could not write the blob");

            match loader {
                Loader::File => Btf::from_file(file.path()),
                _ => Btf::from_file_with_backend(file.path(), Backend::Mmap),
            }
        }
    }
}

/// One blob exercising every kind. Ids are assigned in record order:
///
///  1 int `int`, 2 int `char`, 3 int `unsigned int`, 4 ptr -> 1,
///  5 array of 16 x #2 indexed by #1, 6 struct `point`, 7 union `value`,
///  8 enum `color`, 9 fwd `opaque`, 10 typedef `u32` -> 3,
///  11 volatile -> 1, 12 const -> 2, 13 restrict -> 4,
///  14 func proto (void (int fd)), 15 func `close` -> 14,
///  16 var `jiffies` -> 3, 17 datasec `.data`, 18 float `double`
pub fn kitchen_sink() -> Vec<u8> {
    let mut b = BlobBuilder::new();

    b.int("int", 4, INT_SIGNED, 32);
    b.int("char", 1, INT_CHAR, 8);
    b.int("unsigned int", 4, 0, 32);

    b.record(0, 0, KIND_PTR, false, 1, &[]);
    b.record(0, 0, KIND_ARRAY, false, 0, &[2, 1, 16]);

    let point = b.string("point");
    let x = b.string("x");
    let y = b.string("y");
    b.record(point, 2, KIND_STRUCT, false, 8, &[x, 1, 0, y, 1, 32]);

    let value = b.string("value");
    let i = b.string("i");
    let u = b.string("u");
    b.record(value, 2, KIND_UNION, false, 4, &[i, 1, 0, u, 3, 0]);

    let color = b.string("color");
    let red = b.string("RED");
    let green = b.string("GREEN");
    let blue = b.string("BLUE");
    b.record(
        color,
        3,
        KIND_ENUM,
        false,
        4,
        &[red, 0, green, 1, blue, 0xffffffff],
    );

    let opaque = b.string("opaque");
    b.record(opaque, 0, KIND_FWD, false, 0, &[]);

    let u32_name = b.string("u32");
    b.record(u32_name, 0, KIND_TYPEDEF, false, 3, &[]);

    b.record(0, 0, KIND_VOLATILE, false, 1, &[]);
    b.record(0, 0, KIND_CONST, false, 2, &[]);
    b.record(0, 0, KIND_RESTRICT, false, 4, &[]);

    let fd = b.string("fd");
    b.record(0, 1, KIND_FUNC_PROTO, false, 0, &[fd, 1]);

    let close = b.string("close");
    b.record(close, 0, KIND_FUNC, false, 14, &[]);

    let jiffies = b.string("jiffies");
    b.record(jiffies, 0, KIND_VAR, false, 3, &[1]);

    let data = b.string(".data");
    b.record(data, 1, KIND_DATASEC, false, 4, &[16, 0, 4]);

    let double = b.string("double");
    b.record(double, 0, KIND_FLOAT, false, 8, &[]);

    b.build()
}
