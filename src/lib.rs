//! Library for the [BPF Type Format (BTF)](https://www.kernel.org/doc/html/latest/bpf/btf.html).
//! BTF is a compact metadata format encoding debugging information such as
//! types, function prototypes and structure layouts, embedded in kernel
//! images and modules. This crate parses one or more BTF blobs into a
//! single indexed type database and can reconstruct a compilable C header
//! from it, without relying on source headers.
//!
//! ### Parsing BTF
//!
//! [`Btf`] represents the parsed database. Ids are assigned in reading
//! order across all inputs, starting at 1; id 0 is the implicit `void`
//! type. Types are looked up by id only, which keeps the cyclic type graph
//! free of ownership knots.
//!
//! ```no_run
//! use btfc::{Btf, Type};
//!
//! let btf = Btf::from_file("/sys/kernel/btf/vmlinux").unwrap();
//!
//! // One line per type, matching `bpftool btf dump file`.
//! for (id, r#type) in btf.iter() {
//!     println!("[{}] {} {}", id, r#type.kind(), r#type);
//! }
//!
//! if let Some(Type::Struct(r#struct)) = btf.get(2) {
//!     println!("{} members", r#struct.members.len());
//! }
//! ```
//!
//! Multiple blobs share one id space and one concatenated string space:
//!
//! ```no_run
//! use btfc::Btf;
//!
//! let btf = Btf::from_files(&[
//!     "/sys/kernel/btf/vmlinux",
//!     "/sys/kernel/btf/openvswitch",
//! ]).unwrap();
//! ```
//!
//! ### Generating a C header
//!
//! [`generate_header`] renders the whole database as a flat, self-contained
//! header: padding is made explicit, names are made unique and dependency
//! cycles are broken with forward declarations.
//!
//! ```no_run
//! use btfc::{generate_header, Btf};
//!
//! let btf = Btf::from_file("/sys/kernel/btf/vmlinux").unwrap();
//! print!("{}", generate_header(&btf).unwrap());
//! ```
//
// ### Internal design
//
// From low to higher levels.
//
// - `reader` provides the endian-aware cursor over the input sources.
// - `cbtf` mirrors the wire records and enforces nothing beyond layout.
// - `btf` holds the decoded types, their per-kind validation and the
//   public `Btf` database.
// - `obj` drives a decode across multiple blobs with a unified id space.
// - `dump` renders decoded types in `bpftool`'s output format.
// - `gen` turns a database into C source.

pub mod btf;
pub mod error;
pub mod gen;
pub mod utils;

mod cbtf;
mod dump;
mod obj;
mod reader;

#[doc(inline)]
pub use btf::*;
pub use error::*;
pub use gen::generate_header;
