//! Helpers to extract raw BTF data from ELF objects, e.g. a `vmlinux`
//! image built with debug info.

use std::fs::File;
use std::path::Path;

use elf::{endian::AnyEndian, ElfStream};

use crate::error::{Error, FileRange, Result};

/// Extract the raw contents of the `.BTF` ELF section of the given file.
/// The output can be fed to the `from_bytes` constructors of this library.
pub fn extract_btf_from_file<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::FileNotFound(path.to_path_buf()))
        }
        Err(_) => return Err(Error::Io(FileRange { offset: 0, size: 0 })),
    };

    let mut elf = ElfStream::<AnyEndian, _>::open_stream(file)
        .map_err(|e| Error::Format(format!("could not parse {}: {e}", path.display())))?;

    let btf_hdr = match elf
        .section_header_by_name(".BTF")
        .map_err(|e| Error::Format(format!("could not read section headers: {e}")))?
    {
        Some(hdr) => *hdr,
        None => {
            return Err(Error::Format(format!(
                "no BTF section in {}",
                path.display()
            )))
        }
    };

    let (btf, chdr) = elf
        .section_data(&btf_hdr)
        .map_err(|e| Error::Format(format!("could not read the BTF section: {e}")))?;

    if chdr.is_some() {
        return Err(Error::Format(format!(
            "compressed BTF sections are not supported ({})",
            path.display()
        )));
    }

    Ok(btf.to_vec())
}
