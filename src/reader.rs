//! Endian-aware sequential readers over the supported input sources.
//!
//! A [`Reader`] owns a cursor and the byte order used for multi-byte reads;
//! the backing storage is abstracted behind [`Source`] so a streaming file
//! and a memory-mapped buffer satisfy the same contract. Every failed read
//! or seek reports the attempted file range.

#![allow(dead_code)]

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use memmap2::Mmap;

use crate::error::{Error, FileRange, Result};

/// Byte order used to decode multi-byte reads.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Endianness {
    Little,
    Big,
}

/// Backing storage for a [`Reader`]. Adapters only provide random-access
/// reads and their total length; cursor and endianness handling live in the
/// reader itself.
pub(crate) trait Source {
    fn len(&self) -> io::Result<u64>;
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
}

/// Streaming adapter over an open file.
pub(crate) struct FileSource {
    file: File,
}

impl FileSource {
    pub(crate) fn open(path: &Path) -> Result<FileSource> {
        match File::open(path) {
            Ok(file) => Ok(FileSource { file }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::FileNotFound(path.to_path_buf()))
            }
            Err(_) => Err(Error::Io(FileRange { offset: 0, size: 0 })),
        }
    }
}

impl Source for FileSource {
    fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }
}

/// Buffer adapter, used for memory-mapped files and in-memory blobs.
pub(crate) struct BufferSource<B> {
    data: B,
}

impl<B: AsRef<[u8]>> BufferSource<B> {
    pub(crate) fn new(data: B) -> BufferSource<B> {
        BufferSource { data }
    }
}

impl BufferSource<Mmap> {
    pub(crate) fn map(path: &Path) -> Result<BufferSource<Mmap>> {
        let file = FileSource::open(path)?.file;
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|_| Error::Io(FileRange { offset: 0, size: 0 }))?;
        Ok(BufferSource::new(mmap))
    }
}

impl<B: AsRef<[u8]>> Source for BufferSource<B> {
    fn len(&self) -> io::Result<u64> {
        Ok(self.data.as_ref().len() as u64)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let data = self.data.as_ref();
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        let end = start
            .checked_add(buf.len())
            .filter(|end| *end <= data.len())
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }
}

/// Sequential reader with a mutable byte order. All primitives advance the
/// cursor by their size and fail with [`Error::Io`] carrying the attempted
/// offset and size.
pub(crate) struct Reader {
    source: Box<dyn Source>,
    offset: u64,
    endianness: Endianness,
}

impl Reader {
    pub(crate) fn new(source: Box<dyn Source>) -> Reader {
        Reader {
            source,
            offset: 0,
            endianness: Endianness::Little,
        }
    }

    pub(crate) fn from_file(path: &Path) -> Result<Reader> {
        Ok(Reader::new(Box::new(FileSource::open(path)?)))
    }

    pub(crate) fn from_mmap(path: &Path) -> Result<Reader> {
        Ok(Reader::new(Box::new(BufferSource::map(path)?)))
    }

    pub(crate) fn from_bytes(bytes: Vec<u8>) -> Reader {
        Reader::new(Box::new(BufferSource::new(bytes)))
    }

    pub(crate) fn set_endianness(&mut self, endianness: Endianness) {
        self.endianness = endianness;
    }

    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    pub(crate) fn seek(&mut self, offset: u64) -> Result<()> {
        let len = self
            .source
            .len()
            .map_err(|_| Error::Io(FileRange { offset, size: 0 }))?;
        if offset > len {
            return Err(Error::Io(FileRange { offset, size: 0 }));
        }

        self.offset = offset;
        Ok(())
    }

    pub(crate) fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        self.source.read_at(self.offset, buf).map_err(|_| {
            Error::Io(FileRange {
                offset: self.offset,
                size: buf.len(),
            })
        })?;

        self.offset += buf.len() as u64;
        Ok(())
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read(&mut buf)?;
        Ok(buf[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read(&mut buf)?;
        Ok(match self.endianness {
            Endianness::Little => LittleEndian::read_u16(&buf),
            Endianness::Big => BigEndian::read_u16(&buf),
        })
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read(&mut buf)?;
        Ok(match self.endianness {
            Endianness::Little => LittleEndian::read_u32(&buf),
            Endianness::Big => BigEndian::read_u32(&buf),
        })
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read(&mut buf)?;
        Ok(match self.endianness {
            Endianness::Little => LittleEndian::read_u64(&buf),
            Endianness::Big => BigEndian::read_u64(&buf),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(bytes: &[u8]) -> Reader {
        Reader::from_bytes(bytes.to_vec())
    }

    #[test]
    fn primitives_advance_the_cursor() {
        let mut r = reader(&[
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
            0x0f,
        ]);

        assert_eq!(r.u8().unwrap(), 0x01);
        assert_eq!(r.u16().unwrap(), 0x0302);
        assert_eq!(r.u32().unwrap(), 0x07060504);
        assert_eq!(r.u64().unwrap(), 0x0f0e0d0c0b0a0908);
        assert_eq!(r.offset(), 15);
    }

    #[test]
    fn endianness_is_mutable() {
        let mut r = reader(&[0x12, 0x34, 0x12, 0x34]);

        assert_eq!(r.u16().unwrap(), 0x3412);
        r.set_endianness(Endianness::Big);
        assert_eq!(r.u16().unwrap(), 0x1234);
    }

    #[test]
    fn short_read_reports_the_attempted_range() {
        let mut r = reader(&[0x00, 0x01]);
        r.seek(1).unwrap();

        match r.u32() {
            Err(Error::Io(range)) => {
                assert_eq!(range.offset, 1);
                assert_eq!(range.size, 4);
            }
            other => panic!("expected i/o error, got {other:?}"),
        }
    }

    #[test]
    fn seek_past_the_end_fails() {
        let mut r = reader(&[0x00; 4]);

        assert!(r.seek(4).is_ok());
        assert!(matches!(r.seek(5), Err(Error::Io(_))));
    }
}
