// I/O abstraction the codec writes/reads through. Two concrete pairs:
// an in-memory one (`MemWriter`/`MemReader`) used by nearly every
// test and by callers who just want a `Vec<u8>`, and a file-backed
// one for large messages that shouldn't be fully buffered twice.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write},
    path::PathBuf,
    sync::Arc,
};

use claw_base::Result;

#[cfg(test)]
pub(crate) mod annotations;

pub trait Reader: Read + Seek {
    fn pos(&mut self) -> Result<i64> {
        Ok(self.stream_position()? as i64)
    }
}

pub trait Writer: Write + Seek {
    fn pos(&mut self) -> Result<i64> {
        Ok(self.stream_position()? as i64)
    }
}

// MemReader

pub struct MemReader {
    mem: Cursor<Arc<[u8]>>,
}

impl MemReader {
    pub fn new(mem: Arc<[u8]>) -> Self {
        Self {
            mem: Cursor::new(mem),
        }
    }
}

impl From<Vec<u8>> for MemReader {
    fn from(vec: Vec<u8>) -> Self {
        let rc: Arc<[u8]> = Arc::from(vec);
        Self::new(rc)
    }
}

impl Read for MemReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.mem.read(buf)
    }
}

impl Seek for MemReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.mem.seek(pos)
    }
}

impl Reader for MemReader {}

// MemWriter

#[derive(Default)]
pub struct MemWriter {
    mem: Cursor<Vec<u8>>,
}

impl MemWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.mem.into_inner()
    }

    pub fn as_slice(&self) -> &[u8] {
        self.mem.get_ref()
    }
}

impl Write for MemWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.mem.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.mem.flush()
    }
}

impl Seek for MemWriter {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.mem.seek(pos)
    }
}

impl Writer for MemWriter {}

// FileReader

pub struct FileReader {
    file: BufReader<File>,
    #[allow(dead_code)]
    path: PathBuf,
}

impl FileReader {
    pub fn try_open_existing(path: PathBuf) -> Result<Self> {
        let file = File::open(&path)?;
        let file = BufReader::new(file);
        Ok(Self { file, path })
    }
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for FileReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.file.seek(pos)
    }
}

impl Reader for FileReader {}

// FileWriter

pub struct FileWriter {
    file: BufWriter<File>,
}

impl FileWriter {
    pub fn try_create(path: PathBuf) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            file: BufWriter::new(file),
        })
    }
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl Seek for FileWriter {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.file.seek(pos)
    }
}

impl Writer for FileWriter {}

/// Rounds `n` up to the next multiple of 8, per the wire format's
/// 8-byte alignment invariant (spec.md §3).
#[inline]
pub(crate) fn align8(n: u64) -> u64 {
    (n + 7) & !7
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_align8() {
        assert_eq!(align8(0), 0);
        assert_eq!(align8(1), 8);
        assert_eq!(align8(8), 8);
        assert_eq!(align8(9), 16);
        assert_eq!(align8(11), 16);
    }

    #[test]
    fn test_mem_writer_reader_roundtrip() {
        let mut w = MemWriter::new();
        w.write_all(b"hello").unwrap();
        let buf = w.into_vec();
        let mut r = MemReader::from(buf);
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");
    }
}
