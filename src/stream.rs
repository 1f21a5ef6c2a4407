//! Random-access byte streams.
//!
//! [`Stream`] is the common surface of file-backed and memory-backed byte
//! sources. Bulk transfers ([`Stream::read_bytes`], [`Stream::write_bytes`])
//! report short counts instead of failing; typed little-endian primitives come
//! from [`ReadBytesExt`](crate::bytes_ext::ReadBytesExt) and
//! [`WriteBytesExt`](crate::bytes_ext::WriteBytesExt), which every stream gets
//! through its `io::Read`/`io::Write` implementations.

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use tracing::warn;

pub trait Stream: Read + Write + Seek {
    fn is_readable(&self) -> bool;
    fn is_writable(&self) -> bool;
    fn len(&self) -> u64;
    fn position(&self) -> u64;

    /// Moves the cursor, clamped to `[0, len]`. Returns the new position.
    fn set_position(&mut self, position: u64) -> u64;

    /// Reads up to `buf.len()` bytes and returns how many were read.
    fn read_bytes(&mut self, buf: &mut [u8]) -> usize;

    /// Writes up to `buf.len()` bytes and returns how many were written.
    fn write_bytes(&mut self, buf: &[u8]) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_eof(&self) -> bool {
        self.position() >= self.len()
    }

    fn skip(&mut self, count: u64) -> u64 {
        let target = self.position().saturating_add(count);
        self.set_position(target)
    }

    /// Reads exactly `count` bytes into a new vector, or fewer at end of stream.
    fn read_vec(&mut self, count: usize) -> Vec<u8> {
        let left = self.len().saturating_sub(self.position());
        let mut buf = vec![0u8; count.min(usize::try_from(left).unwrap_or(usize::MAX))];
        let n = self.read_bytes(&mut buf);
        buf.truncate(n);
        buf
    }

    /// Reads a `len`-byte text field, stopping the string at the first NUL.
    fn read_string(&mut self, len: usize) -> String {
        let bytes = self.read_vec(len);
        let end = bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len());
        bytes[..end].iter().map(|&c| c as char).collect()
    }

    /// Writes `s` into a `len`-byte field, NUL-padded.
    fn write_string(&mut self, s: &str, len: usize) -> usize {
        let mut field = vec![0u8; len];
        let n = s.len().min(len);
        field[..n].copy_from_slice(&s.as_bytes()[..n]);
        self.write_bytes(&field)
    }

    /// Reads one text line. `\r` is dropped; `\n`, NUL or end of stream ends the line.
    fn read_line(&mut self) -> String {
        let mut line = String::new();
        let mut c = [0u8; 1];
        while self.read_bytes(&mut c) == 1 {
            match c[0] {
                0 | b'\n' => break,
                b'\r' => continue,
                c => line.push(c as char),
            }
        }
        line
    }

    fn write_line(&mut self, line: &str) -> usize {
        let n = self.write_bytes(line.as_bytes());
        n + self.write_bytes(b"\n")
    }
}

/// A growable in-memory stream.
#[derive(Debug, Default, Clone)]
pub struct MemoryStream {
    buffer: Vec<u8>,
    position: usize,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(buffer: Vec<u8>) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }

    /// Replaces the contents and rewinds.
    pub fn set_buffer(&mut self, buffer: Vec<u8>) {
        self.buffer = buffer;
        self.position = 0;
    }
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_bytes(buf))
    }
}

impl Write for MemoryStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_bytes(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = seek_target(pos, self.position as u64, self.buffer.len() as u64)?;
        Ok(self.set_position(target))
    }
}

impl Stream for MemoryStream {
    fn is_readable(&self) -> bool {
        true
    }

    fn is_writable(&self) -> bool {
        true
    }

    fn len(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn position(&self) -> u64 {
        self.position as u64
    }

    fn set_position(&mut self, position: u64) -> u64 {
        self.position = position.min(self.buffer.len() as u64) as usize;
        self.position as u64
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> usize {
        if self.position >= self.buffer.len() {
            return 0;
        }
        let count = buf.len().min(self.buffer.len() - self.position);
        buf[..count].copy_from_slice(&self.buffer[self.position..self.position + count]);
        self.position += count;
        count
    }

    fn write_bytes(&mut self, buf: &[u8]) -> usize {
        let end = self.position + buf.len();
        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }
        self.buffer[self.position..end].copy_from_slice(buf);
        self.position = end;
        buf.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Read,
    ReadWrite,
    /// Create or truncate, then write.
    Create,
}

/// A stream over a file on disk.
#[derive(Debug)]
pub struct FileStream {
    path: PathBuf,
    file: File,
    mode: FileMode,
    position: u64,
}

impl FileStream {
    pub fn open(path: impl AsRef<Path>, mode: FileMode) -> io::Result<Self> {
        let path = path.as_ref();
        let file = match mode {
            FileMode::Read => File::open(path)?,
            FileMode::ReadWrite => OpenOptions::new().read(true).write(true).open(path)?,
            FileMode::Create => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?,
        };
        Ok(Self {
            path: path.to_path_buf(),
            file,
            mode,
            position: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Read for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.is_readable() {
            return Ok(0);
        }
        let n = self.file.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Write for FileStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.is_writable() {
            return Ok(0);
        }
        let n = self.file.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for FileStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = seek_target(pos, self.position, self.len())?;
        Ok(self.set_position(target))
    }
}

impl Stream for FileStream {
    fn is_readable(&self) -> bool {
        matches!(self.mode, FileMode::Read | FileMode::ReadWrite)
    }

    fn is_writable(&self) -> bool {
        matches!(self.mode, FileMode::ReadWrite | FileMode::Create)
    }

    fn len(&self) -> u64 {
        self.file.metadata().map(|m| m.len()).unwrap_or(0)
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn set_position(&mut self, position: u64) -> u64 {
        let position = position.min(self.len());
        match self.file.seek(SeekFrom::Start(position)) {
            Ok(p) => self.position = p,
            Err(e) => warn!("couldn't seek to 0x{:08X} in \"{}\": {}", position, self.path.display(), e),
        }
        self.position
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> usize {
        let mut total = 0;
        while total < buf.len() {
            match self.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("read error in \"{}\": {}", self.path.display(), e);
                    break;
                }
            }
        }
        total
    }

    fn write_bytes(&mut self, buf: &[u8]) -> usize {
        let mut total = 0;
        while total < buf.len() {
            match self.write(&buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("write error in \"{}\": {}", self.path.display(), e);
                    break;
                }
            }
        }
        total
    }
}

fn seek_target(pos: SeekFrom, current: u64, len: u64) -> io::Result<u64> {
    let target = match pos {
        SeekFrom::Start(p) => Some(p),
        SeekFrom::Current(d) => current.checked_add_signed(d),
        SeekFrom::End(d) => len.checked_add_signed(d),
    };
    target.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes_ext::{ReadBytesExt, WriteBytesExt};

    #[test]
    fn memory_stream_short_read() {
        let mut ms = MemoryStream::from_vec(vec![1, 2, 3]);
        let mut buf = [0u8; 8];
        assert_eq!(ms.read_bytes(&mut buf), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert!(ms.is_eof());
        assert_eq!(ms.read_bytes(&mut buf), 0);
    }

    #[test]
    fn memory_stream_position_is_clamped() {
        let mut ms = MemoryStream::from_vec(vec![0; 4]);
        assert_eq!(ms.set_position(100), 4);
        assert_eq!(ms.skip(10), 4);
        assert!(ms.is_eof());
    }

    #[test]
    fn memory_stream_grows_on_write() {
        let mut ms = MemoryStream::new();
        ms.write_le_u32(0x31415926).unwrap();
        ms.write_le_u16(7).unwrap();
        assert_eq!(ms.len(), 6);
        assert_eq!(ms.position(), 6);

        ms.set_position(0);
        assert_eq!(ms.read_le_u32().unwrap(), 0x31415926);
        assert_eq!(ms.read_le_u16().unwrap(), 7);
        assert!(ms.read_le_u16().is_err());
    }

    #[test]
    fn lines_and_strings() {
        let mut ms = MemoryStream::new();
        ms.write_line("first\r");
        ms.write_line("second");
        ms.write_string("name", 8);
        ms.set_position(0);

        assert_eq!(ms.read_line(), "first");
        assert_eq!(ms.read_line(), "second");
        assert_eq!(ms.read_string(8), "name");
        assert!(ms.is_eof());
        assert_eq!(ms.read_line(), "");
    }

    #[test]
    fn file_stream_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");

        let mut f = FileStream::open(&path, FileMode::Create).unwrap();
        assert!(f.is_writable());
        f.write_le_f64(2.5).unwrap();
        f.write_line("hello");
        drop(f);

        let mut f = FileStream::open(&path, FileMode::Read).unwrap();
        assert!(!f.is_writable());
        assert_eq!(f.len(), 14);
        assert_eq!(f.read_le_f64().unwrap(), 2.5);
        assert_eq!(f.read_line(), "hello");
        assert!(f.is_eof());
        assert_eq!(f.write_bytes(b"nope"), 0);
    }
}
