//! Resource archives (`.res`).
//!
//! Layout (little-endian):
//!
//! ```text
//! 0x00  u32  signature (0x31415926)
//! 0x04  u32  index of the first root record
//! 0x08  u32  number of root records
//! 0x0C  u32  reserved
//! 0x10  u32  offset of the flat record table
//! ```
//!
//! Each record is 32 bytes: 4 reserved, offset, size, type, 16-byte name.
//! A leaf (type 0) points at `size` bytes at `offset`; a directory (type 1)
//! owns the records `offset..offset + size` of the table, which always lie
//! after the directory's own record.

use std::{
    collections::HashSet,
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::{
    bytes_ext::{ReadBytesExt, WriteBytesExt},
    error::{Error, Result},
    stream::{FileMode, FileStream, Stream},
};

pub const RESOURCE_SIGNATURE: u32 = 0x31415926;

const HEADER_SIZE: u32 = 0x14;
const RECORD_SIZE: u64 = 0x20;
const NAME_SIZE: usize = 16;
const MAX_DEPTH: usize = 64;

const TYPE_FILE: u32 = 0;
const TYPE_DIRECTORY: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File { offset: u32, size: u32 },
    Directory(Vec<ArchiveEntry>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl ArchiveEntry {
    pub fn is_directory(&self) -> bool {
        matches!(self.kind, EntryKind::Directory(_))
    }

    pub fn children(&self) -> &[ArchiveEntry] {
        match &self.kind {
            EntryKind::Directory(children) => children,
            EntryKind::File { .. } => &[],
        }
    }
}

/// One leaf of an archive, as listed by [`Archive::files`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: String,
    pub offset: u32,
    pub size: u32,
}

pub struct Archive {
    path: PathBuf,
    base_name: String,
    root: ArchiveEntry,
}

impl Archive {
    /// Parses the directory tree. Any malformed record fails the whole open.
    pub fn open(path: impl AsRef<Path>) -> Result<Archive> {
        let path = path.as_ref();
        let mut reader = FileStream::open(path, FileMode::Read).map_err(|e| {
            warn!("couldn't open \"{}\": {}", path.display(), e);
            Error::Io(e)
        })?;

        let base_name = base_name(path);
        let container = path.display().to_string();

        let signature = reader.read_le_u32()?;
        if signature != RESOURCE_SIGNATURE {
            warn!("invalid RES signature 0x{:08X} in \"{}\"", signature, container);
            return Err(Error::InvalidSignature {
                what: "RES",
                found: signature,
            });
        }

        let root_offset = reader.read_le_u32()?;
        let root_size = reader.read_le_u32()?;
        _ = reader.read_le_u32()?;
        let fat_offset = reader.read_le_u32()?;

        let mut table = RecordTable {
            container: &container,
            fat_offset: fat_offset as u64,
            seen: HashSet::new(),
        };
        let children = table.read_records(&mut reader, root_offset, root_size, None, 0)?;

        debug!("opened \"{}\" as \"{}\"", container, base_name);

        Ok(Archive {
            path: path.to_path_buf(),
            base_name: base_name.clone(),
            root: ArchiveEntry {
                name: base_name,
                kind: EntryKind::Directory(children),
            },
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lower-cased file stem; the first segment of every path in this archive.
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn root(&self) -> &ArchiveEntry {
        &self.root
    }

    /// Resolves `path` (case-insensitive, `\` or `/` separated). Every segment
    /// must match exactly one level of the tree.
    pub fn find_entry(&self, path: &str) -> Option<&ArchiveEntry> {
        let segments = split_path(path);
        let (first, rest) = segments.split_first()?;
        if *first != self.base_name {
            return None;
        }

        rest.iter().try_fold(&self.root, |entry, part| {
            entry.children().iter().find(|child| child.name == *part)
        })
    }

    pub fn exists(&self, path: &str) -> bool {
        self.find_entry(path).is_some()
    }

    /// Reads a leaf. The archive file is reopened for every call.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let (offset, size) = match self.find_entry(path) {
            Some(ArchiveEntry {
                kind: EntryKind::File { offset, size },
                ..
            }) => (*offset, *size),
            _ => return Err(Error::NotFound(path.to_string())),
        };

        let mut f = FileStream::open(&self.path, FileMode::Read).map_err(|e| {
            warn!("couldn't open \"{}\": file is gone", self.path.display());
            Error::Io(e)
        })?;

        if f.set_position(offset as u64) != offset as u64 {
            warn!(
                "couldn't seek to 0x{:08X} in \"{}\"",
                offset,
                self.path.display()
            );
            return Err(Error::ShortRead {
                path: path.to_string(),
                expected: size as usize,
                actual: 0,
            });
        }

        let data = f.read_vec(size as usize);
        if data.len() != size as usize {
            warn!(
                "couldn't read {} bytes at 0x{:08X} in \"{}\"",
                size,
                offset,
                self.path.display()
            );
            return Err(Error::ShortRead {
                path: path.to_string(),
                expected: size as usize,
                actual: data.len(),
            });
        }

        debug!("read \"{}\" ({} bytes) from \"{}\"", path, size, self.base_name);
        Ok(data)
    }

    /// Every leaf with its full path, depth first in table order.
    pub fn files(&self) -> Vec<FileInfo> {
        fn walk(entry: &ArchiveEntry, prefix: &str, out: &mut Vec<FileInfo>) {
            let path = format!("{}/{}", prefix, entry.name);
            match &entry.kind {
                EntryKind::File { offset, size } => out.push(FileInfo {
                    path,
                    offset: *offset,
                    size: *size,
                }),
                EntryKind::Directory(children) => {
                    for child in children {
                        walk(child, &path, out);
                    }
                }
            }
        }

        let mut out = Vec::new();
        for child in self.root.children() {
            walk(child, &self.base_name, &mut out);
        }
        out
    }
}

/// Walks the flat record table. Every record belongs to at most one
/// directory.
struct RecordTable<'a> {
    container: &'a str,
    fat_offset: u64,
    seen: HashSet<u32>,
}

impl RecordTable<'_> {
    fn malformed(&self) -> Error {
        Error::format(format!("invalid RES directory structure in \"{}\"", self.container))
    }

    fn read_records<R: Read + Seek>(
        &mut self,
        r: &mut R,
        first: u32,
        count: u32,
        parent: Option<u32>,
        depth: usize,
    ) -> Result<Vec<ArchiveEntry>> {
        if let Some(parent) = parent {
            if first <= parent {
                warn!(
                    "directory record {} in \"{}\" points backwards to {}",
                    parent, self.container, first
                );
                return Err(self.malformed());
            }
        }
        if depth > MAX_DEPTH {
            warn!("directories in \"{}\" nest deeper than {}", self.container, MAX_DEPTH);
            return Err(self.malformed());
        }

        let mut entries = Vec::with_capacity(count.min(4096) as usize);
        for i in first..first.saturating_add(count) {
            if !self.seen.insert(i) {
                warn!("record {} in \"{}\" is listed twice", i, self.container);
                return Err(self.malformed());
            }
            r.seek(SeekFrom::Start(self.fat_offset + i as u64 * RECORD_SIZE))?;
            _ = r.read_le_u32()?;
            let offset = r.read_le_u32()?;
            let size = r.read_le_u32()?;
            let entry_type = r.read_le_u32()?;
            let name = r.read_fixed_str(NAME_SIZE)?.to_ascii_lowercase();

            let kind = match entry_type {
                TYPE_FILE => EntryKind::File { offset, size },
                TYPE_DIRECTORY => {
                    EntryKind::Directory(self.read_records(r, offset, size, Some(i), depth + 1)?)
                }
                _ => {
                    warn!(
                        "invalid entry type in \"{}\": {:08X}",
                        self.container, entry_type
                    );
                    return Err(Error::InvalidEntryType {
                        container: self.container.to_string(),
                        entry_type,
                    });
                }
            };

            entries.push(ArchiveEntry { name, kind });
        }

        Ok(entries)
    }
}

fn base_name(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    file_name
        .split('.')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Lower-cases, normalises `\` to `/` and drops empty segments.
pub(crate) fn split_path(path: &str) -> Vec<String> {
    path.to_ascii_lowercase()
        .replace('\\', "/")
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

enum Node {
    File { name: String, data: Vec<u8> },
    Directory { name: String, children: Vec<Node> },
}

impl Node {
    fn name(&self) -> &str {
        match self {
            Node::File { name, .. } | Node::Directory { name, .. } => name,
        }
    }
}

/// Builds `.res` archives. Paths are relative to the archive root (without
/// the base-name segment).
#[derive(Default)]
pub struct ArchiveWriter {
    root: Vec<Node>,
}

impl ArchiveWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds every file below `dir`, with paths relative to it.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut writer = Self::new();
        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let relative = entry
                .path()
                .strip_prefix(dir)
                .map_err(|_| Error::format("walked outside of the source directory"))?;
            let path = relative.to_string_lossy().to_string();
            writer.add_file(&path, std::fs::read(entry.path())?)?;
        }
        Ok(writer)
    }

    pub fn add_file(&mut self, path: &str, data: Vec<u8>) -> Result<()> {
        let segments = split_path(path);
        let Some((file_name, dirs)) = segments.split_last() else {
            return Err(Error::format(format!("empty archive path \"{}\"", path)));
        };
        if let Some(long) = segments.iter().find(|s| s.len() > NAME_SIZE) {
            return Err(Error::format(format!(
                "name \"{}\" is longer than {} bytes",
                long, NAME_SIZE
            )));
        }

        let mut level = &mut self.root;
        for dir in dirs {
            let index = match level.iter().position(|n| n.name() == dir) {
                Some(i) => i,
                None => {
                    level.push(Node::Directory {
                        name: dir.clone(),
                        children: Vec::new(),
                    });
                    level.len() - 1
                }
            };
            level = match &mut level[index] {
                Node::Directory { children, .. } => children,
                Node::File { .. } => {
                    return Err(Error::format(format!("\"{}\" is a file", dir)));
                }
            };
        }

        if level.iter().any(|n| n.name() == file_name) {
            return Err(Error::format(format!("duplicate archive path \"{}\"", path)));
        }
        level.push(Node::File {
            name: file_name.clone(),
            data,
        });
        Ok(())
    }

    /// Writes header, file data and the record table. Directories are laid
    /// out breadth first so every child range follows its parent record.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        struct Record<'a> {
            offset: u32,
            size: u32,
            entry_type: u32,
            name: &'a str,
        }

        let mut records: Vec<Record<'_>> = Vec::new();
        let mut blobs: Vec<&[u8]> = Vec::new();
        let mut data_offset = HEADER_SIZE;
        let mut queue: std::collections::VecDeque<&[Node]> = std::collections::VecDeque::new();
        queue.push_back(&self.root);

        // Index of the next free record slot after the current block.
        let mut next_block = self.root.len() as u32;
        while let Some(level) = queue.pop_front() {
            for node in level {
                match node {
                    Node::File { name, data } => {
                        records.push(Record {
                            offset: data_offset,
                            size: data.len() as u32,
                            entry_type: TYPE_FILE,
                            name,
                        });
                        blobs.push(data);
                        data_offset += data.len() as u32;
                    }
                    Node::Directory { name, children } => {
                        records.push(Record {
                            offset: next_block,
                            size: children.len() as u32,
                            entry_type: TYPE_DIRECTORY,
                            name,
                        });
                        next_block += children.len() as u32;
                        queue.push_back(children);
                    }
                }
            }
        }

        w.write_le_u32(RESOURCE_SIGNATURE)?;
        w.write_le_u32(0)?;
        w.write_le_u32(self.root.len() as u32)?;
        w.write_le_u32(0)?;
        w.write_le_u32(data_offset)?;

        for blob in blobs {
            w.write_all(blob)?;
        }

        for record in records {
            w.write_le_u32(0)?;
            w.write_le_u32(record.offset)?;
            w.write_le_u32(record.size)?;
            w.write_le_u32(record.entry_type)?;
            w.write_fixed_str(record.name, NAME_SIZE)?;
        }

        Ok(())
    }

    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut f = std::io::BufWriter::new(std::fs::File::create(path)?);
        self.write_to(&mut f)?;
        f.flush()?;
        Ok(())
    }
}
