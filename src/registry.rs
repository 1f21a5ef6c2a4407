//! Registry trees (`.reg`): typed key/value data used for class definitions.
//!
//! The header is six u32 words (signature, first root record, root record
//! count, reserved, record count, reserved). Record `i` sits at
//! `0x18 + 0x20 * i`; string and array payloads are addressed relative to
//! `0x1C + 0x20 * record_count`.

use std::{
    borrow::Cow,
    collections::{HashSet, VecDeque},
    io::{Cursor, Seek, SeekFrom, Write},
};

use tracing::warn;

use crate::{
    archive::split_path,
    bytes_ext::{ReadBytesExt, WriteBytesExt},
    error::{Error, Result},
    resources::ResourceManager,
};

pub const REGISTRY_SIGNATURE: u32 = 0x31415926;

const RECORD_BASE: u64 = 0x18;
const RECORD_SIZE: u64 = 0x20;
const DATA_BASE: u64 = 0x1C;
const NAME_SIZE: usize = 16;
const MAX_DEPTH: usize = 64;

const TYPE_STRING: u32 = 0;
const TYPE_DIRECTORY: u32 = 1;
const TYPE_INTEGER: u32 = 2;
const TYPE_FLOAT: u32 = 4;
const TYPE_ARRAY: u32 = 6;

/// A registry leaf. `Absent` is what lookups return for missing keys and
/// directories, so presence stays distinguishable from a stored zero.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RegistryValue {
    #[default]
    Absent,
    String(String),
    Float(f64),
    Integer(i32),
    Array(Vec<i32>),
}

static ABSENT: RegistryValue = RegistryValue::Absent;

impl RegistryValue {
    pub fn is_present(&self) -> bool {
        !matches!(self, RegistryValue::Absent)
    }

    pub fn as_str(&self) -> Cow<'_, str> {
        match self {
            RegistryValue::Absent => Cow::Borrowed(""),
            RegistryValue::String(s) => Cow::Borrowed(s),
            RegistryValue::Float(f) => Cow::Owned(format!("{:.6}", f)),
            RegistryValue::Integer(i) => Cow::Owned(i.to_string()),
            RegistryValue::Array(a) => match a.first() {
                Some(i) => Cow::Owned(i.to_string()),
                None => Cow::Borrowed(""),
            },
        }
    }

    pub fn as_integer(&self) -> i32 {
        match self {
            RegistryValue::Absent => 0,
            RegistryValue::String(s) => parse_numeric(s).map(|(i, _)| i).unwrap_or(0),
            RegistryValue::Float(f) => *f as i32,
            RegistryValue::Integer(i) => *i,
            RegistryValue::Array(a) => a.first().copied().unwrap_or(0),
        }
    }

    pub fn as_float(&self) -> f64 {
        match self {
            RegistryValue::Absent => 0.0,
            RegistryValue::String(s) => parse_numeric(s).map(|(_, f)| f).unwrap_or(0.0),
            RegistryValue::Float(f) => *f,
            RegistryValue::Integer(i) => *i as f64,
            RegistryValue::Array(a) => a.first().copied().unwrap_or(0) as f64,
        }
    }

    /// Arrays as stored; any present scalar as a one-element array.
    pub fn as_array(&self) -> Cow<'_, [i32]> {
        match self {
            RegistryValue::Absent => Cow::Borrowed(&[]),
            RegistryValue::Array(a) => Cow::Borrowed(a),
            other => Cow::Owned(vec![other.as_integer()]),
        }
    }
}

/// Numeric reading of a string value: decimal float, decimal integer, then `0x` hex.
fn parse_numeric(s: &str) -> Option<(i32, f64)> {
    let s = s.trim();
    if s.contains('.') {
        if let Ok(f) = s.parse::<f64>() {
            return Some((f as i32, f));
        }
    }
    if let Ok(i) = s.parse::<i32>() {
        return Some((i, i as f64));
    }
    let hex = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    let i = u32::from_str_radix(hex, 16).ok()? as i32;
    Some((i, i as f64))
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Directory(Vec<(String, Node)>),
    Value(RegistryValue),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Registry {
    root: Node,
}

impl Registry {
    /// Reads `path` through the resource manager and parses it.
    pub fn load(resources: &ResourceManager, path: &str) -> Result<Registry> {
        let data = resources.read_file(path)?;
        Registry::parse(&data).map_err(|e| {
            warn!("couldn't load \"{}\": {}", path, e);
            e
        })
    }

    pub fn parse(data: &[u8]) -> Result<Registry> {
        let mut r = Cursor::new(data);

        let signature = r.read_le_u32()?;
        let root_offset = r.read_le_u32()?;
        let root_size = r.read_le_u32()?;
        _ = r.read_le_u32()?;
        let record_count = r.read_le_u32()?;
        _ = r.read_le_u32()?;

        if signature != REGISTRY_SIGNATURE {
            return Err(Error::InvalidSignature {
                what: "REG",
                found: signature,
            });
        }

        let data_origin = DATA_BASE + RECORD_SIZE * record_count as u64;
        let mut walk = RecordWalk {
            data_origin,
            seen: HashSet::new(),
        };
        let children = walk.read_records(&mut r, root_offset, root_size, None, 0)?;

        Ok(Registry {
            root: Node::Directory(children),
        })
    }

    /// Looks up a leaf. Missing paths and directories yield [`RegistryValue::Absent`].
    pub fn get_value(&self, path: &str) -> &RegistryValue {
        let mut node = &self.root;
        for part in split_path(path) {
            let Node::Directory(children) = node else {
                return &ABSENT;
            };
            match children.iter().find(|(name, _)| *name == part) {
                Some((_, child)) => node = child,
                None => return &ABSENT,
            }
        }

        match node {
            Node::Value(v) => v,
            Node::Directory(_) => &ABSENT,
        }
    }

    /// Visits every leaf with its `/`-joined path, in table order.
    pub fn for_each_value(&self, mut f: impl FnMut(&str, &RegistryValue)) {
        fn walk(node: &Node, prefix: &str, f: &mut dyn FnMut(&str, &RegistryValue)) {
            match node {
                Node::Value(v) => f(prefix, v),
                Node::Directory(children) => {
                    for (name, child) in children {
                        let path = if prefix.is_empty() {
                            name.clone()
                        } else {
                            format!("{}/{}", prefix, name)
                        };
                        walk(child, &path, f);
                    }
                }
            }
        }
        walk(&self.root, "", &mut f);
    }
}

/// Every record may be claimed by one directory only.
struct RecordWalk {
    data_origin: u64,
    seen: HashSet<u32>,
}

impl RecordWalk {
    fn read_records(
        &mut self,
        r: &mut Cursor<&[u8]>,
        first: u32,
        count: u32,
        parent: Option<u32>,
        depth: usize,
    ) -> Result<Vec<(String, Node)>> {
        if parent.is_some_and(|p| first <= p) || depth > MAX_DEPTH {
            return Err(Error::format("invalid REG directory structure"));
        }

        let data_origin = self.data_origin;
        let mut children = Vec::with_capacity(count.min(4096) as usize);
        for i in first..first.saturating_add(count) {
            if !self.seen.insert(i) {
                warn!("REG record {} is listed twice", i);
                return Err(Error::format("invalid REG directory structure"));
            }
            r.seek(SeekFrom::Start(RECORD_BASE + RECORD_SIZE * i as u64))?;
            _ = r.read_le_u32()?;
            let offset = r.read_le_u32()?;
            let value2 = r.read_le_u32()?;
            let entry_type = r.read_le_u32()?;
            let name = r.read_fixed_str(NAME_SIZE)?.to_ascii_lowercase();

            let node = match entry_type {
                TYPE_STRING => {
                    r.seek(SeekFrom::Start(data_origin + offset as u64))?;
                    Node::Value(RegistryValue::String(r.read_fixed_str(value2 as usize)?))
                }
                TYPE_INTEGER => Node::Value(RegistryValue::Integer(offset as i32)),
                TYPE_FLOAT => {
                    let bits = (value2 as u64) << 32 | offset as u64;
                    Node::Value(RegistryValue::Float(f64::from_bits(bits)))
                }
                TYPE_ARRAY => {
                    if value2 % 4 != 0 {
                        warn!("invalid REG array byte size: {} % 4 != 0", value2);
                        return Err(Error::format(format!(
                            "invalid REG array byte size {} for \"{}\"",
                            value2, name
                        )));
                    }
                    r.seek(SeekFrom::Start(data_origin + offset as u64))?;
                    let values = (0..value2 / 4)
                        .map(|_| r.read_le_i32())
                        .collect::<std::io::Result<Vec<_>>>()?;
                    Node::Value(RegistryValue::Array(values))
                }
                TYPE_DIRECTORY => {
                    Node::Directory(self.read_records(r, offset, value2, Some(i), depth + 1)?)
                }
                _ => {
                    warn!("invalid REG entry type {:08X} for \"{}\"", entry_type, name);
                    return Err(Error::InvalidEntryType {
                        container: "registry".to_string(),
                        entry_type,
                    });
                }
            };

            children.push((name, node));
        }

        Ok(children)
    }
}

/// Builds registry files, e.g. for tooling and fixtures.
#[derive(Debug, Default)]
pub struct RegistryWriter {
    root: Vec<(String, Node)>,
}

impl RegistryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` at `path`, creating directories on the way. An existing
    /// leaf at the same path is replaced.
    pub fn set(&mut self, path: &str, value: RegistryValue) -> Result<()> {
        let segments = split_path(path);
        let Some((leaf, dirs)) = segments.split_last() else {
            return Err(Error::format("empty registry path"));
        };
        if !value.is_present() {
            return Err(Error::format(format!("absent value for \"{}\"", path)));
        }

        let mut level = &mut self.root;
        for dir in dirs {
            let index = match level.iter().position(|(name, _)| name == dir) {
                Some(i) => i,
                None => {
                    level.push((dir.clone(), Node::Directory(Vec::new())));
                    level.len() - 1
                }
            };
            level = match &mut level[index].1 {
                Node::Directory(children) => children,
                Node::Value(_) => return Err(Error::format(format!("\"{}\" is a value", dir))),
            };
        }

        match level.iter_mut().find(|(name, _)| name == leaf) {
            Some((_, Node::Directory(_))) => {
                return Err(Error::format(format!("\"{}\" is a directory", leaf)))
            }
            Some((_, node)) => *node = Node::Value(value),
            None => level.push((leaf.clone(), Node::Value(value))),
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        struct Record {
            offset: u32,
            value2: u32,
            entry_type: u32,
            name: String,
        }

        let mut records = Vec::new();
        let mut payload: Vec<u8> = Vec::new();
        let mut queue: VecDeque<&[(String, Node)]> = VecDeque::new();
        queue.push_back(&self.root);
        let mut next_block = self.root.len() as u32;

        while let Some(level) = queue.pop_front() {
            for (name, node) in level {
                let (offset, value2, entry_type) = match node {
                    Node::Directory(children) => {
                        let first = next_block;
                        next_block += children.len() as u32;
                        queue.push_back(children);
                        (first, children.len() as u32, TYPE_DIRECTORY)
                    }
                    Node::Value(RegistryValue::String(s)) => {
                        let offset = payload.len() as u32;
                        payload.extend_from_slice(s.as_bytes());
                        payload.push(0);
                        (offset, s.len() as u32 + 1, TYPE_STRING)
                    }
                    Node::Value(RegistryValue::Integer(i)) => (*i as u32, 0, TYPE_INTEGER),
                    Node::Value(RegistryValue::Float(f)) => {
                        let bits = f.to_bits();
                        (bits as u32, (bits >> 32) as u32, TYPE_FLOAT)
                    }
                    Node::Value(RegistryValue::Array(a)) => {
                        let offset = payload.len() as u32;
                        for v in a {
                            payload.write_le_i32(*v)?;
                        }
                        (offset, a.len() as u32 * 4, TYPE_ARRAY)
                    }
                    Node::Value(RegistryValue::Absent) => continue,
                };
                records.push(Record {
                    offset,
                    value2,
                    entry_type,
                    name: name.clone(),
                });
            }
        }

        let mut w = Vec::new();
        w.write_le_u32(REGISTRY_SIGNATURE)?;
        w.write_le_u32(0)?;
        w.write_le_u32(self.root.len() as u32)?;
        w.write_le_u32(0)?;
        w.write_le_u32(records.len() as u32)?;
        w.write_le_u32(0)?;
        for record in &records {
            w.write_le_u32(0)?;
            w.write_le_u32(record.offset)?;
            w.write_le_u32(record.value2)?;
            w.write_le_u32(record.entry_type)?;
            w.write_fixed_str(&record.name, NAME_SIZE)?;
        }
        // gap between the record table and the payload origin
        w.write_le_u32(0)?;
        w.write_all(&payload)?;
        Ok(w)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn sample() -> Registry {
        let mut w = RegistryWriter::new();
        w.set("Global/ObjectCount", RegistryValue::Integer(2)).unwrap();
        w.set("Global/Scale", RegistryValue::Float(0.75)).unwrap();
        w.set("Object0/DescText", RegistryValue::String("Oak".into()))
            .unwrap();
        w.set("Object0/AnimationTime", RegistryValue::Array(vec![3, 4, 5]))
            .unwrap();
        w.set("Object0/Numeric", RegistryValue::String("0x1F".into()))
            .unwrap();
        w.set("Object1/Zero", RegistryValue::Integer(0)).unwrap();
        Registry::parse(&w.to_bytes().unwrap()).unwrap()
    }

    #[test]
    fn typed_leaves() {
        let reg = sample();
        assert_eq!(reg.get_value("Global/ObjectCount").as_integer(), 2);
        assert_eq!(reg.get_value("global/scale").as_float(), 0.75);
        assert_eq!(reg.get_value("Object0/DescText").as_str(), "Oak");
        assert_eq!(
            reg.get_value("Object0/AnimationTime").as_array().as_ref(),
            &[3, 4, 5]
        );
        assert_eq!(reg.get_value("Object0/Numeric").as_integer(), 31);
    }

    #[test]
    fn absence_is_distinct_from_zero() {
        let reg = sample();
        let zero = reg.get_value("Object1/Zero");
        assert!(zero.is_present());
        assert_eq!(zero.as_integer(), 0);

        let missing = reg.get_value("Object1/Missing");
        assert!(!missing.is_present());
        assert_eq!(missing.as_integer(), 0);

        // a directory is not a value
        assert!(!reg.get_value("Object0").is_present());
        // extra segment below a leaf
        assert!(!reg.get_value("Object1/Zero/More").is_present());

        // lookups of absent paths do not disturb others
        assert_eq!(reg.get_value("Global/ObjectCount").as_integer(), 2);
    }

    #[test]
    fn scalar_coercions() {
        assert_eq!(RegistryValue::String("2.5".into()).as_integer(), 2);
        assert_eq!(RegistryValue::String("12".into()).as_float(), 12.0);
        assert_eq!(RegistryValue::String("hello".into()).as_integer(), 0);
        assert_eq!(RegistryValue::Integer(7).as_str(), "7");
        assert_eq!(RegistryValue::Integer(7).as_array().as_ref(), &[7]);
        assert_eq!(RegistryValue::Array(vec![]).as_integer(), 0);
        assert!(RegistryValue::Absent.as_array().is_empty());
    }

    #[test]
    fn float_halves_are_recombined() {
        let mut w = RegistryWriter::new();
        w.set("pi", RegistryValue::Float(std::f64::consts::PI)).unwrap();
        let bytes = w.to_bytes().unwrap();
        // low half in the offset word, high half in the count word
        let bits = std::f64::consts::PI.to_bits();
        assert_eq!(&bytes[0x18 + 4..0x18 + 8], &(bits as u32).to_le_bytes());
        assert_eq!(&bytes[0x18 + 8..0x18 + 12], &((bits >> 32) as u32).to_le_bytes());

        let reg = Registry::parse(&bytes).unwrap();
        assert_eq!(reg.get_value("pi").as_float(), std::f64::consts::PI);
    }

    #[test]
    fn rejects_bad_signature_and_types() {
        let mut bytes = sample_bytes();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            Registry::parse(&bytes),
            Err(Error::InvalidSignature { .. })
        ));

        let mut bytes = sample_bytes();
        // first record's type word
        bytes[0x18 + 12..0x18 + 16].copy_from_slice(&9u32.to_le_bytes());
        assert!(matches!(
            Registry::parse(&bytes),
            Err(Error::InvalidEntryType { entry_type: 9, .. })
        ));
    }

    #[test]
    fn rejects_misaligned_arrays() {
        let mut w = RegistryWriter::new();
        w.set("a", RegistryValue::Array(vec![1, 2])).unwrap();
        let mut bytes = w.to_bytes().unwrap();
        bytes[0x18 + 8..0x18 + 12].copy_from_slice(&7u32.to_le_bytes());
        assert!(Registry::parse(&bytes).is_err());
    }

    #[test]
    fn visits_all_leaves() {
        let mut paths = Vec::new();
        sample().for_each_value(|path, _| paths.push(path.to_string()));
        assert_eq!(paths.len(), 6);
        assert!(paths.contains(&"object0/animationtime".to_string()));
    }

    /// Offset of word `word` of record `i`.
    fn record_word(i: usize, word: usize) -> usize {
        0x18 + 0x20 * i + 4 * word
    }

    fn patched(mut bytes: Vec<u8>, at: usize, value: u32) -> Vec<u8> {
        bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
        bytes
    }

    #[test]
    fn hostile_counts_and_sizes_are_errors() {
        let mut w = RegistryWriter::new();
        w.set("name", RegistryValue::String("Oak".into())).unwrap();
        w.set("times", RegistryValue::Array(vec![1, 2])).unwrap();
        let good = w.to_bytes().unwrap();
        assert!(Registry::parse(&good).is_ok());

        for (at, value) in [
            // root record count
            (8, u32::MAX),
            // root first record
            (4, u32::MAX - 1),
            // record count moves the data origin past the end
            (16, u32::MAX),
            // string length
            (record_word(0, 2), u32::MAX),
            // string offset
            (record_word(0, 1), u32::MAX),
            // array byte size
            (record_word(1, 2), 0xFFFF_FFFC),
        ] {
            assert!(Registry::parse(&patched(good.clone(), at, value)).is_err(), "word at {}", at);
        }
    }

    #[test]
    fn shared_and_deep_directories_are_rejected() {
        let mut w = RegistryWriter::new();
        w.set("a/b/c", RegistryValue::Integer(1)).unwrap();
        w.set("a/d", RegistryValue::Integer(2)).unwrap();
        let good = w.to_bytes().unwrap();
        assert_eq!(Registry::parse(&good).unwrap().get_value("a/b/c").as_integer(), 1);
        // a -> [b, d] at 1..3; b -> [c] at 3; point b at d instead
        let shared = patched(good, record_word(1, 1), 2);
        assert!(matches!(Registry::parse(&shared), Err(Error::InvalidFormat(_))));

        let mut w = RegistryWriter::new();
        let deep = vec!["d"; MAX_DEPTH + 2].join("/");
        w.set(&deep, RegistryValue::Integer(1)).unwrap();
        assert!(Registry::parse(&w.to_bytes().unwrap()).is_err());

        let mut w = RegistryWriter::new();
        let shallow = vec!["d"; MAX_DEPTH].join("/");
        w.set(&shallow, RegistryValue::Integer(1)).unwrap();
        assert!(Registry::parse(&w.to_bytes().unwrap()).is_ok());
    }

    proptest! {
        #[test]
        fn patched_words_never_panic(word in 0usize..40, value in any::<u32>(), keep in 0usize..512) {
            let mut w = RegistryWriter::new();
            w.set("Object0/DescText", RegistryValue::String("Oak".into())).unwrap();
            w.set("Object0/AnimationTime", RegistryValue::Array(vec![3, 4, 5])).unwrap();
            w.set("Object0/Scale", RegistryValue::Float(0.5)).unwrap();
            w.set("Global/Count", RegistryValue::Integer(1)).unwrap();
            let mut bytes = w.to_bytes().unwrap();
            if 4 * word + 4 <= bytes.len() {
                bytes = patched(bytes, 4 * word, value);
            }
            bytes.truncate(keep);
            let _ = Registry::parse(&bytes);
        }
    }

    fn sample_bytes() -> Vec<u8> {
        let mut w = RegistryWriter::new();
        w.set("x", RegistryValue::Integer(1)).unwrap();
        w.to_bytes().unwrap()
    }
}
