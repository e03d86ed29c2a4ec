//! The unified binary index node.
//!
//! Serialized layout (integers big-endian):
//!
//! ```text
//! header (8 bytes)
//!   version:     u8   (currently 1)
//!   flags:       u8   (bit 0 HAS_DATA, bit 1 SORT_BY_DATA, bit 2 IS_RANGE)
//!   entry_count: u16
//!   key_size:    u16
//!   value_size:  u8
//!   reserved:    u8
//! entries (entry_count * (key_size + value_size [+ 4]))
//!   key:    key_size bytes   (absent when key_size == 0)
//!   value:  value_size bytes
//!   offset: u32              (present only when HAS_DATA)
//! data section (only when HAS_DATA)
//!   at each referenced offset: u32 length || bytes
//! ```
//!
//! Offset 0 means "this entry carries no data"; the data section therefore
//! opens with a single reserved pad byte so real offsets start at 1.

use teraindex_core::IndexHash;

use crate::error::NodeError;

const VERSION: u8 = 1;
const HEADER_SIZE: usize = 8;
const OFFSET_SIZE: usize = 4;

const FLAG_HAS_DATA: u8 = 0x01;
const FLAG_SORT_BY_DATA: u8 = 0x02;
const FLAG_IS_RANGE: u8 = 0x04;

/// Maximum number of entries a node can hold.
pub const MAX_ENTRY_COUNT: usize = u16::MAX as usize;

/// A single entry in an index node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Fixed-size key (empty when the node is keyless).
    pub key: Vec<u8>,
    /// Fixed-size value, typically a 34-byte multihash.
    pub value: Vec<u8>,
    /// Offset into the data section, 0 when the entry has no data.
    pub offset: u32,
}

/// A unified index block supporting keyed, data-keyed, range, and
/// array-by-index access over one physical format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNode {
    version: u8,
    has_data: bool,
    sort_by_data: bool,
    is_range: bool,
    key_size: u16,
    value_size: u8,
    entries: Vec<Entry>,
    data_section: Vec<u8>,
}

impl IndexNode {
    /// Create an empty node with the given layout.
    pub fn new(
        key_size: u16,
        value_size: u8,
        has_data: bool,
        sort_by_data: bool,
        is_range: bool,
    ) -> Self {
        Self {
            version: VERSION,
            has_data,
            sort_by_data,
            is_range,
            key_size,
            value_size,
            entries: Vec::new(),
            // Reserve offset 0 as the "no data" sentinel.
            data_section: if has_data { vec![0] } else { Vec::new() },
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the node holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fixed key size in bytes (0 = keyless).
    pub fn key_size(&self) -> u16 {
        self.key_size
    }

    /// Fixed value size in bytes.
    pub fn value_size(&self) -> u8 {
        self.value_size
    }

    /// Whether the node carries a data section.
    pub fn has_data(&self) -> bool {
        self.has_data
    }

    /// Whether entries are ordered by referenced data instead of key.
    pub fn sort_by_data(&self) -> bool {
        self.sort_by_data
    }

    /// Whether entries define half-open key ranges over child nodes.
    pub fn is_range(&self) -> bool {
        self.is_range
    }

    /// The entries in storage order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Append an entry. Sizes must match the node layout exactly.
    pub fn add_entry(&mut self, key: &[u8], value: &[u8], offset: u32) -> Result<(), NodeError> {
        if self.key_size > 0 && key.len() != self.key_size as usize {
            return Err(NodeError::KeySizeMismatch {
                expected: self.key_size,
                got: key.len(),
            });
        }
        if self.key_size == 0 && !key.is_empty() {
            return Err(NodeError::UnexpectedKey);
        }
        if value.len() != self.value_size as usize {
            return Err(NodeError::ValueSizeMismatch {
                expected: self.value_size,
                got: value.len(),
            });
        }
        if !self.has_data && offset != 0 {
            return Err(NodeError::OffsetWithoutData);
        }
        if self.entries.len() >= MAX_ENTRY_COUNT {
            return Err(NodeError::TooManyEntries(self.entries.len() + 1));
        }

        self.entries.push(Entry {
            key: key.to_vec(),
            value: value.to_vec(),
            offset,
        });
        Ok(())
    }

    /// Append length-prefixed bytes to the data section, returning the
    /// offset an entry should reference them by.
    pub fn push_data(&mut self, data: &[u8]) -> Result<u32, NodeError> {
        if !self.has_data {
            return Err(NodeError::NoDataSection);
        }
        let offset = self.data_section.len();
        let end = offset
            .checked_add(4)
            .and_then(|n| n.checked_add(data.len()))
            .ok_or(NodeError::DataOverflow)?;
        if end > u32::MAX as usize {
            return Err(NodeError::DataOverflow);
        }

        self.data_section
            .extend_from_slice(&(data.len() as u32).to_be_bytes());
        self.data_section.extend_from_slice(data);
        Ok(offset as u32)
    }

    /// Append an entry together with its data in one step.
    pub fn add_entry_with_data(
        &mut self,
        key: &[u8],
        value: &[u8],
        data: &[u8],
    ) -> Result<(), NodeError> {
        let offset = self.push_data(data)?;
        self.add_entry(key, value, offset)
    }

    /// Read the length-prefixed data an offset points at.
    ///
    /// Returns `None` for the 0 sentinel and for any offset whose prefix or
    /// payload would run past the section. Bad offsets surface here, on
    /// access, never during decode.
    pub fn data_at(&self, offset: u32) -> Option<&[u8]> {
        let offset = offset as usize;
        if offset == 0 || offset >= self.data_section.len() {
            return None;
        }
        let prefix_end = offset.checked_add(4)?;
        if prefix_end > self.data_section.len() {
            return None;
        }
        let mut len_buf = [0u8; 4];
        len_buf.copy_from_slice(&self.data_section[offset..prefix_end]);
        let len = u32::from_be_bytes(len_buf) as usize;

        let data_end = prefix_end.checked_add(len)?;
        if data_end > self.data_section.len() {
            return None;
        }
        Some(&self.data_section[prefix_end..data_end])
    }

    fn sort_key_of(&self, entry: &Entry) -> Vec<u8> {
        if self.sort_by_data {
            self.data_at(entry.offset).unwrap_or_default().to_vec()
        } else {
            entry.key.clone()
        }
    }

    /// Sort entries ascending by key, or by referenced data when
    /// `SORT_BY_DATA` is set. Duplicate sort keys are rejected: binary
    /// search over ties is ambiguous, so callers must deduplicate first.
    pub fn sort(&mut self) -> Result<(), NodeError> {
        if self.sort_by_data {
            if !self.has_data {
                return Err(NodeError::SortWithoutData);
            }
        } else if self.key_size == 0 {
            return Err(NodeError::SortWithoutKeys);
        }

        let entries = std::mem::take(&mut self.entries);
        let mut keyed: Vec<(Vec<u8>, Entry)> = entries
            .into_iter()
            .map(|e| (self.sort_key_of(&e), e))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        let duplicate = keyed.windows(2).position(|w| w[0].0 == w[1].0);
        self.entries = keyed.into_iter().map(|(_, e)| e).collect();

        match duplicate {
            Some(i) => Err(NodeError::DuplicateSortKey(i + 1)),
            None => Ok(()),
        }
    }

    fn entry_stride(&self) -> usize {
        let mut stride = self.key_size as usize + self.value_size as usize;
        if self.has_data {
            stride += OFFSET_SIZE;
        }
        stride
    }

    /// Serialized size in bytes.
    pub fn size(&self) -> usize {
        let mut total = HEADER_SIZE + self.entries.len() * self.entry_stride();
        if self.has_data {
            total += self.data_section.len();
        }
        total
    }

    /// Serialize to the on-disk format.
    pub fn encode(&self) -> Result<Vec<u8>, NodeError> {
        if self.entries.is_empty() {
            return Err(NodeError::Empty);
        }
        if self.entries.len() > MAX_ENTRY_COUNT {
            return Err(NodeError::TooManyEntries(self.entries.len()));
        }

        let mut buf = Vec::with_capacity(self.size());

        buf.push(self.version);
        let mut flags = 0u8;
        if self.has_data {
            flags |= FLAG_HAS_DATA;
        }
        if self.sort_by_data {
            flags |= FLAG_SORT_BY_DATA;
        }
        if self.is_range {
            flags |= FLAG_IS_RANGE;
        }
        buf.push(flags);
        buf.extend_from_slice(&(self.entries.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.key_size.to_be_bytes());
        buf.push(self.value_size);
        buf.push(0); // reserved

        for entry in &self.entries {
            if self.key_size > 0 {
                buf.extend_from_slice(&entry.key);
            }
            buf.extend_from_slice(&entry.value);
            if self.has_data {
                buf.extend_from_slice(&entry.offset.to_be_bytes());
            }
        }

        if self.has_data {
            buf.extend_from_slice(&self.data_section);
        }

        Ok(buf)
    }

    /// Deserialize from the on-disk format.
    pub fn decode(data: &[u8]) -> Result<Self, NodeError> {
        if data.len() < HEADER_SIZE {
            return Err(NodeError::Truncated {
                need: HEADER_SIZE,
                got: data.len(),
            });
        }

        let version = data[0];
        if version != VERSION {
            return Err(NodeError::BadVersion(version));
        }

        let flags = data[1];
        let has_data = flags & FLAG_HAS_DATA != 0;
        let sort_by_data = flags & FLAG_SORT_BY_DATA != 0;
        let is_range = flags & FLAG_IS_RANGE != 0;

        let entry_count = u16::from_be_bytes([data[2], data[3]]) as usize;
        let key_size = u16::from_be_bytes([data[4], data[5]]);
        let value_size = data[6];

        if entry_count == 0 {
            return Err(NodeError::ZeroEntries);
        }

        let mut stride = key_size as usize + value_size as usize;
        if has_data {
            stride += OFFSET_SIZE;
        }

        let min_size = HEADER_SIZE + entry_count * stride;
        if data.len() < min_size {
            return Err(NodeError::Truncated {
                need: min_size,
                got: data.len(),
            });
        }

        let mut entries = Vec::with_capacity(entry_count);
        let mut pos = HEADER_SIZE;

        for _ in 0..entry_count {
            let key = if key_size > 0 {
                let k = data[pos..pos + key_size as usize].to_vec();
                pos += key_size as usize;
                k
            } else {
                Vec::new()
            };

            let value = data[pos..pos + value_size as usize].to_vec();
            pos += value_size as usize;

            let offset = if has_data {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(&data[pos..pos + OFFSET_SIZE]);
                pos += OFFSET_SIZE;
                u32::from_be_bytes(buf)
            } else {
                0
            };

            entries.push(Entry { key, value, offset });
        }

        let data_section = if has_data && data.len() > pos {
            data[pos..].to_vec()
        } else {
            Vec::new()
        };

        Ok(Self {
            version,
            has_data,
            sort_by_data,
            is_range,
            key_size,
            value_size,
            entries,
            data_section,
        })
    }

    /// BLAKE3 multihash of the serialized node.
    pub fn hash(&self) -> Result<IndexHash, NodeError> {
        Ok(IndexHash::hash(&self.encode()?))
    }

    /// Binary search for an exact key. Only valid on key-sorted nodes;
    /// keyless or data-sorted nodes return `None`.
    pub fn find_by_key(&self, search_key: &[u8]) -> Option<&[u8]> {
        if self.key_size == 0 || self.sort_by_data {
            return None;
        }

        let idx = self
            .entries
            .partition_point(|e| e.key.as_slice() < search_key);
        match self.entries.get(idx) {
            Some(e) if e.key == search_key => Some(&e.value),
            _ => None,
        }
    }

    /// Binary search for an exact data-section value. Only valid on
    /// data-sorted nodes with a data section.
    pub fn find_by_data(&self, search_data: &[u8]) -> Option<&[u8]> {
        if !self.has_data || !self.sort_by_data {
            return None;
        }

        let idx = self
            .entries
            .partition_point(|e| self.data_at(e.offset).unwrap_or_default() < search_data);
        match self.entries.get(idx) {
            Some(e) if self.data_at(e.offset).unwrap_or_default() == search_data => {
                Some(&e.value)
            }
            _ => None,
        }
    }

    /// For range nodes: find the child whose half-open interval contains
    /// `search_key` and return its value (the child node hash).
    pub fn find_range(&self, search_key: &[u8]) -> Option<&[u8]> {
        if !self.is_range {
            return None;
        }

        // Entries are range starts: entry[i] covers [entry[i].key, entry[i+1].key).
        let idx = self
            .entries
            .partition_point(|e| self.sort_key_of(e).as_slice() <= search_key);
        let idx = idx.saturating_sub(1);
        self.entries.get(idx).map(|e| e.value.as_slice())
    }

    /// Array-style access by entry index.
    pub fn get_by_index(&self, index: usize) -> Option<&[u8]> {
        self.entries.get(index).map(|e| e.value.as_slice())
    }
}
