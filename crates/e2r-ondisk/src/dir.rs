//! Directory-entry record parsing.
//!
//! Records are variable-length and packed so that every record begins and
//! ends within one data block; the last record in a block is padded out to
//! the block boundary via its `rec_len`. Entries with inode 0 (deleted or
//! never-used slack) are yielded to callers rather than dropped, so the
//! on-disk framing stays reconstructible; name lookups filter them.

use e2r_types::{ParseError, ensure_slice, read_le_u16, read_le_u32};
use serde::{Deserialize, Serialize};

/// Fixed header bytes preceding the name in every record.
const DIR_ENTRY_HEADER: usize = 8;

/// File type tag from a directory entry's 1-byte type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Ext2FileType {
    Unknown = 0,
    RegFile = 1,
    Dir = 2,
    Chrdev = 3,
    Blkdev = 4,
    Fifo = 5,
    Sock = 6,
    Symlink = 7,
}

impl Ext2FileType {
    #[must_use]
    pub fn from_raw(val: u8) -> Self {
        match val {
            1 => Self::RegFile,
            2 => Self::Dir,
            3 => Self::Chrdev,
            4 => Self::Blkdev,
            5 => Self::Fifo,
            6 => Self::Sock,
            7 => Self::Symlink,
            _ => Self::Unknown,
        }
    }
}

/// A parsed ext2 directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2DirEntry {
    /// Referenced inode; 0 marks a deleted or never-used slot.
    pub inode: u32,
    /// On-disk record length, including header, name, and padding.
    pub rec_len: u16,
    pub name_len: u8,
    pub file_type: Ext2FileType,
    pub name: Vec<u8>,
}

impl Ext2DirEntry {
    /// Return the name as a UTF-8 string (lossy).
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    /// Whether this slot holds a live entry (non-zero inode).
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.inode != 0
    }

    /// Whether this is the `.` entry.
    #[must_use]
    pub fn is_dot(&self) -> bool {
        self.name == b"."
    }

    /// Whether this is the `..` entry.
    #[must_use]
    pub fn is_dotdot(&self) -> bool {
        self.name == b".."
    }
}

/// A borrowed directory entry (zero-copy reference into the block buffer).
///
/// Unlike [`Ext2DirEntry`] which owns its name bytes, this borrows the name
/// slice from the block buffer, avoiding per-entry heap allocation when
/// scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ext2DirEntryRef<'a> {
    pub inode: u32,
    pub rec_len: u16,
    pub name_len: u8,
    pub file_type: Ext2FileType,
    pub name: &'a [u8],
}

impl Ext2DirEntryRef<'_> {
    /// Convert to an owned [`Ext2DirEntry`] (allocates name bytes).
    #[must_use]
    pub fn to_owned_entry(&self) -> Ext2DirEntry {
        Ext2DirEntry {
            inode: self.inode,
            rec_len: self.rec_len,
            name_len: self.name_len,
            file_type: self.file_type,
            name: self.name.to_vec(),
        }
    }
}

/// An iterator over the directory records packed into one data block.
///
/// Yields `Result<Ext2DirEntryRef<'a>, ParseError>` for every record that
/// begins in the block, including inode-0 slack records. Iteration stops at
/// the block boundary; a record that would make no forward progress or step
/// past the boundary is an error.
pub struct DirBlockIter<'a> {
    block: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> DirBlockIter<'a> {
    #[must_use]
    pub fn new(block: &'a [u8]) -> Self {
        Self {
            block,
            offset: 0,
            done: false,
        }
    }

    fn parse_at(&self, offset: usize) -> Result<(Ext2DirEntryRef<'a>, usize), ParseError> {
        let inode = read_le_u32(self.block, offset)?;
        let rec_len = read_le_u16(self.block, offset + 4)?;
        let name_len = ensure_slice(self.block, offset + 6, 1)?[0];
        let file_type_raw = ensure_slice(self.block, offset + 7, 1)?[0];

        // rec_len bounds the walk: too short means no forward progress,
        // too long means the record claims bytes past the block boundary.
        if usize::from(rec_len) < DIR_ENTRY_HEADER {
            return Err(ParseError::InvalidField {
                field: "de_rec_len",
                reason: "directory entry rec_len < 8",
            });
        }
        let entry_end = offset + usize::from(rec_len);
        if entry_end > self.block.len() {
            return Err(ParseError::InvalidField {
                field: "de_rec_len",
                reason: "directory entry extends past block boundary",
            });
        }

        let name_end = offset + DIR_ENTRY_HEADER + usize::from(name_len);
        if name_end > entry_end {
            return Err(ParseError::InvalidField {
                field: "de_name_len",
                reason: "name extends past rec_len",
            });
        }

        Ok((
            Ext2DirEntryRef {
                inode,
                rec_len,
                name_len,
                file_type: Ext2FileType::from_raw(file_type_raw),
                name: &self.block[offset + DIR_ENTRY_HEADER..name_end],
            },
            entry_end,
        ))
    }
}

impl<'a> Iterator for DirBlockIter<'a> {
    type Item = Result<Ext2DirEntryRef<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset + DIR_ENTRY_HEADER > self.block.len() {
            return None;
        }
        match self.parse_at(self.offset) {
            Ok((entry, next_offset)) => {
                self.offset = next_offset;
                Some(Ok(entry))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Parse all directory records from a single directory data block.
pub fn parse_dir_block(block: &[u8]) -> Result<Vec<Ext2DirEntry>, ParseError> {
    DirBlockIter::new(block)
        .map(|entry| entry.map(|e| e.to_owned_entry()))
        .collect()
}

/// Look up a single name in a directory data block.
///
/// Only live entries (non-zero inode) match.
pub fn lookup_in_dir_block(block: &[u8], target: &[u8]) -> Result<Option<Ext2DirEntry>, ParseError> {
    for entry in DirBlockIter::new(block) {
        let entry = entry?;
        if entry.inode != 0 && entry.name == target {
            return Ok(Some(entry.to_owned_entry()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Append one record, padding `rec_len` as directed.
    fn push_entry(block: &mut Vec<u8>, inode: u32, rec_len: u16, file_type: u8, name: &[u8]) {
        block.extend_from_slice(&inode.to_le_bytes());
        block.extend_from_slice(&rec_len.to_le_bytes());
        block.push(u8::try_from(name.len()).unwrap());
        block.push(file_type);
        block.extend_from_slice(name);
        let written = DIR_ENTRY_HEADER + name.len();
        block.resize(block.len() + usize::from(rec_len) - written, 0);
    }

    /// A 1024-byte block holding `.`, `..`, and `abc.txt`.
    fn make_dir_block() -> Vec<u8> {
        let mut block = Vec::new();
        push_entry(&mut block, 2, 12, 2, b".");
        push_entry(&mut block, 2, 12, 2, b"..");
        push_entry(&mut block, 13, 1000, 1, b"abc.txt");
        assert_eq!(block.len(), 1024);
        block
    }

    #[test]
    fn parse_dir_block_orders_entries() {
        let entries = parse_dir_block(&make_dir_block()).expect("parse");
        assert_eq!(entries.len(), 3);
        assert!(entries[0].is_dot());
        assert!(entries[1].is_dotdot());
        assert_eq!(entries[2].name_str(), "abc.txt");
        assert_eq!(entries[2].inode, 13);
        assert_eq!(entries[2].file_type, Ext2FileType::RegFile);
    }

    #[test]
    fn rec_len_sums_to_block_size() {
        let entries = parse_dir_block(&make_dir_block()).expect("parse");
        let total: usize = entries.iter().map(|e| usize::from(e.rec_len)).sum();
        assert_eq!(total, 1024);
    }

    #[test]
    fn zero_inode_entries_are_kept() {
        let mut block = Vec::new();
        push_entry(&mut block, 2, 12, 2, b".");
        push_entry(&mut block, 0, 16, 0, b"gone.txt"); // deleted slot
        push_entry(&mut block, 13, 996, 1, b"abc.txt");
        assert_eq!(block.len(), 1024);

        let entries = parse_dir_block(&block).expect("parse");
        assert_eq!(entries.len(), 3);
        assert!(!entries[1].is_live());
        assert_eq!(entries[1].name_str(), "gone.txt");
        // The deleted slot is invisible to lookup.
        assert!(lookup_in_dir_block(&block, b"gone.txt").unwrap().is_none());
        assert_eq!(
            lookup_in_dir_block(&block, b"abc.txt").unwrap().unwrap().inode,
            13
        );
    }

    #[test]
    fn zero_rec_len_is_corrupt() {
        let mut block = make_dir_block();
        block[4..6].copy_from_slice(&0_u16.to_le_bytes());
        let err = parse_dir_block(&block).expect_err("reject");
        assert!(matches!(
            err,
            ParseError::InvalidField {
                field: "de_rec_len",
                reason: "directory entry rec_len < 8",
            }
        ));
    }

    #[test]
    fn rec_len_past_block_boundary_is_corrupt() {
        let mut block = make_dir_block();
        // First record now claims more than the whole block.
        block[4..6].copy_from_slice(&2048_u16.to_le_bytes());
        let err = parse_dir_block(&block).expect_err("reject");
        assert!(matches!(
            err,
            ParseError::InvalidField {
                field: "de_rec_len",
                reason: "directory entry extends past block boundary",
            }
        ));
    }

    #[test]
    fn name_past_rec_len_is_corrupt() {
        let mut block = make_dir_block();
        block[6] = 20; // name_len > rec_len - 8 for the 12-byte "." record
        let err = parse_dir_block(&block).expect_err("reject");
        assert!(matches!(
            err,
            ParseError::InvalidField {
                field: "de_name_len",
                ..
            }
        ));
    }

    #[test]
    fn iter_borrows_names_from_block() {
        let block = make_dir_block();
        let names: Vec<&[u8]> = DirBlockIter::new(&block)
            .map(|e| e.expect("entry").name)
            .collect();
        assert_eq!(names, vec![&b"."[..], b"..", b"abc.txt"]);
    }
}
