//! Block-group descriptor parsing.

use e2r_types::{BlockNumber, ParseError, read_le_u16, read_le_u32};
use serde::{Deserialize, Serialize};

/// Size of one on-disk group descriptor record.
pub const EXT2_GROUP_DESC_SIZE: usize = 32;

/// A parsed ext2 block-group descriptor.
///
/// The free counts and used-directory count are bookkeeping only; none of
/// the read paths depend on them for correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2GroupDesc {
    pub block_bitmap: BlockNumber,
    pub inode_bitmap: BlockNumber,
    pub inode_table: BlockNumber,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
}

impl Ext2GroupDesc {
    /// Parse a group descriptor from its 32-byte on-disk record.
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < EXT2_GROUP_DESC_SIZE {
            return Err(ParseError::InsufficientData {
                needed: EXT2_GROUP_DESC_SIZE,
                offset: 0,
                actual: bytes.len(),
            });
        }

        let desc = Self {
            block_bitmap: BlockNumber(read_le_u32(bytes, 0x00)?),
            inode_bitmap: BlockNumber(read_le_u32(bytes, 0x04)?),
            inode_table: BlockNumber(read_le_u32(bytes, 0x08)?),
            free_blocks_count: read_le_u16(bytes, 0x0C)?,
            free_inodes_count: read_le_u16(bytes, 0x0E)?,
            used_dirs_count: read_le_u16(bytes, 0x10)?,
        };

        // A descriptor whose bitmaps or inode table live at block 0 would
        // alias the boot block; nothing valid ever points there.
        if desc.block_bitmap.0 == 0 {
            return Err(ParseError::InvalidField {
                field: "bg_block_bitmap",
                reason: "cannot be block 0",
            });
        }
        if desc.inode_bitmap.0 == 0 {
            return Err(ParseError::InvalidField {
                field: "bg_inode_bitmap",
                reason: "cannot be block 0",
            });
        }
        if desc.inode_table.0 == 0 {
            return Err(ParseError::InvalidField {
                field: "bg_inode_table",
                reason: "cannot be block 0",
            });
        }

        Ok(desc)
    }
}
