//! Superblock parsing and single-group geometry validation.

use e2r_types::{
    BlockSize, EXT2_GOOD_OLD_INODE_SIZE, EXT2_SUPER_MAGIC, EXT2_SUPERBLOCK_OFFSET,
    EXT2_SUPERBLOCK_SIZE, InodeNumber, ParseError, block_size_from_log, read_fixed, read_le_u16,
    read_le_u32, trim_nul_padded,
};
use serde::{Deserialize, Serialize};

/// Revision level of the original ext2 format (fixed 128-byte inodes).
pub const EXT2_GOOD_OLD_REV: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2Superblock {
    // ── Core geometry ────────────────────────────────────────────────────
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub reserved_blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub block_size: BlockSize,
    pub log_frag_size: u32,
    pub blocks_per_group: u32,
    pub frags_per_group: u32,
    pub inodes_per_group: u32,
    pub inode_size: u16,
    pub first_ino: u32,

    // ── Identity ─────────────────────────────────────────────────────────
    pub magic: u16,
    pub uuid: [u8; 16],
    pub volume_name: String,
    pub last_mounted: String,

    // ── Revision & OS ────────────────────────────────────────────────────
    pub rev_level: u32,
    pub minor_rev_level: u16,
    pub creator_os: u32,

    // ── Features ─────────────────────────────────────────────────────────
    pub feature_compat: u32,
    pub feature_incompat: u32,
    pub feature_ro_compat: u32,

    // ── State & mount bookkeeping ────────────────────────────────────────
    pub state: u16,
    pub errors: u16,
    pub mnt_count: u16,
    pub max_mnt_count: u16,

    // ── Timestamps ───────────────────────────────────────────────────────
    pub mtime: u32,
    pub wtime: u32,
    pub lastcheck: u32,
    pub checkinterval: u32,
}

impl Ext2Superblock {
    /// Parse an ext2 superblock from a 1024-byte superblock region.
    ///
    /// Validates the magic number and derives the block size from the log2
    /// field. Geometry limitations (1024-byte blocks, single group) are
    /// checked separately by [`validate_single_group`](Self::validate_single_group)
    /// so callers can distinguish corruption from unsupported-but-valid images.
    pub fn parse_superblock_region(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < EXT2_SUPERBLOCK_SIZE {
            return Err(ParseError::InsufficientData {
                needed: EXT2_SUPERBLOCK_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }

        let magic = read_le_u16(region, 0x38)?;
        if magic != EXT2_SUPER_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(EXT2_SUPER_MAGIC),
                actual: u64::from(magic),
            });
        }

        let log_block_size = read_le_u32(region, 0x18)?;
        let Some(raw_block_size) = block_size_from_log(log_block_size) else {
            return Err(ParseError::InvalidField {
                field: "s_log_block_size",
                reason: "invalid shift",
            });
        };
        let block_size = BlockSize::new(raw_block_size)?;

        Ok(Self {
            // Core geometry
            inodes_count: read_le_u32(region, 0x00)?,
            blocks_count: read_le_u32(region, 0x04)?,
            reserved_blocks_count: read_le_u32(region, 0x08)?,
            free_blocks_count: read_le_u32(region, 0x0C)?,
            free_inodes_count: read_le_u32(region, 0x10)?,
            first_data_block: read_le_u32(region, 0x14)?,
            block_size,
            log_frag_size: read_le_u32(region, 0x1C)?,
            blocks_per_group: read_le_u32(region, 0x20)?,
            frags_per_group: read_le_u32(region, 0x24)?,
            inodes_per_group: read_le_u32(region, 0x28)?,
            inode_size: read_le_u16(region, 0x58)?,
            first_ino: read_le_u32(region, 0x54)?,

            // Identity
            magic,
            uuid: read_fixed::<16>(region, 0x68)?,
            volume_name: trim_nul_padded(&read_fixed::<16>(region, 0x78)?),
            last_mounted: trim_nul_padded(&read_fixed::<64>(region, 0x88)?),

            // Revision & OS
            rev_level: read_le_u32(region, 0x4C)?,
            minor_rev_level: read_le_u16(region, 0x3E)?,
            creator_os: read_le_u32(region, 0x48)?,

            // Features
            feature_compat: read_le_u32(region, 0x5C)?,
            feature_incompat: read_le_u32(region, 0x60)?,
            feature_ro_compat: read_le_u32(region, 0x64)?,

            // State & mount bookkeeping
            state: read_le_u16(region, 0x3A)?,
            errors: read_le_u16(region, 0x3C)?,
            mnt_count: read_le_u16(region, 0x34)?,
            max_mnt_count: read_le_u16(region, 0x36)?,

            // Timestamps
            mtime: read_le_u32(region, 0x2C)?,
            wtime: read_le_u32(region, 0x30)?,
            lastcheck: read_le_u32(region, 0x40)?,
            checkinterval: read_le_u32(region, 0x44)?,
        })
    }

    /// Parse an ext2 superblock from a full disk image (boot block skipped).
    pub fn parse_from_image(image: &[u8]) -> Result<Self, ParseError> {
        let end = EXT2_SUPERBLOCK_OFFSET + EXT2_SUPERBLOCK_SIZE;
        if image.len() < end {
            return Err(ParseError::InsufficientData {
                needed: EXT2_SUPERBLOCK_SIZE,
                offset: EXT2_SUPERBLOCK_OFFSET,
                actual: image.len().saturating_sub(EXT2_SUPERBLOCK_OFFSET),
            });
        }
        Self::parse_superblock_region(&image[EXT2_SUPERBLOCK_OFFSET..end])
    }

    /// Inode record size in effect for this filesystem.
    ///
    /// Revision-0 filesystems have no `s_inode_size` field; the record is
    /// always 128 bytes. A zero on-disk value is treated the same way.
    #[must_use]
    pub fn effective_inode_size(&self) -> u16 {
        if self.rev_level == EXT2_GOOD_OLD_REV || self.inode_size == 0 {
            EXT2_GOOD_OLD_INODE_SIZE
        } else {
            self.inode_size
        }
    }

    /// Validate the geometry limitations this reader supports: a 1024-byte
    /// block size and exactly one block group.
    ///
    /// The group-descriptor and inode-table arithmetic in the composition
    /// layer indexes a single group at fixed offsets; an image spanning
    /// several groups is well-formed but out of scope, and is reported with
    /// an "unsupported" reason so callers can surface it distinctly from
    /// corruption.
    pub fn validate_single_group(&self) -> Result<(), ParseError> {
        if self.block_size.get() != 1024 {
            return Err(ParseError::InvalidField {
                field: "s_log_block_size",
                reason: "unsupported block size (this reader handles 1024-byte blocks only)",
            });
        }
        if self.blocks_per_group == 0 {
            return Err(ParseError::InvalidField {
                field: "s_blocks_per_group",
                reason: "cannot be zero",
            });
        }
        if self.inodes_per_group == 0 {
            return Err(ParseError::InvalidField {
                field: "s_inodes_per_group",
                reason: "cannot be zero",
            });
        }
        if self.inodes_per_group != self.inodes_count {
            return Err(ParseError::InvalidField {
                field: "s_inodes_per_group",
                reason: "unsupported layout: image spans more than one block group",
            });
        }
        if self.blocks_per_group != self.blocks_count {
            return Err(ParseError::InvalidField {
                field: "s_blocks_per_group",
                reason: "unsupported layout: image spans more than one block group",
            });
        }

        let inode_size = self.effective_inode_size();
        if inode_size < EXT2_GOOD_OLD_INODE_SIZE {
            return Err(ParseError::InvalidField {
                field: "s_inode_size",
                reason: "must be >= 128",
            });
        }
        if !inode_size.is_power_of_two() {
            return Err(ParseError::InvalidField {
                field: "s_inode_size",
                reason: "must be a power of two",
            });
        }
        if u32::from(inode_size) > self.block_size.get() {
            return Err(ParseError::InvalidField {
                field: "s_inode_size",
                reason: "inode_size exceeds block_size",
            });
        }

        Ok(())
    }

    /// Byte offset of the group descriptor table: the block immediately
    /// following the superblock's block.
    #[must_use]
    pub fn group_desc_offset(&self) -> u64 {
        2 * u64::from(self.block_size.get())
    }

    /// Byte offset of inode `ino` within the inode table.
    ///
    /// Inode numbers are 1-based. Returns `InvalidField` for inode 0 or a
    /// number beyond `inodes_count`.
    pub fn inode_table_offset(&self, ino: InodeNumber) -> Result<u64, ParseError> {
        if ino.0 == 0 {
            return Err(ParseError::InvalidField {
                field: "inode_number",
                reason: "inode numbers are 1-based; 0 is invalid",
            });
        }
        if ino.0 > self.inodes_count {
            return Err(ParseError::InvalidField {
                field: "inode_number",
                reason: "exceeds s_inodes_count",
            });
        }
        Ok(u64::from(ino.0 - 1) * u64::from(self.effective_inode_size()))
    }
}
