//! Inode record parsing.

use e2r_types::{
    BlockNumber, EXT2_FAST_SYMLINK_MAX, EXT2_N_BLOCKS, ParseError, S_IFBLK, S_IFCHR, S_IFDIR,
    S_IFIFO, S_IFLNK, S_IFMT, S_IFREG, S_IFSOCK, read_le_u16, read_le_u32,
};
use serde::{Deserialize, Serialize};

/// A parsed ext2 inode (classic 128-byte record).
///
/// Read-only snapshot of the on-disk state; nothing here is ever written
/// back. `blocks` counts 512-byte sectors, not filesystem blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2Inode {
    pub mode: u16,
    pub uid: u16,
    pub gid: u16,
    pub size: u32,
    pub links_count: u16,
    pub blocks: u32,
    pub flags: u32,

    // ── Timestamps (seconds since epoch) ─────────────────────────────────
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,

    /// 12 direct pointers, then single, double, and triple indirect.
    /// A zero entry denotes a hole.
    pub block: [u32; EXT2_N_BLOCKS],

    pub generation: u32,
    pub file_acl: u32,
    pub dir_acl: u32,
    pub faddr: u32,
}

impl Ext2Inode {
    /// Parse an ext2 inode from raw bytes (at least the base 128).
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < 128 {
            return Err(ParseError::InsufficientData {
                needed: 128,
                offset: 0,
                actual: bytes.len(),
            });
        }

        let mut block = [0_u32; EXT2_N_BLOCKS];
        for (i, slot) in block.iter_mut().enumerate() {
            *slot = read_le_u32(bytes, 0x28 + i * 4)?;
        }

        Ok(Self {
            mode: read_le_u16(bytes, 0x00)?,
            uid: read_le_u16(bytes, 0x02)?,
            size: read_le_u32(bytes, 0x04)?,
            atime: read_le_u32(bytes, 0x08)?,
            ctime: read_le_u32(bytes, 0x0C)?,
            mtime: read_le_u32(bytes, 0x10)?,
            dtime: read_le_u32(bytes, 0x14)?,
            gid: read_le_u16(bytes, 0x18)?,
            links_count: read_le_u16(bytes, 0x1A)?,
            blocks: read_le_u32(bytes, 0x1C)?,
            flags: read_le_u32(bytes, 0x20)?,
            block,
            generation: read_le_u32(bytes, 0x64)?,
            file_acl: read_le_u32(bytes, 0x68)?,
            dir_acl: read_le_u32(bytes, 0x6C)?,
            faddr: read_le_u32(bytes, 0x70)?,
        })
    }

    // ── File type detection ─────────────────────────────────────────────

    /// Extract the file type bits from the mode field.
    #[must_use]
    pub fn file_type_mode(&self) -> u16 {
        self.mode & S_IFMT
    }

    /// Whether this inode is a regular file.
    #[must_use]
    pub fn is_regular(&self) -> bool {
        self.file_type_mode() == S_IFREG
    }

    /// Whether this inode is a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.file_type_mode() == S_IFDIR
    }

    /// Whether this inode is a symbolic link.
    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.file_type_mode() == S_IFLNK
    }

    /// Whether this inode is a character device.
    #[must_use]
    pub fn is_chrdev(&self) -> bool {
        self.file_type_mode() == S_IFCHR
    }

    /// Whether this inode is a block device.
    #[must_use]
    pub fn is_blkdev(&self) -> bool {
        self.file_type_mode() == S_IFBLK
    }

    /// Whether this inode is a FIFO (named pipe).
    #[must_use]
    pub fn is_fifo(&self) -> bool {
        self.file_type_mode() == S_IFIFO
    }

    /// Whether this inode is a socket.
    #[must_use]
    pub fn is_socket(&self) -> bool {
        self.file_type_mode() == S_IFSOCK
    }

    /// Permission bits (lower 12 bits of mode).
    #[must_use]
    pub fn permission_bits(&self) -> u16 {
        self.mode & 0o7777
    }

    /// Pointer-array entry `index` as a block number, `None` for a hole.
    #[must_use]
    pub fn block_pointer(&self, index: usize) -> Option<BlockNumber> {
        match self.block.get(index) {
            Some(0) | None => None,
            Some(&n) => Some(BlockNumber(n)),
        }
    }

    // ── Symlink helpers ─────────────────────────────────────────────────

    /// Whether this is a "fast" symlink whose target lives in the inode's
    /// block-array area rather than in data blocks.
    ///
    /// ext2 marks fast symlinks by leaving `i_blocks` at zero; the target
    /// (up to 60 bytes) occupies the pointer array bytes directly.
    #[must_use]
    pub fn is_fast_symlink(&self) -> bool {
        self.is_symlink() && self.blocks == 0 && self.size as usize <= EXT2_FAST_SYMLINK_MAX
    }

    /// Target bytes of a fast symlink, `None` if this is not one.
    #[must_use]
    pub fn fast_symlink_target(&self) -> Option<Vec<u8>> {
        if !self.is_fast_symlink() {
            return None;
        }
        let mut raw = Vec::with_capacity(EXT2_FAST_SYMLINK_MAX);
        for word in &self.block {
            raw.extend_from_slice(&word.to_le_bytes());
        }
        raw.truncate(self.size as usize);
        Some(raw)
    }
}
