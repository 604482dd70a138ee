#![forbid(unsafe_code)]
//! Read-only ext2 image decoding.
//!
//! [`Ext2Fs`] ties the layers together: it opens a backing device, decodes
//! and validates the superblock and the single group descriptor, and then
//! serves inode, directory, and file-content reads on demand. Nothing is
//! cached and nothing is ever written; every operation re-reads the blocks
//! it needs, so repeated calls against an unchanged image return identical
//! results.

mod blockmap;

pub use blockmap::DataBlocks;

use e2r_block::{
    BlockBuf, ByteBlockDevice, ByteDevice, FileByteDevice, VecByteDevice, read_superblock_region,
};
use e2r_error::{Ext2Error, Result};
use e2r_ondisk::{
    EXT2_GROUP_DESC_SIZE, Ext2DirEntry, Ext2GroupDesc, Ext2Inode, Ext2Superblock,
    lookup_in_dir_block, parse_dir_block,
};
use e2r_types::{BlockNumber, BlockSize, InodeNumber, ParseError, u64_to_usize};
use std::path::Path;
use tracing::{debug, trace};

/// Convert a parse-layer error into the user-facing error type.
///
/// Validation failures whose reason text says "unsupported" describe a
/// well-formed image outside this reader's limitations and become
/// [`Ext2Error::Unsupported`]; all other field violations are format
/// errors. Truncation and overflow surface as corruption at an unknown
/// block.
pub fn parse_to_ext2_error(err: &ParseError) -> Ext2Error {
    match err {
        ParseError::InvalidField { field, reason } => {
            if reason.contains("unsupported") {
                Ext2Error::Unsupported(format!("{field}: {reason}"))
            } else {
                Ext2Error::Format(err.to_string())
            }
        }
        ParseError::InvalidMagic { .. } => Ext2Error::Format(err.to_string()),
        ParseError::InsufficientData { .. } | ParseError::IntegerConversion { .. } => {
            Ext2Error::Corruption {
                block: 0,
                detail: err.to_string(),
            }
        }
    }
}

/// Corruption pinned to the block the bad bytes came from.
fn corrupt_at(block: BlockNumber, err: &ParseError) -> Ext2Error {
    Ext2Error::Corruption {
        block: u64::from(block.0),
        detail: err.to_string(),
    }
}

/// An opened, validated ext2 image.
pub struct Ext2Fs {
    blocks: ByteBlockDevice<Box<dyn ByteDevice>>,
    sb: Ext2Superblock,
    gd: Ext2GroupDesc,
}

impl Ext2Fs {
    /// Open an ext2 image file read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let dev = FileByteDevice::open(path)?;
        Self::from_device(Box::new(dev))
    }

    /// Open an ext2 image already held in memory.
    pub fn from_image(image: Vec<u8>) -> Result<Self> {
        Self::from_device(Box::new(VecByteDevice::new(image)))
    }

    /// Decode and validate the superblock and group descriptor from `dev`.
    pub fn from_device(dev: Box<dyn ByteDevice>) -> Result<Self> {
        let region = read_superblock_region(&dev)?;
        let sb = Ext2Superblock::parse_superblock_region(&region)
            .map_err(|e| parse_to_ext2_error(&e))?;
        sb.validate_single_group().map_err(|e| parse_to_ext2_error(&e))?;

        let mut gd_bytes = [0_u8; EXT2_GROUP_DESC_SIZE];
        dev.read_exact_at(sb.group_desc_offset(), &mut gd_bytes)?;
        let gd = Ext2GroupDesc::parse_from_bytes(&gd_bytes)
            .map_err(|e| corrupt_at(BlockNumber(2), &e))?;

        let blocks = ByteBlockDevice::new(dev, sb.block_size)?;
        debug!(
            blocks_count = sb.blocks_count,
            inodes_count = sb.inodes_count,
            block_size = %sb.block_size,
            inode_table = %gd.inode_table,
            volume = %sb.volume_name,
            "opened ext2 image"
        );

        Ok(Self { blocks, sb, gd })
    }

    #[must_use]
    pub fn superblock(&self) -> &Ext2Superblock {
        &self.sb
    }

    #[must_use]
    pub fn group_desc(&self) -> &Ext2GroupDesc {
        &self.gd
    }

    #[must_use]
    pub fn block_size(&self) -> BlockSize {
        self.sb.block_size
    }

    /// Read one metadata or data block by number.
    pub fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        self.blocks.read_block(block)
    }

    // ── Inodes ──────────────────────────────────────────────────────────

    /// Read and parse inode `ino` from the inode table.
    ///
    /// Inode records are decoded on demand; no table-wide scan happens at
    /// open time.
    pub fn read_inode(&self, ino: InodeNumber) -> Result<Ext2Inode> {
        let table_start = self
            .block_size()
            .block_to_byte(self.gd.inode_table)
            .ok_or_else(|| Ext2Error::Format("inode table offset overflow".to_owned()))?;
        let within = self
            .sb
            .inode_table_offset(ino)
            .map_err(|e| parse_to_ext2_error(&e))?;
        let offset = table_start
            .checked_add(within)
            .ok_or_else(|| Ext2Error::Format("inode table offset overflow".to_owned()))?;

        let mut raw = vec![0_u8; usize::from(self.sb.effective_inode_size())];
        self.blocks.inner().read_exact_at(offset.0, &mut raw)?;
        trace!(ino = %ino, offset = %offset, "read inode record");
        Ext2Inode::parse_from_bytes(&raw).map_err(|e| corrupt_at(self.gd.inode_table, &e))
    }

    // ── Directories ─────────────────────────────────────────────────────

    /// Number of logical blocks a directory's size covers.
    fn dir_logical_block_count(&self, inode: &Ext2Inode) -> u64 {
        self.block_size().blocks_for_bytes(u64::from(inode.size))
    }

    /// Decode every directory record of `inode`, in on-disk order.
    ///
    /// Inode-0 slack records are included so the on-disk framing stays
    /// visible to callers; filter on [`Ext2DirEntry::is_live`] for the live
    /// view. Hole blocks contribute no entries.
    pub fn read_dir(&self, inode: &Ext2Inode) -> Result<Vec<Ext2DirEntry>> {
        if !inode.is_dir() {
            return Err(Ext2Error::NotDirectory);
        }

        let mut entries = Vec::new();
        for logical in 0..self.dir_logical_block_count(inode) {
            let Some(block) = self.resolve_block(inode, logical)? else {
                continue;
            };
            let buf = self.read_block(block)?;
            let parsed =
                parse_dir_block(buf.as_slice()).map_err(|e| corrupt_at(block, &e))?;
            entries.extend(parsed);
        }
        Ok(entries)
    }

    /// Find the live entry named `name` in directory `inode`.
    ///
    /// Returns `Ok(None)` when no live record matches; inode-0 slack never
    /// matches.
    pub fn lookup_name(&self, inode: &Ext2Inode, name: &[u8]) -> Result<Option<Ext2DirEntry>> {
        if !inode.is_dir() {
            return Err(Ext2Error::NotDirectory);
        }

        for logical in 0..self.dir_logical_block_count(inode) {
            let Some(block) = self.resolve_block(inode, logical)? else {
                continue;
            };
            let buf = self.read_block(block)?;
            if let Some(entry) =
                lookup_in_dir_block(buf.as_slice(), name).map_err(|e| corrupt_at(block, &e))?
            {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Walk an absolute or root-relative `/`-separated path from the root
    /// directory.
    ///
    /// Empty components (leading, trailing, or doubled slashes) are
    /// skipped. A missing component is [`Ext2Error::NotFound`]; descending
    /// through a non-directory is [`Ext2Error::NotDirectory`].
    pub fn resolve_path(&self, path: &str) -> Result<(InodeNumber, Ext2Inode)> {
        let mut ino = InodeNumber::ROOT;
        let mut inode = self.read_inode(ino)?;

        for component in path.split('/').filter(|c| !c.is_empty()) {
            if !inode.is_dir() {
                return Err(Ext2Error::NotDirectory);
            }
            let entry = self
                .lookup_name(&inode, component.as_bytes())?
                .ok_or_else(|| Ext2Error::NotFound(component.to_owned()))?;
            ino = InodeNumber(entry.inode);
            inode = self.read_inode(ino)?;
        }
        trace!(path, ino = %ino, "resolved path");
        Ok((ino, inode))
    }

    // ── File content ────────────────────────────────────────────────────

    /// Read up to `buf.len()` bytes of file data starting at byte `offset`.
    ///
    /// Reads never extend past `inode.size` regardless of how many blocks
    /// the pointer arrays could reach; the returned count is short only at
    /// end of file. Holes read as zeroes.
    pub fn read_file_data(&self, inode: &Ext2Inode, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let size = u64::from(inode.size);
        if offset >= size {
            return Ok(0);
        }
        let want = u64_to_usize((size - offset).min(buf.len() as u64), "read_len")
            .map_err(|e| parse_to_ext2_error(&e))?;
        let bs = u64::from(self.block_size().get());

        let mut done = 0_usize;
        while done < want {
            let pos = offset + done as u64;
            let logical = pos / bs;
            let within = (pos % bs) as usize;
            let chunk = (want - done).min(bs as usize - within);

            match self.resolve_block(inode, logical)? {
                Some(block) => {
                    let data = self.read_block(block)?;
                    buf[done..done + chunk]
                        .copy_from_slice(&data.as_slice()[within..within + chunk]);
                }
                None => buf[done..done + chunk].fill(0),
            }
            done += chunk;
        }
        Ok(done)
    }

    /// Read a regular file's entire content, exactly `inode.size` bytes.
    ///
    /// The final block's padding past the size is never returned.
    pub fn read_file_content(&self, inode: &Ext2Inode) -> Result<Vec<u8>> {
        if inode.is_dir() {
            return Err(Ext2Error::IsDirectory);
        }
        if !inode.is_regular() {
            return Err(Ext2Error::Format("not a regular file".to_owned()));
        }

        let len = u64_to_usize(u64::from(inode.size), "i_size")
            .map_err(|e| parse_to_ext2_error(&e))?;
        let mut out = vec![0_u8; len];
        let n = self.read_file_data(inode, 0, &mut out)?;
        out.truncate(n);
        Ok(out)
    }

    /// Read a symlink's target bytes.
    ///
    /// Fast symlinks store the target in the inode's pointer-array bytes;
    /// slow symlinks store it in data blocks like file content.
    pub fn read_symlink(&self, inode: &Ext2Inode) -> Result<Vec<u8>> {
        if !inode.is_symlink() {
            return Err(Ext2Error::Format("not a symlink".to_owned()));
        }
        if let Some(target) = inode.fast_symlink_target() {
            return Ok(target);
        }

        let len = u64_to_usize(u64::from(inode.size), "i_size")
            .map_err(|e| parse_to_ext2_error(&e))?;
        let mut out = vec![0_u8; len];
        let n = self.read_file_data(inode, 0, &mut out)?;
        out.truncate(n);
        Ok(out)
    }

    // ── Allocation bitmaps ──────────────────────────────────────────────

    /// Read the group's block allocation bitmap (one block).
    pub fn read_block_bitmap(&self) -> Result<Vec<u8>> {
        Ok(self.read_block(self.gd.block_bitmap)?.into_inner())
    }

    /// Read the group's inode allocation bitmap (one block).
    pub fn read_inode_bitmap(&self) -> Result<Vec<u8>> {
        Ok(self.read_block(self.gd.inode_bitmap)?.into_inner())
    }

    /// Whether `block` is marked in use in the block bitmap.
    ///
    /// Bit 0 of the bitmap covers `first_data_block`.
    pub fn block_in_use(&self, block: BlockNumber) -> Result<bool> {
        if block.0 < self.sb.first_data_block || block.0 >= self.sb.blocks_count {
            return Err(Ext2Error::Format(format!(
                "block {block} outside group range"
            )));
        }
        let bitmap = self.read_block_bitmap()?;
        Ok(bitmap_get(
            &bitmap,
            (block.0 - self.sb.first_data_block) as usize,
        ))
    }

    /// Whether inode `ino` is marked in use in the inode bitmap.
    ///
    /// Inode numbers are 1-based; bit 0 covers inode 1.
    pub fn inode_in_use(&self, ino: InodeNumber) -> Result<bool> {
        if ino.0 == 0 || ino.0 > self.sb.inodes_count {
            return Err(Ext2Error::Format(format!(
                "inode {ino} outside group range"
            )));
        }
        let bitmap = self.read_inode_bitmap()?;
        Ok(bitmap_get(&bitmap, (ino.0 - 1) as usize))
    }
}

/// Probe bit `index` of an allocation bitmap (LSB-first within each byte).
#[must_use]
pub fn bitmap_get(bitmap: &[u8], index: usize) -> bool {
    let byte = index / 8;
    let bit = index % 8;
    byte < bitmap.len() && (bitmap[byte] >> bit) & 1 == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_reasons_map_to_unsupported() {
        let err = ParseError::InvalidField {
            field: "s_log_block_size",
            reason: "unsupported block size (this reader handles 1024-byte blocks only)",
        };
        assert!(matches!(
            parse_to_ext2_error(&err),
            Ext2Error::Unsupported(_)
        ));

        let err = ParseError::InvalidField {
            field: "de_rec_len",
            reason: "directory entry rec_len < 8",
        };
        assert!(matches!(parse_to_ext2_error(&err), Ext2Error::Format(_)));
    }

    #[test]
    fn magic_and_truncation_mapping() {
        let magic = ParseError::InvalidMagic {
            expected: 0xEF53,
            actual: 0,
        };
        assert!(matches!(parse_to_ext2_error(&magic), Ext2Error::Format(_)));

        let short = ParseError::InsufficientData {
            needed: 128,
            offset: 0,
            actual: 10,
        };
        assert!(matches!(
            parse_to_ext2_error(&short),
            Ext2Error::Corruption { block: 0, .. }
        ));
    }

    #[test]
    fn bitmap_probe() {
        let bitmap = [0b0000_0101_u8, 0b1000_0000];
        assert!(bitmap_get(&bitmap, 0));
        assert!(!bitmap_get(&bitmap, 1));
        assert!(bitmap_get(&bitmap, 2));
        assert!(bitmap_get(&bitmap, 15));
        assert!(!bitmap_get(&bitmap, 16));
    }
}
