//! Logical-to-physical block address resolution.
//!
//! ext2 maps a file's logical blocks through a four-tier scheme: twelve
//! direct pointers in the inode, then one single-indirect, one
//! double-indirect, and one triple-indirect pointer. A zero pointer at any
//! tier is a hole; the logical block exists but has no backing storage and
//! reads as zeroes.

use crate::Ext2Fs;
use e2r_error::{Ext2Error, Result};
use e2r_ondisk::Ext2Inode;
use e2r_types::{
    BlockNumber, EXT2_DIND_BLOCK, EXT2_IND_BLOCK, EXT2_NDIR_BLOCKS, EXT2_TIND_BLOCK, read_le_u32,
};

impl Ext2Fs {
    /// Read one pointer out of an indirect block.
    ///
    /// `index` must be below `pointers_per_block`; callers reduce it before
    /// calling. A zero pointer is a hole.
    fn indirect_entry(&self, indirect: BlockNumber, index: u64) -> Result<Option<BlockNumber>> {
        let buf = self.read_block(indirect)?;
        let offset = usize::try_from(index * 4).map_err(|_| Ext2Error::Corruption {
            block: u64::from(indirect.0),
            detail: "indirect index does not fit usize".to_owned(),
        })?;
        let raw = read_le_u32(buf.as_slice(), offset).map_err(|e| Ext2Error::Corruption {
            block: u64::from(indirect.0),
            detail: e.to_string(),
        })?;
        Ok(if raw == 0 {
            None
        } else {
            Some(BlockNumber(raw))
        })
    }

    /// Resolve a file's logical block to its physical block number.
    ///
    /// Returns `Ok(None)` for a hole, whether the zero pointer sits in the
    /// inode's array or inside an indirect block. Logical blocks beyond the
    /// triple-indirect range cannot exist on ext2 and are reported as
    /// corruption.
    pub fn resolve_block(&self, inode: &Ext2Inode, logical: u64) -> Result<Option<BlockNumber>> {
        let ppb = u64::from(self.block_size().pointers_per_block());
        let ndir = EXT2_NDIR_BLOCKS as u64;

        if logical < ndir {
            return Ok(inode.block_pointer(logical as usize));
        }
        let mut rel = logical - ndir;

        if rel < ppb {
            let Some(ind) = inode.block_pointer(EXT2_IND_BLOCK) else {
                return Ok(None);
            };
            return self.indirect_entry(ind, rel);
        }
        rel -= ppb;

        if rel < ppb * ppb {
            let Some(dind) = inode.block_pointer(EXT2_DIND_BLOCK) else {
                return Ok(None);
            };
            let Some(ind) = self.indirect_entry(dind, rel / ppb)? else {
                return Ok(None);
            };
            return self.indirect_entry(ind, rel % ppb);
        }
        rel -= ppb * ppb;

        if rel < ppb * ppb * ppb {
            let Some(tind) = inode.block_pointer(EXT2_TIND_BLOCK) else {
                return Ok(None);
            };
            let Some(dind) = self.indirect_entry(tind, rel / (ppb * ppb))? else {
                return Ok(None);
            };
            let Some(ind) = self.indirect_entry(dind, (rel / ppb) % ppb)? else {
                return Ok(None);
            };
            return self.indirect_entry(ind, rel % ppb);
        }

        Err(Ext2Error::Corruption {
            block: 0,
            detail: format!("logical block {logical} beyond triple-indirect range"),
        })
    }

    /// Lazily resolve every logical block a file covers, in order.
    ///
    /// Yields exactly `ceil(size / block_size)` items; pointer-array slots
    /// past the file size are never consulted. Each item is the physical
    /// block, or `None` for a hole.
    #[must_use]
    pub fn data_blocks<'a>(&'a self, inode: &'a Ext2Inode) -> DataBlocks<'a> {
        DataBlocks {
            fs: self,
            inode,
            next_logical: 0,
            total: self.block_size().blocks_for_bytes(u64::from(inode.size)),
        }
    }
}

/// Iterator returned by [`Ext2Fs::data_blocks`].
pub struct DataBlocks<'a> {
    fs: &'a Ext2Fs,
    inode: &'a Ext2Inode,
    next_logical: u64,
    total: u64,
}

impl Iterator for DataBlocks<'_> {
    type Item = Result<Option<BlockNumber>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_logical >= self.total {
            return None;
        }
        let logical = self.next_logical;
        self.next_logical += 1;
        Some(self.fs.resolve_block(self.inode, logical))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.total - self.next_logical).ok();
        (remaining.unwrap_or(usize::MAX), remaining)
    }
}
