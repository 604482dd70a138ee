#![forbid(unsafe_code)]
//! Synthetic single-group ext2 images for tests.
//!
//! [`ImageBuilder`] lays out a minimal 1024-byte-block, one-group image in
//! memory: boot block, superblock, group descriptor, allocation bitmaps,
//! inode table, then a data region. Tests compose files, directories, and
//! symlinks on top and hand the finished bytes to the reader under test.
//!
//! The builder is deliberately simple rather than faithful to mke2fs: it
//! allocates blocks in call order and fills only the fields the read paths
//! consume, so corrupting a fixture for a negative test is a one-line
//! byte edit at a known offset.

use anyhow::{Context, Result, bail, ensure};
use e2r_ondisk::{Ext2FileType, Ext2GroupDesc, Ext2Superblock};
use e2r_types::{
    EXT2_GOOD_OLD_FIRST_INO, EXT2_SUPER_MAGIC, EXT2_SUPERBLOCK_OFFSET, S_IFDIR, S_IFLNK, S_IFREG,
};

/// Block size every built image uses.
pub const BLOCK_SIZE: usize = 1024;

/// Fixed metadata layout: superblock in block 1, group descriptor table in
/// block 2, bitmaps in 3 and 4, inode table from block 5.
const SUPERBLOCK_BLOCK: u32 = 1;
const GROUP_DESC_BLOCK: u32 = 2;
const BLOCK_BITMAP_BLOCK: u32 = 3;
const INODE_BITMAP_BLOCK: u32 = 4;
const INODE_TABLE_BLOCK: u32 = 5;

const INODE_RECORD_SIZE: usize = 128;
const DIR_ENTRY_HEADER: usize = 8;

/// Builds a single-group ext2 image in memory.
pub struct ImageBuilder {
    image: Vec<u8>,
    blocks_count: u32,
    inodes_count: u32,
    next_free_block: u32,
}

impl ImageBuilder {
    /// Start an image with the given geometry.
    ///
    /// Metadata blocks and the ten reserved inodes are marked in the
    /// bitmaps up front; data blocks are handed out by
    /// [`Self::alloc_block`] in ascending order after the inode table.
    pub fn new(blocks_count: u32, inodes_count: u32) -> Result<Self> {
        ensure!(
            blocks_count as usize <= BLOCK_SIZE * 8,
            "blocks_count {blocks_count} exceeds one bitmap block"
        );
        ensure!(
            inodes_count as usize <= BLOCK_SIZE * 8,
            "inodes_count {inodes_count} exceeds one bitmap block"
        );
        ensure!(
            inodes_count >= EXT2_GOOD_OLD_FIRST_INO,
            "need at least the reserved inodes"
        );

        let inode_table_blocks =
            u32::try_from((inodes_count as usize * INODE_RECORD_SIZE).div_ceil(BLOCK_SIZE))
                .context("inode table block count overflow")?;
        let first_data_region = INODE_TABLE_BLOCK + inode_table_blocks;
        ensure!(
            first_data_region < blocks_count,
            "geometry leaves no data blocks: {first_data_region} metadata blocks, \
             {blocks_count} total"
        );

        let mut builder = Self {
            image: vec![0_u8; blocks_count as usize * BLOCK_SIZE],
            blocks_count,
            inodes_count,
            next_free_block: first_data_region,
        };

        builder.write_superblock();
        builder.write_group_desc();
        for block in SUPERBLOCK_BLOCK..first_data_region {
            builder.mark_block_used(block);
        }
        for ino in 1..=EXT2_GOOD_OLD_FIRST_INO.saturating_sub(1) {
            builder.mark_inode_used(ino);
        }

        Ok(builder)
    }

    fn write_superblock(&mut self) {
        let base = EXT2_SUPERBLOCK_OFFSET;
        let sb = &mut self.image[base..base + BLOCK_SIZE];
        sb[0x00..0x04].copy_from_slice(&self.inodes_count.to_le_bytes());
        sb[0x04..0x08].copy_from_slice(&self.blocks_count.to_le_bytes());
        sb[0x14..0x18].copy_from_slice(&1_u32.to_le_bytes()); // first_data_block
        sb[0x18..0x1C].copy_from_slice(&0_u32.to_le_bytes()); // log_block_size -> 1K
        sb[0x20..0x24].copy_from_slice(&self.blocks_count.to_le_bytes()); // blocks_per_group
        sb[0x24..0x28].copy_from_slice(&self.blocks_count.to_le_bytes()); // frags_per_group
        sb[0x28..0x2C].copy_from_slice(&self.inodes_count.to_le_bytes()); // inodes_per_group
        sb[0x38..0x3A].copy_from_slice(&EXT2_SUPER_MAGIC.to_le_bytes());
        sb[0x3A..0x3C].copy_from_slice(&1_u16.to_le_bytes()); // state: clean
        sb[0x4C..0x50].copy_from_slice(&1_u32.to_le_bytes()); // rev_level
        sb[0x54..0x58].copy_from_slice(&EXT2_GOOD_OLD_FIRST_INO.to_le_bytes());
        sb[0x58..0x5A].copy_from_slice(&(INODE_RECORD_SIZE as u16).to_le_bytes());
        sb[0x78..0x7B].copy_from_slice(b"e2r");
    }

    fn write_group_desc(&mut self) {
        let base = GROUP_DESC_BLOCK as usize * BLOCK_SIZE;
        let gd = &mut self.image[base..base + 32];
        gd[0x00..0x04].copy_from_slice(&BLOCK_BITMAP_BLOCK.to_le_bytes());
        gd[0x04..0x08].copy_from_slice(&INODE_BITMAP_BLOCK.to_le_bytes());
        gd[0x08..0x0C].copy_from_slice(&INODE_TABLE_BLOCK.to_le_bytes());
    }

    fn mark_block_used(&mut self, block: u32) {
        // Bit 0 covers first_data_block (block 1).
        let bit = (block - 1) as usize;
        let base = BLOCK_BITMAP_BLOCK as usize * BLOCK_SIZE;
        self.image[base + bit / 8] |= 1 << (bit % 8);
    }

    fn mark_inode_used(&mut self, ino: u32) {
        let bit = (ino - 1) as usize;
        let base = INODE_BITMAP_BLOCK as usize * BLOCK_SIZE;
        self.image[base + bit / 8] |= 1 << (bit % 8);
    }

    /// Claim the next free data block.
    pub fn alloc_block(&mut self) -> Result<u32> {
        let block = self.next_free_block;
        ensure!(block < self.blocks_count, "image out of data blocks");
        self.next_free_block += 1;
        self.mark_block_used(block);
        Ok(block)
    }

    /// Write `data` at the start of `block` (rest of the block stays zero).
    pub fn write_block(&mut self, block: u32, data: &[u8]) -> Result<()> {
        ensure!(block < self.blocks_count, "write to block {block} out of range");
        ensure!(
            data.len() <= BLOCK_SIZE,
            "write of {} bytes exceeds block size",
            data.len()
        );
        let base = block as usize * BLOCK_SIZE;
        self.image[base..base + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Allocate a block holding little-endian block pointers (an indirect
    /// block).
    pub fn write_pointer_block(&mut self, pointers: &[u32]) -> Result<u32> {
        ensure!(
            pointers.len() <= BLOCK_SIZE / 4,
            "{} pointers exceed one indirect block",
            pointers.len()
        );
        let block = self.alloc_block()?;
        let mut raw = Vec::with_capacity(pointers.len() * 4);
        for p in pointers {
            raw.extend_from_slice(&p.to_le_bytes());
        }
        self.write_block(block, &raw)?;
        Ok(block)
    }

    /// Write inode `ino`'s 128-byte record and mark it in use.
    ///
    /// `sectors` is the on-disk `i_blocks` field (512-byte units); pass 0
    /// for fast symlinks, which are recognized by a zero there.
    pub fn set_inode(
        &mut self,
        ino: u32,
        mode: u16,
        size: u32,
        sectors: u32,
        block: [u32; 15],
    ) -> Result<()> {
        ensure!(
            ino >= 1 && ino <= self.inodes_count,
            "inode {ino} out of range"
        );
        let mut raw = [0_u8; INODE_RECORD_SIZE];
        raw[0x00..0x02].copy_from_slice(&mode.to_le_bytes());
        raw[0x04..0x08].copy_from_slice(&size.to_le_bytes());
        raw[0x1A..0x1C].copy_from_slice(&1_u16.to_le_bytes()); // links_count
        raw[0x1C..0x20].copy_from_slice(&sectors.to_le_bytes());
        for (i, b) in block.iter().enumerate() {
            raw[0x28 + i * 4..0x2C + i * 4].copy_from_slice(&b.to_le_bytes());
        }

        let offset = INODE_TABLE_BLOCK as usize * BLOCK_SIZE
            + (ino as usize - 1) * INODE_RECORD_SIZE;
        self.image[offset..offset + INODE_RECORD_SIZE].copy_from_slice(&raw);
        self.mark_inode_used(ino);
        Ok(())
    }

    /// Add a regular file with `content`, allocating data and indirect
    /// blocks as needed (direct through double-indirect).
    pub fn add_file(&mut self, ino: u32, content: &[u8]) -> Result<()> {
        let ppb = BLOCK_SIZE / 4;
        let data_blocks = content.len().div_ceil(BLOCK_SIZE);
        if data_blocks > 12 + ppb + ppb * ppb {
            bail!("content of {} bytes needs triple indirection", content.len());
        }

        let mut phys = Vec::with_capacity(data_blocks);
        for chunk in content.chunks(BLOCK_SIZE) {
            let block = self.alloc_block()?;
            self.write_block(block, chunk)?;
            phys.push(block);
        }

        let mut block = [0_u32; 15];
        for (slot, b) in block.iter_mut().zip(phys.iter().take(12)) {
            *slot = *b;
        }
        if phys.len() > 12 {
            let single_end = phys.len().min(12 + ppb);
            block[12] = self.write_pointer_block(&phys[12..single_end])?;
        }
        if phys.len() > 12 + ppb {
            let mut indirects = Vec::new();
            for chunk in phys[12 + ppb..].chunks(ppb) {
                indirects.push(self.write_pointer_block(chunk)?);
            }
            block[13] = self.write_pointer_block(&indirects)?;
        }

        let total_blocks = self.next_free_block - phys.first().copied().unwrap_or(self.next_free_block);
        let size = u32::try_from(content.len()).context("file size exceeds u32")?;
        self.set_inode(ino, S_IFREG | 0o644, size, total_blocks * 2, block)
    }

    /// Add a single-block directory whose records come from `entries`.
    pub fn add_dir(&mut self, ino: u32, entries: DirBlockBuilder) -> Result<()> {
        let block = self.alloc_block()?;
        let data = entries.build()?;
        self.write_block(block, &data)?;

        let mut blocks = [0_u32; 15];
        blocks[0] = block;
        self.set_inode(ino, S_IFDIR | 0o755, BLOCK_SIZE as u32, 2, blocks)
    }

    /// Add a fast symlink whose target lives in the pointer-array bytes.
    pub fn add_fast_symlink(&mut self, ino: u32, target: &[u8]) -> Result<()> {
        ensure!(target.len() <= 60, "fast symlink target exceeds 60 bytes");
        let mut block = [0_u32; 15];
        let mut raw = [0_u8; 60];
        raw[..target.len()].copy_from_slice(target);
        for (i, slot) in block.iter_mut().enumerate() {
            let mut word = [0_u8; 4];
            word.copy_from_slice(&raw[i * 4..i * 4 + 4]);
            *slot = u32::from_le_bytes(word);
        }
        let size = u32::try_from(target.len()).context("target length exceeds u32")?;
        self.set_inode(ino, S_IFLNK | 0o777, size, 0, block)
    }

    /// Finish the image, filling in the free-count bookkeeping fields.
    #[must_use]
    pub fn build(mut self) -> Vec<u8> {
        let free_blocks = self.blocks_count - self.next_free_block;
        let free_inodes = self.count_free_inodes();

        let sb = EXT2_SUPERBLOCK_OFFSET;
        self.image[sb + 0x0C..sb + 0x10].copy_from_slice(&free_blocks.to_le_bytes());
        self.image[sb + 0x10..sb + 0x14].copy_from_slice(&free_inodes.to_le_bytes());

        let gd = GROUP_DESC_BLOCK as usize * BLOCK_SIZE;
        self.image[gd + 0x0C..gd + 0x0E]
            .copy_from_slice(&(free_blocks as u16).to_le_bytes());
        self.image[gd + 0x0E..gd + 0x10]
            .copy_from_slice(&(free_inodes as u16).to_le_bytes());

        self.image
    }

    fn count_free_inodes(&self) -> u32 {
        let base = INODE_BITMAP_BLOCK as usize * BLOCK_SIZE;
        let mut free = 0;
        for ino in 0..self.inodes_count as usize {
            if self.image[base + ino / 8] >> (ino % 8) & 1 == 0 {
                free += 1;
            }
        }
        free
    }
}

/// Packs directory records into one data block.
///
/// Every record but the last gets the minimal 4-aligned `rec_len`; the last
/// record's `rec_len` absorbs the remainder of the block, matching how ext2
/// pads directory blocks.
#[derive(Default)]
pub struct DirBlockBuilder {
    entries: Vec<(u32, Ext2FileType, Vec<u8>)>,
}

impl DirBlockBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entry(mut self, inode: u32, file_type: Ext2FileType, name: &[u8]) -> Self {
        self.entries.push((inode, file_type, name.to_vec()));
        self
    }

    /// Serialize the records into a full block.
    pub fn build(self) -> Result<Vec<u8>> {
        ensure!(!self.entries.is_empty(), "directory block needs entries");

        let mut block = Vec::with_capacity(BLOCK_SIZE);
        let last = self.entries.len() - 1;
        for (i, (inode, file_type, name)) in self.entries.into_iter().enumerate() {
            ensure!(name.len() <= 255, "directory name exceeds 255 bytes");
            let min_len = (DIR_ENTRY_HEADER + name.len()).div_ceil(4) * 4;
            let rec_len = if i == last {
                BLOCK_SIZE
                    .checked_sub(block.len())
                    .filter(|remaining| *remaining >= min_len)
                    .context("directory entries exceed one block")?
            } else {
                min_len
            };

            block.extend_from_slice(&inode.to_le_bytes());
            block.extend_from_slice(&u16::try_from(rec_len).context("rec_len overflow")?.to_le_bytes());
            block.push(u8::try_from(name.len()).context("name_len overflow")?);
            block.push(file_type as u8);
            block.extend_from_slice(&name);
            block.resize(block.len() + rec_len - DIR_ENTRY_HEADER - name.len(), 0);
        }

        ensure!(block.len() == BLOCK_SIZE, "directory block underfilled");
        Ok(block)
    }
}

/// The canonical small fixture: a root directory holding `abc.txt` (inode
/// 13) whose content is `hello`.
pub fn basic_image() -> Result<Vec<u8>> {
    let mut builder = ImageBuilder::new(64, 16)?;
    builder.add_file(13, b"hello")?;
    builder.add_dir(
        2,
        DirBlockBuilder::new()
            .entry(2, Ext2FileType::Dir, b".")
            .entry(2, Ext2FileType::Dir, b"..")
            .entry(13, Ext2FileType::RegFile, b"abc.txt"),
    )?;
    Ok(builder.build())
}

/// Parse and validate an image's superblock and group descriptor, for
/// fixture self-checks.
pub fn validate_image(image: &[u8]) -> Result<(Ext2Superblock, Ext2GroupDesc)> {
    let sb = Ext2Superblock::parse_from_image(image).context("superblock parse failed")?;
    sb.validate_single_group()
        .context("single-group validation failed")?;

    let offset = usize::try_from(sb.group_desc_offset()).context("group descriptor offset")?;
    ensure!(image.len() >= offset + 32, "image truncated before group descriptor");
    let gd = Ext2GroupDesc::parse_from_bytes(&image[offset..offset + 32])
        .context("group descriptor parse failed")?;
    Ok((sb, gd))
}
