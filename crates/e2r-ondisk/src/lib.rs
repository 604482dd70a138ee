#![forbid(unsafe_code)]
//! On-disk format parsing for ext2 structures.
//!
//! Pure parsing crate with no I/O and no side effects. Parses byte slices
//! into typed Rust structures representing the ext2 superblock, block-group
//! descriptor, inode records, and directory-entry records.

pub mod dir;
pub mod group_desc;
pub mod inode;
pub mod superblock;

pub use dir::{
    DirBlockIter, Ext2DirEntry, Ext2DirEntryRef, Ext2FileType, lookup_in_dir_block,
    parse_dir_block,
};
pub use group_desc::{EXT2_GROUP_DESC_SIZE, Ext2GroupDesc};
pub use inode::Ext2Inode;
pub use superblock::Ext2Superblock;
