//! End-to-end reads against synthetic images.

use e2r_core::Ext2Fs;
use e2r_error::Ext2Error;
use e2r_harness::{BLOCK_SIZE, DirBlockBuilder, ImageBuilder, basic_image};
use e2r_ondisk::Ext2FileType;
use e2r_types::{BlockNumber, InodeNumber, S_IFREG};
use std::io::Write;

fn open_basic() -> Ext2Fs {
    Ext2Fs::from_image(basic_image().expect("fixture")).expect("open")
}

/// Content where every block is filled with its logical index, so reads at
/// arbitrary offsets are checkable.
fn indexed_content(blocks: usize, tail: usize) -> Vec<u8> {
    let mut content = Vec::with_capacity(blocks * BLOCK_SIZE + tail);
    for i in 0..blocks {
        content.extend(std::iter::repeat(i as u8).take(BLOCK_SIZE));
    }
    content.extend(std::iter::repeat(0xEE_u8).take(tail));
    content
}

#[test]
fn root_listing_and_file_read() {
    let fs = open_basic();
    let root = fs.read_inode(InodeNumber::ROOT).expect("root inode");
    assert!(root.is_dir());

    let entries = fs.read_dir(&root).expect("read dir");
    let names: Vec<String> = entries.iter().map(|e| e.name_str()).collect();
    assert_eq!(names, [".", "..", "abc.txt"]);
    assert_eq!(entries[2].inode, 13);
    assert_eq!(entries[2].file_type, Ext2FileType::RegFile);

    let inode = fs.read_inode(InodeNumber(13)).expect("file inode");
    assert!(inode.is_regular());
    assert_eq!(fs.read_file_content(&inode).expect("content"), b"hello");
}

#[test]
fn open_from_file_path() {
    let image = basic_image().expect("fixture");
    let mut tmp = tempfile::NamedTempFile::new().expect("tempfile");
    tmp.write_all(&image).expect("write");
    tmp.flush().expect("flush");

    let fs = Ext2Fs::open(tmp.path()).expect("open");
    let (ino, inode) = fs.resolve_path("/abc.txt").expect("resolve");
    assert_eq!(ino, InodeNumber(13));
    assert_eq!(fs.read_file_content(&inode).expect("content"), b"hello");
}

#[test]
fn path_resolution_errors() {
    let fs = open_basic();

    match fs.resolve_path("/missing.txt") {
        Err(Ext2Error::NotFound(name)) => assert_eq!(name, "missing.txt"),
        other => panic!("expected NotFound, got {other:?}"),
    }

    // Descending through a regular file.
    assert!(matches!(
        fs.resolve_path("/abc.txt/inner"),
        Err(Ext2Error::NotDirectory)
    ));

    // Empty components collapse; these all mean the root.
    for path in ["", "/", "//"] {
        let (ino, _) = fs.resolve_path(path).expect("root");
        assert_eq!(ino, InodeNumber::ROOT);
    }
    let (ino, _) = fs.resolve_path("abc.txt").expect("relative from root");
    assert_eq!(ino, InodeNumber(13));
}

#[test]
fn wrong_file_types_are_rejected() {
    let fs = open_basic();
    let root = fs.read_inode(InodeNumber::ROOT).expect("root");
    let file = fs.read_inode(InodeNumber(13)).expect("file");

    assert!(matches!(
        fs.read_file_content(&root),
        Err(Ext2Error::IsDirectory)
    ));
    assert!(matches!(fs.read_dir(&file), Err(Ext2Error::NotDirectory)));
    assert!(matches!(
        fs.lookup_name(&file, b"x"),
        Err(Ext2Error::NotDirectory)
    ));
    assert!(matches!(fs.read_symlink(&file), Err(Ext2Error::Format(_))));
}

#[test]
fn corrupt_magic_is_a_format_error() {
    let mut image = basic_image().expect("fixture");
    image[1024 + 0x38] = 0;
    image[1024 + 0x39] = 0;
    assert!(matches!(
        Ext2Fs::from_image(image),
        Err(Ext2Error::Format(_))
    ));
}

#[test]
fn unsupported_layouts_are_distinct_from_corruption() {
    // 2048-byte blocks parse fine but are outside this reader's support.
    let mut image = basic_image().expect("fixture");
    image[1024 + 0x18] = 1;
    assert!(matches!(
        Ext2Fs::from_image(image),
        Err(Ext2Error::Unsupported(_))
    ));

    // A second block group implied by inodes_per_group < inodes_count.
    let mut image = basic_image().expect("fixture");
    image[1024 + 0x28..1024 + 0x2C].copy_from_slice(&8_u32.to_le_bytes());
    assert!(matches!(
        Ext2Fs::from_image(image),
        Err(Ext2Error::Unsupported(_))
    ));
}

#[test]
fn truncated_image_fails_to_open() {
    let image = basic_image().expect("fixture");
    assert!(Ext2Fs::from_image(image[..1500].to_vec()).is_err());
}

#[test]
fn file_size_boundaries() {
    let mut builder = ImageBuilder::new(2048, 32).expect("builder");
    builder.add_file(11, b"").expect("empty");
    builder.add_file(12, &indexed_content(1, 0)).expect("one block");
    builder.add_file(13, &indexed_content(12, 0)).expect("direct limit");
    builder.add_file(14, &indexed_content(12, 1)).expect("first indirect byte");
    builder
        .add_dir(
            2,
            DirBlockBuilder::new()
                .entry(2, Ext2FileType::Dir, b".")
                .entry(2, Ext2FileType::Dir, b".."),
        )
        .expect("root");
    let fs = Ext2Fs::from_image(builder.build()).expect("open");

    let empty = fs.read_inode(InodeNumber(11)).expect("inode");
    assert_eq!(fs.read_file_content(&empty).expect("content"), b"");

    let one = fs.read_inode(InodeNumber(12)).expect("inode");
    assert_eq!(fs.read_file_content(&one).expect("content").len(), BLOCK_SIZE);

    let direct = fs.read_inode(InodeNumber(13)).expect("inode");
    let content = fs.read_file_content(&direct).expect("content");
    assert_eq!(content.len(), 12 * BLOCK_SIZE);
    assert_eq!(content[11 * BLOCK_SIZE], 11);

    // One byte past the direct range exercises the single-indirect tier and
    // the exact-size truncation of the final block.
    let indirect = fs.read_inode(InodeNumber(14)).expect("inode");
    let content = fs.read_file_content(&indirect).expect("content");
    assert_eq!(content.len(), 12 * BLOCK_SIZE + 1);
    assert_eq!(content[12 * BLOCK_SIZE], 0xEE);
}

#[test]
fn double_indirect_reads() {
    let blocks = 12 + 256 + 3;
    let content = indexed_content(blocks, 5);

    let mut builder = ImageBuilder::new(2048, 16).expect("builder");
    builder.add_file(12, &content).expect("file");
    let fs = Ext2Fs::from_image(builder.build()).expect("open");

    let inode = fs.read_inode(InodeNumber(12)).expect("inode");
    assert_eq!(u64::from(inode.size), content.len() as u64);
    let read = fs.read_file_content(&inode).expect("content");
    assert_eq!(read, content);

    // Spot-check a positioned read inside the double-indirect tier.
    let mut buf = [0_u8; 16];
    let offset = (12 + 256 + 1) * BLOCK_SIZE as u64 + 7;
    let n = fs.read_file_data(&inode, offset, &mut buf).expect("pread");
    assert_eq!(n, 16);
    assert!(buf.iter().all(|b| *b == (12 + 256 + 1) as u8));
}

#[test]
fn holes_read_as_zeroes() {
    let mut builder = ImageBuilder::new(256, 16).expect("builder");
    let data_block = builder.alloc_block().expect("alloc");
    builder.write_block(data_block, b"after the hole").expect("write");

    // Logical block 0 is a hole; logical block 1 is backed.
    let mut block = [0_u32; 15];
    block[1] = data_block;
    builder
        .set_inode(12, S_IFREG | 0o644, 2 * BLOCK_SIZE as u32, 2, block)
        .expect("inode");
    let fs = Ext2Fs::from_image(builder.build()).expect("open");

    let inode = fs.read_inode(InodeNumber(12)).expect("inode");
    assert_eq!(fs.resolve_block(&inode, 0).expect("resolve"), None);
    assert_eq!(
        fs.resolve_block(&inode, 1).expect("resolve"),
        Some(BlockNumber(data_block))
    );

    let content = fs.read_file_content(&inode).expect("content");
    assert_eq!(content.len(), 2 * BLOCK_SIZE);
    assert!(content[..BLOCK_SIZE].iter().all(|b| *b == 0));
    assert_eq!(&content[BLOCK_SIZE..BLOCK_SIZE + 14], b"after the hole");
}

#[test]
fn missing_indirect_block_is_a_hole() {
    let mut builder = ImageBuilder::new(256, 16).expect("builder");
    let data_block = builder.alloc_block().expect("alloc");
    builder.write_block(data_block, b"direct").expect("write");

    // block[12] stays zero: the whole single-indirect range is a hole.
    let mut block = [0_u32; 15];
    block[0] = data_block;
    builder
        .set_inode(12, S_IFREG | 0o644, 13 * BLOCK_SIZE as u32, 2, block)
        .expect("inode");
    let fs = Ext2Fs::from_image(builder.build()).expect("open");

    let inode = fs.read_inode(InodeNumber(12)).expect("inode");
    assert_eq!(fs.resolve_block(&inode, 12).expect("resolve"), None);
    let content = fs.read_file_content(&inode).expect("content");
    assert!(content[12 * BLOCK_SIZE..].iter().all(|b| *b == 0));
}

#[test]
fn triple_indirect_resolution() {
    let ppb = BLOCK_SIZE as u64 / 4;
    let tind_base = 12 + ppb + ppb * ppb;

    let mut builder = ImageBuilder::new(256, 16).expect("builder");
    let data_block = builder.alloc_block().expect("alloc");
    builder.write_block(data_block, b"deep").expect("write");

    // Chain tind -> dind -> ind -> data, all at index 0, placing the data
    // block at the first logical block of the triple-indirect range.
    let ind = builder.write_pointer_block(&[data_block]).expect("ind");
    let dind = builder.write_pointer_block(&[ind]).expect("dind");
    let tind = builder.write_pointer_block(&[dind]).expect("tind");

    let mut block = [0_u32; 15];
    block[14] = tind;
    let size = u32::try_from((tind_base + 1) * BLOCK_SIZE as u64).expect("size");
    builder
        .set_inode(12, S_IFREG | 0o644, size, 8, block)
        .expect("inode");
    let fs = Ext2Fs::from_image(builder.build()).expect("open");

    let inode = fs.read_inode(InodeNumber(12)).expect("inode");
    assert_eq!(
        fs.resolve_block(&inode, tind_base).expect("resolve"),
        Some(BlockNumber(data_block))
    );
    // Everything before it is sparse.
    assert_eq!(fs.resolve_block(&inode, 0).expect("resolve"), None);
    assert_eq!(fs.resolve_block(&inode, tind_base - 1).expect("resolve"), None);

    let mut buf = [0_u8; 4];
    let n = fs
        .read_file_data(&inode, tind_base * BLOCK_SIZE as u64, &mut buf)
        .expect("pread");
    assert_eq!(n, 4);
    assert_eq!(&buf, b"deep");

    // Past the largest representable logical block is corruption, not a hole.
    let beyond = 12 + ppb + ppb * ppb + ppb * ppb * ppb;
    assert!(matches!(
        fs.resolve_block(&inode, beyond),
        Err(Ext2Error::Corruption { .. })
    ));
}

#[test]
fn data_blocks_iterator_is_bounded_by_size() {
    let fs = open_basic();
    let inode = fs.read_inode(InodeNumber(13)).expect("inode");

    // A 5-byte file covers exactly one logical block.
    let resolved: Vec<_> = fs
        .data_blocks(&inode)
        .collect::<Result<Vec<_>, _>>()
        .expect("resolve all");
    assert_eq!(resolved.len(), 1);
    assert!(resolved[0].is_some());

    let empty = fs.read_inode(InodeNumber(11)).expect("reserved inode");
    assert_eq!(fs.data_blocks(&empty).count(), 0);
}

#[test]
fn deleted_entries_are_listed_but_not_found() {
    let mut builder = ImageBuilder::new(64, 16).expect("builder");
    builder.add_file(13, b"kept").expect("file");
    builder
        .add_dir(
            2,
            DirBlockBuilder::new()
                .entry(2, Ext2FileType::Dir, b".")
                .entry(2, Ext2FileType::Dir, b"..")
                .entry(0, Ext2FileType::Unknown, b"gone.txt")
                .entry(13, Ext2FileType::RegFile, b"kept.txt"),
        )
        .expect("root");
    let fs = Ext2Fs::from_image(builder.build()).expect("open");

    let root = fs.read_inode(InodeNumber::ROOT).expect("root");
    let entries = fs.read_dir(&root).expect("read dir");
    assert_eq!(entries.len(), 4);
    assert!(!entries[2].is_live());
    assert_eq!(entries[2].name_str(), "gone.txt");

    assert!(fs.lookup_name(&root, b"gone.txt").expect("lookup").is_none());
    assert_eq!(
        fs.lookup_name(&root, b"kept.txt")
            .expect("lookup")
            .expect("hit")
            .inode,
        13
    );
}

#[test]
fn corrupt_directory_block_reports_its_block() {
    let mut builder = ImageBuilder::new(64, 16).expect("builder");
    builder
        .add_dir(
            2,
            DirBlockBuilder::new()
                .entry(2, Ext2FileType::Dir, b".")
                .entry(2, Ext2FileType::Dir, b".."),
        )
        .expect("root");
    let mut image = builder.build();

    let fs = Ext2Fs::from_image(image.clone()).expect("open");
    let root = fs.read_inode(InodeNumber::ROOT).expect("root");
    let dir_block = fs
        .resolve_block(&root, 0)
        .expect("resolve")
        .expect("backed");

    // Zero the first record's rec_len.
    let offset = dir_block.0 as usize * BLOCK_SIZE + 4;
    image[offset..offset + 2].copy_from_slice(&0_u16.to_le_bytes());
    let fs = Ext2Fs::from_image(image).expect("open");
    let root = fs.read_inode(InodeNumber::ROOT).expect("root");
    match fs.read_dir(&root) {
        Err(Ext2Error::Corruption { block, .. }) => assert_eq!(block, u64::from(dir_block.0)),
        other => panic!("expected Corruption, got {other:?}"),
    }
}

#[test]
fn fast_symlink_target() {
    let mut builder = ImageBuilder::new(64, 16).expect("builder");
    builder.add_fast_symlink(12, b"/etc/passwd").expect("symlink");
    builder
        .add_dir(
            2,
            DirBlockBuilder::new()
                .entry(2, Ext2FileType::Dir, b".")
                .entry(2, Ext2FileType::Dir, b"..")
                .entry(12, Ext2FileType::Symlink, b"link"),
        )
        .expect("root");
    let fs = Ext2Fs::from_image(builder.build()).expect("open");

    let (_, inode) = fs.resolve_path("/link").expect("resolve");
    assert!(inode.is_symlink());
    assert_eq!(fs.read_symlink(&inode).expect("target"), b"/etc/passwd");
}

#[test]
fn repeated_reads_are_identical() {
    let fs = open_basic();
    let root = fs.read_inode(InodeNumber::ROOT).expect("root");
    assert_eq!(
        fs.read_dir(&root).expect("first"),
        fs.read_dir(&root).expect("second")
    );

    let inode = fs.read_inode(InodeNumber(13)).expect("inode");
    assert_eq!(
        fs.read_file_content(&inode).expect("first"),
        fs.read_file_content(&inode).expect("second")
    );
}

#[test]
fn allocation_bitmaps_reflect_layout() {
    let fs = open_basic();

    // Superblock and metadata blocks are in use; the tail of the image is free.
    assert!(fs.block_in_use(BlockNumber(1)).expect("superblock"));
    assert!(fs.block_in_use(BlockNumber(2)).expect("group desc"));
    assert!(!fs.block_in_use(BlockNumber(63)).expect("tail"));
    assert!(fs.block_in_use(BlockNumber(0)).is_err());
    assert!(fs.block_in_use(BlockNumber(64)).is_err());

    // Reserved inodes and the allocated file are marked.
    assert!(fs.inode_in_use(InodeNumber::ROOT).expect("root"));
    assert!(fs.inode_in_use(InodeNumber(13)).expect("file"));
    assert!(!fs.inode_in_use(InodeNumber(14)).expect("free"));
    assert!(fs.inode_in_use(InodeNumber(0)).is_err());
    assert!(fs.inode_in_use(InodeNumber(17)).is_err());
}
