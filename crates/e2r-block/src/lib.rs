#![forbid(unsafe_code)]
//! Block store: positioned-read access to the backing medium.
//!
//! Provides the [`ByteDevice`] trait for pread-style byte access, file and
//! in-memory backings, and the [`ByteBlockDevice`] wrapper that converts
//! block numbers into byte offsets. Everything here is read-only; the
//! reader never mutates an image.

use e2r_error::{Ext2Error, Result};
use e2r_types::{BlockNumber, BlockSize, EXT2_SUPERBLOCK_OFFSET, EXT2_SUPERBLOCK_SIZE};
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

/// Owned block buffer.
///
/// Invariant: length == block size of the originating device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBuf {
    bytes: Vec<u8>,
}

impl BlockBuf {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

/// Byte-addressed device for fixed-offset reads (pread semantics).
///
/// Implementations must support concurrent positioned reads without a
/// shared cursor; decoding never holds a seek position.
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    ///
    /// A short read or underlying OS failure is an error; nothing is
    /// retried here.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

impl<D: ByteDevice + ?Sized> ByteDevice for Box<D> {
    fn len_bytes(&self) -> u64 {
        (**self).len_bytes()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

/// File-backed byte device using `pread`-style I/O.
///
/// `std::os::unix::fs::FileExt::read_exact_at` is thread-safe and does not
/// touch the file's seek position. The file is opened read-only; this
/// crate has no write path.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
}

impl FileByteDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_read_range(offset, buf.len(), self.len)?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }
}

/// In-memory byte device over an image already held as bytes.
#[derive(Debug, Clone)]
pub struct VecByteDevice {
    image: Arc<Vec<u8>>,
}

impl VecByteDevice {
    #[must_use]
    pub fn new(image: Vec<u8>) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    #[must_use]
    pub fn from_arc(image: Arc<Vec<u8>>) -> Self {
        Self { image }
    }
}

impl ByteDevice for VecByteDevice {
    fn len_bytes(&self) -> u64 {
        self.image.len() as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_read_range(offset, buf.len(), self.len_bytes())?;
        let start = usize::try_from(offset)
            .map_err(|_| Ext2Error::Format("read offset does not fit usize".to_owned()))?;
        buf.copy_from_slice(&self.image[start..start + buf.len()]);
        Ok(())
    }
}

fn check_read_range(offset: u64, len: usize, device_len: u64) -> Result<()> {
    let end = offset
        .checked_add(
            u64::try_from(len)
                .map_err(|_| Ext2Error::Format("read length overflows u64".to_owned()))?,
        )
        .ok_or_else(|| Ext2Error::Format("read range overflows u64".to_owned()))?;
    if end > device_len {
        return Err(Ext2Error::Format(format!(
            "read out of bounds: offset={offset} len={len} device_len={device_len}"
        )));
    }
    Ok(())
}

/// Block-addressed view over a [`ByteDevice`].
///
/// Block number 0 is the "no block" sentinel in inode pointer arrays;
/// callers check for it before asking for a read, and a request for it is
/// rejected here as a second line of defence.
#[derive(Debug)]
pub struct ByteBlockDevice<D: ByteDevice> {
    inner: D,
    block_size: BlockSize,
    block_count: u64,
}

impl<D: ByteDevice> ByteBlockDevice<D> {
    pub fn new(inner: D, block_size: BlockSize) -> Result<Self> {
        let len = inner.len_bytes();
        let block_count = len / u64::from(block_size.get());
        Ok(Self {
            inner,
            block_size,
            block_count,
        })
    }

    #[must_use]
    pub fn inner(&self) -> &D {
        &self.inner
    }

    #[must_use]
    pub fn block_size(&self) -> BlockSize {
        self.block_size
    }

    #[must_use]
    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    /// Read one full block by number.
    pub fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        if block.0 == 0 {
            return Err(Ext2Error::Format(
                "block 0 is the no-block sentinel and is never readable".to_owned(),
            ));
        }
        if u64::from(block.0) >= self.block_count {
            return Err(Ext2Error::Format(format!(
                "block out of range: block={} block_count={}",
                block.0, self.block_count
            )));
        }

        let offset = self
            .block_size
            .block_to_byte(block)
            .ok_or_else(|| Ext2Error::Format("block offset overflow".to_owned()))?;
        let mut buf = vec![0_u8; self.block_size.get() as usize];
        self.inner.read_exact_at(offset.0, &mut buf)?;
        Ok(BlockBuf::new(buf))
    }
}

/// Read the superblock region (1024 bytes at offset 1024, after the boot
/// block).
pub fn read_superblock_region(dev: &dyn ByteDevice) -> Result<[u8; EXT2_SUPERBLOCK_SIZE]> {
    let mut buf = [0_u8; EXT2_SUPERBLOCK_SIZE];
    dev.read_exact_at(EXT2_SUPERBLOCK_OFFSET as u64, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn bs1k() -> BlockSize {
        BlockSize::new(1024).expect("1K block size")
    }

    #[test]
    fn vec_device_reads_at_offset() {
        let mut image = vec![0_u8; 4096];
        image[1000..1005].copy_from_slice(b"hello");
        let dev = VecByteDevice::new(image);

        let mut buf = [0_u8; 5];
        dev.read_exact_at(1000, &mut buf).expect("read");
        assert_eq!(&buf, b"hello");
        assert_eq!(dev.len_bytes(), 4096);
    }

    #[test]
    fn vec_device_rejects_out_of_bounds() {
        let dev = VecByteDevice::new(vec![0_u8; 100]);
        let mut buf = [0_u8; 8];
        assert!(matches!(
            dev.read_exact_at(96, &mut buf),
            Err(Ext2Error::Format(_))
        ));
        assert!(dev.read_exact_at(u64::MAX, &mut buf).is_err());
    }

    #[test]
    fn block_device_reads_whole_blocks() {
        let mut image = vec![0_u8; 4096];
        image[2048..2052].copy_from_slice(b"e2r!");
        let blocks = ByteBlockDevice::new(VecByteDevice::new(image), bs1k()).expect("device");

        assert_eq!(blocks.block_count(), 4);
        let buf = blocks.read_block(BlockNumber(2)).expect("read");
        assert_eq!(&buf.as_slice()[..4], b"e2r!");
        assert_eq!(buf.as_slice().len(), 1024);
    }

    #[test]
    fn block_device_rejects_sentinel_and_range() {
        let blocks =
            ByteBlockDevice::new(VecByteDevice::new(vec![0_u8; 4096]), bs1k()).expect("device");
        assert!(blocks.read_block(BlockNumber(0)).is_err());
        assert!(blocks.read_block(BlockNumber(4)).is_err());
        assert!(blocks.read_block(BlockNumber(3)).is_ok());
    }

    #[test]
    fn file_device_matches_vec_device() {
        let mut tmp = tempfile::NamedTempFile::new().expect("tempfile");
        let mut image = vec![0_u8; 2048];
        image[1024..1029].copy_from_slice(b"disk!");
        tmp.write_all(&image).expect("write image");
        tmp.flush().expect("flush");

        let dev = FileByteDevice::open(tmp.path()).expect("open");
        assert_eq!(dev.len_bytes(), 2048);

        let region = read_superblock_region(&dev).expect("superblock region");
        assert_eq!(&region[..5], b"disk!");
    }

    #[test]
    fn missing_file_surfaces_io_error() {
        let err = FileByteDevice::open("/nonexistent/e2r.img").expect_err("missing");
        assert!(matches!(err, Ext2Error::Io(_)));
    }
}
