#![forbid(unsafe_code)]
//! Error types for the e2r ext2 reader.
//!
//! # Error Taxonomy
//!
//! Two layers:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `e2r-types` | On-disk format violations detected during byte parsing |
//! | Runtime | `Ext2Error` | `e2r-error` (this crate) | User-facing errors for API consumers |
//!
//! ## Mapping Policy: ParseError → Ext2Error
//!
//! `e2r-error` is intentionally independent of `e2r-types` and `e2r-ondisk`
//! to avoid cyclic dependencies. The conversion from `ParseError` to
//! `Ext2Error` lives in `e2r-core`, which depends on both crates.
//!
//! The mapping rules are:
//!
//! | ParseError Variant | Ext2Error Variant | Rationale |
//! |--------------------|-------------------|-----------|
//! | `InsufficientData` | `Corruption { block, detail }` | Truncated metadata indicates corruption or a truncated image |
//! | `InvalidMagic` | `Format(detail)` | Wrong magic means this is not an ext2 image |
//! | `InvalidField` | `Format` / `Unsupported` | Validation-time "unsupported" reasons become `Unsupported`; everything else is `Format` |
//! | `IntegerConversion` | `Corruption { block, detail }` | Arithmetic overflow in parsed values suggests corruption |
//!
//! `Unsupported` exists so that a well-formed image outside this reader's
//! stated limitations (non-1024 block size, more than one block group)
//! gets an actionable message instead of being reported as corrupt.
//!
//! ## Design Constraints
//!
//! - `e2r-error` MUST NOT depend on `e2r-types` or `e2r-ondisk`.
//! - `Ext2Error` is the single user-facing error type; parse-layer errors
//!   convert into it at the `e2r-core` boundary.
//! - All string payloads are owned (`String`) so errors move freely across
//!   thread boundaries.

use thiserror::Error;

/// Unified error type for all read operations.
#[derive(Debug, Error)]
pub enum Ext2Error {
    /// Operating system I/O error (wraps `std::io::Error`). Never retried
    /// internally; retry policy belongs to the caller.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// On-disk metadata corruption detected at a known block.
    #[error("corrupt metadata at block {block}: {detail}")]
    Corruption { block: u64, detail: String },

    /// Invalid on-disk format (bad magic, structurally impossible fields).
    #[error("invalid on-disk format: {0}")]
    Format(String),

    /// Well-formed image outside this reader's limitations (non-1024 block
    /// size, multiple block groups).
    #[error("unsupported layout: {0}")]
    Unsupported(String),

    /// A requested name has no matching live directory entry.
    #[error("not found: {0}")]
    NotFound(String),

    /// A path component or lookup target is not a directory.
    #[error("not a directory")]
    NotDirectory,

    /// Attempted a file-content read on a directory inode.
    #[error("is a directory")]
    IsDirectory,
}

/// Result alias using `Ext2Error`.
pub type Result<T> = std::result::Result<T, Ext2Error>;
