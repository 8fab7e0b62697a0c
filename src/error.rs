//! Errors returned while resolving unwind information.

use std::io;

use thiserror::Error;

/// Why a single word could not be read from an address space.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum AccessError {
    /// The address does not fall into memory the source knows about.
    #[error("address is not mapped")]
    Unmapped,

    /// The source returned fewer bytes than requested.
    #[error("short read: got {0} bytes")]
    ShortRead(usize),

    /// The underlying read failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The error type for unwind-table lookups.
///
/// None of these are fatal for the whole library. The unwinder calling us
/// is expected to give up on the frame in question.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// Neither a loaded module nor the kernel table covers the address.
    #[error("no unwind info for ip {0:#x}")]
    NoInfo(u64),

    /// The per-procedure header has an unknown version.
    #[error("unsupported unwind info version {0}")]
    BadVersion(u64),

    /// Reading target memory failed.
    #[error("failed to read word at {addr:#x}")]
    Access {
        addr: u64,
        #[source]
        source: AccessError,
    },

    /// The kernel would not hand out its unwind table.
    #[error("failed to get the kernel unwind table")]
    Kernel(#[source] io::Error),

    /// A buffer for the info block or the kernel table could not be allocated.
    #[error("failed to allocate {0} bytes")]
    OutOfMemory(usize),
}

impl Error {
    pub(crate) fn access(addr: u64, source: impl Into<AccessError>) -> Self {
        Error::Access { addr, source: source.into() }
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
