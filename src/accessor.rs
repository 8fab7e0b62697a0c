//! # accessors
//!
//! everything in this crate reads target memory through an [`Accessor`]. the
//! target may be ourselves (plain pointer reads), another live process, or a
//! chunk of bytes someone pulled out of a core file. the rest of the crate
//! only ever asks three things: give me the word at this address, are you
//! us, and are you big-endian.

use std::borrow::Cow;

use crate::error::{AccessError, Error, Result};

/// Memory access capabilities of an address space.
pub trait Accessor {
    /// Reads the 8-byte word at `addr`, already converted to host byte order.
    fn read_word(&self, addr: u64) -> Result<u64>;

    /// Whether this is the address space of the calling process. Only then
    /// may the decoder hand out views straight into target memory.
    fn is_local(&self) -> bool {
        false
    }

    fn is_big_endian(&self) -> bool;
}

impl<A: Accessor + ?Sized> Accessor for &A {
    fn read_word(&self, addr: u64) -> Result<u64> {
        (**self).read_word(addr)
    }

    fn is_local(&self) -> bool {
        (**self).is_local()
    }

    fn is_big_endian(&self) -> bool {
        (**self).is_big_endian()
    }
}

/// Byte order of a target address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

impl Default for Endianness {
    #[cfg(target_endian = "little")]
    fn default() -> Self {
        Self::Little
    }

    #[cfg(target_endian = "big")]
    fn default() -> Self {
        Self::Big
    }
}

/// The calling process.
///
/// There are exactly two instances, see [`LocalAddressSpace::local`] and
/// [`LocalAddressSpace::local_legacy`]. An address space counts as local
/// only if it *is* one of them.
#[cfg(not(feature = "remote-only"))]
#[derive(Debug)]
pub struct LocalAddressSpace {
    legacy: bool,
}

#[cfg(not(feature = "remote-only"))]
static LOCAL_ADDR_SPACE: LocalAddressSpace = LocalAddressSpace { legacy: false };

#[cfg(all(not(feature = "remote-only"), not(feature = "generic-only")))]
static LOCAL_LEGACY_ADDR_SPACE: LocalAddressSpace = LocalAddressSpace { legacy: true };

#[cfg(not(feature = "remote-only"))]
impl LocalAddressSpace {
    /// The default local address space.
    ///
    /// # Safety
    /// Reads through it dereference raw addresses. Every address handed to
    /// it, directly or through the unwind tables it is used with, must point
    /// into readable memory of this process.
    pub unsafe fn local() -> &'static Self {
        &LOCAL_ADDR_SPACE
    }

    /// The legacy local address space. Behaves exactly like [`Self::local`].
    ///
    /// # Safety
    /// Same as [`Self::local`].
    #[cfg(not(feature = "generic-only"))]
    pub unsafe fn local_legacy() -> &'static Self {
        &LOCAL_LEGACY_ADDR_SPACE
    }

    pub fn is_legacy(&self) -> bool {
        self.legacy
    }
}

#[cfg(not(feature = "remote-only"))]
impl Accessor for LocalAddressSpace {
    fn read_word(&self, addr: u64) -> Result<u64> {
        if addr == 0 {
            return Err(Error::access(addr, AccessError::Unmapped));
        }
        // SAFETY: handing out a `&LocalAddressSpace` requires the caller to
        // promise that the addresses we get are readable.
        Ok(unsafe { (addr as usize as *const u64).read_unaligned() })
    }

    fn is_local(&self) -> bool {
        let local = core::ptr::eq(self, &LOCAL_ADDR_SPACE);
        #[cfg(not(feature = "generic-only"))]
        let local = local || core::ptr::eq(self, &LOCAL_LEGACY_ADDR_SPACE);
        local
    }

    fn is_big_endian(&self) -> bool {
        cfg!(target_endian = "big")
    }
}

/// A raw byte source for a [`RemoteAddressSpace`].
pub trait RemoteMemory {
    /// Fills all of `buf` with the bytes starting at `addr`.
    fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> Result<(), AccessError>;
}

impl<M: RemoteMemory + ?Sized> RemoteMemory for &M {
    fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> Result<(), AccessError> {
        (**self).read_bytes(addr, buf)
    }
}

/// Some bytes and the address they live at in the target.
#[derive(Debug, Clone)]
pub struct MemoryImage<'a> {
    base: u64,
    bytes: Cow<'a, [u8]>,
}

impl<'a> MemoryImage<'a> {
    pub fn new(base: u64, bytes: impl Into<Cow<'a, [u8]>>) -> Self {
        Self { base, bytes: bytes.into() }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl RemoteMemory for MemoryImage<'_> {
    fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> Result<(), AccessError> {
        let start = addr
            .checked_sub(self.base)
            .and_then(|offset| usize::try_from(offset).ok())
            .ok_or(AccessError::Unmapped)?;
        let end = start.checked_add(buf.len()).ok_or(AccessError::Unmapped)?;
        let src = self.bytes.get(start..end).ok_or(AccessError::Unmapped)?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

/// Memory of another live process, read with `process_vm_readv(2)`.
#[cfg(target_os = "linux")]
#[derive(Debug, Clone, Copy)]
pub struct ProcessMemory {
    pid: libc::pid_t,
}

#[cfg(target_os = "linux")]
impl ProcessMemory {
    pub fn new(pid: libc::pid_t) -> Self {
        Self { pid }
    }

    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }
}

#[cfg(target_os = "linux")]
impl RemoteMemory for ProcessMemory {
    fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> Result<(), AccessError> {
        let local = libc::iovec {
            iov_base: buf.as_mut_ptr().cast(),
            iov_len: buf.len(),
        };
        let remote = libc::iovec {
            iov_base: addr as usize as *mut libc::c_void,
            iov_len: buf.len(),
        };

        // SAFETY: `local` covers exactly `buf`. The remote side is checked by
        // the kernel.
        let read = unsafe { libc::process_vm_readv(self.pid, &local, 1, &remote, 1, 0) };
        if read < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        if read as usize != buf.len() {
            return Err(AccessError::ShortRead(read as usize));
        }
        Ok(())
    }
}

/// Any address space that is not the calling process.
#[derive(Debug, Clone)]
pub struct RemoteAddressSpace<M> {
    memory: M,
    endian: Endianness,
}

impl<M: RemoteMemory> RemoteAddressSpace<M> {
    pub fn new(memory: M, endian: Endianness) -> Self {
        Self { memory, endian }
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn endian(&self) -> Endianness {
        self.endian
    }
}

impl<M: RemoteMemory> Accessor for RemoteAddressSpace<M> {
    fn read_word(&self, addr: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.memory
            .read_bytes(addr, &mut buf)
            .map_err(|err| Error::access(addr, err))?;
        Ok(match self.endian {
            Endianness::Little => u64::from_le_bytes(buf),
            Endianness::Big => u64::from_be_bytes(buf),
        })
    }

    fn is_big_endian(&self) -> bool {
        self.endian == Endianness::Big
    }
}
