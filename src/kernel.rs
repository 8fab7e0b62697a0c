//! The kernel's own unwind table.
//!
//! The kernel is not on the loader's module list. Linux hands out its table
//! through the `getunwind` system call instead: call it once with no buffer
//! to learn the size, then again to fill a buffer. The blob starts with the
//! table, terminated by an entry with a zero start offset, followed by the
//! info blocks. `info_offset` is relative to the start of the blob.


use crate::error::{Error, Result};
use crate::table::{InfoFormat, ModuleDescriptor, TableEntry, UnwindTable};

/// Somewhere to get the kernel's unwind table from.
pub trait KernelUnwindSource {
    /// Copies the table blob into `buf` if there is one, and returns the
    /// size of the whole blob in bytes.
    fn get_unwind(&self, buf: Option<&mut [u64]>) -> Result<usize>;
}

/// `getunwind(2)`.
///
/// Kernels without the system call have no unwind table to offer, that is
/// reported as an empty one.
#[cfg(all(target_os = "linux", not(feature = "remote-only")))]
#[derive(Debug, Default, Clone, Copy)]
pub struct Getunwind;

#[cfg(all(target_os = "linux", not(feature = "remote-only")))]
impl Getunwind {
    const NR_GETUNWIND: libc::c_long = 1215;
}

#[cfg(all(target_os = "linux", not(feature = "remote-only")))]
impl KernelUnwindSource for Getunwind {
    fn get_unwind(&self, buf: Option<&mut [u64]>) -> Result<usize> {
        let (ptr, len) = match buf {
            Some(buf) => (buf.as_mut_ptr(), buf.len() * 8),
            None => (core::ptr::null_mut(), 0),
        };
        // SAFETY: the kernel writes at most `len` bytes to `ptr`.
        let ret = unsafe { libc::syscall(Self::NR_GETUNWIND, ptr, len) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ENOSYS) {
                trace!("no getunwind on this kernel");
                return Ok(0);
            }
            return Err(Error::Kernel(err));
        }
        Ok(ret as usize)
    }
}

/// The kernel table, relocated and ready for lookups.
///
/// Procedure info resolved against it in a local address space borrows the
/// blob, see [`LocalView::as_words`](crate::proc_info::LocalView::as_words).
#[derive(Debug)]
pub struct KernelTable {
    /// Info blocks are read straight out of this, it must not move or drop
    /// while `descriptor` is in use.
    blob: Box<[u64]>,
    descriptor: ModuleDescriptor<'static>,
}

impl KernelTable {
    #[instrument(skip(source))]
    pub fn fetch<S: KernelUnwindSource + ?Sized>(source: &S) -> Result<Self> {
        debug!("getting kernel table");

        let size = source.get_unwind(None)?;
        let words = size.div_ceil(8);
        let mut blob = Vec::new();
        if blob.try_reserve_exact(words).is_err() {
            debug!("failed to allocate {size} bytes");
            return Err(Error::OutOfMemory(size));
        }
        blob.resize(words, 0u64);
        let mut blob = blob.into_boxed_slice();
        let filled = source.get_unwind(Some(&mut blob[..]))?.min(size);

        let base = blob.as_ptr() as u64;
        let rows = &blob[..filled / 8];
        let count = rows
            .chunks_exact(TableEntry::WORDS)
            .take_while(|row| row[0] != 0)
            .count();

        let mut entries = Vec::new();
        entries
            .try_reserve_exact(count)
            .map_err(|_| Error::OutOfMemory(count * core::mem::size_of::<TableEntry>()))?;
        entries.extend(
            rows.chunks_exact(TableEntry::WORDS)
                .take(count)
                .map(|row| TableEntry::new(row[0], row[1], row[2].wrapping_add(base))),
        );

        let start_ip = entries.first().map_or(0, |e| e.start_offset);
        let end_ip = entries.last().map_or(0, |e| e.end_offset);
        let descriptor = ModuleDescriptor {
            format: InfoFormat::Table,
            start_ip,
            end_ip,
            gp: 0,
            name: "<kernel>".into(),
            table: UnwindTable::new(entries, 0),
        };

        debug!(
            "found table `{}': [{start_ip:#x}-{end_ip:#x}) segbase=0 len={}",
            descriptor.name,
            descriptor.table.len_words()
        );
        Ok(Self { blob, descriptor })
    }

    pub fn descriptor(&self) -> &ModuleDescriptor<'static> {
        &self.descriptor
    }

    /// Size of the blob the kernel handed out, in bytes.
    pub fn blob_len(&self) -> usize {
        self.blob.len() * 8
    }
}
