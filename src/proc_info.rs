//! Turning a table entry into a [`ProcInfo`].


use crate::accessor::Accessor;
use crate::error::{Error, Result};
use crate::table::{self, InfoFormat, ModuleDescriptor};

/// Unwind descriptors that stay where they are, in our own memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalView {
    addr: u64,
    len: usize,
}

impl LocalView {
    pub fn addr(&self) -> u64 {
        self.addr
    }

    pub fn len_words(&self) -> usize {
        self.len
    }

    /// # Safety
    /// The module the view was resolved from must still be loaded. Views
    /// into the kernel table point into memory owned by the
    /// [`Resolver`](crate::Resolver) that resolved them, which must not have
    /// been dropped.
    pub unsafe fn as_words(&self) -> &[u64] {
        if self.len == 0 {
            return &[];
        }
        // SAFETY: views are only created for local address spaces, whose
        // contract makes the descriptors readable. Info blocks are 8-aligned.
        unsafe { core::slice::from_raw_parts(self.addr as usize as *const u64, self.len) }
    }
}

/// The unwind descriptors of a procedure.
#[derive(Debug, PartialEq, Eq)]
pub enum UnwindInfo {
    /// Points straight into the calling process. Never freed.
    Borrowed(LocalView),
    /// A copy read out of a remote address space.
    Owned(Box<[u64]>),
}

impl UnwindInfo {
    pub fn len_words(&self) -> usize {
        match self {
            UnwindInfo::Borrowed(view) => view.len_words(),
            UnwindInfo::Owned(words) => words.len(),
        }
    }

    pub fn len_bytes(&self) -> usize {
        self.len_words() * 8
    }
}

/// Everything an unwinder needs to know about one procedure.
///
/// `start_ip == end_ip == 0` means the address is inside a module but has no
/// table entry, so the default conventions apply.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProcInfo {
    pub start_ip: u64,
    pub end_ip: u64,
    /// Language specific data area. Only meaningful with a `handler`.
    pub lsda: u64,
    pub handler: Option<u64>,
    pub gp: u64,
    /// Always zero for table-based info.
    pub flags: u32,
    pub format: InfoFormat,
    pub unwind_info: Option<UnwindInfo>,
}

impl ProcInfo {
    pub fn unwind_info_size(&self) -> usize {
        self.unwind_info.as_ref().map_or(0, UnwindInfo::len_bytes)
    }

    /// Frees a copied info block early. Views into local memory are left
    /// alone. Dropping the `ProcInfo` frees the copy as well.
    pub fn release_unwind_info(&mut self) {
        if matches!(self.unwind_info, Some(UnwindInfo::Owned(_))) {
            self.unwind_info = None;
        }
    }
}

/// Resolves `ip` against the unwind table of `module`.
///
/// `module` must be in table format and contain `ip`. An address without a
/// table entry is not an error, see [`ProcInfo`].
#[instrument(skip(space, module), fields(module = %module.name), level = "trace")]
pub fn search_unwind_table<A: Accessor + ?Sized>(
    space: &A,
    ip: u64,
    module: &ModuleDescriptor<'_>,
    need_unwind_info: bool,
) -> Result<ProcInfo> {
    debug_assert_eq!(module.format, InfoFormat::Table);
    debug_assert!(module.contains(ip), "{ip:#x} is outside of {}", module.name);

    let Some(entry) = module.table.lookup(ip) else {
        trace!("no entry for {ip:#x}, using default conventions");
        return Ok(ProcInfo { gp: module.gp, ..ProcInfo::default() });
    };

    let segbase = module.table.segbase();
    let mut pi = ProcInfo {
        start_ip: entry.start_offset.wrapping_add(segbase),
        end_ip: entry.end_offset.wrapping_add(segbase),
        gp: module.gp,
        format: module.format,
        ..ProcInfo::default()
    };

    let hdr_addr = entry.info_offset.wrapping_add(segbase);
    let info_addr = hdr_addr.wrapping_add(8);

    let hdr = space.read_word(hdr_addr)?;
    if table::version(hdr) != 1 {
        debug!("bad unwind info version {} at {hdr_addr:#x}", table::version(hdr));
        return Err(Error::BadVersion(table::version(hdr)));
    }

    let len = table::length(hdr);
    let info_end = info_addr.wrapping_add(8 * len);

    if need_unwind_info {
        pi.unwind_info = Some(read_unwind_info(space, info_addr, len)?);
    }

    if table::has_ehandler(hdr) || table::has_uhandler(hdr) {
        // the personality routine is stored gp-relative
        let handler_offset = space.read_word(info_end.wrapping_add(8))?;
        pi.handler = Some(handler_offset.wrapping_add(module.gp));
    }
    pi.lsda = info_end.wrapping_add(16);

    Ok(pi)
}

fn read_unwind_info<A: Accessor + ?Sized>(space: &A, info_addr: u64, len: u64) -> Result<UnwindInfo> {
    let words = usize::try_from(len).map_err(|_| Error::OutOfMemory(usize::MAX))?;

    if space.is_local() {
        return Ok(UnwindInfo::Borrowed(LocalView { addr: info_addr, len: words }));
    }

    let mut buf = reserve_words(words)?;
    let mut addr = info_addr;
    for _ in 0..words {
        buf.push(space.read_word(addr)?);
        addr = addr.wrapping_add(8);
    }
    Ok(UnwindInfo::Owned(buf.into_boxed_slice()))
}

// `length` is 32 bits, so on 64-bit hosts whether this fails for a bogus
// header is up to the allocator.
fn reserve_words(words: usize) -> Result<Vec<u64>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(words)
        .map_err(|_| Error::OutOfMemory(words.saturating_mul(8)))?;
    Ok(buf)
}
