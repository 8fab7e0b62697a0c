//! IA-64 unwind tables.
//!
//! Source: Intel Itanium Software Conventions and Runtime Architecture Guide,
//! chapter 11 "Stack Unwinding and Exception Handling".
//!
//! An unwind table is a sorted array of entries, one per procedure:
//! ```text
//! +--------------+------------+-------------+
//! | start_offset | end_offset | info_offset |   3 x u64, relative to segbase
//! +--------------+------------+-------------+
//! ```
//! `info_offset` points at an 8-byte header word followed by the unwind
//! descriptors and, if a handler flag is set, the personality routine and
//! the language specific data area:
//! ```text
//! hdr_addr   header   [ version:16 | flags:16 | length:32 ]
//! info_addr  descriptors, `length` words
//! info_end   (unused)
//! +8         personality routine, gp-relative
//! +16        lsda
//! ```


use std::borrow::Cow;
use core::{cmp::Ordering, mem};

use crate::accessor::Accessor;
use crate::error::{Error, Result};

const UNW_VER_SHIFT: u32 = 48;
const UNW_FLAG_SHIFT: u32 = 32;
const UNW_FLAG_MASK: u64 = 0x0000_ffff_0000_0000;
const UNW_FLAG_EHANDLER: u64 = 0x0000_0001_0000_0000;
const UNW_FLAG_UHANDLER: u64 = 0x0000_0002_0000_0000;
const UNW_LENGTH_MASK: u64 = 0x0000_0000_ffff_ffff;

/// Version field of an info block header.
pub const fn version(hdr: u64) -> u64 {
    hdr >> UNW_VER_SHIFT
}

/// Number of 8-byte words of unwind descriptors following the header.
pub const fn length(hdr: u64) -> u64 {
    hdr & UNW_LENGTH_MASK
}

pub const fn flags(hdr: u64) -> u64 {
    (hdr & UNW_FLAG_MASK) >> UNW_FLAG_SHIFT
}

/// The procedure has an exception handler.
pub const fn has_ehandler(hdr: u64) -> bool {
    hdr & UNW_FLAG_EHANDLER != 0
}

/// The procedure has a cleanup (unwind) handler.
pub const fn has_uhandler(hdr: u64) -> bool {
    hdr & UNW_FLAG_UHANDLER != 0
}

/// Builds a header word, for code generators emitting their own tables.
pub const fn header_word(version: u16, flags: u16, length: u32) -> u64 {
    ((version as u64) << UNW_VER_SHIFT) | ((flags as u64) << UNW_FLAG_SHIFT) | length as u64
}

/// Header flag bit for [`header_word`]: exception handler present.
pub const FLAG_EHANDLER: u16 = (UNW_FLAG_EHANDLER >> UNW_FLAG_SHIFT) as u16;
/// Header flag bit for [`header_word`]: unwind handler present.
pub const FLAG_UHANDLER: u16 = (UNW_FLAG_UHANDLER >> UNW_FLAG_SHIFT) as u16;

/// One row of an unwind table. Laid out exactly as in memory.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TableEntry {
    pub start_offset: u64,
    pub end_offset: u64,
    pub info_offset: u64,
}

impl TableEntry {
    pub const WORDS: usize = mem::size_of::<TableEntry>() / mem::size_of::<u64>();

    pub const fn new(start_offset: u64, end_offset: u64, info_offset: u64) -> Self {
        Self { start_offset, end_offset, info_offset }
    }

    /// Zero-length entries cover nothing. The dyn-list canary is one.
    pub const fn is_empty(&self) -> bool {
        self.start_offset == self.end_offset
    }

    pub const fn covers(&self, rel_ip: u64) -> bool {
        rel_ip >= self.start_offset && rel_ip < self.end_offset
    }
}

/// Finds the entry covering `rel_ip`.
///
/// `entries` must be sorted by `start_offset` and must not overlap. This is
/// not checked; on a malformed table the result is some entry or `None`.
pub fn lookup(entries: &[TableEntry], rel_ip: u64) -> Option<&TableEntry> {
    entries
        .binary_search_by(|e| {
            if rel_ip < e.start_offset {
                Ordering::Greater
            } else if rel_ip >= e.end_offset {
                Ordering::Less
            } else {
                Ordering::Equal
            }
        })
        .ok()
        .map(|idx| &entries[idx])
}

/// An unwind table and the segment base its offsets are relative to.
#[derive(Debug, Clone)]
pub struct UnwindTable<'a> {
    entries: Cow<'a, [TableEntry]>,
    segbase: u64,
}

impl<'a> UnwindTable<'a> {
    pub fn new(entries: impl Into<Cow<'a, [TableEntry]>>, segbase: u64) -> Self {
        Self { entries: entries.into(), segbase }
    }

    /// Views a table that lives in our own memory.
    ///
    /// # Safety
    /// `addr` must point to `len_words` readable words that stay mapped and
    /// unchanged for `'a`.
    pub unsafe fn from_raw_parts(addr: u64, len_words: usize, segbase: u64) -> Self {
        let count = len_words / TableEntry::WORDS;
        let ptr = addr as usize as *const TableEntry;
        let misaligned = addr % mem::align_of::<TableEntry>() as u64 != 0;
        if count == 0 || ptr.is_null() || misaligned {
            if count != 0 {
                debug!("ignoring unusable unwind table at {addr:#x}");
            }
            return Self { entries: Cow::Borrowed(&[]), segbase };
        }
        // SAFETY: upheld by the caller, alignment checked above.
        let entries = unsafe { core::slice::from_raw_parts(ptr, count) };
        Self::new(entries, segbase)
    }

    /// Copies a table out of any address space, one word at a time.
    #[instrument(skip(space), level = "trace")]
    pub fn fetch<A: Accessor + ?Sized>(
        space: &A,
        addr: u64,
        len_words: usize,
        segbase: u64,
    ) -> Result<UnwindTable<'static>> {
        let count = len_words / TableEntry::WORDS;
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(count)
            .map_err(|_| Error::OutOfMemory(count.saturating_mul(mem::size_of::<TableEntry>())))?;

        let mut word_addr = addr;
        let mut next_word = || {
            let word = space.read_word(word_addr);
            word_addr = word_addr.wrapping_add(8);
            word
        };
        for _ in 0..count {
            entries.push(TableEntry {
                start_offset: next_word()?,
                end_offset: next_word()?,
                info_offset: next_word()?,
            });
        }

        trace!("fetched {count} entries from {addr:#x}");
        Ok(UnwindTable::new(entries, segbase))
    }

    pub fn entries(&self) -> &[TableEntry] {
        &self.entries
    }

    pub fn segbase(&self) -> u64 {
        self.segbase
    }

    /// Table size in machine words.
    pub fn len_words(&self) -> usize {
        self.entries.len() * TableEntry::WORDS
    }

    /// Finds the entry covering the absolute address `ip`.
    pub fn lookup(&self, ip: u64) -> Option<&TableEntry> {
        lookup(&self.entries, ip.wrapping_sub(self.segbase))
    }
}

/// How a module describes its unwind information. IA-64 only ever has tables.
#[non_exhaustive]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum InfoFormat {
    #[default]
    Table,
}

/// Where a module's code lives and where to find its unwind table.
#[derive(Debug, Clone)]
pub struct ModuleDescriptor<'a> {
    pub format: InfoFormat,
    pub start_ip: u64,
    pub end_ip: u64,
    pub gp: u64,
    /// For diagnostics only.
    pub name: Cow<'a, str>,
    pub table: UnwindTable<'a>,
}

impl ModuleDescriptor<'_> {
    pub fn contains(&self, ip: u64) -> bool {
        ip >= self.start_ip && ip < self.end_ip
    }
}
