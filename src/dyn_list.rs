//! # dyn-list canary
//!
//! jit compilers can't put their code into a static unwind table, so they
//! register procedures one by one on a list the unwinder walks separately.
//! to find that list, the module hosting it reserves the first entry of its
//! table: a zero-length "procedure" whose info block is not unwind
//! descriptors but a fixed pattern
//!
//! ```text
//! hdr_addr   header, version 1, no handlers, length 1
//! +0x08      directives, a single word of nops (0)
//! +0x10      personality, 0
//! +0x18      "dyn-list" cookie
//! +0x20      offset of the list, gp-relative
//! ```

#[cfg(test)]
mod tests;

use crate::accessor::Accessor;
use crate::table::{self, TableEntry};

/// `"dyn-list"` read as a little-endian word.
pub const COOKIE_LE: u64 = 0x7473_696c_2d6e_7964;
/// `"dyn-list"` read as a big-endian word.
pub const COOKIE_BE: u64 = 0x6479_6e2d_6c69_7374;

/// Finds the address of the dynamic registration list announced by the
/// canary entry of `entries`, if there is one.
///
/// A canary that is only slightly off, or can't be read, counts as absent.
#[instrument(skip(space, entries), level = "trace")]
pub fn find_dyn_list<A: Accessor + ?Sized>(
    space: &A,
    entries: &[TableEntry],
    segbase: u64,
    gp: u64,
) -> Option<u64> {
    // the canary covers a zero-length procedure and must come first. code
    // below the segment base would sort before it, normal binaries don't
    // have any.
    let canary = entries.first().filter(|e| e.is_empty())?;

    let hdr_addr = canary.info_offset.wrapping_add(segbase);
    let info_addr = hdr_addr.wrapping_add(8);

    let hdr = space.read_word(hdr_addr).ok()?;
    if table::version(hdr) != 1 || table::has_ehandler(hdr) || table::has_uhandler(hdr) {
        return None;
    }
    if table::length(hdr) != 1 {
        return None;
    }

    let word = |offset: u64| space.read_word(info_addr.wrapping_add(offset)).ok();
    let directives = word(0x00)?;
    let personality = word(0x08)?;
    let cookie = word(0x10)?;
    let offset = word(0x18)?;

    let expected = if space.is_big_endian() { COOKIE_BE } else { COOKIE_LE };
    if directives != 0 || personality != 0 || cookie != expected {
        return None;
    }

    trace!("found dyn-list canary at {hdr_addr:#x}");
    Some(offset.wrapping_add(gp))
}
