use super::*;
use crate::accessor::Endianness;
use crate::table::{header_word, FLAG_EHANDLER, FLAG_UHANDLER};
use crate::test_util::Words;

const SEGBASE: u64 = 0x20000;
const GP: u64 = 0x1000;

fn table() -> Vec<TableEntry> {
    vec![TableEntry::new(0, 0, 0x10), TableEntry::new(0, 0x100, 0x80)]
}

/// A valid canary at `SEGBASE + 0x10`, announcing offset 0x40.
fn canary(cookie: u64) -> Words {
    let mut mem = Words::new(SEGBASE, 16);
    mem.set(SEGBASE + 0x10, &[header_word(1, 0, 1), 0, 0, cookie, 0x40]);
    mem
}

#[test]
fn finds_little_endian_list() {
    let space = canary(COOKIE_LE).remote(Endianness::Little);
    assert_eq!(find_dyn_list(&space, &table(), SEGBASE, GP), Some(0x1040));
}

#[test]
fn finds_big_endian_list() {
    let space = canary(COOKIE_BE).remote(Endianness::Big);
    assert_eq!(find_dyn_list(&space, &table(), SEGBASE, GP), Some(0x1040));
}

#[test]
fn cookie_follows_byte_order_of_the_target() {
    // both cookies are "dyn-list" in memory
    assert_eq!(COOKIE_LE.to_le_bytes(), *b"dyn-list");
    assert_eq!(COOKIE_BE.to_be_bytes(), *b"dyn-list");

    let mismatched = canary(COOKIE_BE).remote(Endianness::Little);
    assert_eq!(find_dyn_list(&mismatched, &table(), SEGBASE, GP), None);
}

#[test]
fn empty_table_has_no_list() {
    let space = canary(COOKIE_LE).remote(Endianness::Little);
    assert_eq!(find_dyn_list(&space, &[], SEGBASE, GP), None);
}

#[test]
fn first_entry_must_be_zero_length() {
    let space = canary(COOKIE_LE).remote(Endianness::Little);
    let entries = [TableEntry::new(0, 8, 0x10)];
    assert_eq!(find_dyn_list(&space, &entries, SEGBASE, GP), None);

    // a zero-length entry further down does not count
    let entries = [TableEntry::new(0, 8, 0x80), TableEntry::new(8, 8, 0x10)];
    assert_eq!(find_dyn_list(&space, &entries, SEGBASE, GP), None);
}

#[test]
fn any_broken_field_hides_the_list() {
    let broken: [(u64, u64); 8] = [
        (0x10, header_word(2, 0, 1)),
        (0x10, header_word(1, FLAG_EHANDLER, 1)),
        (0x10, header_word(1, FLAG_UHANDLER, 1)),
        (0x10, header_word(1, 0, 2)),
        (0x10, header_word(1, 0, 0)),
        (0x18, 1),
        (0x20, 0x1234),
        (0x28, COOKIE_LE ^ 1),
    ];

    for (offset, value) in broken {
        let mut mem = canary(COOKIE_LE);
        mem.set(SEGBASE + offset, &[value]);
        let space = mem.remote(Endianness::Little);
        assert_eq!(
            find_dyn_list(&space, &table(), SEGBASE, GP),
            None,
            "{value:#x} at +{offset:#x} should not be accepted"
        );
    }
}

#[test]
fn unreadable_canary_hides_the_list() {
    let space = canary(COOKIE_LE).remote(Endianness::Little);

    let entries = [TableEntry::new(0, 0, 0x1000)];
    assert_eq!(find_dyn_list(&space, &entries, SEGBASE, GP), None);

    // header readable, list offset past the end of memory
    let entries = [TableEntry::new(0, 0, 0x60)];
    let mut mem = canary(COOKIE_LE);
    mem.set(SEGBASE + 0x60, &[header_word(1, 0, 1), 0, 0, COOKIE_LE]);
    let space = mem.remote(Endianness::Little);
    assert_eq!(find_dyn_list(&space, &entries, SEGBASE, GP), None);
}
