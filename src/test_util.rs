//! Fake target memory for the unit tests.

use crate::accessor::{Endianness, MemoryImage, RemoteAddressSpace};
use crate::table::{InfoFormat, ModuleDescriptor, TableEntry, UnwindTable};

/// A word-addressed chunk of target memory starting at `base`.
pub(crate) struct Words {
    pub(crate) base: u64,
    pub(crate) words: Vec<u64>,
}

impl Words {
    pub(crate) fn new(base: u64, len: usize) -> Self {
        Self { base, words: vec![0; len] }
    }

    pub(crate) fn set(&mut self, addr: u64, words: &[u64]) -> &mut Self {
        let idx = ((addr - self.base) / 8) as usize;
        self.words[idx..idx + words.len()].copy_from_slice(words);
        self
    }

    pub(crate) fn remote(&self, endian: Endianness) -> RemoteAddressSpace<MemoryImage<'static>> {
        let bytes: Vec<u8> = self
            .words
            .iter()
            .flat_map(|w| match endian {
                Endianness::Little => w.to_le_bytes(),
                Endianness::Big => w.to_be_bytes(),
            })
            .collect();
        RemoteAddressSpace::new(MemoryImage::new(self.base, bytes), endian)
    }
}

pub(crate) fn module(entries: Vec<TableEntry>, segbase: u64, range: (u64, u64), gp: u64) -> ModuleDescriptor<'static> {
    ModuleDescriptor {
        format: InfoFormat::Table,
        start_ip: range.0,
        end_ip: range.1,
        gp,
        name: "test-module".into(),
        table: UnwindTable::new(entries, segbase),
    }
}
