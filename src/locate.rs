//! Finding the loaded module that contains an address.
//!
//! We ask the dynamic linker for every loaded object and its program
//! headers (`dl_iterate_phdr`), then look for the one with a `PT_LOAD`
//! segment around the address and a `PT_IA_64_UNWIND` segment holding its
//! unwind table.

#[cfg(test)]
mod tests;

use crate::error::{AccessError, Error, Result};
use crate::table::{InfoFormat, ModuleDescriptor, UnwindTable};

pub use libc::{PT_DYNAMIC, PT_LOAD};
pub const PT_IA_64_UNWIND: u32 = 0x7000_0001;

const DT_NULL: u64 = 0;
const DT_PLTGOT: u64 = 3;
const DYN_ENTRY_SIZE: u64 = 16;

/// The parts of an ELF program header we care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub vaddr: u64,
    pub memsz: u64,
}

impl ProgramHeader {
    fn contains(&self, load_base: u64, ip: u64) -> bool {
        let start = self.vaddr.wrapping_add(load_base);
        ip >= start && ip < start.wrapping_add(self.memsz)
    }
}

/// One object from the dynamic linker's list.
#[derive(Debug, Clone)]
pub struct LoadedModule {
    /// Empty for the main program.
    pub name: String,
    pub load_base: u64,
    pub headers: Vec<ProgramHeader>,
}

/// The objects loaded into this process, in the dynamic linker's order.
#[derive(Debug)]
pub struct LoadedModules {
    modules: std::vec::IntoIter<LoadedModule>,
}

impl LoadedModules {
    /// Takes a snapshot of the loaded objects.
    #[cfg(all(target_os = "linux", not(feature = "remote-only")))]
    pub fn snapshot() -> Self {
        let mut modules: Vec<LoadedModule> = Vec::new();
        // SAFETY: the callback only touches `modules` through the pointer.
        unsafe {
            libc::dl_iterate_phdr(Some(callback), (&mut modules as *mut Vec<LoadedModule>).cast());
        }
        Self { modules: modules.into_iter() }
    }
}

impl From<Vec<LoadedModule>> for LoadedModules {
    fn from(modules: Vec<LoadedModule>) -> Self {
        Self { modules: modules.into_iter() }
    }
}

impl Iterator for LoadedModules {
    type Item = LoadedModule;

    fn next(&mut self) -> Option<LoadedModule> {
        self.modules.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.modules.size_hint()
    }
}

#[cfg(all(target_os = "linux", not(feature = "remote-only")))]
unsafe extern "C" fn callback(
    info: *mut libc::dl_phdr_info,
    size: libc::size_t,
    data: *mut libc::c_void,
) -> libc::c_int {
    use core::ffi::CStr;
    use core::mem;

    let modules = unsafe { &mut *data.cast::<Vec<LoadedModule>>() };

    // old loaders hand out a shorter struct
    if size < mem::offset_of!(libc::dl_phdr_info, dlpi_phnum) + mem::size_of::<u16>() {
        return 0;
    }

    let info = unsafe { &*info };
    let name = if info.dlpi_name.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(info.dlpi_name) }.to_string_lossy().into_owned()
    };
    let headers = if info.dlpi_phdr.is_null() {
        &[][..]
    } else {
        unsafe { core::slice::from_raw_parts(info.dlpi_phdr, info.dlpi_phnum as usize) }
    };

    modules.push(LoadedModule {
        name,
        load_base: info.dlpi_addr as u64,
        headers: headers
            .iter()
            .map(|phdr| ProgramHeader {
                p_type: phdr.p_type,
                vaddr: phdr.p_vaddr as u64,
                memsz: phdr.p_memsz as u64,
            })
            .collect(),
    });
    0
}

/// Builds the descriptor of the first module in `modules` whose text
/// contains `ip` and that has an unwind table.
///
/// `current_gp` supplies the gp of statically linked programs, which have no
/// `_DYNAMIC` to take it from.
///
/// The unwind and dynamic segments are read straight out of this process,
/// whatever address space the procedure info is decoded from later.
///
/// # Safety
/// `modules` must describe objects mapped into this process, and they must
/// stay mapped while the returned descriptor is used: its table is a view
/// straight into the unwind segment.
#[instrument(skip(modules, current_gp), level = "debug")]
pub unsafe fn find_module<I>(
    modules: I,
    ip: u64,
    current_gp: &dyn Fn() -> u64,
) -> Result<Option<ModuleDescriptor<'static>>>
where
    I: IntoIterator<Item = LoadedModule>,
{
    for module in modules {
        trace!("checking `{}'", module.name);

        let load_base = module.load_base;
        let mut text = None;
        let mut unwind = None;
        let mut dynamic = None;
        for phdr in &module.headers {
            match phdr.p_type {
                PT_LOAD if phdr.contains(load_base, ip) => text = Some(*phdr),
                PT_IA_64_UNWIND => unwind = Some(*phdr),
                PT_DYNAMIC => dynamic = Some(*phdr),
                _ => {}
            }
        }
        let (Some(text), Some(unwind)) = (text, unwind) else {
            continue;
        };

        let gp = match dynamic {
            // for dynamically linked objects DT_PLTGOT is the gp. _DYNAMIC is
            // writable on IA-64 and already relocated by the loader.
            // SAFETY: the caller promises the dynamic segment is mapped.
            Some(dynamic) => unsafe { pltgot(&dynamic, load_base) }?.unwrap_or_else(|| {
                debug!("`{}' has no DT_PLTGOT", module.name);
                0
            }),
            // static executables have a single gp for the whole program
            None => current_gp(),
        };

        let segbase = text.vaddr.wrapping_add(load_base);
        // SAFETY: the caller promises the unwind segment is mapped.
        let table = unsafe {
            UnwindTable::from_raw_parts(
                unwind.vaddr.wrapping_add(load_base),
                (unwind.memsz / 8) as usize,
                segbase,
            )
        };

        debug!(
            "found table `{}': segbase={segbase:#x}, len={}, gp={gp:#x}",
            module.name,
            table.len_words()
        );
        return Ok(Some(ModuleDescriptor {
            format: InfoFormat::Table,
            start_ip: segbase,
            end_ip: segbase.wrapping_add(text.memsz),
            gp,
            name: module.name.into(),
            table,
        }));
    }

    Ok(None)
}

/// # Safety
/// The dynamic segment must be mapped into this process.
unsafe fn pltgot(dynamic: &ProgramHeader, load_base: u64) -> Result<Option<u64>> {
    let start = dynamic.vaddr.wrapping_add(load_base);
    if start == 0 {
        return Err(Error::access(start, AccessError::Unmapped));
    }
    // SAFETY: entries are only read up to the end of the segment.
    let read = |addr: u64| unsafe { (addr as usize as *const u64).read_unaligned() };

    for idx in 0..dynamic.memsz / DYN_ENTRY_SIZE {
        let entry = start.wrapping_add(idx * DYN_ENTRY_SIZE);
        match read(entry) {
            DT_NULL => break,
            DT_PLTGOT => return Ok(Some(read(entry.wrapping_add(8)))),
            _ => {}
        }
    }
    Ok(None)
}
