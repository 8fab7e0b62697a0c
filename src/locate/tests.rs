use super::*;
use crate::table::TableEntry;

const LOAD_BASE: u64 = 0x1000;
const TEXT: u64 = 0x4000_0000;
const STATIC_GP: u64 = 0x6000_1234;

fn no_static_gp() -> u64 {
    panic!("dynamic objects take their gp from DT_PLTGOT")
}

fn static_gp() -> u64 {
    STATIC_GP
}

/// A module whose unwind and dynamic segments are real buffers of ours.
fn module(name: &str, table: &[TableEntry], dynamic: Option<&[u64]>) -> LoadedModule {
    let mut headers = vec![
        ProgramHeader { p_type: PT_LOAD, vaddr: TEXT - LOAD_BASE, memsz: 0x1000 },
        ProgramHeader { p_type: PT_LOAD, vaddr: TEXT + 0x10000 - LOAD_BASE, memsz: 0x1000 },
        ProgramHeader {
            p_type: PT_IA_64_UNWIND,
            vaddr: (table.as_ptr() as u64).wrapping_sub(LOAD_BASE),
            memsz: core::mem::size_of_val(table) as u64,
        },
    ];
    if let Some(dynamic) = dynamic {
        headers.push(ProgramHeader {
            p_type: PT_DYNAMIC,
            vaddr: (dynamic.as_ptr() as u64).wrapping_sub(LOAD_BASE),
            memsz: core::mem::size_of_val(dynamic) as u64,
        });
    }
    LoadedModule { name: name.into(), load_base: LOAD_BASE, headers }
}

mod local {
    use super::*;

    fn find(modules: Vec<LoadedModule>, ip: u64, gp: fn() -> u64) -> Option<ModuleDescriptor<'static>> {
        unsafe { find_module(LoadedModules::from(modules), ip, &gp) }.unwrap()
    }

    #[test]
    fn dynamic_object_gp_comes_from_pltgot() {
        let table = [TableEntry::new(0x10, 0x20, 0x100)];
        let dynamic = [1, 0x55, DT_PLTGOT, 0x6000_8000, DT_NULL, 0];

        let desc = find(vec![module("libfoo.so", &table, Some(&dynamic))], TEXT + 0x18, no_static_gp).unwrap();
        assert_eq!(desc.name, "libfoo.so");
        assert_eq!(desc.gp, 0x6000_8000);
        assert_eq!(desc.start_ip, TEXT);
        assert_eq!(desc.end_ip, TEXT + 0x1000);
        assert_eq!(desc.format, InfoFormat::Table);
        assert_eq!(desc.table.segbase(), TEXT);
        assert_eq!(desc.table.entries(), &table);
        assert_eq!(desc.table.len_words(), 3);
    }

    #[test]
    fn text_segment_is_the_one_around_ip() {
        let table = [TableEntry::new(0x10, 0x20, 0x100)];

        let desc = find(vec![module("", &table, None)], TEXT + 0x10010, static_gp).unwrap();
        assert_eq!(desc.table.segbase(), TEXT + 0x10000);
        assert_eq!(desc.end_ip, TEXT + 0x11000);
    }

    #[test]
    fn static_program_uses_current_gp() {
        let table = [TableEntry::new(0x10, 0x20, 0x100)];

        let desc = find(vec![module("", &table, None)], TEXT, static_gp).unwrap();
        assert_eq!(desc.gp, STATIC_GP);
    }

    #[test]
    fn missing_pltgot_is_zero() {
        let table = [TableEntry::new(0x10, 0x20, 0x100)];
        let dynamic = [1, 0x55, DT_NULL, 0, DT_PLTGOT, 0xdead];

        let desc = find(vec![module("libbar.so", &table, Some(&dynamic))], TEXT, no_static_gp).unwrap();
        assert_eq!(desc.gp, 0);
    }

    #[test]
    fn modules_without_unwind_segment_are_skipped() {
        let table = [TableEntry::new(0x10, 0x20, 0x100)];
        let mut bare = module("libbare.so", &table, None);
        bare.headers.retain(|phdr| phdr.p_type != PT_IA_64_UNWIND);
        let first = module("libfirst.so", &table, None);
        let second = module("libsecond.so", &table, None);

        let desc = find(vec![bare, first, second], TEXT + 4, static_gp).unwrap();
        assert_eq!(desc.name, "libfirst.so");
    }

    #[test]
    fn address_outside_every_module() {
        let table = [TableEntry::new(0x10, 0x20, 0x100)];

        assert!(find(vec![module("a", &table, None)], TEXT + 0x1000, static_gp).is_none());
        assert!(find(vec![module("a", &table, None)], TEXT - 1, static_gp).is_none());
        assert!(find(vec![], TEXT, static_gp).is_none());
    }
}

#[test]
fn null_dynamic_section_fails() {
    use crate::error::Error;

    let modules = vec![LoadedModule {
        name: "libgone.so".into(),
        load_base: 0,
        headers: vec![
            ProgramHeader { p_type: PT_LOAD, vaddr: TEXT, memsz: 0x1000 },
            ProgramHeader { p_type: PT_IA_64_UNWIND, vaddr: 0, memsz: 0 },
            ProgramHeader { p_type: PT_DYNAMIC, vaddr: 0, memsz: 0x100 },
        ],
    }];

    // the empty unwind segment is never dereferenced
    let ret = unsafe { find_module(modules, TEXT, &static_gp) };
    assert!(matches!(ret, Err(Error::Access { addr: 0, .. })));
}

#[cfg(all(target_os = "linux", not(feature = "remote-only")))]
#[test]
fn snapshot_sees_this_program() {
    let ip = snapshot_sees_this_program as usize as u64;
    let modules: Vec<_> = LoadedModules::snapshot().collect();

    assert!(!modules.is_empty());
    assert!(modules.iter().any(|module| module
        .headers
        .iter()
        .any(|phdr| phdr.p_type == PT_LOAD && phdr.contains(module.load_base, ip))));
}
