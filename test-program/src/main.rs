//! Looks up the unwind info of a few addresses in this process.
//!
//! Pass hex addresses on the command line, or nothing to look up some of our
//! own functions. Set `RUST_LOG` to change how chatty it is.

use std::ffi::CStr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uwutables::{Error, LocalAddressSpace, ProcInfo, Resolver, UnwindInfo};

fn main() {
    let registry = tracing_subscriber::Registry::default().with(
        EnvFilter::builder()
            .with_default_directive(tracing::Level::DEBUG.into())
            .from_env()
            .unwrap(),
    );

    let tree_layer = tracing_tree::HierarchicalLayer::new(2)
        .with_targets(true)
        .with_bracketed_fields(true);

    registry.with(tree_layer).init();

    let mut ips: Vec<u64> = std::env::args()
        .skip(1)
        .map(|arg| {
            let arg = arg.trim_start_matches("0x");
            u64::from_str_radix(arg, 16).unwrap_or_else(|err| panic!("bad address {arg}: {err}"))
        })
        .collect();
    if ips.is_empty() {
        ips = vec![main as usize as u64, describe as usize as u64, identify as usize as u64];
    }

    let resolver = Resolver::new();
    // SAFETY: every address we read comes from our own loaded modules.
    let space = unsafe { LocalAddressSpace::local() };

    for ip in ips {
        let symbol = identify(ip).map_or_else(|| "<unknown>".into(), |sym| sym.to_string_lossy());
        match resolver.find_proc_info(space, ip, true) {
            Ok(info) => println!("{ip:#018x} {symbol}: {}", describe(&info)),
            Err(Error::NoInfo(_)) => println!("{ip:#018x} {symbol}: no unwind info"),
            Err(err) => println!("{ip:#018x} {symbol}: lookup failed: {err}"),
        }
    }
}

fn describe(info: &ProcInfo) -> String {
    if info.start_ip == 0 && info.end_ip == 0 {
        return format!("default conventions, gp={:#x}", info.gp);
    }
    let words = match &info.unwind_info {
        Some(UnwindInfo::Borrowed(view)) => view.len_words(),
        Some(UnwindInfo::Owned(words)) => words.len(),
        None => 0,
    };
    format!(
        "[{:#x}-{:#x}) gp={:#x} handler={:?} lsda={:#x} descriptors={words} words",
        info.start_ip, info.end_ip, info.gp, info.handler, info.lsda
    )
}

fn identify(addr: u64) -> Option<&'static CStr> {
    unsafe {
        let mut info: libc::Dl_info = std::mem::zeroed();

        if libc::dladdr(addr as usize as *const libc::c_void, &mut info) == 0 {
            return None;
        }
        if info.dli_sname.is_null() {
            return None;
        }
        Some(CStr::from_ptr(info.dli_sname))
    }
}
