//! finds the IA-64 unwind table entry for an instruction pointer.
//!
//! the actual unwinder (stepping frames, replaying the unwind descriptors)
//! lives elsewhere. this crate answers "what unwind info applies at this
//! address, and where is it", for our own process, another process, or any
//! other memory someone can read words from.
//!
//! ```no_run
//! use uwutables::{LocalAddressSpace, Resolver};
//!
//! let resolver = Resolver::new();
//! let space = unsafe { LocalAddressSpace::local() };
//! let ip = 0x4000_0000_0000_1234;
//! match resolver.find_proc_info(space, ip, true) {
//!     Ok(info) => println!("{:#x}..{:#x}", info.start_ip, info.end_ip),
//!     Err(err) => println!("{err}"),
//! }
//! ```

#[macro_use]
extern crate tracing;

pub mod accessor;
pub mod dyn_list;
mod error;
pub mod kernel;
pub mod locate;
pub mod proc_info;
mod resolver;
pub mod table;

#[cfg(test)]
mod test_util;

#[cfg(not(feature = "remote-only"))]
pub use accessor::LocalAddressSpace;
pub use accessor::{Accessor, Endianness, MemoryImage, RemoteAddressSpace, RemoteMemory};
pub use dyn_list::find_dyn_list;
pub use error::{AccessError, Error, Result};
pub use proc_info::{search_unwind_table, ProcInfo, UnwindInfo};
pub use resolver::Resolver;
pub use table::{InfoFormat, ModuleDescriptor, TableEntry, UnwindTable};
