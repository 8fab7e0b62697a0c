//! The entry point: from an instruction pointer to a [`ProcInfo`].


use core::fmt;

use once_cell::sync::OnceCell;

use crate::accessor::Accessor;
use crate::error::{Error, Result};
use crate::kernel::{KernelTable, KernelUnwindSource};
use crate::locate::{self, LoadedModule};
use crate::proc_info::{search_unwind_table, ProcInfo};

/// Process-wide lookup state.
///
/// Holds the kernel unwind table once it has been fetched. Share one
/// `Resolver` between threads instead of creating one per lookup.
pub struct Resolver {
    kernel_source: Box<dyn KernelUnwindSource + Send + Sync>,
    current_gp: Box<dyn Fn() -> u64 + Send + Sync>,
    kernel_table: OnceCell<KernelTable>,
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("kernel_table", &self.kernel_table.get().map(KernelTable::descriptor))
            .finish_non_exhaustive()
    }
}

#[cfg(all(target_os = "linux", not(feature = "remote-only")))]
impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    /// A resolver that gets the kernel table with `getunwind(2)`.
    #[cfg(all(target_os = "linux", not(feature = "remote-only")))]
    pub fn new() -> Self {
        Self::with_kernel_source(crate::kernel::Getunwind)
    }

    /// The gp of statically linked programs defaults to 0, see
    /// [`Resolver::with_current_gp`].
    pub fn with_kernel_source(source: impl KernelUnwindSource + Send + Sync + 'static) -> Self {
        Self {
            kernel_source: Box::new(source),
            current_gp: Box::new(|| 0),
            kernel_table: OnceCell::new(),
        }
    }

    /// Sets where the gp of a statically linked program comes from. On IA-64
    /// this is the value of the `gp` register.
    pub fn with_current_gp(mut self, current_gp: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.current_gp = Box::new(current_gp);
        self
    }

    /// The kernel unwind table, fetched on first use. A failed fetch is not
    /// remembered, the next call tries again.
    pub fn kernel_table(&self) -> Result<&KernelTable> {
        self.kernel_table
            .get_or_try_init(|| KernelTable::fetch(&*self.kernel_source))
    }

    /// Finds the unwind info for `ip` in the modules loaded into this process,
    /// or in the kernel.
    #[cfg(all(target_os = "linux", not(feature = "remote-only")))]
    pub fn find_proc_info<A: Accessor + ?Sized>(
        &self,
        space: &A,
        ip: u64,
        need_unwind_info: bool,
    ) -> Result<ProcInfo> {
        // SAFETY: the dynamic linker only reports mapped objects. Unloading
        // one while we look at it is the caller's problem, as everywhere.
        unsafe { self.find_proc_info_in(locate::LoadedModules::snapshot(), space, ip, need_unwind_info) }
    }

    /// Like [`Resolver::find_proc_info`], with the list of loaded modules
    /// supplied by the caller. The modules are always those of this process,
    /// `space` is only used to decode the procedure info.
    ///
    /// # Safety
    /// See [`locate::find_module`].
    #[instrument(skip(self, modules, space), level = "debug")]
    pub unsafe fn find_proc_info_in<I, A>(
        &self,
        modules: I,
        space: &A,
        ip: u64,
        need_unwind_info: bool,
    ) -> Result<ProcInfo>
    where
        I: IntoIterator<Item = LoadedModule>,
        A: Accessor + ?Sized,
    {
        // SAFETY: forwarded to our caller.
        if let Some(module) = unsafe { locate::find_module(modules, ip, &*self.current_gp)? } {
            return search_unwind_table(space, ip, &module, need_unwind_info);
        }

        let kernel = self.kernel_table()?.descriptor();
        if !kernel.contains(ip) {
            trace!("{ip:#x} is not in any module or the kernel");
            return Err(Error::NoInfo(ip));
        }
        search_unwind_table(space, ip, kernel, need_unwind_info)
    }
}
