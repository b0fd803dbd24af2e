//! Finding the real `bind()` and `connect()`.
//!
//! Because the shared object exports its own `bind` and `connect`, calling `libc::bind` from inside
//! the injection would just call ourselves. Instead, every interception opens the system library
//! by name, looks the symbol up in it, uses it, and closes the library again. Nothing is cached
//! between calls.

use std::ffi::{c_void, CStr, CString};
use std::ptr::NonNull;
use thiserror::Error;

/// The shared signature of `bind()` and `connect()`.
pub type SocketFn = unsafe extern "C" fn(
    socket: libc::c_int,
    address: *const libc::sockaddr,
    address_len: libc::socklen_t,
) -> libc::c_int;

/// One of the libc functions we interpose on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Bind,
    Connect,
}

impl Capability {
    pub fn symbol(self) -> &'static CStr {
        match self {
            Capability::Bind => c"bind",
            Capability::Connect => c"connect",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unable to open {library}: {reason}")]
    LibraryNotFound { library: String, reason: String },
    #[error("unable to locate {symbol} in {library}: {reason}")]
    SymbolNotFound {
        library: String,
        symbol: String,
        reason: String,
    },
}

/// A source of the real socket functions.
///
/// Implementations acquire whatever they need, run `f`, and release it again before returning,
/// regardless of whether resolution succeeded.
pub trait Resolver {
    fn with_capability<R>(
        &self,
        capability: Capability,
        f: impl FnOnce(SocketFn) -> R,
    ) -> Result<R, ResolveError>;
}

/// Resolves symbols by `dlopen()`ing a named library.
#[derive(Debug, Clone, Copy)]
pub struct DlResolver {
    library: &'static str,
}

impl DlResolver {
    pub const fn new(library: &'static str) -> Self {
        DlResolver { library }
    }

    /// The resolver for [`crate::config::LIBC_NAME`].
    pub const fn system() -> Self {
        Self::new(crate::config::LIBC_NAME)
    }

    /// Look `symbol` up in our library and run `f` with it.
    ///
    /// The library handle is closed before this returns. `errno`, as left by `f`, is preserved
    /// across that close.
    pub fn with_symbol<R>(
        &self,
        symbol: &CStr,
        f: impl FnOnce(SocketFn) -> R,
    ) -> Result<R, ResolveError> {
        let library = LibraryHandle::open(self.library)?;
        let raw = library.symbol(symbol)?;
        let real = unsafe {
            // SAFETY: the symbols we look up are bind() and connect(), which share this signature.
            std::mem::transmute::<NonNull<c_void>, SocketFn>(raw)
        };
        let result = f(real);
        let saved = errno::errno();
        drop(library);
        errno::set_errno(saved);
        Ok(result)
    }
}

impl Resolver for DlResolver {
    fn with_capability<R>(
        &self,
        capability: Capability,
        f: impl FnOnce(SocketFn) -> R,
    ) -> Result<R, ResolveError> {
        self.with_symbol(capability.symbol(), f)
    }
}

/// An open `dlopen()` handle, closed on drop.
struct LibraryHandle {
    name: &'static str,
    handle: NonNull<c_void>,
}

impl LibraryHandle {
    fn open(name: &'static str) -> Result<Self, ResolveError> {
        let c_name = CString::new(name).map_err(|_| ResolveError::LibraryNotFound {
            library: name.to_string(),
            reason: "library name contains a NUL byte".to_string(),
        })?;
        let handle = unsafe { libc::dlopen(c_name.as_ptr(), libc::RTLD_LAZY) };
        NonNull::new(handle)
            .map(|handle| LibraryHandle { name, handle })
            .ok_or_else(|| ResolveError::LibraryNotFound {
                library: name.to_string(),
                reason: last_dl_error(),
            })
    }

    fn symbol(&self, symbol: &CStr) -> Result<NonNull<c_void>, ResolveError> {
        // Clear any stale error so that the one we report belongs to this lookup.
        unsafe { libc::dlerror() };
        let raw = unsafe { libc::dlsym(self.handle.as_ptr(), symbol.as_ptr()) };
        NonNull::new(raw).ok_or_else(|| ResolveError::SymbolNotFound {
            library: self.name.to_string(),
            symbol: symbol.to_string_lossy().into_owned(),
            reason: last_dl_error(),
        })
    }
}

impl Drop for LibraryHandle {
    fn drop(&mut self) {
        unsafe {
            libc::dlclose(self.handle.as_ptr());
        }
    }
}

fn last_dl_error() -> String {
    let err = unsafe { libc::dlerror() };
    if err.is_null() {
        "unknown error".to_string()
    } else {
        unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned()
    }
}

/// Report a resolution failure and terminate the process.
#[cold]
pub fn fatal_resolve_error(err: &ResolveError) -> ! {
    log::error!("{}", err);
    eprintln!("bindsrc: {}", err);
    std::process::exit(-1);
}
