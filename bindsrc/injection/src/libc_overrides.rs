use crate::address::{classify, inet_sockaddr, BindRequest, CallerAddress, SOCKADDR_IN_LEN};
use crate::config::SourceConfig;
use crate::resolver::{fatal_resolve_error, Capability, DlResolver, ResolveError, Resolver};
use std::net::SocketAddrV4;

pub use libc;

/// The `bind()` override policy.
///
/// Non-`AF_INET` addresses are handed to the real `bind()` untouched. Everything else (an
/// `AF_INET` address, or the implicit bind we do before `connect()`) is replaced by the configured
/// source address, keeping the caller's port when there is one.
///
/// # Safety
/// If `request` is [`BindRequest::Explicit`], its address must be valid for reads of its length.
pub unsafe fn intercept_bind<R: Resolver>(
    resolver: &R,
    config: &SourceConfig,
    socket: libc::c_int,
    request: BindRequest,
) -> Result<libc::c_int, ResolveError> {
    let port = match request {
        BindRequest::ImplicitFromConnect => 0,
        BindRequest::Explicit { address, len } => match classify(address, len) {
            CallerAddress::Inet { port } => port,
            CallerAddress::Other { family } => {
                log::debug!(
                    "passing bind() through unmodified (fd={}, family={:?})",
                    socket,
                    family
                );
                return resolver.with_capability(Capability::Bind, |bind| {
                    bind(socket, address, len)
                });
            }
        },
    };
    let target = SocketAddrV4::new(config.source_addr(), port);
    let replacement = inet_sockaddr(target);
    let result = resolver.with_capability(Capability::Bind, |bind| {
        bind(
            socket,
            (&replacement) as *const libc::sockaddr_in as *const libc::sockaddr,
            SOCKADDR_IN_LEN,
        )
    })?;
    log::debug!(
        "bind() override (fd={}, request={:?}) to {} returned {}",
        socket,
        request,
        target,
        result
    );
    Ok(result)
}

/// The `connect()` override.
///
/// Before connecting, we bind the socket to the source address. That bind is best effort: the
/// socket may already be bound, which is common, and then the bind legitimately fails. Its result
/// (and any `errno` it set) is discarded. The real `connect()` always gets the caller's
/// destination unmodified.
///
/// # Safety
/// `address` must be valid for reads of `len` bytes, or be whatever the caller wants the real
/// `connect()` to reject.
pub unsafe fn intercept_connect<R: Resolver>(
    resolver: &R,
    config: &SourceConfig,
    socket: libc::c_int,
    address: *const libc::sockaddr,
    len: libc::socklen_t,
) -> Result<libc::c_int, ResolveError> {
    let old_errno = errno::errno();
    let bound = intercept_bind(resolver, config, socket, BindRequest::ImplicitFromConnect)?;
    if bound != 0 {
        log::debug!(
            "bind before connect failed (fd={}, errno={})",
            socket,
            errno::errno()
        );
    }
    errno::set_errno(old_errno);
    let result = resolver.with_capability(Capability::Connect, |connect| {
        connect(socket, address, len)
    })?;
    log::debug!("connect() (fd={}) returned {}", socket, result);
    Ok(result)
}

/// Interceptor code for the `bind` function call.
///
/// # Safety
/// Same contract as `bind(2)`.
pub unsafe fn bindsrc_bind(
    socket: libc::c_int,
    address: *const libc::sockaddr,
    address_len: libc::socklen_t,
) -> libc::c_int {
    bind_or_die(
        &DlResolver::system(),
        &SourceConfig::from_build(),
        socket,
        address,
        address_len,
    )
}

/// Interceptor code for the `connect` function call.
///
/// # Safety
/// Same contract as `connect(2)`.
pub unsafe fn bindsrc_connect(
    socket: libc::c_int,
    address: *const libc::sockaddr,
    len: libc::socklen_t,
) -> libc::c_int {
    connect_or_die(
        &DlResolver::system(),
        &SourceConfig::from_build(),
        socket,
        address,
        len,
    )
}

/// [`intercept_bind`], terminating the process if the real `bind()` can't be found.
///
/// # Safety
/// Same contract as `bind(2)`.
pub unsafe fn bind_or_die<R: Resolver>(
    resolver: &R,
    config: &SourceConfig,
    socket: libc::c_int,
    address: *const libc::sockaddr,
    address_len: libc::socklen_t,
) -> libc::c_int {
    let request = BindRequest::from_raw(address, address_len);
    intercept_bind(resolver, config, socket, request).unwrap_or_else(|e| fatal_resolve_error(&e))
}

/// [`intercept_connect`], terminating the process if the real functions can't be found.
///
/// # Safety
/// Same contract as `connect(2)`.
pub unsafe fn connect_or_die<R: Resolver>(
    resolver: &R,
    config: &SourceConfig,
    socket: libc::c_int,
    address: *const libc::sockaddr,
    len: libc::socklen_t,
) -> libc::c_int {
    intercept_connect(resolver, config, socket, address, len)
        .unwrap_or_else(|e| fatal_resolve_error(&e))
}

/// Macro which exports the overriding `bind` and `connect` symbols from a shared library, and
/// registers [`crate::initialize_bindsrc_injection`] to run when the library is loaded.
///
/// # Example
/// ```ignore
/// bindsrc_injection::bindsrc_inject!();
/// ```
#[macro_export]
macro_rules! bindsrc_inject {
    () => { mod the_bindsrc_inject_module {
        use $crate::libc_overrides::libc;

        #[cfg(not(test))]
        #[used]
        #[cfg_attr(target_os = "macos", link_section = "__DATA,__mod_init_func")]
        #[cfg_attr(target_os = "linux", link_section = ".init_array")]
        pub static _BINDSRC_INIT: extern "C" fn() = {
            extern "C" fn do_the_init() {
                $crate::initialize_bindsrc_injection();
            }
            do_the_init
        };

        type SocketFn = unsafe extern "C" fn(
            libc::c_int,
            *const libc::sockaddr,
            libc::socklen_t,
        ) -> libc::c_int;
        static _TYPE_CHECK_BIND: SocketFn = libc::bind;
        static _TYPE_CHECK_CONNECT: SocketFn = libc::connect;

        #[cfg(not(test))]
        #[no_mangle]
        pub unsafe extern "C" fn bind(
            socket: libc::c_int,
            address: *const libc::sockaddr,
            address_len: libc::socklen_t,
        ) -> libc::c_int {
            $crate::libc_overrides::bindsrc_bind(socket, address, address_len)
        }

        #[cfg(not(test))]
        #[no_mangle]
        pub unsafe extern "C" fn connect(
            socket: libc::c_int,
            address: *const libc::sockaddr,
            len: libc::socklen_t,
        ) -> libc::c_int {
            $crate::libc_overrides::bindsrc_connect(socket, address, len)
        }
    } };
}
