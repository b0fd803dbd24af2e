//! Reading caller-supplied `sockaddr`s and building the replacement `sockaddr_in`.

use std::mem::{offset_of, size_of};
use std::net::{Ipv4Addr, SocketAddrV4};

/// What `bind()` has been asked to do.
///
/// An `Explicit` request is a genuine call from the host process. `ImplicitFromConnect` is the
/// bind we perform ourselves before a `connect()`, for programs which never bind explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindRequest {
    Explicit {
        address: *const libc::sockaddr,
        len: libc::socklen_t,
    },
    ImplicitFromConnect,
}

impl BindRequest {
    /// Wrap the arguments of a `bind()` call.
    ///
    /// A null `address` is treated like the implicit pre-connect bind.
    pub fn from_raw(address: *const libc::sockaddr, len: libc::socklen_t) -> Self {
        if address.is_null() {
            BindRequest::ImplicitFromConnect
        } else {
            BindRequest::Explicit { address, len }
        }
    }
}

/// The part of a caller's address that the override policy cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerAddress {
    /// An `AF_INET` address. Only the port survives the override.
    Inet { port: u16 },
    /// Anything else. It's handed to the real `bind()` untouched.
    Other { family: Option<libc::sa_family_t> },
}

/// Inspect the `len` bytes at `address`.
///
/// # Safety
/// `address` must be non-null and valid for reads of `len` bytes.
pub unsafe fn classify(address: *const libc::sockaddr, len: libc::socklen_t) -> CallerAddress {
    let len = len as usize;
    let family_end = offset_of!(libc::sockaddr, sa_family) + size_of::<libc::sa_family_t>();
    if len < family_end {
        return CallerAddress::Other { family: None };
    }
    let family = std::ptr::addr_of!((*address).sa_family).read_unaligned();
    if i32::from(family) != libc::AF_INET {
        return CallerAddress::Other {
            family: Some(family),
        };
    }
    let port_end = offset_of!(libc::sockaddr_in, sin_port) + size_of::<libc::in_port_t>();
    let port = if len >= port_end {
        let address = address as *const libc::sockaddr_in;
        u16::from_be(std::ptr::addr_of!((*address).sin_port).read_unaligned())
    } else {
        0
    };
    CallerAddress::Inet { port }
}

/// Build the `sockaddr_in` that we actually bind to.
pub fn inet_sockaddr(addr: SocketAddrV4) -> libc::sockaddr_in {
    let mut out: libc::sockaddr_in = unsafe {
        // SAFETY: sockaddr_in is plain old data; all zeroes is a valid value.
        std::mem::zeroed()
    };
    #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd"
    ))]
    {
        out.sin_len = size_of::<libc::sockaddr_in>() as u8;
    }
    out.sin_family = libc::AF_INET as libc::sa_family_t;
    out.sin_port = addr.port().to_be();
    // Since we need the u32 to be in big-endian byte order.
    out.sin_addr = libc::in_addr {
        s_addr: u32::from_ne_bytes(addr.ip().octets()),
    };
    out
}

/// The inverse of [`inet_sockaddr`].
pub fn socket_addr_v4(addr: &libc::sockaddr_in) -> SocketAddrV4 {
    SocketAddrV4::new(
        Ipv4Addr::from(addr.sin_addr.s_addr.to_ne_bytes()),
        u16::from_be(addr.sin_port),
    )
}

/// `sizeof(struct sockaddr_in)` as a `socklen_t`.
pub const SOCKADDR_IN_LEN: libc::socklen_t = size_of::<libc::sockaddr_in>() as libc::socklen_t;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn classify_in(addr: &libc::sockaddr_in, len: libc::socklen_t) -> CallerAddress {
        unsafe { classify(addr as *const _ as *const libc::sockaddr, len) }
    }

    #[test]
    fn test_null_is_implicit() {
        assert_eq!(
            BindRequest::from_raw(std::ptr::null(), 0),
            BindRequest::ImplicitFromConnect
        );
        let addr = inet_sockaddr(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1));
        let ptr = &addr as *const _ as *const libc::sockaddr;
        assert_eq!(
            BindRequest::from_raw(ptr, SOCKADDR_IN_LEN),
            BindRequest::Explicit {
                address: ptr,
                len: SOCKADDR_IN_LEN
            }
        );
    }

    #[test]
    fn test_inet_sockaddr_layout() {
        let addr = inet_sockaddr(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 5), 8080));
        assert_eq!(i32::from(addr.sin_family), libc::AF_INET);
        assert_eq!(addr.sin_port.to_ne_bytes(), 8080u16.to_be_bytes());
        assert_eq!(addr.sin_addr.s_addr.to_ne_bytes(), [10, 0, 0, 5]);
        assert_eq!(
            socket_addr_v4(&addr),
            SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 5), 8080)
        );
    }

    #[test]
    fn test_short_inet_address_has_no_port() {
        let addr = inet_sockaddr(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 80));
        let family_end = (offset_of!(libc::sockaddr, sa_family) + size_of::<libc::sa_family_t>())
            as libc::socklen_t;
        assert_eq!(classify_in(&addr, family_end), CallerAddress::Inet { port: 0 });
        assert_eq!(
            classify_in(&addr, family_end - 1),
            CallerAddress::Other { family: None }
        );
        assert_eq!(
            classify_in(&addr, SOCKADDR_IN_LEN),
            CallerAddress::Inet { port: 80 }
        );
    }

    #[test]
    fn test_unix_address_is_other() {
        let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
        addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
        let result = unsafe {
            classify(
                &addr as *const _ as *const libc::sockaddr,
                size_of::<libc::sockaddr_un>() as libc::socklen_t,
            )
        };
        assert_eq!(
            result,
            CallerAddress::Other {
                family: Some(libc::AF_UNIX as libc::sa_family_t)
            }
        );
    }

    proptest! {
        #[test]
        fn test_inet_port_is_preserved(ip in any::<u32>(), port in any::<u16>()) {
            let addr = inet_sockaddr(SocketAddrV4::new(Ipv4Addr::from(ip), port));
            prop_assert_eq!(classify_in(&addr, SOCKADDR_IN_LEN), CallerAddress::Inet { port });
        }

        #[test]
        fn test_foreign_families_are_other(family in any::<libc::sa_family_t>()) {
            prop_assume!(i32::from(family) != libc::AF_INET);
            let mut addr: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
            addr.ss_family = family;
            let result = unsafe {
                classify(
                    &addr as *const _ as *const libc::sockaddr,
                    size_of::<libc::sockaddr_storage>() as libc::socklen_t,
                )
            };
            prop_assert_eq!(result, CallerAddress::Other { family: Some(family) });
        }
    }
}
