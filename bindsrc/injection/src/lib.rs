//! Shared library injection which forces every outgoing IPv4 connection of a pre-existing
//! application to originate from a chosen source address.
//!
//! The injection exports its own `bind()` and `connect()`. An `AF_INET` `bind()` has its host
//! replaced by the source address (the port is kept), and every `connect()` first binds the socket
//! to the source address, so programs which never call `bind()` are covered as well. Other
//! address families pass straight through.
//!
//! The source address is the `BIND_SRC` environment variable when it holds a valid IPv4 address,
//! and otherwise the default chosen at build time. See [`config`].
//!
//! ```text
//! LD_PRELOAD=/path/to/libbindsrc_preload.so BIND_SRC=192.168.0.1 telnet example.com
//! ```

pub mod address;
pub mod config;
mod globals;
pub mod resolver;

pub use address::BindRequest;
pub use config::SourceConfig;
pub use resolver::{Capability, DlResolver, ResolveError, Resolver};

// These members should only be accessed by macros.
#[doc(hidden)]
pub use globals::initialize_bindsrc_injection;
#[doc(hidden)]
pub mod libc_overrides;
