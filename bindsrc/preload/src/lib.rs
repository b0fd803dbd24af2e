//! The loadable `bindsrc` shared object.
//!
//! ```text
//! LD_PRELOAD=target/release/libbindsrc_preload.so BIND_SRC=10.0.0.5 curl http://example.com
//! ```

bindsrc_injection::bindsrc_inject!();
