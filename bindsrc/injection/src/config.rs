//! Where the source address comes from.
//!
//! There are two layers. The build-time default (`BINDSRC_DEFAULT_ADDR` when the crate is compiled,
//! otherwise `192.168.0.1`) is used unless the process environment carries a parseable IPv4
//! address under [`BIND_SRC_VAR`]. The environment is consulted on every call, so a process that
//! changes `BIND_SRC` while running will see the new address on its next `bind()` or `connect()`.

use std::ffi::OsStr;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// The environment variable which overrides the build-time default source address.
pub const BIND_SRC_VAR: &str = "BIND_SRC";

/// The environment variable holding the `env_logger` filter for the injection.
pub const LOG_FILTER_VAR: &str = "BINDSRC_LOG";

const FALLBACK_DEFAULT_ADDR: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 1);

/// The library containing the real `bind()` and `connect()`.
///
/// On Linux this is libc. Other systems (e.g. Solaris) keep these in a separate socket library, so
/// this can be changed at build time with `BINDSRC_LIBC_NAME`.
pub const LIBC_NAME: &str = match option_env!("BINDSRC_LIBC_NAME") {
    Some(name) => name,
    None => DEFAULT_LIBC_NAME,
};

#[cfg(target_os = "macos")]
const DEFAULT_LIBC_NAME: &str = "/usr/lib/libSystem.B.dylib";
#[cfg(not(target_os = "macos"))]
const DEFAULT_LIBC_NAME: &str = "libc.so.6";

/// The source address baked into this build.
pub fn build_default_addr() -> Ipv4Addr {
    option_env!("BINDSRC_DEFAULT_ADDR")
        .and_then(|raw| Ipv4Addr::from_str(raw).ok())
        .unwrap_or(FALLBACK_DEFAULT_ADDR)
}

/// Configuration for the source-address override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceConfig {
    /// Used whenever the override variable is unset or doesn't parse.
    pub default_addr: Ipv4Addr,
    /// Name of the environment variable holding the runtime override.
    pub override_var: &'static str,
}

impl SourceConfig {
    /// The configuration used by the injected `bind()` and `connect()`.
    pub fn from_build() -> Self {
        SourceConfig {
            default_addr: build_default_addr(),
            override_var: BIND_SRC_VAR,
        }
    }

    /// Read the override variable and pick the host we should bind to.
    ///
    /// A malformed override is ignored (with a debug log) rather than reported to the caller.
    pub fn source_addr(&self) -> Ipv4Addr {
        choose_source_addr(
            self.default_addr,
            std::env::var_os(self.override_var).as_deref(),
        )
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::from_build()
    }
}

fn parse_override(raw: &OsStr) -> Option<Ipv4Addr> {
    raw.to_str().and_then(|s| Ipv4Addr::from_str(s).ok())
}

/// The override if it's a valid dotted-decimal IPv4 address, otherwise `default`.
pub fn choose_source_addr(default: Ipv4Addr, raw_override: Option<&OsStr>) -> Ipv4Addr {
    match raw_override.map(|raw| (raw, parse_override(raw))) {
        Some((_, Some(addr))) => addr,
        Some((raw, None)) => {
            log::debug!("ignoring unparseable source override {:?}; using {}", raw, default);
            default
        }
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 1);

    #[test]
    fn test_unset_override_uses_default() {
        assert_eq!(choose_source_addr(DEFAULT, None), DEFAULT);
    }

    #[test]
    fn test_valid_override_wins() {
        assert_eq!(
            choose_source_addr(DEFAULT, Some(OsStr::new("10.0.0.5"))),
            Ipv4Addr::new(10, 0, 0, 5)
        );
    }

    #[test]
    fn test_malformed_override_falls_back() {
        for raw in ["not-an-ip", "", "10.0.0", "10.0.0.256", "::1", " 10.0.0.5"] {
            assert_eq!(choose_source_addr(DEFAULT, Some(OsStr::new(raw))), DEFAULT);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_override_falls_back() {
        use std::ffi::OsString;
        use std::os::unix::ffi::OsStringExt;
        let raw = OsString::from_vec(vec![0xff, b'1', b'0']);
        assert_eq!(choose_source_addr(DEFAULT, Some(raw.as_os_str())), DEFAULT);
    }

    #[test]
    fn test_source_addr_rereads_environment() {
        // Each test that touches the environment uses its own variable.
        const VAR: &str = "BINDSRC_TEST_SOURCE_ADDR_REREAD";
        let config = SourceConfig {
            default_addr: DEFAULT,
            override_var: VAR,
        };
        std::env::remove_var(VAR);
        assert_eq!(config.source_addr(), DEFAULT);
        std::env::set_var(VAR, "10.1.2.3");
        assert_eq!(config.source_addr(), Ipv4Addr::new(10, 1, 2, 3));
        std::env::set_var(VAR, "garbage");
        assert_eq!(config.source_addr(), DEFAULT);
        std::env::remove_var(VAR);
    }

    #[test]
    fn test_build_defaults() {
        let config = SourceConfig::from_build();
        assert_eq!(config.override_var, BIND_SRC_VAR);
        if option_env!("BINDSRC_DEFAULT_ADDR").is_none() {
            assert_eq!(config.default_addr, FALLBACK_DEFAULT_ADDR);
        }
        assert!(!LIBC_NAME.is_empty());
    }
}
