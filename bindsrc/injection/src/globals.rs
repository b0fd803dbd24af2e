//! Process-wide setup performed when the injection is loaded.
//!
//! The override policy itself keeps no global state. The only things configured here are the
//! panic hook and the logger, both of which are process-wide by nature.

use crate::config::{build_default_addr, BIND_SRC_VAR, LIBC_NAME, LOG_FILTER_VAR};
use std::sync::atomic::{AtomicBool, Ordering};

static BINDSRC_IS_INITIALIZED: AtomicBool = AtomicBool::new(false);

#[cold]
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        std::process::abort();
    }));
}

/// Install the `env_logger` backend, filtered by [`LOG_FILTER_VAR`] and off by default.
///
/// If the host process has already installed a logger, we leave it alone and log through it.
#[cold]
fn setup_logger() {
    let env = env_logger::Env::new().filter_or(LOG_FILTER_VAR, "off");
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_micros()
        .try_init();
}

/// Runs from the shared library's constructor. Calling it again is a no-op.
#[cold]
pub fn initialize_bindsrc_injection() {
    if BINDSRC_IS_INITIALIZED.swap(true, Ordering::AcqRel) {
        return;
    }
    setup_panic_handler(); // Do this FIRST!
    setup_logger();
    log::debug!(
        "bindsrc loaded: default source {}, override variable {}, real functions from {}",
        build_default_addr(),
        BIND_SRC_VAR,
        LIBC_NAME
    );
}
