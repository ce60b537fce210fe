//! Optional tracing-subscriber wiring (§10 ambient stack).
//!
//! The crate itself only ever calls `tracing::{debug,warn,error}` — it never
//! installs a global subscriber, since that decision belongs to the host
//! binary. `init_tracing()` is a convenience for binaries and tests that
//! don't already have their own, mirroring the fallback-`EnvFilter` pattern
//! the example binaries in this workspace use.

use tracing_subscriber::EnvFilter;

/// Install a global `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `turn_runtime=info` when unset. Safe to call more than once — a second
/// call is a no-op rather than a panic.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("turn_runtime=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_does_not_panic_when_called_twice() {
        init_tracing();
        init_tracing();
    }
}
