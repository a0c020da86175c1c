//! Telemetry initialization.
//!
//! Controlled by `LOAM_LOG`:
//! - unset → no-op (tracing disabled, zero overhead)
//! - `"stderr"` → JSON events to stderr at `info`
//! - any other value → treated as an `EnvFilter` directive, JSON to stderr
//!   (e.g. `LOAM_LOG=loam=debug`)

use tracing_subscriber::EnvFilter;

/// Opaque guard — hold in `main()` until exit.
pub struct TelemetryGuard {
    _private: (),
}

/// Initialize telemetry based on `LOAM_LOG`.
///
/// Safe to call once per process; later calls are no-ops (the global
/// subscriber can only be installed once).
#[must_use]
pub fn init() -> TelemetryGuard {
    let directive = std::env::var("LOAM_LOG").ok();
    match directive.as_deref() {
        None | Some("") => {}
        Some("stderr") => install("info"),
        Some(filter) => install(filter),
    }
    TelemetryGuard { _private: () }
}

fn install(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    // A second init in the same process keeps the first subscriber.
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_without_env_is_a_noop() {
        // Must not panic or install anything that breaks later inits.
        let _guard = init();
        let _guard = init();
    }
}
