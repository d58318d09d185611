use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber, filtered by `RUST_LOG` plus `default_directive`
/// (e.g. `"takeflow_engine=debug"`).
///
/// Later calls are no-ops once a global subscriber is set, so tests can call it freely.
pub fn init_tracing(default_directive: &str) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(default_directive.parse()?);

    // Err only means a subscriber is already installed.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    Ok(())
}
