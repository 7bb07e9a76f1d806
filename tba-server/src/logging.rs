//! Tracing setup shared by the server and admin binaries
//!
//! The subscriber is installed before configuration is read so that config
//! warnings are visible; the configured level is applied afterwards unless
//! `RUST_LOG` was set.

use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

const DEFAULT_LEVEL: &str = "info";

pub struct LogControl {
    handle: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

/// Install the global subscriber; call once per process
pub fn init_tracing() -> LogControl {
    let (filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::new(DEFAULT_LEVEL), false),
    };

    let (filter_layer, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer())
        .init();

    LogControl { handle, from_env }
}

impl LogControl {
    /// Switch to the configured filter (e.g. `"debug"` or `"tba_common=debug,info"`)
    pub fn apply_level(&self, level: &str) {
        if self.from_env {
            return;
        }

        match EnvFilter::try_new(level) {
            Ok(filter) => {
                if let Err(e) = self.handle.reload(filter) {
                    warn!(error = %e, "Failed to apply configured log level");
                }
            }
            Err(e) => warn!(level, error = %e, "Ignoring invalid log level"),
        }
    }
}
