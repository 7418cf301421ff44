//! `tracing` init for the `agentd` binary. One format normally, the
//! trace/span-id-prefixed format from [`crate::log_format`] under
//! `--log-spans` for correlating concurrent worker output.

use tracing_subscriber::EnvFilter;

use crate::log_format::TextWithSpanIds;

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init(log_spans: bool) {
    if log_spans {
        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .event_format(TextWithSpanIds::new())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter()).init();
    }
}
