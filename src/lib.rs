// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod aggregate;
pub mod api;
pub mod classify;
pub mod config;
pub mod error;
pub mod funnel;
pub mod insight;
pub mod metrics;
pub mod prefilter;
pub mod rank;
pub mod record;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::aggregate::{aggregate, AggregateView, Table};
pub use crate::api::router;
pub use crate::config::Settings;
pub use crate::error::{FunnelError, ModelCallError, StoreError};
pub use crate::funnel::{Funnel, RunContext, RunReport, RunStatus};
pub use crate::insight::{Category, ClassifiedInsight, ContentType, ScreeningResult};
pub use crate::rank::{rank, PriorityScore, ValidationSignal};
pub use crate::record::{RawRecord, RecordSource};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DEFAULT_LOG_FILTER: &str = "funnel=info,store=info,warn";

/// Install the global subscriber. `RUST_LOG` wins over the default filter;
/// `LOG_FORMAT=json` switches to JSON lines. Safe to call more than once.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
