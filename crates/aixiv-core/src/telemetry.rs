//! Tracing set-up for the `aixiv` binary and anything embedding the core.
//!
//! Filtering comes from `AIXIV_LOG`, then `RUST_LOG`. With neither set, the
//! aixiv crates log at the requested level and dependencies (SurrealDB,
//! reqwest, hyper) only at `warn`. JSON output carries the fields of the
//! enclosing run span (`run_id`, `paper_id`, `kind`) on every line.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events follow the requested level.
const AIXIV_TARGETS: [&str; 3] = ["aixiv", "aixiv_core", "aixiv_state"];

fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    std::iter::once("warn".to_string())
        .chain(AIXIV_TARGETS.iter().map(|t| format!("{t}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

fn filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env("AIXIV_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// Install the global subscriber. Only the first call in a process has an
/// effect.
pub fn init_tracing(json: bool, level: Level) {
    let registry = tracing_subscriber::registry().with(filter(level));
    let installed = if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if installed.is_ok() {
        tracing::debug!(json, level = %level, "tracing initialised");
    }
}
