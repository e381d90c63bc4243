//! Tracing setup for worker binaries.
//!
//! Logs always go to stderr; stdout belongs to the cache channel.

use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Target of this crate's own events.
const CORE_TARGET: &str = "datacompiler";

/// Install the global subscriber.
///
/// `RUST_LOG` takes full `EnvFilter` directives. Without it `DATACOMPILER_LOG`
/// picks a level (default `info`) for this crate and for `worker_target`,
/// normally the worker's package name (`env!("CARGO_PKG_NAME")`).
/// `LOG_FORMAT=json` switches to JSON lines. Calling this more than once is
/// harmless.
pub fn init_tracing(worker_target: &str) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = std::env::var("DATACOMPILER_LOG").ok();
        EnvFilter::new(default_directives(worker_target, level.as_deref()))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

/// Report panics as `error` events instead of the default stderr message.
///
/// Compiler panics are also recorded on the failed build; this keeps the
/// console report under the tracing filter. Until a global subscriber is
/// installed the previous hook still runs. Installed at most once.
pub fn init_panic_hook() {
    static INSTALLED: Once = Once::new();
    INSTALLED.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if tracing::dispatcher::has_been_set() {
                tracing::error!(panic = %info, "Panic");
            } else {
                previous(info);
            }
        }));
    });
}

fn default_directives(worker_target: &str, level: Option<&str>) -> String {
    let level = match level {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    };

    // Package names use '-', event targets use '_'.
    let worker_target = worker_target.replace('-', "_");
    let mut directives = format!("{CORE_TARGET}={level}");
    if !worker_target.is_empty() && worker_target != CORE_TARGET {
        directives.push_str(&format!(",{worker_target}={level}"));
    }
    directives
}
