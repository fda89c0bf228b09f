/*!
Logging and profiling setup for the command line tool.

There are two implementations behind the same API:

- real: compiled only with `feature = "profiling"`. Library scopes become tracing spans and,
  when `ENABLE_PROFILING` is set, a tracing-chrome layer records them to a `trace-*.json`
  file in the current directory, viewable in Perfetto.
- stub: logging only.

Both set a default `RUST_LOG` when none is given.
*/

/// Default filter used when `RUST_LOG` is unset
fn set_default_filter() {
    if std::env::var("RUST_LOG").is_err() {
        // Safety: single-threaded at startup
        unsafe {
            if cfg!(debug_assertions) {
                std::env::set_var("RUST_LOG", "info,track_heatmap=debug");
            } else {
                std::env::set_var("RUST_LOG", "info");
            }
        }
    }
}

#[cfg(feature = "profiling")]
mod inner {
    use tracing_chrome::{ChromeLayerBuilder, FlushGuard};
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    /// Keep alive until exit: dropping it flushes the trace file
    pub struct LoggingGuard {
        _chrome: Option<FlushGuard>,
    }

    pub fn setup_logging_and_profiling() -> LoggingGuard {
        super::set_default_filter();

        if std::env::var("ENABLE_PROFILING").is_ok() {
            let (chrome_layer, guard) = ChromeLayerBuilder::new().build();
            tracing_subscriber::registry()
                .with(chrome_layer)
                .with(fmt::layer().with_filter(EnvFilter::from_default_env()))
                .init();
            tracing::info!("Profiling enabled, recording a trace-*.json file");
            LoggingGuard {
                _chrome: Some(guard),
            }
        } else {
            tracing_subscriber::registry()
                .with(fmt::layer().with_filter(EnvFilter::from_default_env()))
                .init();
            tracing::info!("Logging initialized (set ENABLE_PROFILING to record a trace)");
            LoggingGuard { _chrome: None }
        }
    }
}

#[cfg(not(feature = "profiling"))]
mod inner {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    pub struct LoggingGuard;

    pub fn setup_logging_and_profiling() -> LoggingGuard {
        super::set_default_filter();

        let fmt_layer = fmt::layer().with_filter(EnvFilter::from_default_env());
        tracing_subscriber::registry().with(fmt_layer).init();

        tracing::debug!("Logging initialized (profiling disabled in this build)");
        LoggingGuard
    }
}

pub use inner::{LoggingGuard, setup_logging_and_profiling};
