use std::sync::Once;

/// Log line format for the process-wide subscriber.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

static INIT_ONCE: Once = Once::new();

/// Install the global tracing subscriber. `RUST_LOG` overrides the default `info` level.
/// Later calls are ignored.
pub fn init_tracing_once(format: LogFormat) {
    INIT_ONCE.call_once(|| {
        let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let builder = tracing_subscriber::fmt().with_env_filter(env_filter).with_writer(std::io::stderr);
        let _ = match format {
            LogFormat::Text => builder.try_init(),
            LogFormat::Json => builder.json().try_init(),
        };
    });
}
