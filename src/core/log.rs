use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    EnvFilter, filter::Targets, fmt, prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

/// How much the process should say when `RUST_LOG` is not set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// One-shot CLI commands: silent unless `--verbose`.
    Cli { verbose: bool },
    /// Long running server: info by default, timestamps on.
    Server { verbose: bool },
}

impl LogMode {
    pub fn level(&self) -> (LevelFilter, &'static str) {
        match self {
            LogMode::Cli { verbose: true } | LogMode::Server { verbose: true } => {
                (LevelFilter::DEBUG, "debug")
            }
            LogMode::Cli { verbose: false } => (LevelFilter::OFF, "off"),
            LogMode::Server { verbose: false } => (LevelFilter::INFO, "info"),
        }
    }
}

pub fn init_logging(mode: LogMode) {
    let (level_filter, level) = mode.level();
    let app_filter = Targets::new()
        .with_target("ratewatch", level_filter)
        .with_default(level_filter);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry()
        .with(app_filter)
        .with(env_filter);

    match mode {
        LogMode::Cli { .. } => registry.with(fmt::layer().pretty().without_time()).init(),
        LogMode::Server { .. } => registry.with(fmt::layer().with_target(true)).init(),
    }
}
