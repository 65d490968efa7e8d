use serde_derive::Deserialize;
use tracing_subscriber::{
    filter::FromEnvError,
    fmt::{time::ChronoUtc, Subscriber},
    EnvFilter,
};

pub const LOG_FILTER_ENV: &str = "TASKSTORE_LOG";

const DEFAULT_LEVEL: &str = "info";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum LogType {
    Stdout,
    Stderr,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Log {
    pub level: String,
    pub structured: bool,
    pub backend: LogType,
}

fn directives(log: &Option<Log>) -> &str {
    log.as_ref().map(|l| l.level.as_str()).unwrap_or(DEFAULT_LEVEL)
}

/// The environment wins over the config file, which wins over `info`.
fn filter_for(env_filter: Result<EnvFilter, FromEnvError>, log: &Option<Log>) -> EnvFilter {
    env_filter.unwrap_or_else(|_| EnvFilter::new(directives(log)))
}

/// Install the global subscriber.
///
/// Structured output is one JSON object per event. Plain output is
/// colored only when written to stdout.
pub fn setup(
    env_filter: Result<EnvFilter, FromEnvError>,
    log: &Option<Log>,
) -> anyhow::Result<()> {
    let filter = filter_for(env_filter, log);
    let structured = log.as_ref().map(|l| l.structured).unwrap_or(false);
    let backend = log.as_ref().map(|l| l.backend).unwrap_or(LogType::Stdout);

    let builder = Subscriber::builder()
        .with_timer(ChronoUtc::rfc3339())
        .with_level(true)
        .with_env_filter(filter);

    match (structured, backend) {
        (true, LogType::Stdout) => tracing::subscriber::set_global_default(
            builder.json().with_writer(std::io::stdout).finish(),
        )?,
        (true, LogType::Stderr) => tracing::subscriber::set_global_default(
            builder.json().with_writer(std::io::stderr).finish(),
        )?,
        (false, LogType::Stdout) => {
            tracing::subscriber::set_global_default(builder.with_ansi(true).finish())?
        }
        (false, LogType::Stderr) => tracing::subscriber::set_global_default(
            builder
                .with_ansi(false)
                .with_writer(std::io::stderr)
                .finish(),
        )?,
    };
    Ok(())
}
