use std::str::FromStr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid log format {0:?}: expected 'plain' or 'json'")]
pub struct InvalidLogFormat(String);

#[derive(Debug, thiserror::Error)]
pub enum LogInitError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("failed to install the tracing subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

// === impl LogFormat ===

impl LogFormat {
    /// Installs the global tracing subscriber.
    pub fn try_init(self, filter: &str) -> Result<(), LogInitError> {
        let registry = tracing_subscriber::registry().with(EnvFilter::try_new(filter)?);
        match self {
            Self::Plain => registry.with(tracing_subscriber::fmt::layer()).try_init()?,
            Self::Json => registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()?,
        }
        Ok(())
    }
}

impl FromStr for LogFormat {
    type Err = InvalidLogFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" => Ok(Self::Plain),
            "json" => Ok(Self::Json),
            _ => Err(InvalidLogFormat(s.to_string())),
        }
    }
}
