//! Diagnostic logging for the `ocf` binary.
//!
//! Logs always go to stderr: `ocf cat` writes records to stdout and the two
//! streams must never interleave.

use clap::{Args, ValueEnum};
use tracing::level_filters::LevelFilter;

/// Shared `--log-*` flags, accepted before or after any subcommand.
#[derive(Debug, Clone, Args)]
pub struct LogArgs {
    /// Diagnostic verbosity; `off` silences everything
    #[arg(long = "log-level", global = true, value_enum, default_value_t = Verbosity::Warn)]
    pub level: Verbosity,

    /// Render diagnostics as plain lines or one JSON object per event
    #[arg(long = "log-format", global = true, value_enum, default_value_t = Style::Text)]
    pub style: Style,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Verbosity {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<Verbosity> for LevelFilter {
    fn from(v: Verbosity) -> Self {
        match v {
            Verbosity::Off => LevelFilter::OFF,
            Verbosity::Error => LevelFilter::ERROR,
            Verbosity::Warn => LevelFilter::WARN,
            Verbosity::Info => LevelFilter::INFO,
            Verbosity::Debug => LevelFilter::DEBUG,
            Verbosity::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Style {
    Text,
    Json,
}

impl LogArgs {
    /// Install the global subscriber. A second call is ignored.
    pub fn install(&self) {
        let filter = LevelFilter::from(self.level);
        if filter == LevelFilter::OFF {
            return;
        }
        let fmt = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_max_level(filter)
            .with_ansi(false)
            .with_target(false);
        let _ = match self.style {
            Style::Text => fmt.try_init(),
            Style::Json => fmt.json().try_init(),
        };
    }
}
