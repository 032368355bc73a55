use std::io;
use std::path::PathBuf;

use chrono::Local;
use tracing_appender::rolling;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

const DEFAULT_FILTER: &str = "info,tabchat=debug,tabchat_core=debug";

/// Directory log files are written to, if one can be determined.
pub fn log_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("tabchat").join("logs"))
}

/// Initialize tracing with file output, falling back to stdout when no data
/// directory is available.
///
/// The filter comes from `RUST_LOG` when set.
pub fn init_tracing() -> io::Result<()> {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if let Some(log_dir) = log_dir() {
        std::fs::create_dir_all(&log_dir)?;
        let file_name = format!("{timestamp}.log");
        let file_appender = rolling::never(&log_dir, &file_name);

        let subscriber = tracing_subscriber::registry()
            .with(
                fmt::Layer::new()
                    .with_writer(file_appender)
                    .with_ansi(false)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_file(true)
                    .with_line_number(true),
            )
            .with(filter);
        tracing::subscriber::set_global_default(subscriber).map_err(io::Error::other)?;

        tracing::debug!(
            target: "tabchat_core::utils::tracing",
            path = %log_dir.join(file_name).display(),
            "Tracing initialized with file output"
        );
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(fmt::Layer::default().with_ansi(true).with_target(true))
            .with(filter);
        tracing::subscriber::set_global_default(subscriber).map_err(io::Error::other)?;

        tracing::debug!(
            target: "tabchat_core::utils::tracing",
            "Tracing initialized with stdout output"
        );
    }

    Ok(())
}
