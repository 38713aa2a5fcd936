//! Logging setup.
//!
//! Call [`init_journald_or_stdout`] once at startup. Elsewhere,
//! `use crate::tracing::prelude::*` brings in the event macros.
//!
//! Filtering follows `RUST_LOG` and defaults to `info`. Serial traffic is
//! logged at `trace` under `bitaxe_miner::asic`, pool traffic under
//! `bitaxe_miner::stratum_v1`.

use std::fmt;

use time::OffsetDateTime;
use time::macros::format_description;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{
        FmtContext, FormatEvent, FormatFields,
        format::{DefaultFields, Writer},
        time::FormatTime,
    },
    prelude::*,
    registry::LookupSpan,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

const CRATE_PREFIX: &str = "bitaxe_miner::";

/// True when stderr is the stream systemd handed us in `JOURNAL_STREAM`.
///
/// The variable survives into children whose stderr was redirected, so
/// the device and inode are compared against stderr's own.
#[cfg(target_os = "linux")]
fn stderr_is_journal_stream() -> bool {
    use std::os::unix::fs::MetadataExt;
    use std::os::unix::io::AsFd;

    let Ok(value) = std::env::var("JOURNAL_STREAM") else {
        return false;
    };
    let Some((dev, ino)) = value.split_once(':') else {
        return false;
    };
    let (Ok(dev), Ok(ino)) = (dev.parse::<u64>(), ino.parse::<u64>()) else {
        return false;
    };

    let stderr = std::io::stderr();
    let Ok(fd) = stderr.as_fd().try_clone_to_owned() else {
        return false;
    };
    match std::fs::File::from(fd).metadata() {
        Ok(meta) => meta.dev() == dev && meta.ino() == ino,
        Err(_) => false,
    }
}

#[cfg(not(target_os = "linux"))]
fn stderr_is_journal_stream() -> bool {
    false
}

/// Logs to journald when running as a systemd service, stdout otherwise.
pub fn init_journald_or_stdout() {
    if stderr_is_journal_stream() {
        match tracing_journald::layer() {
            Ok(layer) => {
                tracing_subscriber::registry()
                    .with(env_filter())
                    .with(layer)
                    .init();
                return;
            }
            Err(e) => eprintln!("journald unavailable ({e}), logging to stdout"),
        }
    }

    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .fmt_fields(DefaultFields::new())
                .event_format(LineFormat),
        )
        .init();
    debug!("Logging to stdout");
}

fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy()
}

/// `HH:MM:SS LEVEL target: message`, with structured fields on a dimmed
/// second line.
struct LineFormat;

#[derive(Default)]
struct Fields {
    message: Option<String>,
    rest: Vec<(&'static str, String)>,
}

impl Visit for Fields {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.rest.push((field.name(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            self.rest.push((field.name(), format!("{:?}", value)));
        }
    }
}

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut fields = Fields::default();
        event.record(&mut fields);

        LocalTimer.format_time(&mut writer)?;

        let (color, label) = match *event.metadata().level() {
            Level::ERROR => ("\x1b[31m", "ERROR"),
            Level::WARN => ("\x1b[33m", "WARN "),
            Level::INFO => ("\x1b[32m", "INFO "),
            Level::DEBUG => ("\x1b[34m", "DEBUG"),
            Level::TRACE => ("\x1b[35m", "TRACE"),
        };
        write!(writer, " {color}{label}\x1b[0m ")?;

        // Events bridged from the log crate carry their real target as a field.
        let target = event.metadata().target();
        let target = match target.strip_prefix(CRATE_PREFIX) {
            Some(ours) => ours.to_string(),
            None if target == "log" => fields
                .rest
                .iter()
                .find(|(k, _)| *k == "log.target")
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| target.to_string()),
            None => target.to_string(),
        };
        write!(writer, "{target}: ")?;

        if let Some(message) = &fields.message {
            write!(writer, "{message}")?;
        }

        let mut extra = fields.rest.iter().filter(|(k, _)| !k.starts_with("log."));
        if let Some((key, value)) = extra.next() {
            // Indent past "HH:MM:SS LEVEL ".
            write!(writer, "\n\x1b[90m               {key}={value}")?;
            for (key, value) in extra {
                write!(writer, ", {key}={value}")?;
            }
            write!(writer, "\x1b[0m")?;
        }

        writeln!(writer)
    }
}

/// Local wall-clock time to the second.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let text = now
            .format(format_description!("[hour]:[minute]:[second]"))
            .map_err(|_| fmt::Error)?;
        write!(w, "{text}")
    }
}
