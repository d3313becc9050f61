use std::fmt;

use anstream::ColorChoice;
use jiff::Timestamp;
use owo_colors::OwoColorize;
use tracing::level_filters::LevelFilter;
use tracing::{Event, Subscriber};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use taskgate_static::EnvVars;

/// How much the service logs when `TASKGATE_LOG` is unset.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Warnings and errors only.
    #[default]
    Default,
    /// `DEBUG` messages.
    Verbose,
    /// `TRACE` messages, with timestamps and spans.
    ExtraVerbose,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid {} directives", EnvVars::TASKGATE_LOG)]
    Filter(#[from] tracing_subscriber::filter::FromEnvError),
    #[error("A global logger is already installed")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

/// The style of a taskgate logging line.
pub struct TaskgateFormat {
    pub display_timestamp: bool,
    pub display_level: bool,
    pub show_spans: bool,
}

impl Default for TaskgateFormat {
    fn default() -> Self {
        Self {
            display_timestamp: false,
            display_level: true,
            show_spans: false,
        }
    }
}

/// See <https://docs.rs/tracing-subscriber/0.3.18/src/tracing_subscriber/fmt/format/mod.rs.html#1026-1156>
impl<S, N> FormatEvent<S, N> for TaskgateFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let ansi = writer.has_ansi_escapes();

        if self.display_timestamp {
            if ansi {
                write!(writer, "{} ", Timestamp::now().dimmed())?;
            } else {
                write!(writer, "{} ", Timestamp::now())?;
            }
        }

        if self.display_level {
            let level = meta.level();
            if ansi {
                match *level {
                    tracing::Level::TRACE => write!(writer, "{} ", level.purple())?,
                    tracing::Level::DEBUG => write!(writer, "{} ", level.blue())?,
                    tracing::Level::INFO => write!(writer, "{} ", level.green())?,
                    tracing::Level::WARN => write!(writer, "{} ", level.yellow())?,
                    tracing::Level::ERROR => write!(writer, "{} ", level.red())?,
                }
            } else {
                write!(writer, "{level} ")?;
            }
        }

        if self.show_spans {
            let span = event
                .parent()
                .and_then(|id| ctx.span(id))
                .or_else(|| ctx.lookup_current());

            let mut seen = false;
            for span in span.into_iter().flat_map(|span| span.scope().from_root()) {
                seen = true;
                if ansi {
                    write!(writer, "{}:", span.metadata().name().bold())?;
                } else {
                    write!(writer, "{}:", span.metadata().name())?;
                }
            }
            if seen {
                writer.write_char(' ')?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// The filter applied when `TASKGATE_LOG` is unset.
fn default_directive(level: LogLevel) -> Directive {
    match level {
        LogLevel::Default => LevelFilter::WARN.into(),
        LogLevel::Verbose => LevelFilter::DEBUG.into(),
        LogLevel::ExtraVerbose => LevelFilter::TRACE.into(),
    }
}

/// Build the filter for `level`, letting `TASKGATE_LOG` override it.
pub fn env_filter(level: LogLevel) -> Result<EnvFilter, Error> {
    Ok(EnvFilter::builder()
        .with_default_directive(default_directive(level))
        .with_env_var(EnvVars::TASKGATE_LOG)
        .from_env()?)
}

/// Install the global subscriber, writing to stderr.
pub fn setup_logging(level: LogLevel) -> Result<(), Error> {
    let filter = env_filter(level)?;

    let format = TaskgateFormat {
        display_timestamp: level == LogLevel::ExtraVerbose,
        display_level: true,
        show_spans: level == LogLevel::ExtraVerbose,
    };
    let ansi = std::env::var_os(EnvVars::NO_COLOR).is_none()
        && match anstream::Stderr::choice(&std::io::stderr()) {
            ColorChoice::Always | ColorChoice::AlwaysAnsi => true,
            ColorChoice::Never | ColorChoice::Auto => false,
        };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .event_format(format)
                .with_writer(std::io::stderr)
                .with_ansi(ansi)
                .with_filter(filter),
        )
        .try_init()?;

    Ok(())
}
