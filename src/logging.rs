//! Log file setup.
//!
//! Events go to an append-only file, one line per event, rendered from the
//! configured template (`%(asctime)s %(levelname)s %(message)s` style).
//! Warnings and errors are echoed to stderr.

use std::fmt::{self, Write as _};

use anyhow::Context;
use chrono::{DateTime, Local};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Install the global subscriber: template-formatted file log plus stderr.
///
/// `verbosity` (from `-v` flags) overrides the configured level: 1 = info,
/// 2 = debug, 3+ = trace. `RUST_LOG` overrides both for the file.
pub fn init(config: &LoggingConfig, verbosity: u8) -> anyhow::Result<()> {
    let level = match verbosity {
        0 => config.level.level_filter(),
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let file_name = config
        .filename
        .file_name()
        .with_context(|| format!("Log path '{}' has no file name", config.filename.display()))?;
    let log_dir = config
        .filename
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(std::path::Path::new("."));
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Could not create log directory '{}'", log_dir.display()))?;

    let file_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));
    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_appender)
        .event_format(TemplateFormat::new(&config.format, &config.datefmt))
        .with_filter(file_filter);

    let stderr_level = if verbosity > 0 { level } else { LevelFilter::WARN };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .with_filter(stderr_level);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("Could not install log subscriber")?;
    Ok(())
}

/// One piece of a parsed line template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field {
        field: RecordField,
        width: usize,
        left_align: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordField {
    AscTime,
    LevelName,
    LevelNo,
    Message,
    Name,
    Module,
    LineNo,
}

impl RecordField {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "asctime" => Self::AscTime,
            "levelname" => Self::LevelName,
            "levelno" => Self::LevelNo,
            "message" => Self::Message,
            "name" => Self::Name,
            "module" => Self::Module,
            "lineno" => Self::LineNo,
            _ => return None,
        })
    }
}

/// The data one log line is rendered from.
#[derive(Debug, Clone)]
pub struct LogRecord<'a> {
    pub time: DateTime<Local>,
    pub level: Level,
    pub target: &'a str,
    pub module: Option<&'a str>,
    pub line: Option<u32>,
    pub message: String,
}

/// Renders events through a `%(field)s` line template.
///
/// Supported fields: `asctime`, `levelname`, `levelno`, `message`, `name`
/// (event target), `module`, `lineno`. An optional width such as
/// `%(levelname)-8s` pads the value. `%%` is a literal percent sign.
/// Unknown placeholders are written out unchanged.
#[derive(Debug, Clone)]
pub struct TemplateFormat {
    segments: Vec<Segment>,
    datefmt: String,
}

impl TemplateFormat {
    pub fn new(template: &str, datefmt: &str) -> Self {
        Self {
            segments: parse_template(template),
            datefmt: datefmt.to_string(),
        }
    }

    /// Render one record to a line (without trailing newline).
    pub fn render(&self, record: &LogRecord<'_>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field {
                    field,
                    width,
                    left_align,
                } => {
                    let value = self.field_value(*field, record);
                    let width = *width;
                    if *left_align {
                        let _ = write!(out, "{value:<width$}");
                    } else {
                        let _ = write!(out, "{value:>width$}");
                    }
                }
            }
        }
        out
    }

    fn field_value(&self, field: RecordField, record: &LogRecord<'_>) -> String {
        match field {
            RecordField::AscTime => {
                let mut out = String::new();
                if write!(out, "{}", record.time.format(&self.datefmt)).is_err() {
                    out = record.time.to_rfc3339();
                }
                out
            }
            RecordField::LevelName => level_name(record.level).to_string(),
            RecordField::LevelNo => level_number(record.level).to_string(),
            RecordField::Message => record.message.clone(),
            RecordField::Name => record.target.to_string(),
            RecordField::Module => record.module.unwrap_or("").to_string(),
            RecordField::LineNo => record.line.map(|l| l.to_string()).unwrap_or_default(),
        }
    }
}

impl<S, N> FormatEvent<S, N> for TemplateFormat
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
        let meta = event.metadata();
        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let record = LogRecord {
            time: Local::now(),
            level: *meta.level(),
            target: meta.target(),
            module: meta.module_path(),
            line: meta.line(),
            message: fields.into_message(),
        };
        writeln!(writer, "{}", self.render(&record))
    }
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARNING",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        _ => "TRACE",
    }
}

fn level_number(level: Level) -> u8 {
    match level {
        Level::ERROR => 40,
        Level::WARN => 30,
        Level::INFO => 20,
        Level::DEBUG => 10,
        _ => 5,
    }
}

fn parse_template(template: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = template;

    while let Some(pos) = rest.find('%') {
        literal.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('%') {
            literal.push('%');
            rest = tail;
            continue;
        }

        match parse_placeholder(after) {
            Some((field, width, left_align, consumed)) => {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Field {
                    field,
                    width,
                    left_align,
                });
                rest = &after[consumed..];
            }
            None => {
                literal.push('%');
                rest = after;
            }
        }
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

/// Parse `(name)<flags><width><conv>` following a `%`.
///
/// Returns the field, width, alignment and bytes consumed.
fn parse_placeholder(s: &str) -> Option<(RecordField, usize, bool, usize)> {
    let inner = s.strip_prefix('(')?;
    let close = inner.find(')')?;
    let field = RecordField::from_name(&inner[..close])?;

    let spec = &inner[close + 1..];
    let left_align = spec.starts_with('-');
    let spec_digits = spec.trim_start_matches('-');
    let digits: String = spec_digits
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let width = digits.parse().unwrap_or(0);

    let after_width = &spec_digits[digits.len()..];
    let conv = after_width.chars().next()?;
    if !conv.is_ascii_alphabetic() {
        return None;
    }

    let spec_len = spec.len() - after_width.len() + conv.len_utf8();
    Some((field, width, left_align, 1 + close + 1 + spec_len))
}

/// Collects the `message` field and any structured fields of an event.
#[derive(Default)]
struct FieldCollector {
    message: String,
    extra: Vec<(&'static str, String)>,
}

impl FieldCollector {
    fn into_message(self) -> String {
        let mut out = self.message;
        for (name, value) in self.extra {
            if !out.is_empty() {
                out.push(' ');
            }
            let _ = write!(out, "{name}={value}");
        }
        out
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.extra.push((field.name(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.extra.push((field.name(), format!("{value:?}")));
        }
    }
}
