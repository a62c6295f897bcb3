//! Global tracing setup for the fleet binaries.
//!
//! Configured from the environment:
//!
//! | Variable        | Values                    | Default            |
//! |-----------------|---------------------------|--------------------|
//! | `LOG_LEVEL`     | any `EnvFilter` directive | `info`             |
//! | `LOG_OUTPUT`    | `console`, `file`, `both` | `console`          |
//! | `LOG_FORMAT`    | `human`, `json`           | `human`            |
//! | `LOG_FILE_PATH` | path, rotated daily       | `/tmp/fleet.log`   |
//! | `LOG_TAGS`      | `key:value,...`           | none               |
//!
//! `LOG_TAGS` keeps only events raised inside a span carrying every listed
//! field, e.g. `LOG_TAGS=pool:p1` or `LOG_TAGS=operation_id:*`.

use std::{
    collections::HashMap,
    env,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tracing::{field::Visit, span, subscriber::Interest, Metadata, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::MakeWriter,
    layer::{Context, Layer},
    prelude::*,
    registry::LookupSpan,
    EnvFilter,
};

const DEFAULT_LOG_FILE: &str = "/tmp/fleet.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
    /// Anything unrecognized: filters are installed but nothing is written.
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub output: LogOutput,
    pub format: LogFormat,
    pub file_path: PathBuf,
    pub tags: Vec<Tag>,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let output = match lookup("LOG_OUTPUT").as_deref().unwrap_or("console") {
            "console" => LogOutput::Console,
            "file" => LogOutput::File,
            "both" => LogOutput::Both,
            _ => LogOutput::Off,
        };
        let format = match lookup("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Human,
        };

        Self {
            level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            output,
            format,
            file_path: lookup("LOG_FILE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
            tags: parse_tags(&lookup("LOG_TAGS").unwrap_or_default()),
        }
    }
}

/// Parse `key:value` pairs separated by commas. Malformed pairs are skipped.
pub fn parse_tags(raw: &str) -> Vec<Tag> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once(':')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some(Tag {
                key: key.to_string(),
                value: value.trim().to_string(),
            })
        })
        .collect()
}

// --- Writer that duplicates output to two sinks ---
struct Tee<A, B> {
    a: A,
    b: B,
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let console = self.a.write_all(buf);
        let file = self.b.write_all(buf);
        console.or(file).map(|()| buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.a.flush()?;
        self.b.flush()
    }
}

#[derive(Clone)]
struct MakeTee<A, B> {
    make_a: A,
    make_b: B,
}

impl<'a, A, B> MakeWriter<'a> for MakeTee<A, B>
where
    A: MakeWriter<'a>,
    B: MakeWriter<'a>,
{
    type Writer = Tee<A::Writer, B::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        Tee {
            a: self.make_a.make_writer(),
            b: self.make_b.make_writer(),
        }
    }
}

// --- Span-field filtering ---
type SpanFields = HashMap<String, String>;

struct TagFilterLayer {
    tags: Vec<Tag>,
}

impl TagFilterLayer {
    fn matches(&self, fields: &SpanFields) -> bool {
        self.tags.iter().all(|tag| {
            fields
                .get(&tag.key)
                .is_some_and(|value| tag.value == "*" || value.contains(&tag.value))
        })
    }
}

impl<S> Layer<S> for TagFilterLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn register_callsite(&self, _meta: &'static Metadata<'static>) -> Interest {
        // The answer depends on the current span, so never cache it.
        if self.tags.is_empty() {
            Interest::always()
        } else {
            Interest::sometimes()
        }
    }

    fn enabled(&self, meta: &Metadata<'_>, ctx: Context<'_, S>) -> bool {
        // Spans are always created so their fields can be matched later.
        if self.tags.is_empty() || meta.is_span() {
            return true;
        }

        let Some(scope) = ctx.lookup_current().map(|span| span.scope()) else {
            return false;
        };

        let mut fields = SpanFields::new();
        for span in scope {
            if let Some(own) = span.extensions().get::<SpanFields>() {
                for (k, v) in own {
                    fields.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
        }
        self.matches(&fields)
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut fields = SpanFields::new();
        attrs.record(&mut FieldVisitor(&mut fields));
        span.extensions_mut().insert(fields);
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        if let Some(fields) = extensions.get_mut::<SpanFields>() {
            values.record(&mut FieldVisitor(fields));
        }
    }
}

struct FieldVisitor<'a>(&'a mut SpanFields);

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0
            .insert(field.name().to_string(), format!("{value:?}"));
    }
}

fn rolling_file(path: &Path) -> (tracing_appender::non_blocking::NonBlocking, WorkerGuard) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("/tmp"));
    let file_name = path
        .file_name()
        .unwrap_or_else(|| "fleet.log".as_ref());
    tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file_name))
}

/// Initializes the global tracing subscriber from the environment.
///
/// The returned guard flushes the log file on drop; keep it alive for the
/// life of the process.
pub fn init_subscriber() -> Option<WorkerGuard> {
    init_with(LogSettings::from_env())
}

pub fn init_with(settings: LogSettings) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.level))
        .add_directive("tokio=warn".parse().expect("static directive"))
        .add_directive("hyper=warn".parse().expect("static directive"))
        .add_directive("sqlx=warn".parse().expect("static directive"));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(TagFilterLayer {
            tags: settings.tags.clone(),
        });

    let json = settings.format == LogFormat::Json;
    let fmt = tracing_subscriber::fmt::layer().with_target(true);

    // try_init: a second call (tests, embedded use) keeps the first subscriber.
    match settings.output {
        LogOutput::Both => {
            let (file, guard) = rolling_file(&settings.file_path);
            let writer = MakeTee {
                make_a: io::stdout,
                make_b: file,
            };
            let fmt = fmt.with_writer(writer);
            let _ = if json {
                subscriber.with(fmt.json()).try_init()
            } else {
                subscriber.with(fmt.compact()).try_init()
            };
            Some(guard)
        }
        LogOutput::Console => {
            let fmt = fmt.with_writer(io::stdout);
            let _ = if json {
                subscriber.with(fmt.json()).try_init()
            } else {
                subscriber.with(fmt.compact()).try_init()
            };
            None
        }
        LogOutput::File => {
            let (file, guard) = rolling_file(&settings.file_path);
            let fmt = fmt.with_writer(file).with_ansi(false);
            let _ = if json {
                subscriber.with(fmt.json()).try_init()
            } else {
                subscriber.with(fmt.compact()).try_init()
            };
            Some(guard)
        }
        LogOutput::Off => {
            let _ = subscriber.try_init();
            None
        }
    }
}
