// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::env;
use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{EnvFilter, Registry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LOG_ENV_VAR: &str = "SYNCD_LOG";
const LOG_FORMAT_ENV_VAR: &str = "SYNCD_LOG_FORMAT";
const LOG_SPAN_EVENTS_ENV_VAR: &str = "SYNCD_LOG_SPAN_EVENTS";
const LOG_FILE_ENV_VAR: &str = "SYNCD_LOG_FILE";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
    Compact,
}

/// Installs the global subscriber. Must be called once, before any task is
/// spawned.
pub fn init(verbose: bool) {
    let filter = build_filter(env::var(LOG_ENV_VAR).ok().as_deref(), verbose);
    let span_events = parse_span_events(env::var(LOG_SPAN_EVENTS_ENV_VAR).ok().as_deref());
    let format = parse_format(env::var(LOG_FORMAT_ENV_VAR).ok().as_deref());
    let file_writer = build_file_writer();
    let registry = Registry::default()
        .with(filter)
        .with(tracing_error::ErrorLayer::default());

    match format {
        LogFormat::Json => {
            let stdout_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_timer(UtcTime::rfc_3339())
                .with_span_events(span_events.clone());
            match file_writer {
                Some((writer, guard)) => {
                    let file_layer = tracing_subscriber::fmt::layer()
                        .json()
                        .with_ansi(false)
                        .with_timer(UtcTime::rfc_3339())
                        .with_span_events(span_events)
                        .with_writer(writer);
                    registry.with(stdout_layer).with(file_layer).init();
                    let _ = FILE_GUARD.set(guard);
                }
                None => registry.with(stdout_layer).init(),
            }
        }
        LogFormat::Pretty => {
            let stdout_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_timer(UtcTime::rfc_3339())
                .with_span_events(span_events.clone());
            match file_writer {
                Some((writer, guard)) => {
                    let file_layer = tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_ansi(false)
                        .with_timer(UtcTime::rfc_3339())
                        .with_span_events(span_events)
                        .with_writer(writer);
                    registry.with(stdout_layer).with(file_layer).init();
                    let _ = FILE_GUARD.set(guard);
                }
                None => registry.with(stdout_layer).init(),
            }
        }
        LogFormat::Compact => {
            let stdout_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_timer(UtcTime::rfc_3339())
                .with_span_events(span_events.clone());
            match file_writer {
                Some((writer, guard)) => {
                    let file_layer = tracing_subscriber::fmt::layer()
                        .compact()
                        .with_ansi(false)
                        .with_timer(UtcTime::rfc_3339())
                        .with_span_events(span_events)
                        .with_writer(writer);
                    registry.with(stdout_layer).with(file_layer).init();
                    let _ = FILE_GUARD.set(guard);
                }
                None => registry.with(stdout_layer).init(),
            }
        }
    }
}

fn build_filter(directives: Option<&str>, verbose: bool) -> EnvFilter {
    match directives.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => EnvFilter::new(value),
        // Dependencies stay at warn unless asked for.
        None if verbose => EnvFilter::new("warn,syncd=debug"),
        None => EnvFilter::new("warn,syncd=info"),
    }
}

fn normalized(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_ascii_lowercase)
}

fn parse_format(value: Option<&str>) -> LogFormat {
    match normalized(value).as_deref() {
        Some("json") => LogFormat::Json,
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::Compact,
    }
}

fn parse_span_events(value: Option<&str>) -> FmtSpan {
    match normalized(value).as_deref() {
        Some("new") => FmtSpan::NEW,
        Some("enter") => FmtSpan::ENTER,
        Some("exit") => FmtSpan::EXIT,
        Some("close") => FmtSpan::CLOSE,
        Some("full") => FmtSpan::FULL,
        _ => FmtSpan::NONE,
    }
}

fn build_file_writer() -> Option<(NonBlocking, WorkerGuard)> {
    let file_path = env::var(LOG_FILE_ENV_VAR)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())?;

    let path = Path::new(&file_path);
    let file_name = path.file_name()?.to_string_lossy().to_string();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let appender = tracing_appender::rolling::never(dir, file_name);
    Some(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_defaults_to_compact() {
        assert_eq!(parse_format(None), LogFormat::Compact);
        assert_eq!(parse_format(Some("  ")), LogFormat::Compact);
        assert_eq!(parse_format(Some("xml")), LogFormat::Compact);
        assert_eq!(parse_format(Some(" JSON ")), LogFormat::Json);
        assert_eq!(parse_format(Some("pretty")), LogFormat::Pretty);
    }

    #[test]
    fn span_events_parse_case_insensitively() {
        assert_eq!(parse_span_events(Some("Close")), FmtSpan::CLOSE);
        assert_eq!(parse_span_events(Some("full")), FmtSpan::FULL);
        assert_eq!(parse_span_events(None), FmtSpan::NONE);
    }

    #[test]
    fn explicit_directives_win_over_verbose() {
        assert_eq!(build_filter(Some("trace"), false).to_string(), "trace");
        assert_eq!(
            build_filter(None, true).to_string(),
            EnvFilter::new("warn,syncd=debug").to_string()
        );
    }
}
