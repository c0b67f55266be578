//! Numeric sample extraction and error flagging for classified events.

use crate::series::SeriesKey;

use super::{Category, Event, SourceKind};

/// Bytes per GiB, used when memory is reported in bytes.
const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// (payload path, series key) pairs per metrics kind.
const SYSTEM_FIELDS: &[(&str, &str)] = &[
    ("cpu.usage", "cpu"),
    ("memory.usage", "memory"),
    ("disk.usage", "disk"),
    ("load.avg1", "load1"),
];

const HTTP_FIELDS: &[(&str, &str)] = &[
    ("activeRequests", "httpActive"),
    ("requestsPerSecond", "httpRps"),
    ("errors", "httpErrors"),
    ("avgResponseTime", "httpLatencyMs"),
];

const DATABASE_FIELDS: &[(&str, &str)] = &[
    ("queriesPerSecond", "dbQps"),
    ("errors", "dbErrors"),
    ("avgQueryTime", "dbLatencyMs"),
    ("connections", "dbConnections"),
];

const WEBSOCKET_FIELDS: &[(&str, &str)] = &[
    ("connections", "wsConnections"),
    ("messagesPerSecond", "wsMsgsPerSec"),
    ("errors", "wsErrors"),
];

const AI_FIELDS: &[(&str, &str)] = &[
    ("requestsPerMinute", "aiRpm"),
    ("errors", "aiErrors"),
    ("avgLatency", "aiLatencyMs"),
    ("queueSize", "aiQueue"),
];

const SCRAPY_FIELDS: &[(&str, &str)] = &[
    ("itemsScraped", "scrapyItems"),
    ("requestsPerMinute", "scrapyRpm"),
    ("errors", "scrapyErrors"),
    ("duplicatesDropped", "scrapyDuplicates"),
];

/// Counter fields that flag a metrics snapshot as an error when nonzero.
const ERROR_COUNTER_FIELDS: &[&str] = &["errors", "errorCount", "failed"];

/// Key of the memory-in-GB series.
pub const MEMORY_GB_KEY: &str = "memoryUsedGb";

/// Prefix of the per-category activity series.
pub const ACTIVITY_PREFIX: &str = "events.";

fn fields_for(kind: SourceKind) -> &'static [(&'static str, &'static str)] {
    match kind {
        SourceKind::SystemMetrics => SYSTEM_FIELDS,
        SourceKind::HttpMetrics => HTTP_FIELDS,
        SourceKind::DatabaseMetrics => DATABASE_FIELDS,
        SourceKind::WebsocketMetrics => WEBSOCKET_FIELDS,
        SourceKind::AiMetrics => AI_FIELDS,
        SourceKind::ScrapyMetrics => SCRAPY_FIELDS,
        _ => &[],
    }
}

/// Extracts the numeric samples an event contributes.
///
/// Absent or non-numeric fields are skipped. Never fails.
pub fn extract(event: &Event) -> Vec<(SeriesKey, f64)> {
    let fields = fields_for(event.kind);
    let mut out = Vec::with_capacity(fields.len() + 1);

    for (path, key) in fields {
        if let Some(v) = event.number(path) {
            out.push((SeriesKey::from(*key), v));
        }
    }

    if event.kind == SourceKind::SystemMetrics {
        if let Some(used) = event.number("memory.used") {
            out.push((SeriesKey::from(MEMORY_GB_KEY), to_gigabytes(used)));
        }
    }

    out
}

/// Key of the activity series counting events for a category.
pub fn activity_key(category: Category) -> SeriesKey {
    SeriesKey::from(format!("{ACTIVITY_PREFIX}{}", category.as_str()))
}

/// Values above 1024 are taken to be bytes; smaller values are already GB.
fn to_gigabytes(v: f64) -> f64 {
    if v > 1024.0 {
        v / BYTES_PER_GIB
    } else {
        v
    }
}

/// Returns true if the event should count as an error transition.
///
/// Metrics snapshots are errors when any error counter is nonzero. Logs are
/// errors at ERROR/WARN level or when they carry an HTTP status of 400 or more.
pub fn is_error(event: &Event) -> bool {
    match event.kind {
        SourceKind::Log => log_is_error(event),
        SourceKind::ProcessingStatus => event
            .string("status")
            .is_some_and(|s| s.eq_ignore_ascii_case("error") || s.eq_ignore_ascii_case("failed")),
        _ => ERROR_COUNTER_FIELDS
            .iter()
            .any(|f| event.number(f).is_some_and(|n| n != 0.0)),
    }
}

fn log_is_error(event: &Event) -> bool {
    let level_is_error = event.string("level").is_some_and(|level| {
        ["ERROR", "WARN", "WARNING"]
            .iter()
            .any(|l| level.eq_ignore_ascii_case(l))
    });
    if level_is_error {
        return true;
    }

    ["status", "statusCode"]
        .iter()
        .any(|f| event.number(f).is_some_and(|code| code >= 400.0))
}
