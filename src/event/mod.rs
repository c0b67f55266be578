pub mod classify;
pub mod extract;
pub mod wire;

use std::borrow::Cow;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// SourceKind identifies the producer stream an event arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    SystemMetrics,
    HttpMetrics,
    WebsocketMetrics,
    DatabaseMetrics,
    AiMetrics,
    ScrapyMetrics,
    Log,
    NewArticle,
    ProcessingStatus,
    ArticlesSync,
    CollectionProgress,
    /// Any kind not in the table above. Never an error.
    Unknown,
}

impl SourceKind {
    /// Returns the wire name of this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SystemMetrics => "systemMetrics",
            Self::HttpMetrics => "httpMetrics",
            Self::WebsocketMetrics => "websocketMetrics",
            Self::DatabaseMetrics => "databaseMetrics",
            Self::AiMetrics => "aiMetrics",
            Self::ScrapyMetrics => "scrapyMetrics",
            Self::Log => "log",
            Self::NewArticle => "new-article",
            Self::ProcessingStatus => "processing-status",
            Self::ArticlesSync => "articles-sync",
            Self::CollectionProgress => "collection-progress",
            Self::Unknown => "unknown",
        }
    }

    /// Convert from the wire name. Unrecognised names map to `Unknown`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "systemMetrics" => Self::SystemMetrics,
            "httpMetrics" => Self::HttpMetrics,
            "websocketMetrics" => Self::WebsocketMetrics,
            "databaseMetrics" => Self::DatabaseMetrics,
            "aiMetrics" => Self::AiMetrics,
            "scrapyMetrics" => Self::ScrapyMetrics,
            "log" => Self::Log,
            "new-article" => Self::NewArticle,
            "processing-status" => Self::ProcessingStatus,
            "articles-sync" => Self::ArticlesSync,
            "collection-progress" => Self::CollectionProgress,
            _ => Self::Unknown,
        }
    }

    /// Returns true for the periodic metric snapshots carrying numeric fields.
    pub const fn is_metrics(self) -> bool {
        matches!(
            self,
            Self::SystemMetrics
                | Self::HttpMetrics
                | Self::WebsocketMetrics
                | Self::DatabaseMetrics
                | Self::AiMetrics
                | Self::ScrapyMetrics
        )
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of categories, used for array sizing.
pub const CATEGORY_COUNT: usize = 7;

/// Closed classification label applied to an event for grouping and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[repr(u8)]
pub enum Category {
    #[serde(rename = "AI")]
    Ai = 0,
    Scraping = 1,
    #[serde(rename = "HTTP")]
    Http = 2,
    Database = 3,
    Realtime = 4,
    System = 5,
    Other = 6,
}

impl Category {
    /// Returns the lowercase label used in series keys and metric labels.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Scraping => "scraping",
            Self::Http => "http",
            Self::Database => "database",
            Self::Realtime => "realtime",
            Self::System => "system",
            Self::Other => "other",
        }
    }

    /// Returns the dense index of this category in `0..CATEGORY_COUNT`.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Convert from a dense index.
    pub fn from_index(i: usize) -> Option<Self> {
        Self::all().get(i).copied()
    }

    /// Return all categories in index order.
    pub fn all() -> &'static [Self; CATEGORY_COUNT] {
        &[
            Self::Ai,
            Self::Scraping,
            Self::Http,
            Self::Database,
            Self::Realtime,
            Self::System,
            Self::Other,
        ]
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single operational event as delivered by the transport.
///
/// Immutable once produced. Consumed by the flush step and then discarded;
/// only derived samples and classifications persist.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub kind: SourceKind,
    pub payload: Value,
}

impl Event {
    pub fn new(kind: SourceKind, timestamp_ms: i64, payload: Value) -> Self {
        Self {
            timestamp_ms,
            kind,
            payload,
        }
    }

    /// Looks up a dotted path (e.g. `cpu.usage`) inside the payload.
    pub fn field(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.payload, |value, segment| value.get(segment))
    }

    /// Reads a finite number at `path`. Numeric strings are accepted.
    pub fn number(&self, path: &str) -> Option<f64> {
        let v = match self.field(path)? {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        v.is_finite().then_some(v)
    }

    /// Reads a string at `path`.
    pub fn string(&self, path: &str) -> Option<&str> {
        self.field(path)?.as_str()
    }

    /// Returns the payload rendered as text for keyword matching.
    ///
    /// String payloads are used as-is; anything else is rendered as compact
    /// JSON. A null payload yields the empty string.
    pub fn content(&self) -> Cow<'_, str> {
        match &self.payload {
            Value::Null => Cow::Borrowed(""),
            Value::String(s) => Cow::Borrowed(s.as_str()),
            other => Cow::Owned(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_source_kind_round_trip_names() {
        for name in [
            "systemMetrics",
            "httpMetrics",
            "websocketMetrics",
            "databaseMetrics",
            "aiMetrics",
            "scrapyMetrics",
            "log",
            "new-article",
            "processing-status",
            "articles-sync",
            "collection-progress",
        ] {
            assert_eq!(SourceKind::from_name(name).as_str(), name);
        }
        assert_eq!(SourceKind::from_name("heartbeat"), SourceKind::Unknown);
    }

    #[test]
    fn test_category_index_is_dense() {
        for (i, cat) in Category::all().iter().enumerate() {
            assert_eq!(cat.index(), i);
            assert_eq!(Category::from_index(i), Some(*cat));
        }
        assert_eq!(Category::from_index(CATEGORY_COUNT), None);
    }

    #[test]
    fn test_event_number_lookup() {
        let event = Event::new(
            SourceKind::SystemMetrics,
            0,
            json!({"cpu": {"usage": 42.5}, "memory": {"usage": "61"}, "bad": {"x": "n/a"}}),
        );
        assert_eq!(event.number("cpu.usage"), Some(42.5));
        assert_eq!(event.number("memory.usage"), Some(61.0));
        assert_eq!(event.number("bad.x"), None);
        assert_eq!(event.number("missing.path"), None);
    }

    #[test]
    fn test_event_content() {
        let text = Event::new(SourceKind::Log, 0, json!("Ollama model loaded"));
        assert_eq!(text.content(), "Ollama model loaded");

        let null = Event::new(SourceKind::Log, 0, Value::Null);
        assert_eq!(null.content(), "");

        let obj = Event::new(SourceKind::Log, 0, json!({"message": "sqlite busy"}));
        assert!(obj.content().contains("sqlite busy"));
    }
}
