use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use super::{Category, Event, SourceKind};

/// Keyword fallbacks, tried in order. First match wins.
const KEYWORD_RULES: [(Category, &str); 4] = [
    (Category::Ai, r"ai|ollama|openai"),
    (Category::Scraping, r"scrapy|scraper"),
    (Category::Http, r"http_|http request"),
    (Category::Database, r"database|sqlite|news_articles"),
];

static KEYWORDS: LazyLock<Vec<(Category, Regex)>> = LazyLock::new(|| {
    KEYWORD_RULES
        .iter()
        .map(|(category, pattern)| {
            let re = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .expect("static keyword pattern");
            (*category, re)
        })
        .collect()
});

/// Maps an event to its category.
///
/// Total and side-effect free: the static kind table is consulted first, then
/// kinds without a static mapping fall back to keyword matching over the
/// payload content, and anything left over is `Other`.
pub fn classify(event: &Event) -> Category {
    if let Some(category) = category_for_kind(event.kind) {
        return category;
    }

    let content = event.content();
    if content.is_empty() {
        return Category::Other;
    }

    KEYWORDS
        .iter()
        .find(|(_, re)| re.is_match(&content))
        .map(|(category, _)| *category)
        .unwrap_or(Category::Other)
}

/// Static source-kind table. `None` means the kind is free-form.
pub const fn category_for_kind(kind: SourceKind) -> Option<Category> {
    match kind {
        SourceKind::AiMetrics => Some(Category::Ai),
        SourceKind::ScrapyMetrics => Some(Category::Scraping),
        SourceKind::HttpMetrics => Some(Category::Http),
        SourceKind::DatabaseMetrics => Some(Category::Database),
        SourceKind::WebsocketMetrics
        | SourceKind::NewArticle
        | SourceKind::ProcessingStatus
        | SourceKind::ArticlesSync => Some(Category::Realtime),
        SourceKind::SystemMetrics => Some(Category::System),
        SourceKind::Log | SourceKind::CollectionProgress | SourceKind::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    fn log(payload: Value) -> Event {
        Event::new(SourceKind::Log, 0, payload)
    }

    #[test]
    fn test_static_table() {
        let cases = [
            (SourceKind::AiMetrics, Category::Ai),
            (SourceKind::ScrapyMetrics, Category::Scraping),
            (SourceKind::HttpMetrics, Category::Http),
            (SourceKind::DatabaseMetrics, Category::Database),
            (SourceKind::WebsocketMetrics, Category::Realtime),
            (SourceKind::NewArticle, Category::Realtime),
            (SourceKind::ProcessingStatus, Category::Realtime),
            (SourceKind::ArticlesSync, Category::Realtime),
            (SourceKind::SystemMetrics, Category::System),
        ];
        for (kind, expected) in cases {
            // Payload content must not override the table.
            let ev = Event::new(kind, 0, json!("sqlite openai scrapy"));
            assert_eq!(classify(&ev), expected, "kind {kind}");
        }
    }

    #[test]
    fn test_log_keyword_fallback() {
        assert_eq!(classify(&log(json!("Calling OpenAI completion"))), Category::Ai);
        assert_eq!(classify(&log(json!("ollama pull llama3"))), Category::Ai);
        assert_eq!(classify(&log(json!("AI analysis done"))), Category::Ai);
        assert_eq!(classify(&log(json!("Scrapy spider opened"))), Category::Scraping);
        assert_eq!(classify(&log(json!("HTTP request GET /api"))), Category::Http);
        assert_eq!(classify(&log(json!({"event": "http_request"}))), Category::Http);
        assert_eq!(classify(&log(json!("INSERT INTO news_articles"))), Category::Database);
        assert_eq!(classify(&log(json!("SQLite locked"))), Category::Database);
    }

    #[test]
    fn test_keyword_order_first_match_wins() {
        assert_eq!(
            classify(&log(json!("scraper stored row in database"))),
            Category::Scraping
        );
        assert_eq!(
            classify(&log(json!("openai call from scraper"))),
            Category::Ai
        );
    }

    #[test]
    fn test_ai_keyword_matches_anywhere() {
        // AI is tried first, so any "ai" substring wins over later rules.
        assert_eq!(classify(&log(json!("job failed to start"))), Category::Ai);
        assert_eq!(classify(&log(json!("email sent"))), Category::Ai);
        assert_eq!(classify(&log(json!("ai_analysis complete"))), Category::Ai);
        assert_eq!(
            classify(&log(json!("sqlite write failed"))),
            Category::Ai
        );
        assert_eq!(classify(&log(json!("sqlite write ok"))), Category::Database);
    }

    #[test]
    fn test_malformed_payload_defaults_to_other() {
        assert_eq!(classify(&log(Value::Null)), Category::Other);
        assert_eq!(classify(&log(json!(42))), Category::Other);
        assert_eq!(
            classify(&Event::new(SourceKind::Unknown, 0, json!({"x": [1, 2]}))),
            Category::Other
        );
    }
}
