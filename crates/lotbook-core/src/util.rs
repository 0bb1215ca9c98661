//! Small helpers shared by the config, remote and store layers.

/// Trimmed text, or `None` when the value is missing or blank.
pub fn non_empty_trimmed(value: Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

pub fn is_http_url(value: &str) -> bool {
    ["http://", "https://"]
        .iter()
        .any(|scheme| value.starts_with(scheme))
}

/// Short single-line excerpt of a response body for error messages.
pub fn compact_text(value: &str) -> String {
    const LIMIT: usize = 180;
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(LIMIT)
        .collect()
}

/// Unix time in milliseconds, the unit used for queue and conflict timestamps.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Storage object key without surrounding slashes.
pub fn trim_object_path(path: &str) -> &str {
    path.trim().trim_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_become_none() {
        assert_eq!(non_empty_trimmed(None), None);
        assert_eq!(non_empty_trimmed(Some(" \t ".to_string())), None);
        assert_eq!(
            non_empty_trimmed(Some(" photos ".to_string())),
            Some("photos".to_string())
        );
    }

    #[test]
    fn only_http_schemes_are_urls() {
        assert!(is_http_url("http://localhost:54321"));
        assert!(is_http_url("https://api.lotbook.test"));
        assert!(!is_http_url("memory://lots/a.jpg"));
        assert!(!is_http_url("api.lotbook.test"));
    }

    #[test]
    fn compact_text_flattens_body() {
        assert_eq!(compact_text("  {\"message\":\n  \"denied\"}  "), "{\"message\": \"denied\"}");
        assert_eq!(compact_text(&"x".repeat(500)).len(), 180);
    }

    #[test]
    fn object_path_loses_outer_slashes() {
        assert_eq!(trim_object_path("/lots/l1/a.jpg/"), "lots/l1/a.jpg");
        assert_eq!(trim_object_path("lots/l1/a.jpg"), "lots/l1/a.jpg");
    }
}
