/// Resolve a dot-notation path in a `serde_json::Value`.
///
/// - `"title"` → `value["title"]`
/// - `"title.nb"` → `value["title"]["nb"]`
///
/// Returns `None` if any segment is missing. An empty path is the value itself.
pub fn resolve_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    if path.is_empty() {
        return Some(value);
    }
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-'
}

/// Whether `id` is a non-empty string made of `[-0-9A-Za-z]`.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(is_id_char)
}

/// Strip every character outside `[-0-9A-Za-z]`. Used on ids that come
/// from clients before they are placed in a filter.
pub fn sanitize_id(id: &str) -> String {
    id.chars().filter(|c| is_id_char(*c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_nested_paths() {
        let v = serde_json::json!({"title": {"nb": "tittel"}});
        assert_eq!(resolve_path(&v, "title.nb"), Some(&serde_json::json!("tittel")));
        assert_eq!(resolve_path(&v, "title.en"), None);
        assert_eq!(resolve_path(&v, ""), Some(&v));
    }

    #[test]
    fn sanitizes_ids() {
        assert_eq!(sanitize_id("abc-123"), "abc-123");
        assert_eq!(sanitize_id("{\"$gt\": \"\"}"), "gt");
        assert_eq!(sanitize_id("a b/c"), "abc");
        assert!(is_valid_id("abc-123"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("a.b"));
    }
}
