use serde_json::Value;

/// Marker appended to a truncated preview.
pub const TRUNCATION_MARKER: char = '…';

/// Bound `text` to at most `max_chars` characters, cutting on a char boundary.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((byte_idx, _)) => {
            let mut out = text[..byte_idx].to_string();
            out.push(TRUNCATION_MARKER);
            out
        }
    }
}

/// Preview a JSON value: strings are shown raw, everything else as compact JSON.
pub fn preview_value(value: &Value, max_chars: usize) -> String {
    match value {
        Value::String(s) => preview(s, max_chars),
        other => preview(&other.to_string(), max_chars),
    }
}
