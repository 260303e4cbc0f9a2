//! Locate a JSON object inside free-form model output.

/// First top-level balanced `{...}` span of `text`.
///
/// Scanning starts at the first `{` and tracks brace depth across newlines.
/// Braces inside JSON string literals (including escaped quotes) do not
/// count. Nested objects stay part of the span; later objects are ignored.
/// Returns `None` when there is no `{` or the span never closes.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
