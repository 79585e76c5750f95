//! Pulling JSON out of free-form model text.

/// Body of the first fenced code block (```` ```json ```` or bare ```` ``` ````).
/// `None` when there is no complete block.
pub fn first_fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    // Skip the info string ("json", "JSON", ...) up to the end of the line.
    let body_start = match after_fence.find('\n') {
        Some(nl) if after_fence[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => nl + 1,
        _ => 0,
    };
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

/// First balanced `{ ... }` object in `text`, string-aware.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Fenced block first, then the first bare object.
pub fn find_json_value(text: &str) -> Option<serde_json::Value> {
    if let Some(block) = first_fenced_block(text) {
        if let Ok(value) = serde_json::from_str(block) {
            return Some(value);
        }
    }
    extract_json_object(text).and_then(|obj| serde_json::from_str(obj).ok())
}
