use serde::Deserialize;

/// Parses a model reply as JSON. Accepts a bare object, a fenced block, or an
/// object embedded in surrounding prose.
pub fn parse_json_output<T: for<'a> Deserialize<'a>>(text: &str) -> Result<T, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("empty JSON output".to_string());
    }

    let mut last_error = match serde_json::from_str::<T>(trimmed) {
        Ok(parsed) => return Ok(parsed),
        Err(err) => err.to_string(),
    };

    if let Some(stripped) = strip_code_fence(trimmed) {
        match serde_json::from_str::<T>(&stripped) {
            Ok(parsed) => return Ok(parsed),
            Err(err) => last_error = err.to_string(),
        }
    }

    if let Some(embedded) = outermost_object(trimmed) {
        match serde_json::from_str::<T>(embedded) {
            Ok(parsed) => return Ok(parsed),
            Err(err) => last_error = err.to_string(),
        }
    }

    Err(format!("failed to parse JSON output: {last_error}"))
}

fn strip_code_fence(text: &str) -> Option<String> {
    let text = text.trim();
    if !text.starts_with("```") {
        return None;
    }

    let mut lines = text.lines();
    let _first = lines.next()?;
    let mut body = Vec::new();
    for line in lines {
        if line.trim_start().starts_with("```") {
            break;
        }
        body.push(line);
    }
    Some(body.join("\n"))
}

fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// First `max_chars` characters of `text`, for log lines and rationales.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let mut excerpt: String = text.trim().chars().take(max_chars).collect();
    if text.trim().chars().count() > max_chars {
        excerpt.push('…');
    }
    excerpt
}
