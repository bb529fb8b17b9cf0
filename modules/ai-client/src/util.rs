/// Truncate a string to at most `max_bytes` bytes at a character boundary.
pub fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    &s[..end]
}

/// Strip markdown code blocks from a response.
pub fn strip_code_blocks(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Strip one layer of wrapping quotes models sometimes add around prose.
pub fn strip_wrapping_quotes(response: &str) -> &str {
    let trimmed = response.trim();
    for (open, close) in [("\"", "\""), ("'", "'"), ("\\\"", "\\\""), ("\\'", "\\'")] {
        if trimmed.len() > open.len() + close.len()
            && trimmed.starts_with(open)
            && trimmed.ends_with(close)
        {
            return &trimmed[open.len()..trimmed.len() - close.len()];
        }
    }
    trimmed
}
