//! Shared formatting helpers for alert titles, recommendations and reports.

/// Format milliseconds as human-readable: `"0.4ms"`, `"120ms"`, `"2.5s"`, `"1.5m"`.
pub fn format_ms(ms: f64) -> String {
    if ms >= 60_000.0 {
        format!("{:.1}m", ms / 60_000.0)
    } else if ms >= 1000.0 {
        format!("{:.1}s", ms / 1000.0)
    } else if ms >= 1.0 {
        format!("{:.0}ms", ms)
    } else {
        format!("{:.1}ms", ms)
    }
}

/// Format megabytes: `"512MB"`, `"1.5GB"`.
pub fn format_mb(mb: f64) -> String {
    if mb >= 1024.0 {
        format!("{:.1}GB", mb / 1024.0)
    } else {
        format!("{:.0}MB", mb)
    }
}

/// Truncate string to at most `max_len` bytes with unicode ellipsis (`…`),
/// never splitting a character.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len.saturating_sub('…'.len_utf8());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

/// Normalize text for single-line display: newlines and tabs become spaces,
/// consecutive spaces collapse into one, ends are trimmed.
pub fn normalize_for_display(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut prev_space = false;
    for ch in s.trim().chars() {
        if ch.is_whitespace() {
            if !prev_space {
                result.push(' ');
            }
            prev_space = true;
        } else {
            result.push(ch);
            prev_space = false;
        }
    }
    result
}
