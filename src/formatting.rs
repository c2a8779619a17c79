//! Outbound message formatting helpers.

use chrono::NaiveDate;

/// Split `text` into chunks of at most `max_len` bytes, breaking only at
/// line boundaries. A single line longer than the limit is emitted as its
/// own chunk rather than cut in half.
pub fn chunk_lines(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut buffer = String::new();
    for line in text.lines() {
        let needed = if buffer.is_empty() {
            line.len()
        } else {
            buffer.len() + 1 + line.len()
        };
        if !buffer.is_empty() && needed > max_len {
            chunks.push(std::mem::take(&mut buffer));
        }
        if !buffer.is_empty() {
            buffer.push('\n');
        }
        buffer.push_str(line);
    }
    if !buffer.is_empty() {
        chunks.push(buffer);
    }
    chunks
}

/// Render a date the way users here expect it (day first).
pub fn format_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

/// Truncate to at most `max_chars` characters, appending an ellipsis when
/// anything was cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(chunk_lines("hola", 100), vec!["hola".to_string()]);
    }

    #[test]
    fn chunks_respect_max_len_and_line_boundaries() {
        let lines: Vec<String> = (0..50).map(|i| format!("• client {i} — 3 days")).collect();
        let text = lines.join("\n");
        let chunks = chunk_lines(&text, 120);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 120, "chunk over limit: {}", chunk.len());
            for line in chunk.lines() {
                assert!(lines.iter().any(|l| l == line), "line was split: {line:?}");
            }
        }
        // Nothing lost, nothing duplicated.
        let rejoined: Vec<&str> = chunks.iter().flat_map(|c| c.lines()).collect();
        assert_eq!(rejoined.len(), lines.len());
    }

    #[test]
    fn oversized_line_is_kept_whole() {
        let long = "x".repeat(300);
        let text = format!("short\n{long}\ntail");
        let chunks = chunk_lines(&text, 100);
        assert!(chunks.iter().any(|c| c == &long));
    }

    #[test]
    fn date_renders_day_first() {
        let date = NaiveDate::from_ymd_opt(2025, 7, 3).unwrap();
        assert_eq!(format_date(date), "03/07/2025");
    }

    #[test]
    fn truncate_appends_ellipsis() {
        assert_eq!(truncate("corto", 10), "corto");
        assert_eq!(truncate("abcdefghij", 4), "abcd…");
    }
}
