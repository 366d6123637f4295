//! Text parsers and cleaners for model output.
//!
//! Everything here is pure: no I/O, no logging. The section engine and the
//! bilingual orchestrator both lean on these helpers.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::generation::bounds::char_len;

static BULLET_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*•]|[0-9]{1,2}[.)])\s*").expect("valid regex"));
static INLINE_BULLET_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\s)(?:[-*•]|([0-9]{1,2})[.)](?:\s|$))\s*").expect("valid regex")
});
static LINE_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(title|标题|search\s*terms|搜索词)\s*[:：]\s*").expect("valid regex")
});
static CATEGORY_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(category|分类)\s*[:：]\s*").expect("valid regex"));
static KEYWORD_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(keywords?|关键词)\s*[:：]\s*").expect("valid regex"));

/// Filler phrases appended after keywords run out while padding a short item.
pub const PAD_FILLERS: [&str; 3] = [
    "for everyday use",
    "for classroom decoration",
    "for party hanging display",
];

// ────────────────────────────────────────────────────────────────────────────
// Normalization
// ────────────────────────────────────────────────────────────────────────────

/// Unifies newline variants, un-escapes literal `\n` in single-line payloads,
/// turns `<br>` into newlines and strips a surrounding code fence.
pub fn normalize_model_text(text: &str) -> String {
    let mut t = text
        .trim()
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace(['\u{2028}', '\u{2029}'], "\n");

    if !t.contains('\n') && t.contains("\\n") {
        t = t.replace("\\n", "\n");
    }
    t = t
        .replace("<br/>", "\n")
        .replace("<br />", "\n")
        .replace("<br>", "\n");

    if let Some(rest) = t.strip_prefix("```") {
        let mut body = rest.trim();
        for tag in ["text", "markdown"] {
            if body.len() >= tag.len()
                && body.is_char_boundary(tag.len())
                && body[..tag.len()].eq_ignore_ascii_case(tag)
            {
                body = body[tag.len()..].trim();
            }
        }
        if let Some(end) = body.rfind("```") {
            body = body[..end].trim();
        }
        t = body.to_string();
    }
    t
}

/// First non-empty line of the normalized text.
pub fn normalize_single_line(text: &str) -> String {
    normalize_model_text(text)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string()
}

pub fn strip_bullet_prefix(line: &str) -> &str {
    match BULLET_PREFIX.find(line) {
        Some(m) => line[m.end()..].trim(),
        None => line.trim(),
    }
}

pub fn clean_title_line(text: &str) -> String {
    let line = normalize_single_line(text);
    let line = strip_bullet_prefix(&line);
    LINE_LABEL.replace(line, "").trim().to_string()
}

pub fn clean_search_terms_line(text: &str) -> String {
    let line = normalize_single_line(text);
    LINE_LABEL.replace(&line, "").trim().to_string()
}

pub fn clean_bullet_line(text: &str) -> String {
    strip_bullet_prefix(&normalize_single_line(text)).to_string()
}

pub fn clean_category_line(text: &str) -> String {
    let line = normalize_single_line(text);
    CATEGORY_LABEL.replace(&line, "").trim().to_string()
}

pub fn clean_keyword_line(text: &str) -> String {
    let line = normalize_single_line(text);
    let line = KEYWORD_LABEL.replace(&line, "");
    strip_bullet_prefix(&line).to_string()
}

// ────────────────────────────────────────────────────────────────────────────
// Line and paragraph splitting
// ────────────────────────────────────────────────────────────────────────────

pub fn count_non_empty_lines(text: &str) -> usize {
    text.lines().filter(|l| !l.trim().is_empty()).count()
}

/// Resolves `text` to exactly `expected` bullet lines.
///
/// Accepts one item per line with or without `1.`/`1)`/`-`/`*`/`•` prefixes,
/// or a single line that splits into exactly `expected` parts on inline
/// markers or on semicolons.
pub fn parse_bullets(text: &str, expected: usize) -> Result<Vec<String>, String> {
    let lines: Vec<String> = text
        .lines()
        .map(strip_bullet_prefix)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    if lines.len() == expected {
        return Ok(lines);
    }
    if lines.len() == 1 {
        let inline = split_inline_bullets(&lines[0]);
        if inline.len() == expected {
            return Ok(inline);
        }
        let parts = split_by_separator(&lines[0], ';');
        if parts.len() == expected {
            return Ok(parts);
        }
    }
    Err(format!("expected {expected} bullets, got {}", lines.len()))
}

/// Splits one line on embedded bullet markers. Numbered markers only count
/// while they run in sequence from 1 (or 2, when the line's own "1." prefix
/// was already stripped), so quantities like "Pack of 12." stay inside their
/// item. Text ahead of the first marker counts as an item; fewer than two
/// items yields nothing.
pub fn split_inline_bullets(line: &str) -> Vec<String> {
    let line = line.trim();
    let mut last_number: Option<u32> = None;
    let marks: Vec<(usize, usize)> = INLINE_BULLET_MARKER
        .captures_iter(line)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            if let Some(number) = caps.get(1) {
                let n = number.as_str().parse::<u32>().ok()?;
                let in_sequence = match last_number {
                    None => n == 1 || n == 2,
                    Some(prev) => n == prev + 1,
                };
                if !in_sequence {
                    return None;
                }
                last_number = Some(n);
            }
            Some((whole.start(), whole.end()))
        })
        .collect();
    let Some(&(first, _)) = marks.first() else {
        return Vec::new();
    };

    let mut items = Vec::with_capacity(marks.len() + 1);
    let lead = line[..first].trim();
    if !lead.is_empty() {
        items.push(lead.to_string());
    }
    for (i, &(_, start)) in marks.iter().enumerate() {
        let end = marks.get(i + 1).map_or(line.len(), |&(next, _)| next);
        let part = strip_bullet_prefix(&line[start..end]);
        if !part.is_empty() {
            items.push(part.to_string());
        }
    }
    if items.len() < 2 {
        return Vec::new();
    }
    items
}

pub fn split_by_separator(line: &str, sep: char) -> Vec<String> {
    if !line.contains(sep) {
        return Vec::new();
    }
    line.split(sep)
        .map(strip_bullet_prefix)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Paragraphs separated by blank lines; lines inside a paragraph are joined
/// with a single space.
pub fn split_by_blank_lines(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut buf: Vec<&str> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !buf.is_empty() {
                out.push(buf.join(" "));
                buf.clear();
            }
            continue;
        }
        buf.push(line);
    }
    if !buf.is_empty() {
        out.push(buf.join(" "));
    }
    out
}

pub fn parse_paragraphs(text: &str, expected: usize) -> Result<Vec<String>, String> {
    let paragraphs = split_by_blank_lines(text);
    if paragraphs.len() != expected {
        return Err(format!(
            "expected {expected} description paragraphs, got {}",
            paragraphs.len()
        ));
    }
    Ok(paragraphs)
}

// ────────────────────────────────────────────────────────────────────────────
// JSON extraction
// ────────────────────────────────────────────────────────────────────────────

/// Returns the first balanced top-level `{...}` in `s`, ignoring braces that
/// appear inside JSON strings.
pub fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &ch) in bytes.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            _ if in_string => {}
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&s[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

// ────────────────────────────────────────────────────────────────────────────
// Length normalization
// ────────────────────────────────────────────────────────────────────────────

/// Drops trailing whole words until `s` fits in `max` chars.
///
/// Returns `None` when not even the first word fits; the caller keeps the
/// original text so it fails validation and goes to repair.
pub fn trim_to_max_by_words(s: &str, max: usize) -> Option<String> {
    let s = s.trim();
    if max == 0 || char_len(s) <= max {
        return Some(s.to_string());
    }
    let mut out = String::new();
    for word in s.split_whitespace() {
        let extra = if out.is_empty() { 0 } else { 1 };
        if char_len(&out) + extra + char_len(word) > max {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    (!out.is_empty()).then_some(out)
}

/// Appends unused `keywords`, then [`PAD_FILLERS`], one unit at a time, until
/// `s` reaches `min` chars. A unit that would push past `max` is skipped.
pub fn pad_to_min_by_keywords(s: &str, min: usize, max: usize, keywords: &[String]) -> String {
    let mut out = s.trim().to_string();
    if min == 0 || char_len(&out) >= min {
        return out;
    }

    let keyword_units = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty());
    let mut candidates: Vec<&str> = Vec::new();
    for kw in keyword_units {
        if !contains_ignore_case(&out, kw) {
            candidates.push(kw);
        }
    }
    candidates.extend(PAD_FILLERS);

    for unit in candidates {
        let next = format!("{out} {unit}").trim().to_string();
        if max > 0 && char_len(&next) > max {
            continue;
        }
        out = next;
        if char_len(&out) >= min {
            break;
        }
    }
    out
}

// ────────────────────────────────────────────────────────────────────────────
// Misc
// ────────────────────────────────────────────────────────────────────────────

pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Trims, drops empties and removes duplicates while keeping first-seen order.
pub fn dedupe_issues(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_unifies_newlines_and_strips_fence() {
        let raw = "```markdown\r\nline one\rline two\u{2028}line three\n```";
        assert_eq!(normalize_model_text(raw), "line one\nline two\nline three");
    }

    #[test]
    fn test_normalize_unescapes_literal_newlines_only_in_single_line() {
        assert_eq!(normalize_model_text(r"a\nb"), "a\nb");
        assert_eq!(normalize_model_text("a\\nb\nc"), "a\\nb\nc");
        assert_eq!(normalize_model_text("a<br>b<br />c"), "a\nb\nc");
    }

    #[test]
    fn test_bullet_parsing_is_prefix_invariant() {
        let mixed = "1) first item\n- second item\n* third item\nfourth item\n• fifth item";
        let plain = "first item\nsecond item\nthird item\nfourth item\nfifth item";
        assert_eq!(parse_bullets(mixed, 5), parse_bullets(plain, 5));
        assert_eq!(parse_bullets(mixed, 5).unwrap()[0], "first item");
    }

    #[test]
    fn test_inline_markers_split_into_n_items() {
        let line = "1. alpha bead 2. beta bead 3. gamma bead";
        assert_eq!(
            parse_bullets(line, 3).unwrap(),
            vec!["alpha bead", "beta bead", "gamma bead"]
        );
    }

    #[test]
    fn test_inline_split_ignores_quantities_and_decimals() {
        let line = "1. Pack of 12. Lasts 1.5 hours 2. Warm glow 3. Folds flat";
        assert_eq!(
            parse_bullets(line, 3).unwrap(),
            vec!["Pack of 12. Lasts 1.5 hours", "Warm glow", "Folds flat"]
        );
        assert!(split_inline_bullets("Pack of 12. Lasts 1.5 hours").is_empty());
    }

    #[test]
    fn test_semicolon_fallback_split() {
        assert_eq!(
            parse_bullets("soft cotton; machine washable; gift ready", 3).unwrap(),
            vec!["soft cotton", "machine washable", "gift ready"]
        );
    }

    #[test]
    fn test_bullet_count_mismatch_reports_counts() {
        let err = parse_bullets("a\nb\nc\nd", 5).unwrap_err();
        assert_eq!(err, "expected 5 bullets, got 4");
    }

    #[test]
    fn test_paragraphs_join_wrapped_lines() {
        let text = "first line\nstill first\n\n\nsecond para\n";
        assert_eq!(
            parse_paragraphs(text, 2).unwrap(),
            vec!["first line still first", "second para"]
        );
        assert!(parse_paragraphs(text, 3).is_err());
    }

    #[test]
    fn test_extract_json_object_from_prose() {
        let raw = r#"Here is the result: {"bullets":["a {b}","c \"}\""]} thanks"#;
        assert_eq!(
            extract_json_object(raw),
            Some(r#"{"bullets":["a {b}","c \"}\""]}"#)
        );
        assert_eq!(extract_json_object("no object here"), None);
        assert_eq!(extract_json_object("{\"open\": true"), None);
    }

    #[test]
    fn test_clean_lines_strip_labels() {
        assert_eq!(clean_title_line("Title: Foo Bar"), "Foo Bar");
        assert_eq!(clean_search_terms_line("search terms： a b c"), "a b c");
        assert_eq!(clean_category_line("分类：派对用品"), "派对用品");
        assert_eq!(clean_keyword_line("Keyword: 3. paper lantern"), "paper lantern");
        assert_eq!(clean_bullet_line("\n- durable\nextra"), "durable");
    }

    #[test]
    fn test_trim_by_words_never_cuts_mid_word() {
        assert_eq!(trim_to_max_by_words("a bb ccc", 4).as_deref(), Some("a bb"));
        assert_eq!(trim_to_max_by_words("short", 10).as_deref(), Some("short"));
        assert_eq!(trim_to_max_by_words("superlongword", 5), None);
    }

    #[test]
    fn test_pad_prefers_unused_keywords_then_fillers() {
        let keywords = vec!["alpha".to_string(), "lantern".to_string()];
        assert_eq!(pad_to_min_by_keywords("alpha", 10, 40, &keywords), "alpha lantern");
        let padded = pad_to_min_by_keywords("alpha", 20, 40, &keywords);
        assert_eq!(padded, "alpha lantern for everyday use");
        assert_eq!(pad_to_min_by_keywords("alpha", 20, 6, &keywords), "alpha");
        assert_eq!(pad_to_min_by_keywords("long enough", 5, 20, &keywords), "long enough");
    }

    #[test]
    fn test_dedupe_keeps_first_order() {
        let out = dedupe_issues(vec!["b".into(), " a ".into(), "b".into(), "".into()]);
        assert_eq!(out, vec!["b", "a"]);
    }
}
