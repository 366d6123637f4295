//! Listing requirement: the parsed input file that drives one generation job.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::AppError;

/// First non-empty line of every requirement file.
pub const MARKER: &str = "===Listing Requirements===";

/// Keyword counts outside this range are reported but do not stop generation.
pub const EXPECTED_KEYWORDS: std::ops::RangeInclusive<usize> = 15..=20;

static KEYWORD_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]{1,2}[.)]|[-*•])\s*").expect("valid regex"));

const BRAND_LABELS: [&str; 2] = ["Brand:", "品牌名:"];
const CATEGORY_LABELS: [&str; 2] = ["Category:", "分类:"];
const CATEGORY_HEADINGS: [&str; 2] = ["# Category", "# 分类"];
const KEYWORD_HEADINGS: [&str; 2] = ["# Keywords", "# 关键词库"];

/// Immutable once parsed.
#[derive(Debug, Clone, Default)]
pub struct Requirement {
    pub source: PathBuf,
    /// Everything after the marker line, verbatim.
    pub body: String,
    pub brand: String,
    pub category: String,
    pub keywords: Vec<String>,
    pub warnings: Vec<String>,
}

impl Requirement {
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(path, &raw)
    }

    pub fn parse(source: &Path, raw: &str) -> Result<Self, AppError> {
        let body = body_after_marker(raw).ok_or_else(|| {
            AppError::Requirement(format!(
                "{} is not a listing requirement (first line must be {MARKER})",
                source.display()
            ))
        })?;

        let mut req = Requirement {
            source: source.to_path_buf(),
            brand: parse_brand(&body),
            category: parse_category(&body),
            keywords: parse_keywords(&body),
            body,
            warnings: Vec::new(),
        };
        if !EXPECTED_KEYWORDS.contains(&req.keywords.len()) {
            req.warnings.push(format!(
                "keyword count {} is outside {}-{}, continuing",
                req.keywords.len(),
                EXPECTED_KEYWORDS.start(),
                EXPECTED_KEYWORDS.end()
            ));
        }
        Ok(req)
    }

    /// Brand and category are required to build prompts and validate output.
    pub fn ensure_complete(&self) -> Result<(), AppError> {
        if self.brand.trim().is_empty() {
            return Err(AppError::Requirement(format!(
                "{}: missing brand",
                self.source.display()
            )));
        }
        if self.category.trim().is_empty() {
            return Err(AppError::Requirement(format!(
                "{}: missing category",
                self.source.display()
            )));
        }
        Ok(())
    }
}

pub fn is_requirement(raw: &str) -> bool {
    body_after_marker(raw).is_some()
}

fn body_after_marker(raw: &str) -> Option<String> {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let mut lines = raw.lines();
    for line in lines.by_ref() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line != MARKER {
            return None;
        }
        break;
    }
    Some(lines.collect::<Vec<_>>().join("\n"))
}

fn strip_any<'a>(line: &'a str, labels: &[&str]) -> Option<&'a str> {
    labels
        .iter()
        .find_map(|label| line.strip_prefix(label))
        .map(str::trim)
}

fn parse_brand(body: &str) -> String {
    body.lines()
        .find_map(|l| strip_any(l.trim(), &BRAND_LABELS))
        .unwrap_or_default()
        .to_string()
}

fn parse_category(body: &str) -> String {
    let lines: Vec<&str> = body.lines().map(str::trim).collect();
    for (i, line) in lines.iter().enumerate() {
        if let Some(value) = strip_any(line, &CATEGORY_LABELS) {
            return value.to_string();
        }
        if CATEGORY_HEADINGS.iter().any(|h| line.starts_with(h)) {
            return match lines[i + 1..].iter().find(|l| !l.is_empty()) {
                Some(next) if !next.starts_with('#') => next.to_string(),
                _ => String::new(),
            };
        }
    }
    String::new()
}

fn parse_keywords(body: &str) -> Vec<String> {
    let mut lines = body.lines().map(str::trim);
    if !lines
        .by_ref()
        .any(|l| KEYWORD_HEADINGS.iter().any(|h| l.starts_with(h)))
    {
        return Vec::new();
    }

    lines
        .filter(|l| !l.is_empty())
        .take_while(|l| !l.starts_with('#'))
        .map(|l| KEYWORD_PREFIX.replace(l, "").trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}
