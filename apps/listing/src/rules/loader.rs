//! Loads and validates the four section rule files from a directory.
//!
//! Missing files are written from the embedded defaults first; existing files
//! are never overwritten.

use std::path::Path;

use tracing::info;

use crate::errors::AppError;
use crate::rules::{Protocol, RepairGranularity, Section, SectionRule, SectionRules};

const DEFAULT_TITLE: &str = include_str!("defaults/title.yaml");
const DEFAULT_BULLETS: &str = include_str!("defaults/bullets.yaml");
const DEFAULT_DESCRIPTION: &str = include_str!("defaults/description.yaml");
const DEFAULT_SEARCH_TERMS: &str = include_str!("defaults/search_terms.yaml");

fn default_text(section: Section) -> &'static str {
    match section {
        Section::Title => DEFAULT_TITLE,
        Section::Bullets => DEFAULT_BULLETS,
        Section::Description => DEFAULT_DESCRIPTION,
        Section::SearchTerms => DEFAULT_SEARCH_TERMS,
    }
}

/// Writes any missing rule file from the embedded defaults.
pub fn ensure_defaults(dir: &Path) -> Result<(), AppError> {
    std::fs::create_dir_all(dir)?;
    for section in Section::ALL {
        let path = dir.join(section.file_name());
        if !path.exists() {
            std::fs::write(&path, default_text(section))?;
            info!("Wrote default rule file {}", path.display());
        }
    }
    Ok(())
}

pub fn load_rules(dir: &Path) -> Result<SectionRules, AppError> {
    ensure_defaults(dir)?;
    let load = |section: Section| -> Result<SectionRule, AppError> {
        let path = dir.join(section.file_name());
        let raw = std::fs::read_to_string(&path)?;
        parse_rule(section, &raw)
            .map_err(|e| AppError::Rules(format!("{}: {e}", path.display())))
    };

    Ok(SectionRules {
        title: load(Section::Title)?,
        bullets: load(Section::Bullets)?,
        description: load(Section::Description)?,
        search_terms: load(Section::SearchTerms)?,
    })
}

/// Parses and validates one rule file. Errors are plain messages; the caller
/// adds the path.
pub fn parse_rule(section: Section, raw: &str) -> Result<SectionRule, String> {
    let mut rule: SectionRule = serde_yaml::from_str(raw).map_err(|e| e.to_string())?;
    rule.raw = raw.to_string();
    validate_rule(section, &rule)?;
    Ok(rule)
}

pub fn validate_rule(section: Section, rule: &SectionRule) -> Result<(), String> {
    if rule.section.trim() != section.as_str() {
        return Err(format!(
            "section is {:?}, expected {:?}",
            rule.section,
            section.as_str()
        ));
    }
    if rule.instruction.trim().is_empty() {
        return Err("instruction is empty".to_string());
    }

    match section {
        Section::Title | Section::SearchTerms if rule.output.lines != 1 => {
            return Err(format!("output.lines must be 1, got {}", rule.output.lines));
        }
        Section::Bullets if rule.output.lines == 0 => {
            return Err("output.lines must be positive".to_string());
        }
        Section::Description if rule.output.paragraphs == 0 => {
            return Err("output.paragraphs must be positive".to_string());
        }
        _ => {}
    }

    let c = &rule.constraints;
    if c.min_chars_per_line.value > 0
        && c.max_chars_per_line.value > 0
        && c.min_chars_per_line.value > c.max_chars_per_line.value
    {
        return Err(format!(
            "min_chars_per_line {} exceeds max_chars_per_line {}",
            c.min_chars_per_line.value, c.max_chars_per_line.value
        ));
    }

    if rule.protocol() == Protocol::JsonLines && section != Section::Bullets {
        return Err("json_lines protocol is only supported for bullets".to_string());
    }
    if rule.repair_granularity() == RepairGranularity::Item && rule.protocol() != Protocol::JsonLines {
        return Err("item repair requires the json_lines protocol".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults_are_valid() {
        for section in Section::ALL {
            let rule = parse_rule(section, default_text(section)).unwrap();
            assert_eq!(rule.section, section.as_str());
            assert!(!rule.system_prompt().is_empty());
        }
    }

    #[test]
    fn test_descriptive_keys_reach_the_prompt_only() {
        let raw = "version: 2\nsection: search_terms\nlanguage: en\npurpose: backend terms\noutput:\n  format: plain_text\n  lines: 1\nconstraints:\n  max_chars:\n    value: 250\n    hard: true\nforbidden:\n  - brand names\ninstruction: write terms\n";
        let rule = parse_rule(Section::SearchTerms, raw).unwrap();
        assert_eq!(rule.constraints.max_chars.value, 250);
        assert!(rule.system_prompt().contains("- brand names"));
        assert!(rule.system_prompt().contains("purpose: backend terms"));
    }

    #[test]
    fn test_load_bootstraps_missing_files_without_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        let custom = DEFAULT_TITLE.replace("value: 200", "value: 120");
        std::fs::write(dir.path().join("title.yaml"), &custom).unwrap();

        let rules = load_rules(dir.path()).unwrap();

        assert_eq!(rules.title.constraints.max_chars.value, 120);
        assert_eq!(rules.bullet_count(), 5);
        assert_eq!(rules.description_paragraphs(), 2);
        for section in Section::ALL {
            assert!(dir.path().join(section.file_name()).exists());
        }
    }

    #[test]
    fn test_invalid_rule_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("title.yaml"),
            "section: title\ninstruction: x\noutput:\n  lines: 2\n",
        )
        .unwrap();
        let err = load_rules(dir.path()).unwrap_err().to_string();
        assert!(err.contains("title.yaml"));
        assert!(err.contains("output.lines must be 1"));
    }

    #[test]
    fn test_validate_rule_cases() {
        let base = "instruction: x\n";
        assert!(parse_rule(Section::Title, base).is_err());

        let bullets = "section: bullets\ninstruction: x\noutput:\n  lines: 5\nconstraints:\n  min_chars_per_line:\n    value: 20\n  max_chars_per_line:\n    value: 10\n";
        assert!(parse_rule(Section::Bullets, bullets)
            .unwrap_err()
            .contains("exceeds"));

        let desc = "section: description\ninstruction: x\noutput:\n  paragraphs: 0\n";
        assert!(parse_rule(Section::Description, desc).is_err());

        let item_text = "section: bullets\ninstruction: x\noutput:\n  lines: 5\nexecution:\n  repair:\n    granularity: item\n";
        assert!(parse_rule(Section::Bullets, item_text)
            .unwrap_err()
            .contains("json_lines"));

        let search = "section: search_terms\ninstruction: x\noutput:\n  lines: 1\n";
        assert!(parse_rule(Section::SearchTerms, search).is_ok());
    }
}
