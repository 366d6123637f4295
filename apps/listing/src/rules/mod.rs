//! Section rules: one YAML file per section, read-only for a whole job.
//!
//! The raw file text doubles as the section's system prompt; the parsed form
//! drives validation (line/paragraph counts, char bounds, keyword coverage) and
//! the execution policy (protocol, repair granularity, escalation fallback).

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::errors::AppError;

pub mod loader;

// ────────────────────────────────────────────────────────────────────────────
// Section
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Title,
    Bullets,
    Description,
    SearchTerms,
}

impl Section {
    /// Generation order. Later prompts embed earlier outputs.
    pub const ALL: [Section; 4] = [
        Section::Title,
        Section::Bullets,
        Section::Description,
        Section::SearchTerms,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Title => "title",
            Section::Bullets => "bullets",
            Section::Description => "description",
            Section::SearchTerms => "search_terms",
        }
    }

    /// Human wording used in repair instructions.
    pub fn label(&self) -> &'static str {
        match self {
            Section::Title => "title",
            Section::Bullets => "bullet points",
            Section::Description => "product description",
            Section::SearchTerms => "search terms",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.yaml", self.as_str())
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Section::ALL
            .into_iter()
            .find(|section| section.as_str() == s.trim())
            .ok_or_else(|| AppError::Rules(format!("unknown section: {s}")))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Rule schema
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    Text,
    JsonLines,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairGranularity {
    #[default]
    Whole,
    Item,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputSpec {
    pub lines: usize,
    pub paragraphs: usize,
}

/// A numeric constraint; `0` means unset.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct IntConstraint {
    pub value: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Constraints {
    pub max_chars: IntConstraint,
    pub min_chars_per_line: IntConstraint,
    pub max_chars_per_line: IntConstraint,
    pub must_contain_top_n_keywords: IntConstraint,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GenerationSpec {
    pub protocol: Protocol,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RepairSpec {
    pub granularity: RepairGranularity,
    pub item_json_field: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FallbackSpec {
    /// Skip model escalation on attempts that follow a length violation.
    pub disable_thinking_on_length_error: bool,
}

impl Default for FallbackSpec {
    fn default() -> Self {
        Self {
            disable_thinking_on_length_error: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExecutionSpec {
    pub generation: GenerationSpec,
    pub repair: RepairSpec,
    pub fallback: FallbackSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SectionRule {
    pub section: String,
    pub output: OutputSpec,
    pub constraints: Constraints,
    pub execution: ExecutionSpec,
    pub instruction: String,
    /// Original YAML text, sent verbatim as the system prompt. Descriptive
    /// keys (`purpose`, `forbidden`, ...) reach the model only through it.
    #[serde(skip)]
    pub raw: String,
}

impl SectionRule {
    pub fn system_prompt(&self) -> &str {
        self.raw.trim()
    }

    pub fn protocol(&self) -> Protocol {
        self.execution.generation.protocol
    }

    pub fn repair_granularity(&self) -> RepairGranularity {
        self.execution.repair.granularity
    }

    /// JSON key carrying one repaired item; `bullet` when unset.
    pub fn item_json_field(&self) -> &str {
        match self.execution.repair.item_json_field.trim() {
            "" => "bullet",
            field => field,
        }
    }

    pub fn disable_escalation_on_length_error(&self) -> bool {
        self.execution.fallback.disable_thinking_on_length_error
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Rule set
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct SectionRules {
    pub title: SectionRule,
    pub bullets: SectionRule,
    pub description: SectionRule,
    pub search_terms: SectionRule,
}

impl SectionRules {
    pub fn get(&self, section: Section) -> &SectionRule {
        match section {
            Section::Title => &self.title,
            Section::Bullets => &self.bullets,
            Section::Description => &self.description,
            Section::SearchTerms => &self.search_terms,
        }
    }

    pub fn bullet_count(&self) -> usize {
        self.bullets.output.lines
    }

    pub fn description_paragraphs(&self) -> usize {
        self.description.output.paragraphs
    }
}
