//! Plain-text section engine.
//!
//! One section runs ATTEMPT → VALIDATE → REPAIR until the output passes or the
//! retry budget is spent. Each failure appends the model's output and a repair
//! instruction to the section's history, so the next attempt revises instead
//! of starting over.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::errors::AppError;
use crate::generation::backoff::{run_with_backoff, Attempt};
use crate::generation::bounds::CharBounds;
use crate::generation::history::ConversationHistory;
use crate::generation::prompts::{build_section_repair_prompt, build_section_user_prompt};
use crate::generation::text::{
    clean_search_terms_line, clean_title_line, contains_ignore_case, count_non_empty_lines,
    dedupe_issues, normalize_model_text, parse_bullets, parse_paragraphs,
};
use crate::generation::GenerationOptions;
use crate::llm_client::GenerationRequest;
use crate::models::document::ListingDocument;
use crate::models::requirement::Requirement;
use crate::rules::{Section, SectionRule};

/// Outcome of validating one section output.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SectionReport {
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    /// At least one issue is a length violation.
    pub length_failure: bool,
}

impl SectionReport {
    pub fn passed(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Validated section output with the latency of the attempt that produced it.
#[derive(Debug, Clone)]
pub struct SectionOutput {
    pub text: String,
    pub latency_ms: u64,
}

/// Checks normalized section text against its rule.
pub fn validate_section_text(
    section: Section,
    text: &str,
    rule: &SectionRule,
    req: &Requirement,
    tolerance: usize,
) -> SectionReport {
    let mut report = SectionReport::default();
    let c = &rule.constraints;

    match section {
        Section::Title => {
            let line = clean_title_line(text);
            if line.is_empty() {
                report.issues.push("title is empty".to_string());
            } else {
                let bounds = CharBounds::resolve(0, c.max_chars.value, tolerance);
                report.length_failure |=
                    bounds.check("title", &line, &mut report.issues, &mut report.warnings);
                let top_n = c.must_contain_top_n_keywords.value.min(req.keywords.len());
                for kw in &req.keywords[..top_n] {
                    if !contains_ignore_case(&line, kw) {
                        report
                            .issues
                            .push(format!("title is missing top keyword \"{kw}\""));
                    }
                }
            }
        }
        Section::Bullets => match parse_bullets(text, rule.output.lines) {
            Ok(bullets) => {
                let bounds = CharBounds::resolve(
                    c.min_chars_per_line.value,
                    c.max_chars_per_line.value,
                    tolerance,
                );
                for (i, bullet) in bullets.iter().enumerate() {
                    report.length_failure |= bounds.check(
                        &format!("bullet {}", i + 1),
                        bullet,
                        &mut report.issues,
                        &mut report.warnings,
                    );
                }
            }
            Err(issue) => report.issues.push(issue),
        },
        Section::Description => {
            if let Err(issue) = parse_paragraphs(text, rule.output.paragraphs) {
                report.issues.push(issue);
            }
        }
        Section::SearchTerms => {
            if text.trim().is_empty() {
                report.issues.push("search terms are empty".to_string());
            } else {
                let lines = count_non_empty_lines(text);
                if lines != rule.output.lines {
                    report.issues.push(format!(
                        "search terms must be {} line(s), got {lines}",
                        rule.output.lines
                    ));
                }
                let bounds = CharBounds::resolve(0, c.max_chars.value, tolerance);
                report.length_failure |=
                    bounds.check("search terms", text, &mut report.issues, &mut report.warnings);
            }
        }
    }

    report.issues = dedupe_issues(std::mem::take(&mut report.issues));
    report
}

/// Writes validated section text into `doc`.
pub fn apply_section(
    doc: &mut ListingDocument,
    section: Section,
    text: &str,
    rule: &SectionRule,
) -> Result<(), AppError> {
    match section {
        Section::Title => doc.title = clean_title_line(text),
        Section::Bullets => {
            doc.bullets = parse_bullets(text, rule.output.lines)
                .map_err(|issue| AppError::generation(section.as_str(), issue))?;
        }
        Section::Description => {
            doc.description = parse_paragraphs(text, rule.output.paragraphs)
                .map_err(|issue| AppError::generation(section.as_str(), issue))?;
        }
        Section::SearchTerms => doc.search_terms = clean_search_terms_line(text),
    }
    Ok(())
}

struct SectionAttempt<'a> {
    opts: &'a GenerationOptions,
    section: Section,
    rule: &'a SectionRule,
    user: String,
    history: ConversationHistory,
    last_length_failure: bool,
}

#[async_trait]
impl Attempt for SectionAttempt<'_> {
    type Output = SectionOutput;
    type Error = String;

    async fn attempt(&mut self, n: u32) -> Result<SectionOutput, String> {
        let label = self.section.as_str();
        let suppressed = self.last_length_failure && self.rule.disable_escalation_on_length_error();
        let request = GenerationRequest {
            model: self.opts.model_for_attempt(label, n, suppressed),
            system: self.rule.system_prompt().to_string(),
            user: self.user.clone(),
            history: self.history.messages(),
            json_mode: false,
        };

        let generated = match self.opts.llm.generate(&request).await {
            Ok(generated) => generated,
            Err(e) => {
                self.last_length_failure = false;
                warn!(section = label, attempt = n, error = %e, "Section request failed");
                return Err(format!("API call failed: {e}"));
            }
        };

        let mut text = normalize_model_text(&generated.text);
        if self.section == Section::SearchTerms {
            text = clean_search_terms_line(&text);
        }

        let report = validate_section_text(
            self.section,
            &text,
            self.rule,
            &self.opts.requirement,
            self.opts.char_tolerance,
        );
        for warning in &report.warnings {
            warn!(section = label, attempt = n, "{warning}");
        }
        if !report.passed() {
            debug!(section = label, attempt = n, issues = ?report.issues, "Section failed validation");
            self.last_length_failure = report.length_failure;
            self.history.push_repair(
                text,
                build_section_repair_prompt(self.section, &report.issues),
            );
            return Err(report.issues.join("; "));
        }

        info!(
            section = label,
            attempt = n,
            latency_ms = generated.latency_ms,
            "Section accepted"
        );
        Ok(SectionOutput {
            text,
            latency_ms: generated.latency_ms,
        })
    }
}

/// Runs the plain-text protocol for `section`, given everything generated so
/// far in `doc`. Exhaustion reports the last concrete issue.
pub async fn generate_section(
    opts: &GenerationOptions,
    section: Section,
    doc: &ListingDocument,
) -> Result<SectionOutput, AppError> {
    let rule = opts.rules.get(section);
    let mut attempt = SectionAttempt {
        opts,
        section,
        rule,
        user: build_section_user_prompt(section, &opts.requirement, doc),
        history: ConversationHistory::new(),
        last_length_failure: false,
    };
    let policy = opts.retry_policy(section.as_str());
    run_with_backoff(&policy, &mut attempt)
        .await
        .map_err(|issues| AppError::generation(section.as_str(), issues))
}
