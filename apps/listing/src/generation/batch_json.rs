//! Batch-JSON protocol for list sections.
//!
//! The whole list is requested once as a JSON object, decoded tolerantly,
//! length-normalized and validated. With item-level repair, each failing item
//! is then repaired by its own spawned task and the set is re-validated once
//! all of them finish.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::errors::AppError;
use crate::generation::backoff::{run_with_backoff, Attempt};
use crate::generation::bounds::{char_len, CharBounds};
use crate::generation::history::ConversationHistory;
use crate::generation::join::TaskGroup;
use crate::generation::prompts::{
    build_batch_output_requirement, build_item_subtask, build_json_repair_prompt,
    build_json_system_prompt, build_section_user_prompt, item_json_schema, BULLETS_JSON_SCHEMA,
};
use crate::generation::text::{
    clean_bullet_line, count_non_empty_lines, dedupe_issues, extract_json_object,
    normalize_model_text, pad_to_min_by_keywords, trim_to_max_by_words,
};
use crate::generation::GenerationOptions;
use crate::llm_client::{strip_json_fences, GenerationRequest};
use crate::models::document::ListingDocument;
use crate::rules::{RepairGranularity, Section, SectionRule};

/// Keys tried, in order, for a repaired item after the rule's own field.
const ITEM_FALLBACK_KEYS: [&str; 3] = ["bullet", "text", "item"];

// ────────────────────────────────────────────────────────────────────────────
// Decoding
// ────────────────────────────────────────────────────────────────────────────

/// Decodes a JSON object from model output: fenced or bare, or embedded in
/// surrounding prose.
pub fn decode_json_object(raw: &str) -> Result<Map<String, Value>, String> {
    let text = strip_json_fences(raw.trim()).trim();
    if text.is_empty() {
        return Err("response is empty".to_string());
    }
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) {
        return Ok(map);
    }
    let candidate = extract_json_object(text).ok_or_else(|| "no JSON object found".to_string())?;
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("JSON is not an object".to_string()),
        Err(e) => Err(format!("invalid JSON: {e}")),
    }
}

fn string_array(value: &Value) -> Option<Vec<String>> {
    let items = value.as_array()?;
    if items.is_empty() {
        return None;
    }
    items
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// Pulls exactly `expected` list items out of a batch response. Tries the
/// `bullets` key, then `items`, then the first non-empty string array.
pub fn parse_bullets_from_json(raw: &str, expected: usize) -> Result<Vec<String>, String> {
    let object = decode_json_object(raw)?;
    let items = ["bullets", "items"]
        .iter()
        .find_map(|key| object.get(*key).and_then(string_array))
        .or_else(|| object.values().find_map(string_array))
        .ok_or_else(|| "JSON object has no string array of bullets".to_string())?;

    if items.len() != expected {
        return Err(format!("expected {expected} bullets, got {}", items.len()));
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let line = clean_bullet_line(item);
            if line.is_empty() {
                Err(format!("bullet {} is empty", i + 1))
            } else {
                Ok(item.trim().to_string())
            }
        })
        .collect()
}

/// Pulls one repaired item out of a single-field response.
pub fn parse_item_from_json(raw: &str, field: &str) -> Result<String, String> {
    let object = decode_json_object(raw)?;
    std::iter::once(field)
        .chain(ITEM_FALLBACK_KEYS)
        .find_map(|key| object.get(key).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("JSON object has no non-empty \"{field}\" field"))
}

// ────────────────────────────────────────────────────────────────────────────
// Normalization and validation
// ────────────────────────────────────────────────────────────────────────────

/// Trims an over-long item by whole words to the rule max, or pads a short one
/// with unused keywords up to the rule min. Items that cannot be trimmed
/// without cutting a word stay as they are.
pub fn normalize_item(item: &str, bounds: &CharBounds, keywords: &[String]) -> String {
    let item = item.trim();
    let n = char_len(item);
    if bounds.in_tolerance(n) {
        return item.to_string();
    }
    let rule = bounds.rule();
    match (rule.min, rule.max) {
        (_, Some(max)) if n > max => {
            trim_to_max_by_words(item, max).unwrap_or_else(|| item.to_string())
        }
        (Some(min), max) if n < min => pad_to_min_by_keywords(item, min, max.unwrap_or(0), keywords),
        _ => item.to_string(),
    }
}

pub fn normalize_items(items: &[String], bounds: &CharBounds, keywords: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|item| normalize_item(item, bounds, keywords))
        .collect()
}

/// Checks one item; `index` is 1-based. Appends to `issues` or `warnings` and
/// returns true when the item failed on length.
pub fn validate_bullet_line(
    index: usize,
    item: &str,
    bounds: &CharBounds,
    issues: &mut Vec<String>,
    warnings: &mut Vec<String>,
) -> bool {
    if count_non_empty_lines(item) > 1 {
        issues.push(format!("bullet {index} must be a single line"));
    }
    let line = clean_bullet_line(item);
    if line.is_empty() {
        issues.push(format!("bullet {index} is empty"));
        return false;
    }
    bounds.check(&format!("bullet {index}"), &line, issues, warnings)
}

/// Result of validating a whole item set.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SetReport {
    /// 0-based indices of failing items.
    pub invalid: Vec<usize>,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub length_failure: bool,
}

pub fn validate_bullet_set(items: &[String], expected: usize, bounds: &CharBounds) -> SetReport {
    let mut report = SetReport::default();
    if items.len() != expected {
        report
            .issues
            .push(format!("expected {expected} bullets, got {}", items.len()));
    }
    for (i, item) in items.iter().enumerate() {
        let before = report.issues.len();
        report.length_failure |=
            validate_bullet_line(i + 1, item, bounds, &mut report.issues, &mut report.warnings);
        if report.issues.len() > before {
            report.invalid.push(i);
        }
    }
    report.issues = dedupe_issues(report.issues);
    report
}

fn bullet_bounds(rule: &SectionRule, tolerance: usize) -> CharBounds {
    CharBounds::resolve(
        rule.constraints.min_chars_per_line.value,
        rule.constraints.max_chars_per_line.value,
        tolerance,
    )
}

// ────────────────────────────────────────────────────────────────────────────
// Batch attempt
// ────────────────────────────────────────────────────────────────────────────

struct BatchAttempt<'a> {
    opts: &'a GenerationOptions,
    rule: &'a SectionRule,
    bounds: CharBounds,
    system: String,
    user: String,
    history: ConversationHistory,
    last_length_failure: bool,
}

#[async_trait]
impl Attempt for BatchAttempt<'_> {
    type Output = (Vec<String>, u64);
    type Error = String;

    async fn attempt(&mut self, n: u32) -> Result<(Vec<String>, u64), String> {
        let suppressed = self.last_length_failure && self.rule.disable_escalation_on_length_error();
        let request = GenerationRequest {
            model: self.opts.model_for_attempt("bullets", n, suppressed),
            system: self.system.clone(),
            user: self.user.clone(),
            history: self.history.messages(),
            json_mode: true,
        };
        let generated = match self.opts.llm.generate(&request).await {
            Ok(generated) => generated,
            Err(e) => {
                self.last_length_failure = false;
                warn!(section = "bullets", attempt = n, error = %e, "Batch request failed");
                return Err(format!("API call failed: {e}"));
            }
        };

        let text = normalize_model_text(&generated.text);
        let expected = self.opts.rules.bullet_count();
        let items = match parse_bullets_from_json(&text, expected) {
            Ok(items) => items,
            Err(issue) => {
                self.last_length_failure = false;
                self.history
                    .push_repair(text, build_json_repair_prompt(&issue, BULLETS_JSON_SCHEMA));
                return Err(issue);
            }
        };
        let items = normalize_items(&items, &self.bounds, &self.opts.requirement.keywords);

        // Whole-batch repair keeps the set inside this loop.
        if self.rule.repair_granularity() == RepairGranularity::Whole {
            let report = validate_bullet_set(&items, expected, &self.bounds);
            if !report.issues.is_empty() {
                let issues = report.issues.join("; ");
                self.last_length_failure = report.length_failure;
                self.history
                    .push_repair(text, build_json_repair_prompt(&issues, BULLETS_JSON_SCHEMA));
                return Err(issues);
            }
        }
        Ok((items, generated.latency_ms))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Item repair
// ────────────────────────────────────────────────────────────────────────────

struct ItemAttempt {
    opts: GenerationOptions,
    index: usize,
    field: String,
    bounds: CharBounds,
    system: String,
    user: String,
    history: ConversationHistory,
    last_length_failure: bool,
}

#[async_trait]
impl Attempt for ItemAttempt {
    type Output = (String, u64);
    type Error = String;

    async fn attempt(&mut self, n: u32) -> Result<(String, u64), String> {
        let label = format!("bullet {}", self.index);
        let suppressed =
            self.last_length_failure && self.opts.rules.bullets.disable_escalation_on_length_error();
        let request = GenerationRequest {
            model: self.opts.model_for_attempt(&label, n, suppressed),
            system: self.system.clone(),
            user: self.user.clone(),
            history: self.history.messages(),
            json_mode: true,
        };
        let generated = match self.opts.llm.generate(&request).await {
            Ok(generated) => generated,
            Err(e) => {
                self.last_length_failure = false;
                return Err(format!("API call failed: {e}"));
            }
        };

        let text = normalize_model_text(&generated.text);
        let schema = item_json_schema(&self.field);
        let item = match parse_item_from_json(&text, &self.field) {
            Ok(item) => normalize_item(&item, &self.bounds, &self.opts.requirement.keywords),
            Err(issue) => {
                self.last_length_failure = false;
                self.history
                    .push_repair(text, build_json_repair_prompt(&issue, &schema));
                return Err(issue);
            }
        };

        let mut issues = Vec::new();
        let mut warnings = Vec::new();
        let length_failure =
            validate_bullet_line(self.index, &item, &self.bounds, &mut issues, &mut warnings);
        for warning in &warnings {
            warn!(unit = %label, attempt = n, "{warning}");
        }
        if !issues.is_empty() {
            let issues = issues.join("; ");
            self.last_length_failure = length_failure;
            self.history
                .push_repair(text, build_json_repair_prompt(&issues, &schema));
            return Err(issues);
        }
        debug!(unit = %label, attempt = n, "Item repaired");
        Ok((clean_bullet_line(&item), generated.latency_ms))
    }
}

async fn repair_item(
    opts: GenerationOptions,
    doc: ListingDocument,
    index: usize,
    current: String,
    bounds: CharBounds,
) -> Result<(String, u64), AppError> {
    let rule = &opts.rules.bullets;
    let field = rule.item_json_field().to_string();
    let system = build_json_system_prompt(rule, &item_json_schema(&field));
    let user = format!(
        "{}{}",
        build_section_user_prompt(Section::Bullets, &opts.requirement, &doc),
        build_item_subtask(index, &field, &current)
    );
    let label = format!("bullet {index}");
    let policy = opts.retry_policy(&label);
    let mut attempt = ItemAttempt {
        opts,
        index,
        field,
        bounds,
        system,
        user,
        history: ConversationHistory::new(),
        last_length_failure: false,
    };
    run_with_backoff(&policy, &mut attempt)
        .await
        .map_err(|issues| AppError::generation(label, issues))
}

// ────────────────────────────────────────────────────────────────────────────
// Entry point
// ────────────────────────────────────────────────────────────────────────────

/// Generates the bullet list through the batch-JSON protocol.
pub async fn generate_bullets_json(
    opts: &GenerationOptions,
    doc: &ListingDocument,
) -> Result<(Vec<String>, u64), AppError> {
    let rule = &opts.rules.bullets;
    let expected = opts.rules.bullet_count();
    let bounds = bullet_bounds(rule, opts.char_tolerance);

    let mut batch = BatchAttempt {
        opts,
        rule,
        bounds,
        system: build_json_system_prompt(rule, BULLETS_JSON_SCHEMA),
        user: format!(
            "{}{}",
            build_section_user_prompt(Section::Bullets, &opts.requirement, doc),
            build_batch_output_requirement(expected)
        ),
        history: ConversationHistory::new(),
        last_length_failure: false,
    };
    let policy = opts.retry_policy("bullets");
    let (mut items, mut latency_ms) = run_with_backoff(&policy, &mut batch)
        .await
        .map_err(|issues| AppError::generation("bullets", issues))?;

    let report = validate_bullet_set(&items, expected, &bounds);
    for warning in &report.warnings {
        warn!(section = "bullets", "{warning}");
    }
    if report.invalid.is_empty() {
        return finish(items, latency_ms, expected, &bounds);
    }

    info!(
        section = "bullets",
        failing = report.invalid.len(),
        "Repairing bullet items concurrently"
    );
    // Every repair sees the full set as it stood before the fan-out.
    let snapshot = ListingDocument {
        bullets: items.clone(),
        ..doc.clone()
    };
    let mut group: TaskGroup<usize, (String, u64), AppError> = TaskGroup::new();
    for &i in &report.invalid {
        group.spawn(
            i,
            repair_item(opts.clone(), snapshot.clone(), i + 1, items[i].clone(), bounds),
        );
    }
    for (i, (item, item_latency)) in group.join_all().await? {
        items[i] = item;
        latency_ms += item_latency;
    }
    finish(items, latency_ms, expected, &bounds)
}

fn finish(
    items: Vec<String>,
    latency_ms: u64,
    expected: usize,
    bounds: &CharBounds,
) -> Result<(Vec<String>, u64), AppError> {
    let report = validate_bullet_set(&items, expected, bounds);
    if !report.issues.is_empty() {
        return Err(AppError::generation("bullets", report.issues.join("; ")));
    }
    let items = items.iter().map(|item| clean_bullet_line(item)).collect();
    Ok((items, latency_ms))
}
