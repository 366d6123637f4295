// Section prompts for the generation engine.
// Reuses cross-cutting fragments from llm_client::prompts.

use crate::llm_client::prompts::{EXECUTION_REMINDER, JSON_ONLY_SYSTEM, REPAIR_TAIL};
use crate::models::document::ListingDocument;
use crate::models::requirement::Requirement;
use crate::rules::{Section, SectionRule};

/// Example shape for the batch bullet object.
pub const BULLETS_JSON_SCHEMA: &str = r#"{"bullets":["bullet 1","bullet 2"]}"#;

/// Example shape for a single repaired item. Replace `{field}` before sending.
pub const ITEM_JSON_SCHEMA_TEMPLATE: &str = r#"{"{field}":"..."}"#;

/// User prompt for `section`: requirement body, fixed fields, everything
/// generated so far, then the current task.
pub fn build_section_user_prompt(section: Section, req: &Requirement, doc: &ListingDocument) -> String {
    let mut out = String::new();
    out.push_str("[Requirement]\n");
    out.push_str(req.body.trim());
    out.push_str("\n\n[Fixed fields, do not rewrite]\n");
    out.push_str(&format!("category: {}\n", req.category.trim()));
    out.push_str("keywords:\n");
    for kw in &req.keywords {
        out.push_str(&format!("- {kw}\n"));
    }

    if !doc.title.trim().is_empty() {
        out.push_str("\n[Generated title]\n");
        out.push_str(doc.title.trim());
        out.push('\n');
    }
    if !doc.bullets.is_empty() {
        out.push_str("\n[Generated bullet points]\n");
        for (i, bullet) in doc.bullets.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, bullet.trim()));
        }
    }
    if !doc.description.is_empty() {
        out.push_str("\n[Generated description]\n");
        out.push_str(&doc.description.join("\n\n"));
        out.push('\n');
    }

    out.push_str(&format!("\n[Current task] Generate: {}\n", section.as_str()));
    out.push_str(EXECUTION_REMINDER);
    out
}

/// Repair instruction listing every issue of the previous attempt.
pub fn build_section_repair_prompt(section: Section, issues: &[String]) -> String {
    let mut out = format!(
        "The previous {} had these issues; fix every one:\n",
        section.label()
    );
    for issue in issues {
        out.push_str(&format!("- {issue}\n"));
    }
    out.push_str(REPAIR_TAIL);
    out
}

/// Repair instruction for the JSON protocol; `schema` shows the expected object.
pub fn build_json_repair_prompt(issue: &str, schema: &str) -> String {
    format!(
        "The previous output did not meet the requirements: {issue}\n\
         Fix the previous version directly. Return exactly one valid JSON object, \
         for example: {schema}. Output nothing outside the JSON."
    )
}

/// Rule system prompt extended with the JSON-only contract.
pub fn build_json_system_prompt(rule: &SectionRule, schema: &str) -> String {
    format!(
        "{}\n\n[JSON protocol]\n{JSON_ONLY_SYSTEM}\nObject shape: {schema}",
        rule.system_prompt()
    )
}

/// Output requirement appended to the bullets prompt in batch mode.
pub fn build_batch_output_requirement(expected: usize) -> String {
    format!(
        "\n[Output requirement] Return a json object whose key \"bullets\" holds exactly \
         {expected} strings, one per bullet point, without numbering."
    )
}

pub fn item_json_schema(field: &str) -> String {
    ITEM_JSON_SCHEMA_TEMPLATE.replace("{field}", field)
}

/// Sub-task appended to the bullets prompt when repairing item `index` (1-based).
pub fn build_item_subtask(index: usize, field: &str, current: &str) -> String {
    format!(
        "\n[Sub-task] Rewrite only bullet point {index}. Its current text is:\n{current}\n\
         Keep the other bullet points as listed above and do not repeat them.\n\
         Return a json object {}.",
        item_json_schema(field)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req() -> Requirement {
        Requirement {
            body: "Paper lanterns.".into(),
            category: " Home > Decor ".into(),
            keywords: vec!["lantern".into(), "paper".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_user_prompt_embeds_prior_sections_in_order() {
        let doc = ListingDocument {
            title: "Lantern Set".into(),
            bullets: vec!["Warm glow".into(), "Foldable".into()],
            ..Default::default()
        };
        let prompt = build_section_user_prompt(Section::Description, &req(), &doc);

        assert!(prompt.starts_with("[Requirement]\nPaper lanterns."));
        assert!(prompt.contains("category: Home > Decor\n"));
        assert!(prompt.contains("- lantern\n- paper\n"));
        assert!(prompt.contains("[Generated title]\nLantern Set"));
        assert!(prompt.contains("1. Warm glow\n2. Foldable\n"));
        assert!(!prompt.contains("[Generated description]"));

        let title_at = prompt.find("[Generated title]").unwrap();
        let task_at = prompt.find("[Current task] Generate: description").unwrap();
        assert!(title_at < task_at);
        assert!(prompt.ends_with(EXECUTION_REMINDER));
    }

    #[test]
    fn test_repair_prompt_lists_each_issue() {
        let prompt = build_section_repair_prompt(
            Section::Bullets,
            &["expected 5 bullets, got 4".into(), "bullet 2 is empty".into()],
        );
        assert!(prompt.starts_with("The previous bullet points had these issues"));
        assert!(prompt.contains("- expected 5 bullets, got 4\n- bullet 2 is empty\n"));
        assert!(prompt.ends_with(REPAIR_TAIL));
    }

    #[test]
    fn test_json_prompts_carry_schema() {
        let prompt = build_json_repair_prompt("no JSON object found", BULLETS_JSON_SCHEMA);
        assert!(prompt.contains("no JSON object found"));
        assert!(prompt.contains(BULLETS_JSON_SCHEMA));

        assert_eq!(item_json_schema("bullet"), r#"{"bullet":"..."}"#);
        let sub = build_item_subtask(3, "bullet", "too long");
        assert!(sub.contains("bullet point 3"));
        assert!(sub.contains("too long"));
    }
}
