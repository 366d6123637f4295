use crate::errors::AppError;
use crate::models::document::ListingDocument;
use crate::models::requirement::Requirement;
use crate::rules::SectionRules;

/// Which side of a bilingual pair a document is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentRole {
    Source,
    Target,
}

/// Cross-field checks on a finished document. Failures are reported, never
/// retried.
pub fn validate_document(
    role: DocumentRole,
    req: &Requirement,
    doc: &ListingDocument,
    rules: &SectionRules,
) -> Result<(), AppError> {
    let category = doc.category.trim();
    if category.is_empty() {
        return Err(AppError::Document("category is empty".to_string()));
    }
    if role == DocumentRole::Source && category != req.category.trim() {
        return Err(AppError::Document(format!(
            "category {category:?} does not match requirement {:?}",
            req.category.trim()
        )));
    }

    if doc.keywords.is_empty() {
        return Err(AppError::Document("keywords are empty".to_string()));
    }
    if doc.keywords.len() != req.keywords.len() {
        return Err(AppError::Document(format!(
            "expected {} keywords, got {}",
            req.keywords.len(),
            doc.keywords.len()
        )));
    }
    if role == DocumentRole::Target {
        if let Some(i) = doc.keywords.iter().position(|k| k.trim().is_empty()) {
            return Err(AppError::Document(format!("keyword {} is empty", i + 1)));
        }
    }

    if doc.bullets.len() != rules.bullet_count() {
        return Err(AppError::Document(format!(
            "expected {} bullets, got {}",
            rules.bullet_count(),
            doc.bullets.len()
        )));
    }
    if doc.description.len() != rules.description_paragraphs() {
        return Err(AppError::Document(format!(
            "expected {} description paragraphs, got {}",
            rules.description_paragraphs(),
            doc.description.len()
        )));
    }
    Ok(())
}

/// Non-emptiness of every translated unit.
pub fn check_translated_units(doc: &ListingDocument) -> Result<(), AppError> {
    let empty = |unit: String| Err(AppError::translation(unit, "translation is empty"));

    if doc.title.trim().is_empty() {
        return empty("title".to_string());
    }
    if doc.category.trim().is_empty() {
        return empty("category".to_string());
    }
    if doc.search_terms.trim().is_empty() {
        return empty("search terms".to_string());
    }
    if let Some(i) = doc.keywords.iter().position(|k| k.trim().is_empty()) {
        return empty(format!("keyword {}", i + 1));
    }
    if let Some(i) = doc.bullets.iter().position(|b| b.trim().is_empty()) {
        return empty(format!("bullet {}", i + 1));
    }
    if let Some(i) = doc.description.iter().position(|p| p.trim().is_empty()) {
        return empty(format!("paragraph {}", i + 1));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::testing::{keywords, requirement, rules};

    fn complete_doc() -> ListingDocument {
        ListingDocument {
            title: "Lantern".into(),
            keywords: keywords(),
            category: "Cat".into(),
            bullets: vec!["b".into(); 5],
            description: vec!["p1".into(), "p2".into()],
            search_terms: "lantern".into(),
        }
    }

    #[test]
    fn test_complete_document_passes() {
        let rules = rules("text", "whole");
        assert!(validate_document(DocumentRole::Source, &requirement(), &complete_doc(), &rules).is_ok());
    }

    #[test]
    fn test_source_category_must_match_requirement() {
        let rules = rules("text", "whole");
        let mut doc = complete_doc();
        doc.category = "Other".into();
        assert!(validate_document(DocumentRole::Source, &requirement(), &doc, &rules).is_err());
        // Translated category only has to be present.
        assert!(validate_document(DocumentRole::Target, &requirement(), &doc, &rules).is_ok());
    }

    #[test]
    fn test_counts_must_match() {
        let rules = rules("text", "whole");

        let mut doc = complete_doc();
        doc.keywords.pop();
        let err = validate_document(DocumentRole::Source, &requirement(), &doc, &rules).unwrap_err();
        assert_eq!(err.to_string(), "Document validation failed: expected 15 keywords, got 14");

        let mut doc = complete_doc();
        doc.bullets.pop();
        assert!(validate_document(DocumentRole::Source, &requirement(), &doc, &rules).is_err());

        let mut doc = complete_doc();
        doc.description = vec!["only".into()];
        assert!(validate_document(DocumentRole::Source, &requirement(), &doc, &rules).is_err());
    }

    #[test]
    fn test_target_keywords_must_be_non_empty() {
        let rules = rules("text", "whole");
        let mut doc = complete_doc();
        doc.keywords[3] = " ".into();
        let err = validate_document(DocumentRole::Target, &requirement(), &doc, &rules).unwrap_err();
        assert!(err.to_string().contains("keyword 4 is empty"));
    }

    #[test]
    fn test_translated_units_non_empty() {
        assert!(check_translated_units(&complete_doc()).is_ok());

        let mut doc = complete_doc();
        doc.description[1] = String::new();
        let err = check_translated_units(&doc).unwrap_err();
        assert_eq!(err.to_string(), "translation of paragraph 2 failed: translation is empty");
    }
}
