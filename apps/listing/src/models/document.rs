use std::fmt::Write as _;

use serde::Serialize;

use crate::models::requirement::Requirement;

/// A finished listing in one language.
///
/// Fields are filled section by section; callers only ever see a document
/// that passed every validation stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListingDocument {
    pub title: String,
    pub keywords: Vec<String>,
    pub category: String,
    pub bullets: Vec<String>,
    pub description: Vec<String>,
    pub search_terms: String,
}

struct Headings {
    suffix: &'static str,
    keywords: &'static str,
    category: &'static str,
    title: &'static str,
    bullets: &'static str,
    description: &'static str,
    search_terms: &'static str,
}

const EN_HEADINGS: Headings = Headings {
    suffix: " Listing",
    keywords: "Keywords",
    category: "Category",
    title: "Title",
    bullets: "Bullet Points",
    description: "Product Description",
    search_terms: "Search Terms",
};

const ZH_HEADINGS: Headings = Headings {
    suffix: " 产品Listing",
    keywords: "关键词",
    category: "分类",
    title: "标题",
    bullets: "五点描述",
    description: "产品描述",
    search_terms: "搜索词",
};

pub fn is_chinese(lang: &str) -> bool {
    let lang = lang.trim().to_ascii_lowercase();
    lang.starts_with("zh") || lang.starts_with("cn")
}

/// Renders the markdown file body for `lang`.
pub fn render_markdown(lang: &str, req: &Requirement, doc: &ListingDocument) -> String {
    let zh = is_chinese(lang);
    let h = if zh { &ZH_HEADINGS } else { &EN_HEADINGS };
    let mut out = String::new();

    let _ = writeln!(out, "# {}{}\n", req.brand.trim(), h.suffix);
    let _ = writeln!(out, "## {}", h.keywords);
    for kw in &doc.keywords {
        let _ = writeln!(out, "{kw}");
    }
    let _ = writeln!(out, "\n## {}\n{}\n", h.category, doc.category);
    let _ = writeln!(out, "## {}\n{}\n", h.title, doc.title);
    let _ = writeln!(out, "## {}", h.bullets);
    for (i, bullet) in doc.bullets.iter().enumerate() {
        if zh {
            let _ = writeln!(out, "**第{}点**\n{bullet}\n", i + 1);
        } else {
            let _ = writeln!(out, "**Point {}**\n{bullet}\n", i + 1);
        }
    }
    let _ = writeln!(out, "## {}", h.description);
    let _ = writeln!(out, "{}", doc.description.join("\n\n"));
    let _ = writeln!(out, "\n## {}\n{}", h.search_terms, doc.search_terms);
    out
}
