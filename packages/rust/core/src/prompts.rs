//! Prompt templates for the three stages.
//!
//! Changing any template here should go together with a bump of
//! `pipeline.prompt_version`, which moves every summary cache key.

use paperbrief_shared::{PaperMetadata, VIOLATIONS_PLACEHOLDER};

/// Metadata as handed to Stage B, sanitized or raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryInput {
    pub title: String,
    pub authors: String,
    pub category: String,
    pub published: String,
    pub abstract_text: String,
    /// Stage A reported the abstract as missing or unusable.
    pub missing_abstract: bool,
}

impl SummaryInput {
    /// Unsanitized input straight from the fetcher.
    pub fn raw(meta: &PaperMetadata) -> Self {
        Self {
            title: meta.title.clone(),
            authors: meta.authors.join(", "),
            category: meta.category().to_string(),
            published: meta.published.format("%Y-%m-%d").to_string(),
            missing_abstract: meta.abstract_text.trim().is_empty(),
            abstract_text: meta.abstract_text.clone(),
        }
    }
}

/// A system + user message pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

// ---------------------------------------------------------------------------
// Stage A: metadata sanitizer
// ---------------------------------------------------------------------------

const SANITIZER_SYSTEM: &str = "You clean arXiv paper metadata before it is summarized.\n\
Return a single JSON object with exactly these keys:\n\
- title: the title with LaTeX markup, line breaks and duplicated spaces removed\n\
- authors: array of author names\n\
- category: the primary arXiv category\n\
- abstract: the abstract with boilerplate (comments, page counts, license notes) removed\n\
- missing_abstract: true when the abstract is empty or not an actual abstract\n\
Do not add information that is not present in the input.";

const SANITIZER_STRICT: &str = "\n\nYour previous answer was not usable. Output ONLY the JSON object, \
no prose and no code fences. `title` must be a non-empty string, `abstract` a string, \
`authors` an array of strings.";

pub fn sanitizer(meta: &PaperMetadata, strict: bool) -> Prompt {
    let mut system = SANITIZER_SYSTEM.to_string();
    if strict {
        system.push_str(SANITIZER_STRICT);
    }
    let user = format!(
        "Title: {}\nAuthors: {}\nCategory: {}\nAbstract: {}",
        meta.title,
        meta.authors.join(", "),
        meta.category(),
        meta.abstract_text,
    );
    Prompt { system, user }
}

// ---------------------------------------------------------------------------
// Stage B: summarizer
// ---------------------------------------------------------------------------

const SUMMARY_SYSTEM: &str = "你是學術論文摘要助手，負責把 arXiv 論文整理成結構化的繁體中文摘要。\n\
只輸出一個 JSON 物件，包含以下鍵：\n\
- intro：簡介，2 到 4 句\n\
- background：研究背景，2 到 4 句\n\
- method：方法，2 到 4 句\n\
- conclusion：結論，2 到 4 句\n\
- bullet_points：3 到 5 項重點的字串陣列\n\
- limitations：研究限制，1 到 2 句\n\
規則：\n\
1. 全部使用繁體中文，不可使用簡體字；專有名詞可保留英文。\n\
2. 每個段落不超過 900 字。\n\
3. 只根據提供的摘要內容推論，不可捏造數據或引用。\n\
4. 資訊不足時請明確說明不確定之處。";

pub fn summarizer(input: &SummaryInput, correction: Option<&str>) -> Prompt {
    let abstract_text = if input.missing_abstract || input.abstract_text.trim().is_empty() {
        "（無可用摘要，請僅依標題與類別謹慎推論，並在 limitations 中註明。）".to_string()
    } else {
        input.abstract_text.clone()
    };

    let mut user = format!(
        "請為以下論文產生結構化摘要。\n\n\
         標題：{}\n作者：{}\n類別：{}\n發表日期：{}\n\n摘要：\n{}\n\n\
         請以 JSON 輸出 intro、background、method、conclusion、bullet_points、limitations。",
        input.title, input.authors, input.category, input.published, abstract_text,
    );
    if let Some(extra) = correction {
        user.push_str("\n\n");
        user.push_str(extra);
    }

    Prompt {
        system: SUMMARY_SYSTEM.to_string(),
        user,
    }
}

/// Fill the configured correction template with the Stage C findings.
pub fn correction_instruction(template: &str, violations: &[String]) -> String {
    let list = violations.join("、");
    if template.contains(VIOLATIONS_PLACEHOLDER) {
        template.replace(VIOLATIONS_PLACEHOLDER, &list)
    } else {
        format!("{template}\n({list})")
    }
}

// ---------------------------------------------------------------------------
// Stage C: validator
// ---------------------------------------------------------------------------

const VALIDATOR_SYSTEM: &str = "You check Traditional Chinese paper summaries.\n\
Requirements:\n\
1. Keys intro, background, method, conclusion and bullet_points are present.\n\
2. Each of the four sections is at most 900 characters.\n\
3. bullet_points has 3 to 5 items.\n\
4. All text is Traditional Chinese (zh-Hant). English technical terms are fine; Simplified Chinese is not.\n\
5. Nothing is fabricated beyond what a summary of the abstract could support.\n\
Return a JSON object:\n\
- ok: boolean\n\
- violations: array of short codes such as \"too_long:intro\", \"bullets:count\", \"language:intro\"\n\
- fixed: a corrected summary with the same keys when the problems are minor, otherwise null";

pub fn validator(summary_json: &str) -> Prompt {
    Prompt {
        system: VALIDATOR_SYSTEM.to_string(),
        user: format!("Check this summary:\n\n{summary_json}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use paperbrief_shared::ArxivId;
    use std::collections::BTreeSet;

    fn meta(abstract_text: &str) -> PaperMetadata {
        PaperMetadata {
            id: ArxivId::parse("2401.01234").expect("id"),
            title: "Sparse Experts".into(),
            authors: vec!["A. Chen".into(), "B. Patel".into()],
            abstract_text: abstract_text.into(),
            categories: BTreeSet::from(["cs.CL".to_string()]),
            primary_category: Some("cs.CL".into()),
            published: Utc.with_ymd_and_hms(2024, 1, 3, 9, 0, 0).unwrap(),
            entry_url: String::new(),
            pdf_url: String::new(),
        }
    }

    #[test]
    fn sanitizer_strict_variant_adds_instruction() {
        let loose = sanitizer(&meta("We study experts."), false);
        let strict = sanitizer(&meta("We study experts."), true);
        assert!(loose.user.contains("A. Chen, B. Patel"));
        assert!(strict.system.len() > loose.system.len());
        assert!(strict.system.contains("ONLY the JSON"));
    }

    #[test]
    fn summarizer_includes_metadata_and_correction() {
        let input = SummaryInput::raw(&meta("We study experts."));
        assert_eq!(input.published, "2024-01-03");
        let plain = summarizer(&input, None);
        assert!(plain.user.contains("Sparse Experts"));
        assert!(plain.user.contains("We study experts."));

        let corrected = summarizer(&input, Some("請修正：too_long:intro"));
        assert!(corrected.user.ends_with("請修正：too_long:intro"));
    }

    #[test]
    fn summarizer_flags_missing_abstract() {
        let input = SummaryInput::raw(&meta("  "));
        assert!(input.missing_abstract);
        assert!(summarizer(&input, None).user.contains("無可用摘要"));
    }

    #[test]
    fn correction_template_substitution() {
        let violations = vec!["too_long:intro".to_string(), "bullets:count".to_string()];
        assert_eq!(
            correction_instruction("問題：{violations}。", &violations),
            "問題：too_long:intro、bullets:count。"
        );
        assert!(correction_instruction("請修正。", &violations).contains("bullets:count"));
    }
}
