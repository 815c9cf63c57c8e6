//! Deterministic heuristic summary used when the model stages cannot
//! produce a valid result.
//!
//! The abstract is split into sentences and dealt out across the four
//! sections in order. No bullets are produced and the payload is flagged
//! `heuristic` so surfaces can mark it as lower-confidence output.

use paperbrief_shared::{PaperMetadata, SummaryPayload};

use crate::validator::MAX_SECTION_CHARS;

/// Placeholder for sections the source text is too short to fill.
const INSUFFICIENT: &str = "（原始摘要資訊不足）";

/// Build the heuristic payload from the raw abstract, or the title when the
/// abstract is empty.
pub fn heuristic_summary(meta: &PaperMetadata) -> SummaryPayload {
    let source = if meta.abstract_text.trim().is_empty() {
        meta.title.trim()
    } else {
        meta.abstract_text.trim()
    };
    let sentences = split_sentences(source);
    let [intro, background, method, conclusion] = distribute(&sentences);

    SummaryPayload {
        intro,
        background,
        method,
        conclusion,
        bullet_points: Vec::new(),
        limitations: None,
        heuristic: true,
    }
}

/// Split on `. ! ? 。！？`. A `.` only ends a sentence when followed by
/// whitespace or the end of text, so decimals like `3.5` stay intact.
pub(crate) fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        let boundary = match c {
            '。' | '！' | '？' => true,
            '.' | '!' | '?' => chars.peek().is_none_or(|next| next.is_whitespace()),
            _ => false,
        };
        if boundary {
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

fn distribute(sentences: &[String]) -> [String; 4] {
    let n = sentences.len();
    let mut sections: [String; 4] = Default::default();

    for (i, section) in sections.iter_mut().enumerate() {
        let chunk: &[String] = if n < 4 {
            sentences.get(i..=i).unwrap_or(&[])
        } else {
            &sentences[i * n / 4..(i + 1) * n / 4]
        };
        *section = if chunk.is_empty() {
            INSUFFICIENT.to_string()
        } else {
            bounded_join(chunk)
        };
    }
    sections
}

/// Join whole sentences up to the section limit. A single oversized
/// sentence is cut and ends with an ellipsis.
fn bounded_join(sentences: &[String]) -> String {
    let mut out = String::new();
    let mut len = 0;
    for sentence in sentences {
        let sep = usize::from(!out.is_empty());
        let n = sentence.chars().count();
        if len + sep + n > MAX_SECTION_CHARS {
            break;
        }
        if sep == 1 {
            out.push(' ');
        }
        out.push_str(sentence);
        len += sep + n;
    }
    if out.is_empty() {
        if let Some(first) = sentences.first() {
            out = first.chars().take(MAX_SECTION_CHARS - 1).collect();
            out.push('…');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use paperbrief_shared::ArxivId;
    use std::collections::BTreeSet;

    fn meta(title: &str, abstract_text: &str) -> PaperMetadata {
        PaperMetadata {
            id: ArxivId::parse("2401.01234").expect("id"),
            title: title.into(),
            authors: vec![],
            abstract_text: abstract_text.into(),
            categories: BTreeSet::new(),
            primary_category: None,
            published: Utc::now(),
            entry_url: String::new(),
            pdf_url: String::new(),
        }
    }

    #[test]
    fn sentence_splitting() {
        let s = split_sentences("We train 3.5 epochs. It works! Does it? 是的。好");
        assert_eq!(s, vec!["We train 3.5 epochs.", "It works!", "Does it?", "是的。", "好"]);
    }

    #[test]
    fn sentences_are_dealt_in_order() {
        let abstract_text = "One. Two. Three. Four. Five. Six. Seven. Eight.";
        let payload = heuristic_summary(&meta("T", abstract_text));
        assert_eq!(payload.intro, "One. Two.");
        assert_eq!(payload.background, "Three. Four.");
        assert_eq!(payload.method, "Five. Six.");
        assert_eq!(payload.conclusion, "Seven. Eight.");
        assert!(payload.bullet_points.is_empty());
        assert!(payload.heuristic);
    }

    #[test]
    fn short_abstract_fills_placeholders() {
        let payload = heuristic_summary(&meta("T", "Only one sentence here."));
        assert_eq!(payload.intro, "Only one sentence here.");
        assert_eq!(payload.background, INSUFFICIENT);
        assert_eq!(payload.conclusion, INSUFFICIENT);
    }

    #[test]
    fn empty_abstract_uses_title() {
        let payload = heuristic_summary(&meta("Sparse Experts for Retrieval", "   "));
        assert_eq!(payload.intro, "Sparse Experts for Retrieval");
    }

    #[test]
    fn sections_stay_within_limit() {
        let long = format!("{}. ", "a".repeat(500)).repeat(8);
        let payload = heuristic_summary(&meta("T", &long));
        for (_, text) in payload.sections() {
            assert!(text.chars().count() <= MAX_SECTION_CHARS);
            assert!(text.ends_with('.'));
        }

        let giant = "b".repeat(2000);
        let payload = heuristic_summary(&meta("T", &giant));
        assert_eq!(payload.intro.chars().count(), MAX_SECTION_CHARS);
        assert!(payload.intro.ends_with('…'));
    }
}
