//! arXiv Atom feed parsing.
//!
//! The query API answers with an Atom feed holding zero or one `<entry>`.
//! Malformed ids come back as an entry whose `<id>` points at
//! `/api/errors`, which we report as "no entry".

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use paperbrief_shared::{ArxivId, PaperBriefError, PaperMetadata, Result};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

/// Raw fields collected from one `<entry>`.
#[derive(Debug, Default, Clone)]
pub(crate) struct AtomEntry {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub published: String,
    pub authors: Vec<String>,
    pub categories: Vec<String>,
    pub primary_category: Option<String>,
    pub abs_link: Option<String>,
    pub pdf_link: Option<String>,
}

impl AtomEntry {
    /// The API's way of saying "bad id".
    pub fn is_error(&self) -> bool {
        self.id.contains("/api/errors")
    }

    /// Normalize into [`PaperMetadata`]. `requested` is used when the
    /// entry id cannot be parsed.
    pub fn into_metadata(self, requested: &ArxivId) -> Result<PaperMetadata> {
        let id = ArxivId::parse(&self.id).unwrap_or_else(|_| requested.clone());

        let title = normalize_ws(&self.title);
        if title.is_empty() {
            return Err(PaperBriefError::parse(format!("entry {id} has no title")));
        }

        let published = DateTime::parse_from_rfc3339(self.published.trim())
            .map_err(|e| {
                PaperBriefError::parse(format!(
                    "entry {id} has invalid published date {:?}: {e}",
                    self.published
                ))
            })?
            .with_timezone(&Utc);

        let categories: BTreeSet<String> = self.categories.into_iter().collect();
        let entry_url = self
            .abs_link
            .unwrap_or_else(|| format!("https://arxiv.org/abs/{}", id.versioned()));
        let pdf_url = self
            .pdf_link
            .unwrap_or_else(|| format!("https://arxiv.org/pdf/{}", id.versioned()));

        Ok(PaperMetadata {
            title,
            authors: self
                .authors
                .iter()
                .map(|a| normalize_ws(a))
                .filter(|a| !a.is_empty())
                .collect(),
            abstract_text: normalize_ws(&self.summary),
            categories,
            primary_category: self.primary_category,
            published,
            entry_url,
            pdf_url,
            id,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Id,
    Title,
    Summary,
    Published,
    AuthorName,
}

/// Collapse runs of whitespace (including newlines) into single spaces.
pub(crate) fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse every `<entry>` in a feed.
pub(crate) fn parse_feed(xml: &str) -> Result<Vec<AtomEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<AtomEntry> = None;
    let mut field: Option<Field> = None;
    let mut author_name = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| PaperBriefError::parse(format!("atom feed: {e}")))?;

        match event {
            Event::Start(e) => {
                let in_entry = current.is_some();
                match e.local_name().as_ref() {
                    b"entry" => current = Some(AtomEntry::default()),
                    b"id" if in_entry => field = Some(Field::Id),
                    b"title" if in_entry => field = Some(Field::Title),
                    b"summary" if in_entry => field = Some(Field::Summary),
                    b"published" if in_entry => field = Some(Field::Published),
                    b"name" if in_entry => {
                        author_name.clear();
                        field = Some(Field::AuthorName);
                    }
                    _ => {
                        if let Some(entry) = current.as_mut() {
                            apply_empty(entry, &e)?;
                        }
                    }
                }
            }
            Event::Empty(e) => {
                if let Some(entry) = current.as_mut() {
                    apply_empty(entry, &e)?;
                }
            }
            Event::Text(t) => {
                if let (Some(entry), Some(f)) = (current.as_mut(), field) {
                    let text = t
                        .unescape()
                        .map_err(|e| PaperBriefError::parse(format!("atom text: {e}")))?;
                    push_text(entry, f, &text, &mut author_name);
                }
            }
            Event::CData(c) => {
                if let (Some(entry), Some(f)) = (current.as_mut(), field) {
                    let text = String::from_utf8_lossy(&c).into_owned();
                    push_text(entry, f, &text, &mut author_name);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"entry" => {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                    field = None;
                }
                b"name" => {
                    if let Some(entry) = current.as_mut() {
                        entry.authors.push(std::mem::take(&mut author_name));
                    }
                    field = None;
                }
                _ => field = None,
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(entries)
}

fn push_text(entry: &mut AtomEntry, field: Field, text: &str, author_name: &mut String) {
    let target = match field {
        Field::Id => &mut entry.id,
        Field::Title => &mut entry.title,
        Field::Summary => &mut entry.summary,
        Field::Published => &mut entry.published,
        Field::AuthorName => author_name,
    };
    target.push_str(text);
}

/// Self-closing elements carry their data in attributes.
fn apply_empty(entry: &mut AtomEntry, e: &BytesStart<'_>) -> Result<()> {
    match e.local_name().as_ref() {
        b"category" => {
            if let Some(term) = attr(e, b"term")? {
                entry.categories.push(term);
            }
        }
        b"primary_category" => {
            entry.primary_category = attr(e, b"term")?;
        }
        b"link" => {
            let href = attr(e, b"href")?;
            let is_pdf = attr(e, b"title")?.as_deref() == Some("pdf");
            let rel = attr(e, b"rel")?;
            if is_pdf {
                entry.pdf_link = href;
            } else if rel.as_deref() == Some("alternate") {
                entry.abs_link = href;
            }
        }
        _ => {}
    }
    Ok(())
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for a in e.attributes() {
        let a = a.map_err(|err| PaperBriefError::parse(format!("atom attribute: {err}")))?;
        if a.key.local_name().as_ref() == name {
            let value = a
                .unescape_value()
                .map_err(|err| PaperBriefError::parse(format!("atom attribute: {err}")))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("../../../fixtures/arxiv/{name}"))
            .expect("read arxiv fixture")
    }

    #[test]
    fn parses_single_entry() {
        let entries = parse_feed(&fixture("entry-2401.01234.xml")).expect("parse");
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert!(!entry.is_error());
        assert_eq!(entry.authors, vec!["Mei-Ling Chen", "Arjun Patel"]);
        assert_eq!(entry.primary_category.as_deref(), Some("cs.CL"));
        assert_eq!(entry.categories, vec!["cs.CL", "cs.LG"]);
        assert_eq!(
            entry.pdf_link.as_deref(),
            Some("http://arxiv.org/pdf/2401.01234v2")
        );
    }

    #[test]
    fn normalizes_into_metadata() {
        let requested = ArxivId::parse("2401.01234").expect("id");
        let entry = parse_feed(&fixture("entry-2401.01234.xml"))
            .expect("parse")
            .remove(0);
        let meta = entry.into_metadata(&requested).expect("metadata");

        assert_eq!(meta.id.as_str(), "2401.01234");
        assert_eq!(meta.id.version(), Some(2));
        assert_eq!(
            meta.title,
            "Sparse Mixture-of-Experts for Efficient Long-Context Retrieval"
        );
        assert!(meta.abstract_text.starts_with("We study sparse"));
        assert!(meta.abstract_text.contains("token & halves"));
        assert!(!meta.abstract_text.contains('\n'));
        assert_eq!(meta.category(), "cs.CL");
        assert_eq!(meta.published.to_rfc3339(), "2024-01-03T09:15:42+00:00");
        assert_eq!(meta.entry_url, "http://arxiv.org/abs/2401.01234v2");
    }

    #[test]
    fn empty_feed_has_no_entries() {
        let entries = parse_feed(&fixture("empty-feed.xml")).expect("parse");
        assert!(entries.is_empty());
    }

    #[test]
    fn error_entry_is_detected() {
        let entries = parse_feed(&fixture("error-entry.xml")).expect("parse");
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_error());
    }

    #[test]
    fn missing_published_is_a_parse_error() {
        let xml = r#"<feed><entry><id>http://arxiv.org/abs/2401.00001v1</id>
            <title>T</title><summary>S</summary></entry></feed>"#;
        let requested = ArxivId::parse("2401.00001").expect("id");
        let entry = parse_feed(xml).expect("parse").remove(0);
        assert!(matches!(
            entry.into_metadata(&requested),
            Err(PaperBriefError::Parse { .. })
        ));
    }

    #[test]
    fn truncated_xml_is_an_error() {
        assert!(parse_feed("<feed><entry><title>oops</entry>").is_err());
    }
}
