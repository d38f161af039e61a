//! Validation and shaping of search text.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use super::schema::EntityKind;
use crate::error::{DimensionsError, Result};

/// The result kinds a query may return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Publications,
    Researchers,
    ResearchOrgs,
    Grants,
}

impl ResultKind {
    pub const ALL: [ResultKind; 4] = [
        ResultKind::Publications,
        ResultKind::Researchers,
        ResultKind::ResearchOrgs,
        ResultKind::Grants,
    ];

    /// The name used after `return`, and as the key of the result list
    pub fn key(&self) -> &'static str {
        match self {
            ResultKind::Publications => "publications",
            ResultKind::Researchers => "researchers",
            ResultKind::ResearchOrgs => "research_orgs",
            ResultKind::Grants => "grants",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.key() == key)
    }

    /// Kind of record built from each result
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            ResultKind::Publications => EntityKind::Publication,
            ResultKind::Researchers => EntityKind::Researcher,
            ResultKind::ResearchOrgs => EntityKind::Organization,
            ResultKind::Grants => EntityKind::Grant,
        }
    }

    /// Fieldset appended after `return <kind>` to get richer records
    pub fn elaboration(&self) -> &'static str {
        match self {
            ResultKind::Publications => "[basics+extras+book]",
            _ => "",
        }
    }
}

impl std::fmt::Display for ResultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// A validated search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    /// Caller's text with any paging directives removed
    pub text: String,
    /// `text` with the result kind's elaboration applied
    pub expanded: String,
    pub kind: ResultKind,
}

impl ParsedQuery {
    /// Text of one page fetch
    pub fn page(&self, size: usize, skip: usize) -> String {
        if skip == 0 {
            format!("{} limit {}", self.expanded, size)
        } else {
            format!("{} limit {} skip {}", self.expanded, size, skip)
        }
    }
}

fn search_start() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^search\b").expect("valid regex"))
}

fn paging() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\blimit\s+[0-9]+(\s+skip\s+[0-9]+)?").expect("valid regex"))
}

fn return_clause() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\breturn\s+(?P<kind>[A-Za-z_]+)\s*(?P<fields>\[[^\]]*\])?")
            .expect("valid regex")
    })
}

fn trailing_sort() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(sort\s+by\s+[A-Za-z_.]+(\s+(asc|desc))?)?\s*$").expect("valid regex")
    })
}

/// Copy of `text` with the contents of every double-quoted phrase
/// replaced by `_`, byte for byte, so that offsets found in the copy apply
/// to the original and nothing inside a phrase reads as a directive.
/// A backslash escapes a quote inside a phrase.
fn mask_quoted(text: &str) -> String {
    let mut masked = String::with_capacity(text.len());
    let mut quoted = false;
    let mut escaped = false;
    for c in text.chars() {
        if quoted && !escaped && c == '"' {
            quoted = false;
            masked.push(c);
        } else if quoted {
            escaped = !escaped && c == '\\';
            masked.extend(std::iter::repeat('_').take(c.len_utf8()));
        } else {
            quoted = c == '"';
            masked.push(c);
        }
    }
    masked
}

/// Remove paging directives found outside quoted phrases, collapsing the
/// whitespace they leave behind
fn strip_paging(text: &str) -> Option<String> {
    let masked = mask_quoted(text);
    let spans: Vec<(usize, usize)> = paging()
        .find_iter(&masked)
        .map(|m| (m.start(), m.end()))
        .collect();
    if spans.is_empty() {
        return None;
    }

    let mut stripped = String::with_capacity(text.len());
    let mut from = 0;
    for (start, end) in spans {
        stripped.push_str(text[from..start].trim_end());
        stripped.push(' ');
        from = end;
    }
    stripped.push_str(text[from..].trim_start());
    Some(stripped.trim().to_string())
}

fn supported() -> String {
    ResultKind::ALL
        .iter()
        .map(|k| format!("\"{}\"", k.key()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Validate a search and derive its paging base.
///
/// The text must start with `search` and end with a single
/// `return <kind>` clause for a supported kind, optionally followed by a
/// fieldset and a `sort by` directive. `limit`/`skip` directives are
/// removed, since paging belongs to the query iterator.
pub fn parse_query(text: &str) -> Result<ParsedQuery> {
    let trimmed = text.trim();
    if !search_start().is_match(trimmed) {
        return Err(DimensionsError::RequestRejected(
            "Query must begin with \"search\"".to_string(),
        ));
    }

    let text = match strip_paging(trimmed) {
        Some(stripped) => {
            tracing::warn!("removing limit/skip from query; results are paged automatically");
            stripped
        }
        None => trimmed.to_string(),
    };

    // Directives are looked for outside quoted phrases only
    let masked = mask_quoted(&text);
    let clauses: Vec<_> = return_clause().captures_iter(&masked).collect();
    let clause = match clauses.as_slice() {
        [] => {
            return Err(DimensionsError::RequestRejected(format!(
                "Query has no return clause -- can only handle {}",
                supported()
            )))
        }
        [one] => one,
        _ => {
            return Err(DimensionsError::RequestRejected(
                "Query names more than one result kind".to_string(),
            ))
        }
    };

    let kind_match = clause.name("kind").ok_or_else(|| {
        DimensionsError::RequestRejected("Query has an empty return clause".to_string())
    })?;
    let kind = ResultKind::from_key(kind_match.as_str()).ok_or_else(|| {
        DimensionsError::RequestRejected(format!(
            "Unsupported result type \"{}\" -- can only handle {}",
            kind_match.as_str(),
            supported()
        ))
    })?;

    let clause_end = clause.get(0).map_or(masked.len(), |m| m.end());
    if !trailing_sort().is_match(&masked[clause_end..]) {
        return Err(DimensionsError::RequestRejected(format!(
            "Query must end with \"return {}\"",
            kind
        )));
    }

    let has_fieldset = clause.name("fields").is_some();
    let at = kind_match.end();
    drop(clauses);

    let expanded = if has_fieldset || kind.elaboration().is_empty() {
        text.clone()
    } else {
        format!("{}{}{}", &text[..at], kind.elaboration(), &text[at..])
    };

    tracing::debug!("parsed {} query: '{}'", kind, expanded);
    Ok(ParsedQuery {
        text,
        expanded,
        kind,
    })
}
