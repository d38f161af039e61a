//! Lazily resolved records.
//!
//! A [`Record`] is built from a (possibly sparse) JSON payload. Simple fields
//! are copied at construction; expandable fields are built from the stored
//! payload the first time one of them is read; and a field that is still
//! empty after that may be completed by a single secondary search through
//! the owning session.
//!
//! Progress is tracked per field in a side table of [`FieldStatus`] values:
//!
//! - **Unknown**: never examined
//! - **Attempted**: examined, and a remote fill was tried or is impossible
//! - **Resolved**: holds a value, or is known to stay empty
//!
//! Once any fill has been issued for a record, no further fill is issued
//! for it, whatever field is read afterwards.

use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::kinds;
use super::schema::EntityKind;
use super::value::{ordered, FieldValue};
use crate::error::{DimensionsError, Result};
use crate::session::SessionInner;

/// Shared handle to a record; identity is pointer identity
pub type RecordRef = Arc<Record>;

/// Resolution progress of one field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldStatus {
    Unknown,
    Attempted,
    Resolved,
}

/// How merged data treats values already present
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Write only into fields never written, or currently empty
    #[default]
    KeepExisting,
    /// Always write
    Overwrite,
}

/// One pending write into a record
#[derive(Debug)]
pub(crate) struct Assignment {
    pub field: &'static str,
    pub value: FieldValue,
    /// Mark the field resolved even if the value is empty
    pub settle: bool,
}

impl Assignment {
    pub fn new(field: &'static str, value: FieldValue) -> Self {
        Self {
            field,
            value,
            settle: false,
        }
    }

    pub fn settled(field: &'static str, value: FieldValue) -> Self {
        Self {
            field,
            value,
            settle: true,
        }
    }
}

#[derive(Debug, Default)]
struct RecordState {
    values: HashMap<&'static str, FieldValue>,
    status: HashMap<&'static str, FieldStatus>,
    expanded: bool,
    filled: bool,
}

impl RecordState {
    fn status(&self, field: &str) -> FieldStatus {
        self.status
            .get(field)
            .copied()
            .unwrap_or(FieldStatus::Unknown)
    }

    fn is_empty(&self, field: &str) -> bool {
        self.values.get(field).map_or(true, FieldValue::is_empty)
    }

    fn assign(&mut self, field: &'static str, value: FieldValue, policy: MergePolicy) -> bool {
        let write = match policy {
            MergePolicy::Overwrite => true,
            MergePolicy::KeepExisting => match self.values.get(field) {
                None => true,
                Some(current) => current.is_empty() && !value.is_empty(),
            },
        };
        if !write {
            return false;
        }
        if !value.is_empty() {
            self.status.insert(field, FieldStatus::Resolved);
        } else if self.status(field) == FieldStatus::Resolved {
            self.status.remove(field);
        }
        self.values.insert(field, value);
        true
    }

    fn apply(&mut self, assignments: Vec<Assignment>, policy: MergePolicy) {
        for assignment in assignments {
            self.assign(assignment.field, assignment.value, policy);
            if assignment.settle {
                self.status.insert(assignment.field, FieldStatus::Resolved);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Identity {
    Id(String),
    Payload(String),
}

impl Identity {
    fn text(&self) -> &str {
        match self {
            Identity::Id(s) | Identity::Payload(s) => s,
        }
    }
}

/// A remote record of one [`EntityKind`], resolved lazily
pub struct Record {
    kind: EntityKind,
    identity: Identity,
    payload: Map<String, Value>,
    session: Weak<SessionInner>,
    state: Mutex<RecordState>,
}

impl Record {
    pub(crate) fn new(kind: EntityKind, data: &Value, session: Weak<SessionInner>) -> Result<Self> {
        let payload = data
            .as_object()
            .ok_or_else(|| {
                DimensionsError::MalformedData(format!("{} data is not a JSON object", kind))
            })?
            .clone();

        let identifier = kinds::identifier(kind, &payload);
        let identity = if identifier.is_empty() {
            Identity::Payload(ordered(data).to_string())
        } else {
            Identity::Id(identifier.clone())
        };

        let mut state = RecordState::default();
        state.assign("id", FieldValue::from(identifier.as_str()), MergePolicy::KeepExisting);
        state.apply(
            kinds::simple_assignments(kind, &payload)?,
            MergePolicy::KeepExisting,
        );
        for field in kind.field_set().simple {
            state.values.entry(field).or_default();
        }

        tracing::trace!("created {} record '{}'", kind, identifier);
        Ok(Self {
            kind,
            identity,
            payload,
            session,
            state: Mutex::new(state),
        })
    }

    /// Build a record that belongs to no session. Nested entities are
    /// created fresh and no remote fill is ever attempted.
    pub fn from_json(kind: EntityKind, data: &Value) -> Result<RecordRef> {
        Ok(Arc::new(Self::new(kind, data, Weak::new())?))
    }

    /// Build (or reuse) a record of `kind` through the same session as
    /// this one, so that identity is shared with everything it produced.
    pub fn create_related(&self, kind: EntityKind, data: &Value) -> Result<RecordRef> {
        match self.session.upgrade() {
            Some(session) => session.make(kind, data),
            None => Self::from_json(kind, data),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Remote identifier, or the empty string when the payload had none
    pub fn identifier(&self) -> &str {
        match &self.identity {
            Identity::Id(id) => id,
            Identity::Payload(_) => "",
        }
    }

    /// The payload this record was constructed from
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn is_expanded(&self) -> bool {
        self.lock().expanded
    }

    /// Status of a declared field; `None` for undeclared names
    pub fn field_status(&self, field: &str) -> Option<FieldStatus> {
        let field = self.kind.field_set().field(field)?;
        Some(self.lock().status(field))
    }

    /// Read a field, expanding nested data and filling from the remote
    /// service as needed.
    ///
    /// Fails with [`DimensionsError::UnknownField`] for undeclared names.
    /// Errors from a required secondary search surface here unchanged,
    /// except "no content", which just leaves the field empty.
    pub fn get(&self, field: &str) -> Result<FieldValue> {
        let set = self.kind.field_set();
        let field = set.field(field).ok_or_else(|| {
            DimensionsError::UnknownField(format!("{} has no field '{}'", self.kind, field))
        })?;

        if set.is_expandable(field) {
            self.expand()?;
        }
        if self.claim_fill(field) {
            self.fill()?;
        }
        Ok(self.value(field))
    }

    /// Read a field as text (see [`FieldValue::to_text`])
    pub fn get_text(&self, field: &str) -> Result<String> {
        Ok(self.get(field)?.to_text())
    }

    /// Read an object-valued field
    pub fn get_record(&self, field: &str) -> Result<Option<RecordRef>> {
        Ok(self.get(field)?.as_record().cloned())
    }

    /// Read a list-valued field; a single nested record becomes a one-item list
    pub fn get_records(&self, field: &str) -> Result<Vec<RecordRef>> {
        Ok(match self.get(field)? {
            FieldValue::Records(list) => list,
            FieldValue::Record(record) => vec![record],
            _ => Vec::new(),
        })
    }

    /// Merge another payload into this record. Under
    /// [`MergePolicy::KeepExisting`] a sparser payload never blanks a value
    /// and a field that already holds a value keeps it.
    pub fn merge(&self, data: &Value, policy: MergePolicy) -> Result<()> {
        let data = data.as_object().ok_or_else(|| {
            DimensionsError::MalformedData(format!("{} merge data is not a JSON object", self.kind))
        })?;
        let assignments = kinds::merge_assignments(self, data)?;
        self.lock().apply(assignments, policy);
        Ok(())
    }

    /// JSON view of every declared field currently held. Nothing is
    /// expanded or fetched; unread expandable fields show as null.
    pub fn snapshot(&self) -> Value {
        let values: Vec<(&'static str, FieldValue)> = {
            let state = self.lock();
            self.kind
                .field_set()
                .fields()
                .map(|f| (f, state.values.get(f).cloned().unwrap_or_default()))
                .collect()
        };
        Value::Object(
            values
                .into_iter()
                .map(|(f, v)| (f.to_string(), v.to_json()))
                .collect(),
        )
    }

    fn value(&self, field: &str) -> FieldValue {
        self.lock().values.get(field).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, RecordState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn expand(&self) -> Result<()> {
        if self.lock().expanded {
            return Ok(());
        }
        tracing::debug!("expanding {} '{}'", self.kind, self.identifier());

        // Nested construction goes through the session cache and may lock
        // other records, so build everything before taking our own lock.
        let assignments = kinds::expand(self, &self.payload)?;
        let mut state = self.lock();
        if !state.expanded {
            state.expanded = true;
            state.apply(assignments, MergePolicy::KeepExisting);
        }
        Ok(())
    }

    /// Decide whether reading `field` must issue the record's fill, marking
    /// the affected fields attempted either way.
    fn claim_fill(&self, field: &'static str) -> bool {
        let set = self.kind.field_set();
        let mut state = self.lock();
        if !state.is_empty(field) || state.status(field) != FieldStatus::Unknown {
            return false;
        }

        let possible = !state.filled && set.fill_template.is_some() && !self.identifier().is_empty();
        if !possible {
            state.status.insert(field, FieldStatus::Attempted);
            return false;
        }

        state.filled = true;
        if set.fill_covers_all() {
            for f in set.fields() {
                if state.is_empty(f) && state.status(f) == FieldStatus::Unknown {
                    state.status.insert(f, FieldStatus::Attempted);
                }
            }
        } else {
            state.status.insert(field, FieldStatus::Attempted);
        }
        true
    }

    fn fill(&self) -> Result<()> {
        let Some(template) = self.kind.field_set().fill_template else {
            return Ok(());
        };
        let Some(session) = self.session.upgrade() else {
            tracing::debug!(
                "{} '{}' has no live session -- can't fill values",
                self.kind,
                self.identifier()
            );
            return Ok(());
        };

        tracing::debug!("filling {} '{}'", self.kind, self.identifier());
        match session.fill(template, self.identifier())? {
            Some(data) => {
                let assignments = kinds::merge_assignments(self, &data)?;
                self.lock().apply(assignments, MergePolicy::KeepExisting);
            }
            None => {
                tracing::debug!("no fill data for {} '{}'", self.kind, self.identifier());
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("kind", &self.kind)
            .field("identifier", &self.identifier())
            .finish()
    }
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{} {}>", self.kind, self.identity.text())
    }
}

// Equality and hashing are both keyed on the identifier when there is one,
// and on the canonical original payload otherwise.
impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other) || (self.kind == other.kind && self.identity == other.identity)
    }
}

impl Eq for Record {}

impl Hash for Record {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.identity.hash(state);
    }
}

impl PartialOrd for Record {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Record {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (self.identity.text(), other.identity.text());
        a.to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| self.identity.cmp(&other.identity))
            .then_with(|| self.kind.cmp(&other.kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn researcher() -> RecordRef {
        Record::from_json(
            EntityKind::Researcher,
            &json!({
                "researcher_id": "ur.0665132124.52",
                "first_name": "Michael",
                "last_name": "Hucka",
                "orcid_id": ["0000-0002-1111-2222"],
                "research_orgs": ["grid.20861.3d", "grid.214458.e"]
            }),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_non_object_payload() {
        let err = Record::from_json(EntityKind::Publication, &json!(["not", "a", "map"]))
            .unwrap_err();
        assert!(matches!(err, DimensionsError::MalformedData(_)));
    }

    #[test]
    fn test_identifier_precedence() {
        let r = researcher();
        assert_eq!(r.identifier(), "ur.0665132124.52");
        assert_eq!(r.get_text("id").unwrap(), "ur.0665132124.52");

        let both = Record::from_json(
            EntityKind::Author,
            &json!({"id": "ur.1", "researcher_id": "ur.2"}),
        )
        .unwrap();
        assert_eq!(both.identifier(), "ur.1");

        let none = Record::from_json(EntityKind::Author, &json!({"first_name": "A"})).unwrap();
        assert_eq!(none.identifier(), "");
    }

    #[test]
    fn test_unknown_field() {
        let r = researcher();
        assert!(matches!(
            r.get("shoe_size"),
            Err(DimensionsError::UnknownField(_))
        ));
        assert_eq!(r.field_status("shoe_size"), None);
    }

    #[test]
    fn test_simple_fields_and_orcid_normalization() {
        let r = researcher();
        assert_eq!(r.get_text("first_name").unwrap(), "Michael");
        assert_eq!(r.get_text("orcid").unwrap(), "0000-0002-1111-2222");
        assert_eq!(r.field_status("orcid"), Some(FieldStatus::Resolved));
    }

    #[test]
    fn test_more_than_one_orcid_is_a_mismatch() {
        let err = Record::from_json(
            EntityKind::Researcher,
            &json!({"id": "ur.1", "orcid_id": ["a", "b"]}),
        )
        .unwrap_err();
        assert!(err.is_data_mismatch());
    }

    #[test]
    fn test_merge_keeps_resolved_values() {
        let r = researcher();
        r.merge(&json!({"orcid": ""}), MergePolicy::KeepExisting).unwrap();
        assert_eq!(r.get_text("orcid").unwrap(), "0000-0002-1111-2222");

        r.merge(&json!({"orcid": "0000-0003-3333-4444"}), MergePolicy::KeepExisting)
            .unwrap();
        assert_eq!(r.get_text("orcid").unwrap(), "0000-0002-1111-2222");

        r.merge(&json!({"orcid": "0000-0003-3333-4444"}), MergePolicy::Overwrite)
            .unwrap();
        assert_eq!(r.get_text("orcid").unwrap(), "0000-0003-3333-4444");
    }

    #[test]
    fn test_merge_fills_empty_fields() {
        let r = Record::from_json(EntityKind::Organization, &json!({"id": "grid.1"})).unwrap();
        assert_eq!(r.get_text("name").unwrap(), "");
        r.merge(&json!({"name": "Caltech", "acronym": "CIT"}), MergePolicy::KeepExisting)
            .unwrap();
        assert_eq!(r.get_text("name").unwrap(), "Caltech");
        assert_eq!(r.get_text("acronym").unwrap(), "CIT");
    }

    #[test]
    fn test_expansion_runs_once() {
        let r = researcher();
        assert!(!r.is_expanded());
        let first = r.get_records("affiliations").unwrap();
        assert!(r.is_expanded());
        let second = r.get_records("affiliations").unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().zip(&second).all(|(a, b)| Arc::ptr_eq(a, b)));
    }

    #[test]
    fn test_detached_record_marks_attempted_without_fetching() {
        let r = Record::from_json(EntityKind::Organization, &json!({"id": "grid.1"})).unwrap();
        assert_eq!(r.field_status("name"), Some(FieldStatus::Unknown));
        assert!(r.get("name").unwrap().is_empty());
        assert_eq!(r.field_status("name"), Some(FieldStatus::Attempted));
        assert_eq!(r.field_status("acronym"), Some(FieldStatus::Attempted));
    }

    #[test]
    fn test_equality_and_ordering_by_identifier() {
        let a = Record::from_json(EntityKind::Organization, &json!({"id": "grid.B"})).unwrap();
        let b = Record::from_json(
            EntityKind::Organization,
            &json!({"id": "grid.B", "name": "More complete"}),
        )
        .unwrap();
        let c = Record::from_json(EntityKind::Organization, &json!({"id": "grid.a"})).unwrap();
        assert_eq!(a, b);
        assert!(c < a);

        let other_kind = Record::from_json(EntityKind::Journal, &json!({"id": "grid.B"})).unwrap();
        assert_ne!(*a, *other_kind);
    }

    #[test]
    fn test_equality_without_identifier_uses_payload() {
        let a = Record::from_json(EntityKind::Country, &json!({"name": "Peru", "x": [1, 2]}))
            .unwrap();
        let b = Record::from_json(EntityKind::Country, &json!({"x": [2, 1], "name": "Peru"}))
            .unwrap();
        let c = Record::from_json(EntityKind::Country, &json!({"name": "Chile"})).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_snapshot_does_not_expand() {
        let r = researcher();
        let snapshot = r.snapshot();
        assert_eq!(snapshot["last_name"], json!("Hucka"));
        assert_eq!(snapshot["affiliations"], Value::Null);
        assert!(!r.is_expanded());
    }
}
