//! How each entity kind reads its payloads.
//!
//! Everything here produces [`Assignment`]s; the record applies them under
//! its own merge rules. Nested entities are created through
//! [`Record::create_related`] so that they share the parent's session.

use serde_json::{json, Map, Value};

use super::record::{Assignment, MergePolicy, Record, RecordRef};
use super::schema::EntityKind;
use super::value::{json_is_empty, FieldValue};
use crate::error::{DimensionsError, Result};

/// Grant fields holding lists of related entities, and the kind of each item
const GRANT_LISTS: &[(&str, EntityKind)] = &[
    ("FOR", EntityKind::Category),
    ("FOR_first", EntityKind::Category),
    ("HRCS_HC", EntityKind::Category),
    ("HRCS_RAC", EntityKind::Category),
    ("RCDC", EntityKind::Category),
    ("funder_countries", EntityKind::Country),
    ("funders", EntityKind::Organization),
    ("research_org_cities", EntityKind::City),
    ("research_org_countries", EntityKind::Country),
    ("research_org_state_codes", EntityKind::State),
];

/// Identifier for a payload of the given kind: `id`, then the kind's
/// fallback key, else the empty string.
pub(crate) fn identifier(kind: EntityKind, data: &Map<String, Value>) -> String {
    id_text(data.get("id"))
        .or_else(|| {
            kind.field_set()
                .id_fallback
                .and_then(|key| id_text(data.get(key)))
        })
        .unwrap_or_default()
}

/// Identifier of a raw search-result item of unknown kind
pub(crate) fn raw_identifier(data: &Map<String, Value>) -> String {
    id_text(data.get("id"))
        .or_else(|| id_text(data.get("researcher_id")))
        .unwrap_or_default()
}

fn id_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Simple-field writes for the keys present in `data`. The identifier is
/// fixed at construction and never reassigned.
pub(crate) fn simple_assignments(
    kind: EntityKind,
    data: &Map<String, Value>,
) -> Result<Vec<Assignment>> {
    let mut assignments = Vec::new();
    for &field in kind.field_set().simple {
        let value = match field {
            "id" => continue,
            "orcid" if kind.is_person() => {
                let raw = data
                    .get("orcid_id")
                    .filter(|v| !json_is_empty(v))
                    .or_else(|| data.get("orcid"));
                match raw {
                    Some(v) => normalized_orcid(v)?,
                    None => continue,
                }
            }
            _ => match data.get(field) {
                Some(v) => FieldValue::from_json(v.clone()),
                None => continue,
            },
        };
        assignments.push(Assignment::new(field, value));
    }
    Ok(assignments)
}

// The service reports ORCID ids as a list, and occasionally as the string
// rendering of one.
fn normalized_orcid(value: &Value) -> Result<FieldValue> {
    match value {
        Value::String(s) if s.contains('[') => Ok(FieldValue::from(
            s.trim_matches(|c| c == '\'' || c == '[' || c == ']'),
        )),
        Value::Array(items) => match items.as_slice() {
            [] => Ok(FieldValue::Empty),
            [one] => Ok(FieldValue::from_json(one.clone())),
            _ => Err(DimensionsError::DataMismatch(format!(
                "More than one ORCID id: {}",
                value
            ))),
        },
        other => Ok(FieldValue::from_json(other.clone())),
    }
}

/// Build every expandable field of `record` from its payload
pub(crate) fn expand(record: &Record, data: &Map<String, Value>) -> Result<Vec<Assignment>> {
    match record.kind() {
        EntityKind::Publication => Ok(vec![
            Assignment::settled("journal", journal(record, data)?),
            Assignment::settled("author_affiliations", authors(record, data)?),
        ]),
        EntityKind::Author => Ok(vec![
            Assignment::new("current_organization", current_organization(record, data)?),
            Assignment::settled(
                "affiliations",
                FieldValue::Records(related_list(
                    record,
                    EntityKind::Organization,
                    data.get("affiliations"),
                    "affiliations",
                )?),
            ),
        ]),
        EntityKind::Researcher => Ok(vec![
            Assignment::new("current_organization", current_organization(record, data)?),
            Assignment::new("affiliations", researcher_affiliations(record, data)?),
        ]),
        EntityKind::Grant => expand_grant(record, data),
        _ => Ok(Vec::new()),
    }
}

/// Writes for a merge or fill payload: simple fields plus whatever nested
/// data the kind knows how to take from a partial record.
pub(crate) fn merge_assignments(
    record: &Record,
    data: &Map<String, Value>,
) -> Result<Vec<Assignment>> {
    let kind = record.kind();
    let mut assignments = simple_assignments(kind, data)?;
    if kind.is_person() && data.contains_key("current_organization_id") {
        assignments.push(Assignment::new(
            "current_organization",
            current_organization(record, data)?,
        ));
    }
    if kind == EntityKind::Researcher
        && (data.contains_key("research_orgs") || data.contains_key("affiliations"))
    {
        assignments.push(Assignment::new(
            "affiliations",
            researcher_affiliations(record, data)?,
        ));
    }
    Ok(assignments)
}

fn journal(record: &Record, data: &Map<String, Value>) -> Result<FieldValue> {
    match data.get("journal") {
        Some(v @ Value::Object(map)) if !map.is_empty() => Ok(FieldValue::Record(
            related(record, EntityKind::Journal, v)?,
        )),
        Some(v) if !json_is_empty(v) => Err(DimensionsError::MalformedData(format!(
            "journal of {} is not an object",
            record.identifier()
        ))),
        _ => Ok(FieldValue::Empty),
    }
}

fn authors(record: &Record, data: &Map<String, Value>) -> Result<FieldValue> {
    let list = match data.get("author_affiliations") {
        None | Some(Value::Null) => return Ok(FieldValue::Empty),
        Some(Value::Array(list)) => list,
        Some(_) => {
            return Err(DimensionsError::MalformedData(format!(
                "author_affiliations of {} is not a list",
                record.identifier()
            )))
        }
    };

    // Either a flat list of authors, or a single list wrapping that list
    let entries = match list.as_slice() {
        [Value::Array(inner)] => inner,
        [Value::Array(_), ..] => {
            return Err(DimensionsError::MalformedData(format!(
                "author_affiliations of {} holds more than one list",
                record.identifier()
            )))
        }
        _ => list,
    };

    let authors = entries
        .iter()
        .map(|entry| {
            if entry.is_object() {
                record.create_related(EntityKind::Author, entry)
            } else {
                Err(DimensionsError::MalformedData(format!(
                    "author entry of {} is not an object: {}",
                    record.identifier(),
                    entry
                )))
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(FieldValue::Records(authors))
}

fn current_organization(record: &Record, data: &Map<String, Value>) -> Result<FieldValue> {
    match id_text(data.get("current_organization_id")) {
        Some(id) => Ok(FieldValue::Record(
            record.create_related(EntityKind::Organization, &json!({ "id": id }))?,
        )),
        None => Ok(FieldValue::Empty),
    }
}

fn researcher_affiliations(record: &Record, data: &Map<String, Value>) -> Result<FieldValue> {
    let source = if data.get("research_orgs").is_some_and(|v| !json_is_empty(v)) {
        data.get("research_orgs")
    } else {
        data.get("affiliations")
    };
    Ok(FieldValue::Records(related_list(
        record,
        EntityKind::Organization,
        source,
        "affiliations",
    )?))
}

fn expand_grant(record: &Record, data: &Map<String, Value>) -> Result<Vec<Assignment>> {
    let mut assignments = Vec::with_capacity(GRANT_LISTS.len() + 2);
    for &(field, kind) in GRANT_LISTS {
        let items = related_list(record, kind, data.get(field), field)?;
        assignments.push(Assignment::settled(field, FieldValue::Records(items)));
    }

    // Researchers arrive as bare entries; `researcher_details` carries the
    // rest, including the organizations each researcher was affiliated with.
    let researchers = related_list(
        record,
        EntityKind::Researcher,
        data.get("researchers"),
        "researchers",
    )?;
    let research_orgs = related_list(
        record,
        EntityKind::Organization,
        data.get("research_orgs"),
        "research_orgs",
    )?;

    if let Some(Value::Array(details)) = data.get("researcher_details") {
        for detail in details.iter().filter_map(Value::as_object) {
            let id = raw_identifier(detail);
            if let Some(researcher) = researchers.iter().find(|r| r.identifier() == id) {
                researcher.merge(&Value::Object(detail.clone()), MergePolicy::KeepExisting)?;
            }
            let affiliations = detail.get("affiliations").and_then(Value::as_array);
            for org in affiliations.into_iter().flatten() {
                let Some(org_data) = org.as_object() else {
                    continue;
                };
                let org_id = raw_identifier(org_data);
                if let Some(found) = research_orgs.iter().find(|o| o.identifier() == org_id) {
                    found.merge(org, MergePolicy::KeepExisting)?;
                }
            }
        }
    }

    assignments.push(Assignment::settled(
        "researchers",
        FieldValue::Records(researchers),
    ));
    assignments.push(Assignment::settled(
        "research_orgs",
        FieldValue::Records(research_orgs),
    ));
    Ok(assignments)
}

/// Build or reuse a related record, folding in any extra data the payload
/// carries when the instance already existed.
fn related(record: &Record, kind: EntityKind, data: &Value) -> Result<RecordRef> {
    let child = record.create_related(kind, data)?;
    child.merge(data, MergePolicy::KeepExisting)?;
    Ok(child)
}

/// Interpret a payload value as a list of related records. Items may be
/// objects or bare identifiers.
fn related_list(
    record: &Record,
    kind: EntityKind,
    value: Option<&Value>,
    field: &str,
) -> Result<Vec<RecordRef>> {
    let items = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(DimensionsError::DataMismatch(format!(
                "Unexpected data received for \"{}\" on {}: {}",
                field,
                record.identifier(),
                other
            )))
        }
    };

    items
        .iter()
        .map(|item| match item {
            Value::Object(_) => related(record, kind, item),
            Value::String(_) | Value::Number(_) => {
                record.create_related(kind, &json!({ "id": item }))
            }
            other => Err(DimensionsError::DataMismatch(format!(
                "Unexpected item in \"{}\" on {}: {}",
                field,
                record.identifier(),
                other
            ))),
        })
        .collect()
}
