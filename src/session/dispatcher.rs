//! Secondary searches that complete sparse records.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use super::client::DslClient;
use crate::error::{DimensionsError, Result};
use crate::models::raw_identifier;

/// A memoized fill answer
#[derive(Debug, Clone, PartialEq)]
enum Answer {
    /// The service had no content for the search
    NoContent,
    Data(Value),
}

/// Issues fill searches and memoizes their responses by request text
#[derive(Debug, Default)]
pub(crate) struct Dispatcher {
    responses: Mutex<HashMap<String, Answer>>,
}

impl Dispatcher {
    /// Run `template` for `identifier` and return the matching record, if
    /// the service knows one. "No content" is remembered and yields `None`;
    /// any other inconsistency in the answer is a [`DimensionsError::DataMismatch`].
    pub fn fill(
        &self,
        client: &DslClient,
        template: &str,
        identifier: &str,
    ) -> Result<Option<Map<String, Value>>> {
        let result_key = returned_kind(template)?;
        let search = template.replace("{}", identifier);
        let key: String = search.chars().filter(|c| !c.is_whitespace()).collect();

        let cached = self.lock().get(&key).cloned();
        let answer = match cached {
            Some(answer) => {
                tracing::debug!("returning cached response for '{}'", search);
                answer
            }
            None => {
                tracing::debug!("initiating record search involving {}", identifier);
                let answer = match client.post(&search)? {
                    Some(data) => Answer::Data(data),
                    None => Answer::NoContent,
                };
                self.lock().insert(key, answer.clone());
                answer
            }
        };
        match answer {
            Answer::NoContent => Ok(None),
            Answer::Data(data) => matching_record(&data, result_key, identifier),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Answer>> {
        self.responses.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn return_clause() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\breturn\s+([A-Za-z_]+)").expect("valid regex"))
}

/// Result kind a fill template asks for
fn returned_kind(template: &str) -> Result<&str> {
    return_clause()
        .captures(template)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| {
            DimensionsError::MalformedData(format!("fill search has no return clause: {}", template))
        })
}

/// Find the record for `identifier` in a response of the form
/// `{"_stats": ..., "<result_key>": [...]}`. Results are not guaranteed to
/// come back in any particular order, or to include the identifier at all.
pub(crate) fn matching_record(
    data: &Value,
    result_key: &str,
    identifier: &str,
) -> Result<Option<Map<String, Value>>> {
    let map = data.as_object().ok_or_else(|| {
        DimensionsError::DataMismatch("Dimensions results are not a JSON object".to_string())
    })?;

    let keys: Vec<&String> = map.keys().filter(|k| k.as_str() != "_stats").collect();
    match keys.as_slice() {
        [key] if key.as_str() == result_key => {}
        [key] => {
            return Err(DimensionsError::DataMismatch(format!(
                "Expected \"{}\" results from Dimensions but got \"{}\"",
                result_key, key
            )))
        }
        [] => {
            return Err(DimensionsError::DataMismatch(format!(
                "Dimensions results have no \"{}\" list",
                result_key
            )))
        }
        _ => {
            return Err(DimensionsError::DataMismatch(format!(
                "Unexpected keys in Dimensions results: {:?}",
                map.keys().collect::<Vec<_>>()
            )))
        }
    }

    let items = map[result_key].as_array().ok_or_else(|| {
        DimensionsError::DataMismatch(format!(
            "Dimensions results for \"{}\" are not a list",
            result_key
        ))
    })?;
    Ok(items
        .iter()
        .filter_map(Value::as_object)
        .find(|item| raw_identifier(item) == identifier)
        .cloned())
}
