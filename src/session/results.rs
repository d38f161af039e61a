//! Paged iteration over query results.

use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

use super::SessionInner;
use crate::error::{DimensionsError, Result};
use crate::models::{ParsedQuery, RecordRef};

/// Records produced by one query.
///
/// The first page is fetched when the iterator is created, which fixes
/// [`total_count`](Self::total_count). Later pages are fetched only when the
/// current one runs out. An error fetching a page ends the iteration; an
/// error building a single record is yielded and iteration continues.
pub struct QueryResults {
    session: Arc<SessionInner>,
    query: ParsedQuery,
    total: usize,
    fetch_size: usize,
    position: usize,
    page: VecDeque<Value>,
    failed: bool,
}

impl QueryResults {
    pub(crate) fn start(
        session: Arc<SessionInner>,
        query: ParsedQuery,
        cap: Option<usize>,
        page_size: usize,
    ) -> Result<Self> {
        let fetch_size = match cap {
            Some(cap) if cap < page_size => cap,
            _ => page_size,
        };
        let mut results = Self {
            session,
            query,
            total: 0,
            fetch_size,
            position: 0,
            page: VecDeque::new(),
            failed: false,
        };
        let first = results.query.page(fetch_size, 0);
        let Some(data) = results.session.client.post(&first)? else {
            tracing::info!("query produced no content");
            return Ok(results);
        };

        let server_total = total_count(&data)?;
        results.total = cap.map_or(server_total, |cap| cap.min(server_total));
        tracing::info!(
            "query produced {} results{}",
            server_total,
            match cap {
                Some(cap) if cap < server_total => format!(", using the first {}", cap),
                _ => String::new(),
            }
        );
        if results.total > 0 {
            results.page = results.page_records(data)?;
        }
        Ok(results)
    }

    /// Number of records this iterator yields in total
    pub fn total_count(&self) -> usize {
        self.total
    }

    /// Records yielded so far
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn query(&self) -> &ParsedQuery {
        &self.query
    }

    fn fetch_next_page(&mut self) -> Result<()> {
        let text = self.query.page(self.fetch_size, self.position);
        tracing::debug!("fetching results {}..{}", self.position, self.position + self.fetch_size);
        let data = self.session.client.post(&text)?.ok_or_else(|| {
            DimensionsError::DataMismatch(format!(
                "No content for results from {} of {}",
                self.position, self.total
            ))
        })?;
        self.page = self.page_records(data)?;
        Ok(())
    }

    /// Extract one page's records, checking the count against what the
    /// total implies
    fn page_records(&self, mut data: Value) -> Result<VecDeque<Value>> {
        let key = self.query.kind.key();
        let records = match data.get_mut(key).map(Value::take) {
            Some(Value::Array(records)) => records,
            Some(_) => {
                return Err(DimensionsError::DataMismatch(format!(
                    "Results for \"{}\" are not a list",
                    key
                )))
            }
            None => {
                return Err(DimensionsError::DataMismatch(format!(
                    "Data from Dimensions does not have expected result type \"{}\"",
                    key
                )))
            }
        };

        let expected = self.fetch_size.min(self.total - self.position);
        if records.len() < expected {
            return Err(DimensionsError::DataMismatch(format!(
                "Expected {} results at position {} but got {}",
                expected,
                self.position,
                records.len()
            )));
        }
        Ok(records.into_iter().take(expected).collect())
    }
}

fn total_count(data: &Value) -> Result<usize> {
    let stats = data.get("_stats").ok_or_else(|| {
        DimensionsError::DataMismatch("Data from Dimensions not in expected form".to_string())
    })?;
    stats
        .get("total_count")
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .ok_or_else(|| {
            DimensionsError::DataMismatch("Data from Dimensions missing total count".to_string())
        })
}

impl Iterator for QueryResults {
    type Item = Result<RecordRef>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.position >= self.total {
            return None;
        }
        if self.page.is_empty() {
            if let Err(e) = self.fetch_next_page() {
                self.failed = true;
                return Some(Err(e));
            }
        }

        let item = self.page.pop_front()?;
        self.position += 1;
        Some(self.session.make(self.query.kind.entity_kind(), &item))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            (0, Some(0))
        } else {
            (0, Some(self.total - self.position))
        }
    }
}

impl std::fmt::Debug for QueryResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResults")
            .field("query", &self.query.text)
            .field("total", &self.total)
            .field("position", &self.position)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_total_count() {
        assert_eq!(total_count(&json!({"_stats": {"total_count": 42}})).unwrap(), 42);
        assert!(total_count(&json!({"publications": []})).unwrap_err().is_data_mismatch());
        assert!(total_count(&json!({"_stats": {}})).unwrap_err().is_data_mismatch());
    }
}
