//! Integration tests for Dimensions Records
//!
//! These drive whole sessions against a scripted transport: paging, lazy
//! fills, identity sharing and error reporting.

use dimensions_records::transport::{MockTransport, TransportResponse};
use dimensions_records::{
    Classification, Config, DimensionsError, EntityKind, FieldStatus, MergePolicy, RecordRef, Session,
};
use serde_json::{json, Value};
use std::sync::Arc;

const RESEARCHERS: &str = r#"search publications for "SBML" return researchers"#;

fn test_config() -> Config {
    let mut config = Config::default();
    config.query.retry_pause_ms = 1;
    config
}

fn session(mock: &Arc<MockTransport>) -> Session {
    Session::with_token(mock.clone(), &test_config(), "test-token").unwrap()
}

/// One page of researcher results, `ur.<start>` onwards
fn researcher_page(start: usize, count: usize, total: usize) -> TransportResponse {
    let researchers: Vec<Value> = (start..start + count)
        .map(|i| json!({"id": format!("ur.{}", i), "last_name": format!("R{}", i)}))
        .collect();
    TransportResponse::json(&json!({
        "_stats": {"total_count": total},
        "researchers": researchers
    }))
}

/// 250 researchers served 100 at a time
fn script_250(mock: &MockTransport) {
    mock.on("limit 100", researcher_page(0, 100, 250));
    mock.on("limit 100 skip 100", researcher_page(100, 100, 250));
    mock.on("limit 100 skip 200", researcher_page(200, 50, 250));
}

fn collect_ok(results: impl Iterator<Item = dimensions_records::Result<RecordRef>>) -> Vec<RecordRef> {
    results.map(|r| r.unwrap()).collect()
}

#[test]
fn test_pages_are_fetched_exactly() {
    let mock = Arc::new(MockTransport::new());
    script_250(&mock);
    let s = session(&mock);

    let results = s.query_paged(RESEARCHERS, None, 100).unwrap();
    assert_eq!(results.total_count(), 250);
    assert_eq!(mock.request_count(), 1);

    let records = collect_ok(results);
    assert_eq!(records.len(), 250);
    assert_eq!(records[0].identifier(), "ur.0");
    assert_eq!(records[249].identifier(), "ur.249");

    let requests = mock.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[0].body.ends_with("limit 100"));
    assert!(requests[1].body.ends_with("limit 100 skip 100"));
    assert!(requests[2].body.ends_with("limit 100 skip 200"));
    assert_eq!(requests[0].header("authorization"), Some("JWT test-token"));
}

#[test]
fn test_cap_above_total_uses_total() {
    let mock = Arc::new(MockTransport::new());
    script_250(&mock);
    let s = session(&mock);

    let results = s.query_paged(RESEARCHERS, Some(5000), 100).unwrap();
    assert_eq!(results.total_count(), 250);
    assert_eq!(collect_ok(results).len(), 250);
    assert_eq!(mock.count_matching("skip 250"), 0);
    assert_eq!(mock.count_matching("skip 300"), 0);
    assert_eq!(mock.request_count(), 3);
}

#[test]
fn test_cap_below_page_size_shrinks_fetch() {
    let mock = Arc::new(MockTransport::new());
    mock.on("limit 30", researcher_page(0, 30, 250));
    let s = session(&mock);

    let results = s.query_paged(RESEARCHERS, Some(30), 100).unwrap();
    assert_eq!(results.total_count(), 30);
    assert_eq!(collect_ok(results).len(), 30);
    assert_eq!(mock.request_count(), 1);
}

#[test]
fn test_cap_ends_mid_page() {
    let mock = Arc::new(MockTransport::new());
    script_250(&mock);
    let s = session(&mock);

    let records = collect_ok(s.query_paged(RESEARCHERS, Some(150), 100).unwrap());
    assert_eq!(records.len(), 150);
    assert_eq!(records[149].identifier(), "ur.149");
    assert_eq!(mock.request_count(), 2);
}

#[test]
fn test_zero_cap_is_rejected() {
    let mock = Arc::new(MockTransport::new());
    script_250(&mock);
    let s = session(&mock);

    assert!(matches!(
        s.query_paged(RESEARCHERS, Some(0), 100),
        Err(DimensionsError::RequestRejected(_))
    ));
    assert_eq!(mock.request_count(), 0);
}

#[test]
fn test_zero_total_is_a_single_fetch() {
    let mock = Arc::new(MockTransport::new());
    mock.on(
        "return researchers",
        TransportResponse::json(&json!({"_stats": {"total_count": 0}, "researchers": []})),
    );
    let s = session(&mock);

    let mut results = s.query(RESEARCHERS).unwrap();
    assert_eq!(results.total_count(), 0);
    assert!(results.next().is_none());
    assert_eq!(mock.request_count(), 1);
}

#[test]
fn test_no_content_first_page_means_no_results() {
    let mock = Arc::new(MockTransport::new());
    let s = session(&mock);

    let results = s.query(RESEARCHERS).unwrap();
    assert_eq!(results.total_count(), 0);
    assert_eq!(results.count(), 0);
    assert_eq!(mock.request_count(), 1);
}

#[test]
fn test_malformed_queries_never_reach_the_service() {
    let mock = Arc::new(MockTransport::new());
    let s = session(&mock);

    for bad in [
        "find publications return researchers",
        "search publications",
        "search publications return widgets",
        "search publications return researchers return grants",
    ] {
        assert!(
            matches!(s.query(bad), Err(DimensionsError::RequestRejected(_))),
            "accepted {}",
            bad
        );
    }
    assert!(matches!(
        s.query_paged(RESEARCHERS, None, 0),
        Err(DimensionsError::RequestRejected(_))
    ));
    assert_eq!(mock.request_count(), 0);
}

#[test]
fn test_caller_paging_is_replaced() {
    let mock = Arc::new(MockTransport::new());
    script_250(&mock);
    let s = session(&mock);

    let text = format!("{} limit 5 skip 10", RESEARCHERS);
    let records = collect_ok(s.query_paged(&text, None, 100).unwrap());
    assert_eq!(records.len(), 250);
    assert_eq!(mock.count_matching("limit 5 "), 0);
    assert_eq!(mock.count_matching("skip 10 "), 0);
}

#[test]
fn test_publication_queries_are_elaborated() {
    let mock = Arc::new(MockTransport::new());
    mock.on(
        "return publications",
        TransportResponse::json(&json!({
            "_stats": {"total_count": 1},
            "publications": [{
                "id": "pub.1",
                "title": "Lazy records",
                "journal": {"id": "jour.1", "title": "Journal of Laziness"},
                "author_affiliations": [[
                    {"first_name": "Ann", "last_name": "Lee", "researcher_id": "ur.1",
                     "affiliations": [{"id": "grid.1", "name": "Uni"}]}
                ]]
            }]
        })),
    );
    let s = session(&mock);

    let records = collect_ok(
        s.query(r#"search publications for "laziness" return publications"#)
            .unwrap(),
    );
    assert!(mock.requests()[0]
        .body
        .contains("return publications[basics+extras+book]"));

    let publication = &records[0];
    assert_eq!(publication.get_text("title").unwrap(), "Lazy records");
    let journal = publication.get_record("journal").unwrap().unwrap();
    assert!(Arc::ptr_eq(
        &journal,
        &s.cached(EntityKind::Journal, "jour.1").unwrap()
    ));

    let authors = publication.get_records("author_affiliations").unwrap();
    assert_eq!(authors.len(), 1);
    assert_eq!(authors[0].kind(), EntityKind::Author);
    assert_eq!(authors[0].get_text("last_name").unwrap(), "Lee");
    let affiliations = authors[0].get_records("affiliations").unwrap();
    assert_eq!(affiliations[0].get_text("name").unwrap(), "Uni");

    // Everything came from the payload
    assert_eq!(mock.request_count(), 1);
}

#[test]
fn test_caller_fieldset_suppresses_elaboration() {
    let mock = Arc::new(MockTransport::new());
    let s = session(&mock);

    s.query("search publications return publications[id+title]")
        .unwrap();
    let body = &mock.requests()[0].body;
    assert!(body.contains("return publications[id+title]"));
    assert!(!body.contains("basics"));
}

#[test]
fn test_identity_is_shared_across_queries() {
    let mock = Arc::new(MockTransport::new());
    mock.on(
        "return researchers",
        TransportResponse::json(&json!({
            "_stats": {"total_count": 1},
            "researchers": [{"id": "ur.1", "last_name": "Lee", "research_orgs": ["grid.1"]}]
        })),
    );
    mock.on(
        "return research_orgs",
        TransportResponse::json(&json!({
            "_stats": {"total_count": 1},
            "research_orgs": [{"id": "grid.1", "name": "Uni"}]
        })),
    );
    let s = session(&mock);

    let first = collect_ok(s.query(RESEARCHERS).unwrap());
    let second = collect_ok(s.query(RESEARCHERS).unwrap());
    assert!(Arc::ptr_eq(&first[0], &second[0]));

    let orgs = collect_ok(
        s.query("search publications return research_orgs")
            .unwrap(),
    );
    let affiliations = first[0].get_records("affiliations").unwrap();
    assert!(Arc::ptr_eq(&affiliations[0], &orgs[0]));

    // The org query's payload completed the shared instance
    assert_eq!(affiliations[0].get_text("name").unwrap(), "Uni");
    assert_eq!(s.cache_stats().distinct_identifiers, 2);
}

#[test]
fn test_one_fill_serves_every_field() {
    let mock = Arc::new(MockTransport::new());
    mock.on(
        r#"researchers.id="ur.1""#,
        TransportResponse::json(&json!({
            "_stats": {"total_count": 1},
            "researchers": [{
                "id": "ur.1",
                "first_name": "Ann",
                "last_name": "Lee",
                "current_organization_id": "grid.3"
            }]
        })),
    );
    let s = session(&mock);
    let researcher = s.record(EntityKind::Researcher, &json!({"id": "ur.1"})).unwrap();

    assert_eq!(researcher.get_text("first_name").unwrap(), "Ann");
    assert_eq!(researcher.get_text("last_name").unwrap(), "Lee");
    assert!(researcher.get("orcid").unwrap().is_empty());
    let org = researcher.get_record("current_organization").unwrap().unwrap();

    assert_eq!(mock.count_matching(r#"researchers.id="ur.1""#), 1);
    assert!(Arc::ptr_eq(
        &org,
        &s.cached(EntityKind::Organization, "grid.3").unwrap()
    ));
    assert_eq!(researcher.field_status("orcid"), Some(FieldStatus::Attempted));
}

#[test]
fn test_reads_are_idempotent() {
    let mock = Arc::new(MockTransport::new());
    mock.on(
        r#"research_orgs.id="grid.4""#,
        TransportResponse::json(&json!({
            "_stats": {"total_count": 1},
            "research_orgs": [{"id": "grid.4", "name": "Institute", "acronym": "INST"}]
        })),
    );
    let s = session(&mock);
    let org = s.record(EntityKind::Organization, &json!({"id": "grid.4"})).unwrap();

    let first = org.get("name").unwrap();
    let calls = mock.request_count();
    for _ in 0..3 {
        assert_eq!(org.get("name").unwrap(), first);
    }
    assert_eq!(org.get_text("acronym").unwrap(), "INST");
    assert!(org.get("city").unwrap().is_empty());
    assert_eq!(mock.request_count(), calls);
    assert_eq!(calls, 1);
}

#[test]
fn test_merges_never_blank_values() {
    let mock = Arc::new(MockTransport::new());
    mock.on(
        r#"researchers.id="ur.2""#,
        TransportResponse::json(&json!({
            "_stats": {"total_count": 1},
            "researchers": [{"id": "ur.2", "first_name": "Bo", "last_name": ""}]
        })),
    );
    let s = session(&mock);
    let researcher = s
        .record(EntityKind::Researcher, &json!({"id": "ur.2", "last_name": "Smith"}))
        .unwrap();

    researcher
        .merge(&json!({"id": "ur.2", "last_name": null}), MergePolicy::KeepExisting)
        .unwrap();
    assert_eq!(researcher.get_text("last_name").unwrap(), "Smith");

    // The fill answers with an empty last name; it fills the gap only
    assert_eq!(researcher.get_text("first_name").unwrap(), "Bo");
    assert_eq!(researcher.get_text("last_name").unwrap(), "Smith");

    researcher
        .merge(&json!({"last_name": "Jones"}), MergePolicy::Overwrite)
        .unwrap();
    assert_eq!(researcher.get_text("last_name").unwrap(), "Jones");
}

#[test]
fn test_no_content_fill_leaves_field_empty() {
    let mock = Arc::new(MockTransport::new());
    let s = session(&mock);
    let org = s.record(EntityKind::Organization, &json!({"id": "grid.7"})).unwrap();

    assert!(org.get("name").unwrap().is_empty());
    assert_eq!(org.field_status("name"), Some(FieldStatus::Attempted));
    assert!(org.get("country").unwrap().is_empty());
    assert_eq!(mock.request_count(), 1);
}

#[test]
fn test_failed_fill_surfaces_once() {
    let mock = Arc::new(MockTransport::new());
    mock.on(
        r#"research_orgs.id="grid.8""#,
        TransportResponse::new(Classification::RateLimited, "HTTP 429"),
    );
    let s = session(&mock);
    let org = s.record(EntityKind::Organization, &json!({"id": "grid.8"})).unwrap();

    assert!(matches!(org.get("name"), Err(DimensionsError::RateLimited(_))));
    assert_eq!(org.field_status("name"), Some(FieldStatus::Attempted));

    // The record had its one fill; later reads answer from what it holds
    assert!(org.get("name").unwrap().is_empty());
    assert!(org.get("city").unwrap().is_empty());
    assert_eq!(mock.request_count(), 1);
}

#[test]
fn test_refused_fill_is_an_authentication_failure() {
    let mock = Arc::new(MockTransport::new());
    mock.on(
        r#"researchers.id="ur.9""#,
        TransportResponse::new(Classification::AuthFailed, "HTTP 403"),
    );
    let s = session(&mock);
    let researcher = s
        .record(EntityKind::Researcher, &json!({"id": "ur.9", "last_name": "Kay"}))
        .unwrap();

    assert!(matches!(
        researcher.get("first_name"),
        Err(DimensionsError::AuthenticationFailure(_))
    ));
    assert_eq!(researcher.get_text("last_name").unwrap(), "Kay");
    assert!(researcher.get("orcid").unwrap().is_empty());
    assert_eq!(mock.request_count(), 1);
}

#[test]
fn test_fill_answered_with_other_kind_is_a_mismatch() {
    let mock = Arc::new(MockTransport::new());
    mock.on(
        r#"research_orgs.id="grid.9""#,
        TransportResponse::json(&json!({
            "_stats": {"total_count": 1},
            "publications": [{"id": "grid.9", "title": "Not an organization"}]
        })),
    );
    let s = session(&mock);
    let org = s.record(EntityKind::Organization, &json!({"id": "grid.9"})).unwrap();

    assert!(matches!(org.get("name"), Err(DimensionsError::DataMismatch(_))));
    assert_eq!(org.field_status("name"), Some(FieldStatus::Attempted));
}

#[test]
fn test_processing_is_retried() {
    let mock = Arc::new(MockTransport::new());
    mock.on("limit 100", TransportResponse::processing())
        .on("limit 100", researcher_page(0, 3, 3));
    let s = session(&mock);

    let records = collect_ok(s.query(RESEARCHERS).unwrap());
    assert_eq!(records.len(), 3);
    assert_eq!(mock.request_count(), 2);
}

#[test]
fn test_processing_gives_up() {
    let mock = Arc::new(MockTransport::new());
    mock.on("limit 100", TransportResponse::processing());
    let s = session(&mock);

    assert!(matches!(
        s.query(RESEARCHERS),
        Err(DimensionsError::ServiceUnavailable(_))
    ));
    assert_eq!(mock.request_count(), 1 + test_config().query.max_retries as usize);
}

#[test]
fn test_rejection_carries_server_detail() {
    let mock = Arc::new(MockTransport::new());
    mock.on(
        "return researchers",
        TransportResponse::rejected(
            json!({"errors": {"query": {"details": ["Semantic errors found: unknown field"]}}})
                .to_string(),
        ),
    );
    let s = session(&mock);

    match s.query(RESEARCHERS) {
        Err(DimensionsError::RequestRejected(message)) => {
            assert!(message.contains("Semantic errors found: unknown field"), "{}", message)
        }
        other => panic!("expected a rejection, got {:?}", other),
    }
}

#[test]
fn test_short_page_ends_iteration_with_mismatch() {
    let mock = Arc::new(MockTransport::new());
    mock.on("limit 100", researcher_page(0, 100, 250));
    mock.on("limit 100 skip 100", researcher_page(100, 40, 250));
    let s = session(&mock);

    let results: Vec<_> = s.query(RESEARCHERS).unwrap().collect();
    assert_eq!(results.len(), 101);
    assert!(results[..100].iter().all(Result::is_ok));
    assert!(results[100].as_ref().unwrap_err().is_data_mismatch());
    assert_eq!(mock.count_matching("skip 200"), 0);
}

#[test]
fn test_bad_record_is_skipped_not_fatal() {
    let mock = Arc::new(MockTransport::new());
    mock.on(
        "return researchers",
        TransportResponse::json(&json!({
            "_stats": {"total_count": 3},
            "researchers": [{"id": "ur.1"}, "not a record", {"id": "ur.3"}]
        })),
    );
    let s = session(&mock);

    let results: Vec<_> = s.query(RESEARCHERS).unwrap().collect();
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(DimensionsError::MalformedData(_))));
    assert_eq!(results[2].as_ref().unwrap().identifier(), "ur.3");
}
