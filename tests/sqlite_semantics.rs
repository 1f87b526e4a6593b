//! End-to-end filter semantics over a SQLite fleet database.
//!
//! Queries are compiled with the built-in target schema and executed through
//! the SQLite backend, so the join, negation and case folding rules are
//! checked against real rows rather than rendered SQL.

use fleetql::backend::{FilterBackend, SqliteBackend, TableCatalog};
use fleetql::macros::{StaticMacros, TimeMacros};
use fleetql::schema::SchemaRegistry;
use fleetql::tenant::{PollingIntervals, StaticTenantConfig, TenantIntervalCache};
use fleetql::{QueryEngine, QueryError};
use proptest::prelude::*;
use rusqlite::{params, Connection};
use serde_json::{json, Value};
use std::sync::Arc;

fn engine() -> QueryEngine {
    QueryEngine::new(SchemaRegistry::fleet().expect("fleet schemas"))
}

fn empty_backend() -> SqliteBackend {
    let conn = Connection::open_in_memory().expect("in-memory database");
    let backend = SqliteBackend::from_connection(conn, TableCatalog::fleet()).expect("backend");
    backend.init_fleet_schema().expect("schema");
    backend
}

fn backend_with(records: &[Value]) -> SqliteBackend {
    let backend = empty_backend();
    for record in records {
        backend.insert_target(record).expect("insert target");
    }
    backend
}

fn fleet_records() -> Vec<Value> {
    vec![
        json!({
            "controllerId": "targetId123",
            "name": "targetName123",
            "description": "targetDesc123",
            "attribute": {"revision": "1.1"},
            "metadata": {"metaKey": "metaValue"},
            "assignedDs": {"name": "AssignedDs", "version": "1.0"},
            "tag": ["Tag1", "Tag3"]
        }),
        json!({
            "controllerId": "targetId1234",
            "name": "targetId1234",
            "description": "targetId1234",
            "attribute": {"revision": "1.2"},
            "metadata": {"metaKey": "value"},
            "tag": ["Tag1"]
        }),
        json!({"controllerId": "targetId1235", "name": "targetId1235", "tag": ["Tag2", "Tag3"]}),
        json!({"controllerId": "targetId1236", "name": "targetId1236", "tag": ["Tag2", "Tag3"]}),
        json!({"controllerId": "targetId1237", "name": "targetId1237"}),
    ]
}

fn count_with(engine: &QueryEngine, backend: &SqliteBackend, query: &str) -> u64 {
    let filter = engine
        .compile("target", query)
        .unwrap_or_else(|e| panic!("{} should compile: {}", query, e));
    let count = backend.count(&filter).expect("count");
    let ids = backend.search(&filter, None).expect("search");
    assert_eq!(ids.len() as u64, count, "search and count disagree for {}", query);
    count
}

fn assert_counts(backend: &SqliteBackend, cases: &[(&str, u64)]) {
    let engine = engine();
    for (query, expected) in cases {
        assert_eq!(count_with(&engine, backend, query), *expected, "query: {}", query);
    }
}

#[test]
fn test_filter_by_tag() {
    let backend = backend_with(&fleet_records());
    assert_counts(
        &backend,
        &[
            ("tag==Tag1", 2),
            ("tag!=Tag1", 3),
            ("tag==T*", 4),
            ("tag!=T*", 1),
            ("tag==''", 1),
            ("tag!=''", 4),
            ("tag!=*", 1),
            ("tag==*", 4),
            ("tag=out=(null)", 5),
            ("tag!=notexist", 5),
            ("tag==tag1", 2),
        ],
    );
}

#[test]
fn test_filter_by_tag_combinations() {
    let backend = backend_with(&fleet_records());
    assert_counts(
        &backend,
        &[
            ("tag!=Tag2;tag==Tag3", 1),
            ("tag!=Tag2,tag!=Tag3", 3),
            ("(tag!=TAG1,tag!=TAG2);controllerid!=targetId1235", 4),
            ("tag==Tag1 and tag==Tag3", 1),
            ("tag==Tag1 or tag==Tag2", 4),
        ],
    );
}

#[test]
fn test_filter_by_assigned_distribution_set() {
    let backend = backend_with(&fleet_records());
    assert_counts(
        &backend,
        &[
            ("assignedds.name==AssignedDs", 1),
            ("assignedds.name=out=(AssignedDs,notexist)", 4),
            ("assignedds.name!=AssignedDs", 4),
            ("assignedds.version==1.0", 1),
        ],
    );
}

#[test]
fn test_filter_by_metadata() {
    let backend = backend_with(&fleet_records());
    assert_counts(
        &backend,
        &[
            ("metadata.metaKey!=null", 2),
            ("metadata.metaKey!=metaValue", 1),
            ("metadata.metaKey!=notExist", 2),
            ("metadata.metaKey==*v*", 2),
            ("metadata.metaKey==null", 0),
            ("metadata.metaKey=is=null", 3),
            ("metadata.metaKey=not=null", 2),
            ("metadata.metaKey=in=(metaValue,notexist)", 1),
            ("metadata.metaKey=out=(metaValue,notexist)", 1),
            ("name!=targetName123;metadata.metaKey!=value", 0),
        ],
    );
}

#[test]
fn test_metadata_keys_may_contain_dots() {
    let mut records = fleet_records();
    records.push(json!({"controllerId": "targetId1238", "metadata": {"key.dot": "value.dot"}}));
    let backend = backend_with(&records);
    assert_counts(
        &backend,
        &[
            ("metadata.key.dot==value.dot", 1),
            ("metadata.metaKey=is=null", 4),
            ("metadata.key.dot=is=null", 5),
        ],
    );
}

#[test]
fn test_filter_by_attribute() {
    let backend = backend_with(&fleet_records());
    assert_counts(
        &backend,
        &[
            ("attribute.revision==1.1", 1),
            ("attribute.revision!=1.1", 1),
            ("attribute.revision==1*", 2),
            ("attribute.Revision==1.1", 0),
        ],
    );
}

#[test]
fn test_filter_by_description() {
    let backend = backend_with(&fleet_records());
    assert_counts(
        &backend,
        &[
            ("description==''", 3),
            ("description!=''", 2),
            ("description==target*", 2),
            ("description==TARGETDESC123", 1),
        ],
    );
}

#[test]
fn test_unknown_enum_value_is_rejected() {
    let err = engine().compile("target", "updatestatus==noExist*").unwrap_err();
    assert!(matches!(err, QueryError::UnsupportedField { .. }));
    assert!(err.is_client_error());
}

#[test]
fn test_negation_across_relation_is_not_a_join() {
    let backend = backend_with(&[
        json!({"controllerId": "single", "tag": ["5"]}),
        json!({"controllerId": "both", "tag": ["5", "6"]}),
        json!({"controllerId": "other", "tag": ["6"]}),
    ]);
    assert_counts(&backend, &[("tag==5", 2), ("tag!=5", 1), ("tag!=5;tag==6", 1)]);

    let engine = engine();
    let filter = engine.compile("target", "tag!=5").expect("compile");
    assert_eq!(backend.search(&filter, None).expect("search"), vec![3]);
}

#[test]
fn test_map_round_trip() {
    let backend = backend_with(&[
        json!({"controllerId": "a", "attribute": {"color": "red", "size": "L"}}),
        json!({"controllerId": "b", "attribute": {"color": "blue"}}),
        json!({"controllerId": "c", "attribute": {"shade": "red"}}),
    ]);
    assert_counts(
        &backend,
        &[
            ("attribute.color==red", 1),
            ("attribute.color==RED", 1),
            ("attribute.color!=red", 1),
            ("attribute.color==red;attribute.size==L", 1),
            ("attribute.color==red,attribute.color==blue", 2),
        ],
    );
}

#[test]
fn test_wildcard_escaping() {
    let backend = backend_with(&[
        json!({"controllerId": "a", "name": "*abc"}),
        json!({"controllerId": "b", "name": "xabc"}),
        json!({"controllerId": "c", "name": "100%_done"}),
    ]);
    assert_counts(
        &backend,
        &[
            ("name==\\*abc", 1),
            ("name==*abc", 2),
            ("name==\\**", 1),
            ("name==100%*", 1),
            ("name==1_0*", 0),
        ],
    );
}

#[test]
fn test_case_sensitive_comparison() {
    let backend = backend_with(&[
        json!({"controllerId": "a", "name": "Web"}),
        json!({"controllerId": "b", "name": "web"}),
    ]);
    let exact = engine().with_options(fleetql::QueryOptions {
        ignore_case: false,
        ..fleetql::QueryOptions::default()
    });
    assert_eq!(count_with(&exact, &backend, "name==web"), 1);
    assert_eq!(count_with(&exact, &backend, "name==W*"), 1);
    assert_eq!(count_with(&engine(), &backend, "name==web"), 2);
}

#[test]
fn test_macro_expansion() {
    let backend = backend_with(&[
        json!({"controllerId": "old", "createdAt": 1500}),
        json!({"controllerId": "new", "createdAt": 2500}),
        json!({"controllerId": "literal", "name": "${now_ts}"}),
    ]);
    let engine = engine()
        .with_macros(Arc::new(StaticMacros::default().with("NOW_TS", "2000")))
        .expect("macros");
    assert_eq!(count_with(&engine, &backend, "createdat=lt=${now_ts}"), 1);
    assert_eq!(count_with(&engine, &backend, "createdat=ge=${NOW_TS}"), 1);
    assert_eq!(count_with(&engine, &backend, "name==$${now_ts}"), 1);
    assert_eq!(count_with(&engine, &backend, "name==${now_ts}"), 0);
}

#[test]
fn test_overdue_macro_uses_tenant_intervals() {
    let backend = backend_with(&[
        json!({"controllerId": "quiet"}),
        json!({"controllerId": "recent"}),
    ]);
    backend
        .connection()
        .execute(
            "UPDATE targets SET last_target_query = ?1 WHERE controller_id = ?2",
            params![300_000_i64, "quiet"],
        )
        .expect("update");
    backend
        .connection()
        .execute(
            "UPDATE targets SET last_target_query = ?1 WHERE controller_id = ?2",
            params![900_000_i64, "recent"],
        )
        .expect("update");

    let intervals = PollingIntervals::parse("acme", "00:05:00", "00:05:00").expect("intervals");
    let cache = Arc::new(TenantIntervalCache::new(Arc::new(StaticTenantConfig::new(intervals))));
    let macros = TimeMacros::new("acme", cache).with_clock(Arc::new(|| 1_000_000_i64));
    let engine = engine().with_macros(Arc::new(macros)).expect("macros");
    assert_eq!(count_with(&engine, &backend, "lastcontrollerrequestat=lt=${OVERDUE_TS}"), 1);
    assert_eq!(count_with(&engine, &backend, "lastcontrollerrequestat=le=${now_ts}"), 2);
}

#[test]
fn test_database_file_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("fleet.db");
    {
        let backend = SqliteBackend::open(&path, TableCatalog::fleet()).expect("open");
        backend.init_fleet_schema().expect("schema");
        for record in fleet_records() {
            backend.insert_target(&record).expect("insert");
        }
    }
    let backend = SqliteBackend::open(&path, TableCatalog::fleet()).expect("reopen");
    let filter = engine().compile("target", "tag==Tag3").expect("compile");
    assert_eq!(backend.search(&filter, None).expect("search"), vec![1, 3, 4]);
    assert_eq!(backend.search(&filter, Some(2)).expect("search"), vec![1, 3]);
}

#[test]
fn test_in_memory_matcher_agrees_on_relations() {
    let records = fleet_records();
    let backend = backend_with(&records);
    let engine = engine();
    for query in [
        "tag==Tag1",
        "tag!=Tag1",
        "tag==T*",
        "tag!=T*",
        "tag!=Tag2;tag==Tag3",
        "assignedds.name=out=(AssignedDs,notexist)",
        "metadata.metaKey==*v*",
        "attribute.revision==1*",
        "name=gt=9",
        "description==''",
        "description!=''",
        "description=not=''",
    ] {
        let matcher = engine.matcher("target", query).expect("matcher");
        let in_memory = records.iter().filter(|r| matcher.matches(r)).count() as u64;
        assert_eq!(in_memory, count_with(&engine, &backend, query), "query: {}", query);
    }
}

#[test]
fn test_in_memory_matcher_agrees_on_ordering_and_empty_negation() {
    let records = vec![
        json!({"controllerId": "dev-a", "name": "10", "description": "x", "createdAt": 999}),
        json!({"controllerId": "dev-b", "name": "9", "createdAt": 2000}),
    ];
    let backend = backend_with(&records);
    let engine = engine();
    for (query, expected) in [
        ("name=gt=9", 0),
        ("name=lt=10", 0),
        ("name=ge=9", 1),
        ("createdat=lt=1000", 1),
        ("description!=''", 1),
        ("description=not=''", 1),
    ] {
        let matcher = engine.matcher("target", query).expect("matcher");
        let in_memory = records.iter().filter(|r| matcher.matches(r)).count() as u64;
        assert_eq!(in_memory, expected, "in-memory query: {}", query);
        assert_eq!(count_with(&engine, &backend, query), expected, "sqlite query: {}", query);
    }
}

fn name_strategy() -> impl Strategy<Value = Option<&'static str>> {
    prop_oneof![
        Just(None),
        Just(Some("alpha")),
        Just(Some("Alpha")),
        Just(Some("beta")),
        Just(Some("gamma")),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_equal_and_not_equal_split_the_fleet(
        names in prop::collection::vec(name_strategy(), 1..8),
        needle in prop_oneof![Just("alpha"), Just("BETA"), Just("delta"), Just("g*")],
    ) {
        let records: Vec<Value> = names
            .iter()
            .enumerate()
            .map(|(i, name)| match name {
                Some(name) => json!({"controllerId": format!("dev-{}", i), "name": name}),
                None => json!({"controllerId": format!("dev-{}", i)}),
            })
            .collect();
        let backend = backend_with(&records);
        let engine = engine();

        let equal = engine.compile("target", &format!("name=={}", needle)).expect("compile");
        let not_equal = engine.compile("target", &format!("name!={}", needle)).expect("compile");
        let mut ids = backend.search(&equal, None).expect("search");
        let negated = backend.search(&not_equal, None).expect("search");
        prop_assert!(ids.iter().all(|id| !negated.contains(id)));
        ids.extend(negated);
        ids.sort_unstable();
        let all: Vec<i64> = (1..=records.len() as i64).collect();
        prop_assert_eq!(ids, all);
    }
}
