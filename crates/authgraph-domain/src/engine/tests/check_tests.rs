//! Check engine tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::mocks::{engine, MockModelStore, MockTupleStore};
use crate::engine::{CheckRequest, ConditionEvaluator, Engine, EngineConfig};
use crate::error::{EngineError, EngineResult};
use crate::model::{ConditionRef, ObjectRef, RelationshipTuple, SubjectRef};

const DOCS_MODEL: &str = r#"
type user

type document
  relations
    define owner: [user]
    define editor: [user]
    define viewer: [user] or editor or owner
"#;

async fn check(
    engine: &Engine<MockTupleStore, MockModelStore>,
    subject: &str,
    relation: &str,
    object: &str,
) -> EngineResult<bool> {
    engine
        .check(&CheckRequest::new("v1", subject, relation, object))
        .await
        .map(|d| d.allowed)
}

// ========== Direct tuples ==========

#[tokio::test]
async fn direct_tuple_grants() {
    let (tuples, models, engine) = engine();
    models.publish("v1", DOCS_MODEL).await;
    tuples.add("user:alice", "owner", "document:doc1").await;

    assert!(check(&engine, "user:alice", "owner", "document:doc1")
        .await
        .unwrap());
}

#[tokio::test]
async fn missing_tuple_denies() {
    let (_, models, engine) = engine();
    models.publish("v1", DOCS_MODEL).await;

    assert!(!check(&engine, "user:alice", "owner", "document:doc1")
        .await
        .unwrap());
}

#[tokio::test]
async fn denial_is_scoped_to_the_object() {
    let (tuples, models, engine) = engine();
    models.publish("v1", DOCS_MODEL).await;
    tuples.add("user:alice", "owner", "document:doc1").await;

    assert!(!check(&engine, "user:alice", "owner", "document:doc2")
        .await
        .unwrap());
    assert!(!check(&engine, "user:bob", "owner", "document:doc1")
        .await
        .unwrap());
}

#[tokio::test]
async fn subject_type_rules_filter_tuples() {
    let (tuples, models, engine) = engine();
    models
        .publish(
            "v1",
            r#"
type user

type bot

type document
  relations
    define viewer: [user]
"#,
        )
        .await;
    // A bot tuple on a user-only relation must never grant.
    tuples.add("bot:crawler", "viewer", "document:doc1").await;

    assert!(!check(&engine, "bot:crawler", "viewer", "document:doc1")
        .await
        .unwrap());
}

// ========== Permission composition ==========

#[tokio::test]
async fn union_grants_through_any_branch() {
    let (tuples, models, engine) = engine();
    models.publish("v1", DOCS_MODEL).await;
    tuples.add("user:alice", "owner", "document:doc1").await;
    tuples.add("user:bob", "editor", "document:doc1").await;

    assert!(check(&engine, "user:alice", "viewer", "document:doc1")
        .await
        .unwrap());
    assert!(check(&engine, "user:bob", "viewer", "document:doc1")
        .await
        .unwrap());
    assert!(!check(&engine, "user:carol", "viewer", "document:doc1")
        .await
        .unwrap());
}

#[tokio::test]
async fn intersection_requires_all_branches() {
    let (tuples, models, engine) = engine();
    models
        .publish(
            "v1",
            r#"
type user

type document
  relations
    define signed: [user]
    define cleared: [user]
    define reader: signed and cleared
"#,
        )
        .await;
    tuples.add("user:alice", "signed", "document:doc1").await;
    tuples.add("user:alice", "cleared", "document:doc1").await;
    tuples.add("user:bob", "signed", "document:doc1").await;

    assert!(check(&engine, "user:alice", "reader", "document:doc1")
        .await
        .unwrap());
    assert!(!check(&engine, "user:bob", "reader", "document:doc1")
        .await
        .unwrap());
}

#[tokio::test]
async fn exclusion_subtracts_grants() {
    let (tuples, models, engine) = engine();
    models
        .publish(
            "v1",
            r#"
type user

type document
  relations
    define blocked: [user]
    define viewer: [user] but not blocked
"#,
        )
        .await;
    tuples.add("user:alice", "viewer", "document:doc1").await;
    tuples.add("user:bob", "viewer", "document:doc1").await;
    tuples.add("user:bob", "blocked", "document:doc1").await;

    assert!(check(&engine, "user:alice", "viewer", "document:doc1")
        .await
        .unwrap());
    assert!(!check(&engine, "user:bob", "viewer", "document:doc1")
        .await
        .unwrap());
}

// ========== Traversal ==========

const FOLDER_MODEL: &str = r#"
type user

type folder
  relations
    define owner: [user]

type document
  relations
    define owner: [user]
    define folder: [folder]
    define view: owner or owner from folder
"#;

#[tokio::test]
async fn traversal_inherits_from_parent() {
    let (tuples, models, engine) = engine();
    models.publish("v1", FOLDER_MODEL).await;
    tuples.add("user:alice", "owner", "folder:f1").await;
    tuples.add("folder:f1", "folder", "document:d1").await;

    assert!(check(&engine, "user:alice", "view", "document:d1")
        .await
        .unwrap());
    // The traversal grants the permission, not the underlying relation.
    assert!(!check(&engine, "user:alice", "owner", "document:d1")
        .await
        .unwrap());
}

#[tokio::test]
async fn traversal_ignores_userset_subjects_on_the_tupleset() {
    let (tuples, models, engine) = engine();
    models
        .publish(
            "v1",
            r#"
type user

type group
  relations
    define member: [user]

type folder
  relations
    define owner: [user]

type document
  relations
    define folder: [folder]
    define view: owner from folder
"#,
        )
        .await;
    // A userset subject stored on the tupleset relation is not a related
    // object; group expansion must go through an explicit userset on a
    // direct leaf instead.
    tuples
        .add_tuple(RelationshipTuple::new(
            SubjectRef::userset("folder", "f1", "owner"),
            "folder",
            ObjectRef::parse("document:d1").unwrap(),
        ))
        .await;
    tuples.add("user:alice", "owner", "folder:f1").await;

    assert!(!check(&engine, "user:alice", "view", "document:d1")
        .await
        .unwrap());
}

#[tokio::test]
async fn nested_traversal_chain() {
    let (tuples, models, engine) = engine();
    models
        .publish(
            "v1",
            r#"
type user

type org
  relations
    define admin: [user]

type folder
  relations
    define org: [org]
    define admin: [user] or admin from org

type document
  relations
    define folder: [folder]
    define admin: admin from folder
"#,
        )
        .await;
    tuples.add("user:root", "admin", "org:acme").await;
    tuples.add("org:acme", "org", "folder:f1").await;
    tuples.add("folder:f1", "folder", "document:d1").await;

    assert!(check(&engine, "user:root", "admin", "document:d1")
        .await
        .unwrap());
}

// ========== Usersets and groups ==========

const GROUPS_MODEL: &str = r#"
type user

type group
  relations
    define member: [user, group#member]
"#;

#[tokio::test]
async fn userset_membership_is_transitive() {
    let (tuples, models, engine) = engine();
    models.publish("v1", GROUPS_MODEL).await;
    tuples.add("user:bob", "member", "group:seniors").await;
    tuples
        .add("group:seniors#member", "member", "group:engineers")
        .await;

    assert!(check(&engine, "user:bob", "member", "group:engineers")
        .await
        .unwrap());
    assert!(!check(&engine, "user:eve", "member", "group:engineers")
        .await
        .unwrap());
}

#[tokio::test]
async fn cyclic_group_data_fails_closed() {
    let (tuples, models, engine) = engine();
    models.publish("v1", GROUPS_MODEL).await;
    // A member of B, B member of A, no concrete member anywhere.
    tuples.add("group:a#member", "member", "group:b").await;
    tuples.add("group:b#member", "member", "group:a").await;

    // Terminates promptly and denies instead of erroring or hanging.
    assert!(!check(&engine, "user:alice", "member", "group:a")
        .await
        .unwrap());
}

#[tokio::test]
async fn cyclic_group_still_grants_direct_members() {
    let (tuples, models, engine) = engine();
    models.publish("v1", GROUPS_MODEL).await;
    tuples.add("group:a#member", "member", "group:b").await;
    tuples.add("group:b#member", "member", "group:a").await;
    tuples.add("user:bob", "member", "group:a").await;

    // The cycle must not mask the plain membership next to it.
    assert!(check(&engine, "user:bob", "member", "group:a")
        .await
        .unwrap());
    assert!(check(&engine, "user:bob", "member", "group:b")
        .await
        .unwrap());
}

// ========== Wildcards ==========

#[tokio::test]
async fn wildcard_tuple_grants_any_subject_of_the_type() {
    let (tuples, models, engine) = engine();
    models
        .publish(
            "v1",
            r#"
type user

type bot

type document
  relations
    define viewer: [user, user:*]
"#,
        )
        .await;
    tuples.add("user:*", "viewer", "document:doc1").await;

    // Grants an arbitrary, never-before-seen subject of that type.
    assert!(check(&engine, "user:zoe", "viewer", "document:doc1")
        .await
        .unwrap());
    assert!(!check(&engine, "bot:crawler", "viewer", "document:doc1")
        .await
        .unwrap());
}

#[tokio::test]
async fn wildcard_request_subject_is_rejected() {
    let (_, models, engine) = engine();
    models.publish("v1", DOCS_MODEL).await;

    let err = check(&engine, "user:*", "viewer", "document:doc1")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidSubjectFormat { .. }));
}

// ========== Input validation ==========

#[tokio::test]
async fn malformed_references_fail_before_store_access() {
    let (_, models, engine) = engine();
    models.publish("v1", DOCS_MODEL).await;

    let err = check(&engine, "alice", "viewer", "document:doc1")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidSubjectFormat { .. }));

    let err = check(&engine, "user:alice", "viewer", "doc1")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidObjectFormat { .. }));

    let err = check(&engine, "user:alice", "", "document:doc1")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRelationFormat { .. }));
}

#[tokio::test]
async fn unknown_model_version_is_an_error() {
    let (_, models, engine) = engine();
    models.publish("v1", DOCS_MODEL).await;

    let err = engine
        .check(&CheckRequest::new(
            "v999",
            "user:alice",
            "viewer",
            "document:doc1",
        ))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::UnknownModelVersion { version } if version == "v999"
    ));
}

#[tokio::test]
async fn unknown_relation_is_an_error_not_a_denial() {
    let (_, models, engine) = engine();
    models.publish("v1", DOCS_MODEL).await;

    let err = check(&engine, "user:alice", "approver", "document:doc1")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::RelationNotFound { type_name, relation }
            if type_name == "document" && relation == "approver"
    ));
}

// ========== Model version pinning ==========

#[tokio::test]
async fn checks_are_pinned_to_the_requested_version() {
    let (tuples, models, engine) = engine();
    models.publish("v1", DOCS_MODEL).await;
    models
        .publish(
            "v2",
            r#"
type user

type document
  relations
    define owner: [user]
    define editor: [user]
    define viewer: [user] or editor
"#,
        )
        .await;
    tuples.add("user:alice", "owner", "document:doc1").await;

    // v1 derives viewer from owner; v2 does not.
    assert!(check(&engine, "user:alice", "viewer", "document:doc1")
        .await
        .unwrap());
    let decision = engine
        .check(&CheckRequest::new(
            "v2",
            "user:alice",
            "viewer",
            "document:doc1",
        ))
        .await
        .unwrap();
    assert!(!decision.allowed);
}

// ========== Depth limiting ==========

#[tokio::test]
async fn deep_traversal_chain_fails_closed_at_the_depth_limit() {
    let tuples = Arc::new(MockTupleStore::new());
    let models = Arc::new(MockModelStore::new());
    let engine = Engine::with_config(
        Arc::clone(&tuples),
        Arc::clone(&models),
        EngineConfig::default().with_max_depth(5),
    );
    models.publish("v1", GROUPS_MODEL).await;

    // A chain longer than the depth budget.
    tuples.add("user:bob", "member", "group:g0").await;
    for i in 0..10 {
        tuples
            .add(
                &format!("group:g{i}#member"),
                "member",
                &format!("group:g{}", i + 1),
            )
            .await;
    }

    assert!(!check(&engine, "user:bob", "member", "group:g10")
        .await
        .unwrap());
}

#[tokio::test]
async fn chain_within_the_depth_limit_still_grants() {
    let (tuples, models, engine) = engine();
    models.publish("v1", GROUPS_MODEL).await;
    tuples.add("user:bob", "member", "group:g0").await;
    for i in 0..10 {
        tuples
            .add(
                &format!("group:g{i}#member"),
                "member",
                &format!("group:g{}", i + 1),
            )
            .await;
    }

    assert!(check(&engine, "user:bob", "member", "group:g10")
        .await
        .unwrap());
}

// ========== Conditions ==========

/// Grants when the requested context carries `tier` equal to the stored
/// `required_tier` parameter.
struct TierConditionEvaluator;

#[async_trait]
impl ConditionEvaluator for TierConditionEvaluator {
    async fn evaluate(
        &self,
        condition: &str,
        stored: &HashMap<String, serde_json::Value>,
        requested: &HashMap<String, serde_json::Value>,
    ) -> EngineResult<bool> {
        if condition != "tier_matches" {
            return Err(EngineError::ConditionFailed {
                condition: condition.to_string(),
                message: "unknown condition".to_string(),
            });
        }
        Ok(stored.get("required_tier") == requested.get("tier"))
    }
}

#[tokio::test]
async fn conditional_tuple_consults_the_evaluator() {
    let tuples = Arc::new(MockTupleStore::new());
    let models = Arc::new(MockModelStore::new());
    let engine = Engine::new(Arc::clone(&tuples), Arc::clone(&models))
        .with_condition_evaluator(Arc::new(TierConditionEvaluator));
    models.publish("v1", DOCS_MODEL).await;

    let mut stored = HashMap::new();
    stored.insert("required_tier".to_string(), serde_json::json!("gold"));
    tuples
        .add_tuple(RelationshipTuple::with_condition(
            SubjectRef::object("user", "alice"),
            "viewer",
            ObjectRef::parse("document:doc1").unwrap(),
            ConditionRef::with_context("tier_matches", stored),
        ))
        .await;

    let mut matching = HashMap::new();
    matching.insert("tier".to_string(), serde_json::json!("gold"));
    let decision = engine
        .check(
            &CheckRequest::new("v1", "user:alice", "viewer", "document:doc1")
                .with_context(matching),
        )
        .await
        .unwrap();
    assert!(decision.allowed);

    let mut mismatched = HashMap::new();
    mismatched.insert("tier".to_string(), serde_json::json!("bronze"));
    let decision = engine
        .check(
            &CheckRequest::new("v1", "user:alice", "viewer", "document:doc1")
                .with_context(mismatched),
        )
        .await
        .unwrap();
    assert!(!decision.allowed);
}

#[tokio::test]
async fn conditional_tuple_without_evaluator_is_an_error() {
    let (tuples, models, engine) = engine();
    models.publish("v1", DOCS_MODEL).await;
    tuples
        .add_tuple(RelationshipTuple::with_condition(
            SubjectRef::object("user", "alice"),
            "viewer",
            ObjectRef::parse("document:doc1").unwrap(),
            ConditionRef::new("tier_matches"),
        ))
        .await;

    let err = check(&engine, "user:alice", "viewer", "document:doc1")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ConditionUnavailable { .. }));
}

// ========== Cancellation and timeouts ==========

#[tokio::test]
async fn canceled_request_returns_canceled() {
    let (tuples, models, engine) = engine();
    models.publish("v1", DOCS_MODEL).await;
    tuples.add("user:alice", "owner", "document:doc1").await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = engine
        .check(
            &CheckRequest::new("v1", "user:alice", "owner", "document:doc1")
                .with_cancellation(cancel),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Canceled));
}

/// Tuple reader that never completes a read.
struct StalledTupleStore;

#[async_trait]
impl crate::engine::TupleReader for StalledTupleStore {
    async fn read_tuples(
        &self,
        _object_type: &str,
        _object_id: &str,
        _relation: &str,
    ) -> EngineResult<Vec<RelationshipTuple>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }

    async fn read_tuples_for_subject(
        &self,
        _subject: &SubjectRef,
        _relation: Option<&str>,
    ) -> EngineResult<Vec<RelationshipTuple>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }

    async fn list_objects_of_type(
        &self,
        _object_type: &str,
        _limit: usize,
    ) -> EngineResult<Vec<String>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }
}

#[tokio::test(start_paused = true)]
async fn stalled_store_times_out() {
    let tuples = Arc::new(StalledTupleStore);
    let models = Arc::new(MockModelStore::new());
    let engine = Engine::with_config(
        tuples,
        Arc::clone(&models),
        EngineConfig::default().with_timeout(Duration::from_millis(100)),
    );
    models.publish("v1", DOCS_MODEL).await;

    let err = engine
        .check(&CheckRequest::new(
            "v1",
            "user:alice",
            "owner",
            "document:doc1",
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Timeout { duration_ms: 100 }));
}

// ========== Store error propagation ==========

/// Tuple reader whose reads always fail.
struct BrokenTupleStore;

#[async_trait]
impl crate::engine::TupleReader for BrokenTupleStore {
    async fn read_tuples(
        &self,
        _object_type: &str,
        _object_id: &str,
        _relation: &str,
    ) -> EngineResult<Vec<RelationshipTuple>> {
        Err(EngineError::StoreUnavailable {
            message: "connection refused".to_string(),
        })
    }

    async fn read_tuples_for_subject(
        &self,
        _subject: &SubjectRef,
        _relation: Option<&str>,
    ) -> EngineResult<Vec<RelationshipTuple>> {
        Err(EngineError::StoreUnavailable {
            message: "connection refused".to_string(),
        })
    }

    async fn list_objects_of_type(
        &self,
        _object_type: &str,
        _limit: usize,
    ) -> EngineResult<Vec<String>> {
        Err(EngineError::StoreUnavailable {
            message: "connection refused".to_string(),
        })
    }
}

#[tokio::test]
async fn store_failures_surface_as_errors_never_denials() {
    let tuples = Arc::new(BrokenTupleStore);
    let models = Arc::new(MockModelStore::new());
    let engine = Engine::new(tuples, Arc::clone(&models));
    models.publish("v1", DOCS_MODEL).await;

    let err = engine
        .check(&CheckRequest::new(
            "v1",
            "user:alice",
            "owner",
            "document:doc1",
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::StoreUnavailable { .. }));
}

// ========== Concurrent use ==========

#[tokio::test]
async fn one_engine_serves_concurrent_checks() {
    let (tuples, models, engine) = engine();
    models.publish("v1", DOCS_MODEL).await;
    for i in 0..20 {
        tuples
            .add(&format!("user:u{i}"), "owner", &format!("document:d{i}"))
            .await;
    }

    let engine = Arc::new(engine);
    let mut handles = Vec::new();
    for i in 0..20 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .check(&CheckRequest::new(
                    "v1",
                    format!("user:u{i}"),
                    "viewer",
                    format!("document:d{i}"),
                ))
                .await
                .unwrap()
                .allowed
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap());
    }
}
