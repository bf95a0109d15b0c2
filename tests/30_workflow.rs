mod common;

use std::collections::HashMap;

use anyhow::Result;
use serde_json::{json, Value};
use sqlx::PgPool;

use mtl_case_api::case::{CaseStateProjector, WorkflowError};
use mtl_case_api::database::DatabaseManager;
use mtl_case_api::services::CaseService;
use mtl_case_api::temporal::table::{CASE_ALLOCATION, CASE_TRACKER, INPUT_FILE_REVIEW};
use mtl_case_api::temporal::{Guard, NaturalKey, Projection, WriteSequencer};

const REVIEWER: &str = "reviewer@example.com";

/// An allocated case in `Case Review Unallocated`
async fn seed_case(pool: &PgPool) -> Result<String> {
    let case_id = common::unique_case_id();
    let key = NaturalKey::case(&case_id)?;
    let allocation = Projection::empty(&CASE_ALLOCATION)
        .with_text("population_cohort", "Cohort A")?
        .with_text("assignedtoanalyst", REVIEWER)?
        .with_text("casestatusanalyst", "NEW")?;
    let tracker = Projection::empty(&CASE_TRACKER)
        .with_text("state", "Review")?
        .with_text("sub_state", "Case Review Unallocated")?;

    let mut tx = DatabaseManager::begin(pool).await?;
    WriteSequencer::apply(&mut *tx, &key, &allocation, "loader", None, &Guard::Always).await?;
    WriteSequencer::apply(&mut *tx, &key, &tracker, "loader", None, &Guard::Always).await?;
    tx.commit().await?;
    Ok(case_id)
}

fn review(iscomplete: bool, notes: &str) -> Result<mtl_case_api::services::case_service::ReviewRequest> {
    Ok(serde_json::from_value(json!({
        "iscomplete": iscomplete,
        "access_level": 1,
        "update_user": REVIEWER,
        "review_notes": notes,
        "total_redress": "120.50"
    }))?)
}

fn constraint(code: &str) -> HashMap<String, String> {
    HashMap::from([("constraint_code".to_string(), code.to_string())])
}

async fn allocation(pool: &PgPool, case_id: &str) -> Result<Option<Value>> {
    Ok(CaseStateProjector::current(pool, &CASE_ALLOCATION, &NaturalKey::case(case_id)?).await?)
}

#[tokio::test]
async fn review_moves_case_through_reviewer_stage() -> Result<()> {
    let Some(pool) = common::database().await? else { return Ok(()) };
    let case_id = seed_case(&pool).await?;
    let service = CaseService::with_pool(pool.clone());

    let first = service.review(&case_id, review(false, "started")?).await?;
    assert!(first.tracker_changed);
    let second = service.review(&case_id, review(false, "still going")?).await?;
    assert!(!second.tracker_changed, "repeated in-progress save must not version the tracker");

    let state = service.state(&case_id).await?;
    assert_eq!(state.sub_state.as_deref(), Some("Case Review In Progress"));
    assert_eq!(allocation(&pool, &case_id).await?.expect("allocation")["casestatusanalyst"], "IN_PROGRESS");

    let done = service.review(&case_id, review(true, "done")?).await?;
    assert_eq!(done.sub_state, "Case Review Completed");

    let current = allocation(&pool, &case_id).await?.expect("allocation");
    assert_eq!(current["casestatusanalyst"], "COMPLETED");
    assert_eq!(current["casestatusqc"], "NEW");
    assert!(current["batch_number"].is_string());
    assert!(current["fr_complete_date"].is_string());

    let key = NaturalKey::case(&case_id)?;
    let tracker_history = CaseStateProjector::history(&pool, &CASE_TRACKER, &key).await?;
    assert_eq!(tracker_history.len(), 3);
    let snapshots = CaseStateProjector::history(&pool, &INPUT_FILE_REVIEW, &key).await?;
    assert_eq!(snapshots.len(), 3);
    assert_eq!(snapshots[2]["review_notes"], "done");
    Ok(())
}

#[tokio::test]
async fn completing_review_closes_open_session() -> Result<()> {
    let Some(pool) = common::database().await? else { return Ok(()) };
    let case_id = seed_case(&pool).await?;
    let service = CaseService::with_pool(pool.clone());

    let open = |who: &str| serde_json::from_value(json!({ "userEmail": who, "role": "Case Reviewer" }));
    assert_eq!(service.open(&case_id, open(REVIEWER)?).await?["opened"], true);
    assert_eq!(service.open(&case_id, open("other@example.com")?).await?["opened"], false);

    let outcome = service.review(&case_id, review(true, "done")?).await?;
    assert_eq!(outcome.sessions_closed, 1);
    Ok(())
}

#[tokio::test]
async fn review_without_allocation_writes_nothing() -> Result<()> {
    let Some(pool) = common::database().await? else { return Ok(()) };
    let case_id = common::unique_case_id();
    let service = CaseService::with_pool(pool.clone());

    let err = service.review(&case_id, review(true, "done")?).await.unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)), "unexpected error: {}", err);

    let key = NaturalKey::case(&case_id)?;
    assert!(CaseStateProjector::history(&pool, &INPUT_FILE_REVIEW, &key).await?.is_empty());
    assert!(CaseStateProjector::current_state(&pool, &case_id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn descope_retires_allocation_and_closes_case() -> Result<()> {
    let Some(pool) = common::database().await? else { return Ok(()) };
    let case_id = seed_case(&pool).await?;
    let service = CaseService::with_pool(pool.clone());

    let request = serde_json::from_value(json!({
        "reset_type": "descope",
        "descope_reason": "Out of scope",
        "userEmail": "lead@example.com"
    }))?;
    let result = service.reset(&case_id, request).await?;
    assert_eq!(result["action"], "Descope");

    assert!(allocation(&pool, &case_id).await?.is_none());
    let state = service.state(&case_id).await?;
    assert_eq!(state.state.as_deref(), Some("Closed"));
    assert_eq!(state.sub_state.as_deref(), Some("Descoped"));
    assert_eq!(state.descope_reason.as_deref(), Some("Out of scope"));

    let logged: i64 = sqlx::query_scalar("SELECT count(*) FROM mtl.log_table_buttons WHERE case_id = $1")
        .bind(&case_id)
        .fetch_one(&pool)
        .await?;
    assert_eq!(logged, 1);
    Ok(())
}

#[tokio::test]
async fn constraint_raised_and_lifted() -> Result<()> {
    let Some(pool) = common::database().await? else { return Ok(()) };
    let case_id = seed_case(&pool).await?;
    let service = CaseService::with_pool(pool.clone());

    let constrain = serde_json::from_value(json!({
        "reset_type": "constrain",
        "constrain_reason": "Vulnerable customer",
        "userEmail": "lead@example.com"
    }))?;
    service.reset(&case_id, constrain).await?;

    let versions = service.versions(&case_id, "constraints", &constraint("CC555")).await?;
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0]["constraint_desc"], "Frontend: Vulnerable customer");

    let unconstrain = serde_json::from_value(json!({ "reset_type": "unconstrain", "userEmail": "lead@example.com" }))?;
    service.reset(&case_id, unconstrain).await?;

    let versions = service.versions(&case_id, "constraints", &constraint("CC555")).await?;
    assert_eq!(versions.len(), 1);
    assert!(!versions[0]["end_ts"].as_str().unwrap_or_default().starts_with("9999"));
    Ok(())
}
