mod common;

use anyhow::Result;
use serde_json::{json, Value};
use sqlx::PgPool;

use mtl_case_api::case::{CaseStateProjector, Stage};
use mtl_case_api::database::DatabaseManager;
use mtl_case_api::services::allocation_service::{
    BulkAllocationRequest, BulkAllocationType, EngineerReferralRequest, StageAssignment,
};
use mtl_case_api::services::AllocationService;
use mtl_case_api::temporal::table::{CASE_ALLOCATION, CASE_TRACKER};
use mtl_case_api::temporal::{Guard, NaturalKey, Projection, WriteSequencer};

const QC_REVIEWER: &str = "qc@example.com";

/// Current allocation in `cohort`, optionally with a tracker at `sub_state`
async fn seed(pool: &PgPool, cohort: &str, analyst: Option<&str>, sub_state: Option<&str>) -> Result<String> {
    let case_id = common::unique_case_id();
    let key = NaturalKey::case(&case_id)?;
    let mut allocation = Projection::empty(&CASE_ALLOCATION)
        .with_text("population_cohort", cohort)?
        .with_text("casestatusanalyst", "NEW")?;
    if let Some(analyst) = analyst {
        allocation = allocation.with_text("assignedtoanalyst", analyst)?;
    }

    let mut tx = DatabaseManager::begin(pool).await?;
    WriteSequencer::apply(&mut *tx, &key, &allocation, "loader", None, &Guard::Always).await?;
    if let Some(sub_state) = sub_state {
        let tracker = Projection::empty(&CASE_TRACKER)
            .with_text("state", "Review")?
            .with_text("sub_state", sub_state)?;
        WriteSequencer::apply(&mut *tx, &key, &tracker, "loader", None, &Guard::Always).await?;
    }
    tx.commit().await?;
    Ok(case_id)
}

async fn allocation(pool: &PgPool, case_id: &str) -> Result<Value> {
    let current = CaseStateProjector::current(pool, &CASE_ALLOCATION, &NaturalKey::case(case_id)?).await?;
    current.ok_or_else(|| anyhow::anyhow!("no current allocation for {}", case_id))
}

fn qc_assignment(case_id: &str) -> Result<StageAssignment> {
    Ok(serde_json::from_value(json!({
        "case_id": case_id,
        "qcemail": QC_REVIEWER,
        "qcname": "QC Reviewer",
        "case_selection_criteria": "Random",
        "email": "lead@example.com"
    }))?)
}

#[tokio::test]
async fn qc_assignment_hands_off_only_completed_reviews() -> Result<()> {
    let Some(pool) = common::database().await? else { return Ok(()) };
    let cohort = common::unique_case_id();
    let completed = seed(&pool, &cohort, Some("fr@example.com"), Some("Case Review Completed")).await?;
    let in_progress = seed(&pool, &cohort, Some("fr@example.com"), Some("Case Review In Progress")).await?;
    let service = AllocationService::with_pool(pool.clone());

    let assigned = service
        .assign_stage(Stage::Qc, vec![qc_assignment(&completed)?, qc_assignment(&in_progress)?])
        .await?;
    assert_eq!(assigned.len(), 2);
    assert!(assigned[0].handed_off);
    assert!(!assigned[1].handed_off, "a case still in review must keep its sub-state");

    let moved = CaseStateProjector::current_state(&pool, &completed).await?.expect("state");
    assert_eq!(moved.sub_state.as_deref(), Some("QC Allocated"));

    let kept = CaseStateProjector::current_state(&pool, &in_progress).await?.expect("state");
    assert_eq!(kept.sub_state.as_deref(), Some("Case Review In Progress"));
    let history = CaseStateProjector::history(&pool, &CASE_TRACKER, &NaturalKey::case(&in_progress)?).await?;
    assert_eq!(history.len(), 1);

    // Both allocations carry the assignment regardless of the hand-off
    for case_id in [&completed, &in_progress] {
        let current = allocation(&pool, case_id).await?;
        assert_eq!(current["assignedtoqc"], QC_REVIEWER);
        assert_eq!(current["case_selection_criteria"], "Random");
    }
    Ok(())
}

#[tokio::test]
async fn stage_assignment_of_unknown_case_rolls_back_batch() -> Result<()> {
    let Some(pool) = common::database().await? else { return Ok(()) };
    let cohort = common::unique_case_id();
    let known = seed(&pool, &cohort, Some("fr@example.com"), Some("Case Review Completed")).await?;
    let service = AllocationService::with_pool(pool.clone());

    let err = service
        .assign_stage(Stage::Qc, vec![qc_assignment(&known)?, qc_assignment(&common::unique_case_id())?])
        .await
        .unwrap_err();
    assert!(matches!(err, mtl_case_api::case::WorkflowError::NotFound(_)), "unexpected error: {}", err);

    assert!(allocation(&pool, &known).await?["assignedtoqc"].is_null());
    let state = CaseStateProjector::current_state(&pool, &known).await?.expect("state");
    assert_eq!(state.sub_state.as_deref(), Some("Case Review Completed"));
    Ok(())
}

#[tokio::test]
async fn bulk_allocation_takes_at_most_amount() -> Result<()> {
    let Some(pool) = common::database().await? else { return Ok(()) };
    let cohort = common::unique_case_id();
    for _ in 0..5 {
        seed(&pool, &cohort, None, None).await?;
    }
    let service = AllocationService::with_pool(pool.clone());
    let request = |amount: i64| -> serde_json::Result<BulkAllocationRequest> {
        serde_json::from_value(json!({
            "email": "fr@example.com",
            "name": "FR Reviewer",
            "cohort": cohort,
            "amount": amount
        }))
    };

    assert_eq!(service.fr_bulk_allocate(BulkAllocationType::Unallocated, request(3)?).await?, 3);
    assert_eq!(service.fr_bulk_allocate(BulkAllocationType::Unallocated, request(10)?).await?, 2);
    assert_eq!(service.fr_bulk_allocate(BulkAllocationType::Unallocated, request(10)?).await?, 0);

    let assigned: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM mtl.case_allocation \
         WHERE population_cohort = $1 AND assignedtoanalyst = 'fr@example.com' AND end_ts = '9999-12-31 00:00:00'",
    )
    .bind(&cohort)
    .fetch_one(&pool)
    .await?;
    assert_eq!(assigned, 5);
    Ok(())
}

#[tokio::test]
async fn bulk_allocation_leaves_closed_versions_alone() -> Result<()> {
    let Some(pool) = common::database().await? else { return Ok(()) };
    let cohort = common::unique_case_id();
    let case_id = seed(&pool, &cohort, None, None).await?;
    // second version of the same allocation, so the case has one closed row
    let key = NaturalKey::case(&case_id)?;
    let again = Projection::empty(&CASE_ALLOCATION)
        .with_text("population_cohort", cohort.as_str())?
        .with_text("casestatusanalyst", "NEW")?;
    let mut tx = DatabaseManager::begin(&pool).await?;
    WriteSequencer::apply(&mut *tx, &key, &again, "loader", None, &Guard::Always).await?;
    tx.commit().await?;

    let service = AllocationService::with_pool(pool.clone());
    let request: BulkAllocationRequest = serde_json::from_value(json!({
        "email": "fr@example.com",
        "name": "FR Reviewer",
        "cohort": cohort,
        "amount": 5
    }))?;
    assert_eq!(service.fr_bulk_allocate(BulkAllocationType::Unallocated, request).await?, 1);

    let assigned: Vec<(String, bool)> = sqlx::query_as(
        "SELECT coalesce(assignedtoanalyst, ''), end_ts = '9999-12-31 00:00:00' FROM mtl.case_allocation \
         WHERE case_id = $1 ORDER BY start_ts, case_allocation_sk",
    )
    .bind(&case_id)
    .fetch_all(&pool)
    .await?;
    assert_eq!(assigned, vec![(String::new(), false), ("fr@example.com".to_string(), true)]);
    Ok(())
}

#[tokio::test]
async fn reallocation_moves_cases_between_reviewers() -> Result<()> {
    let Some(pool) = common::database().await? else { return Ok(()) };
    let cohort = common::unique_case_id();
    for _ in 0..3 {
        seed(&pool, &cohort, Some("leaver@example.com"), None).await?;
    }
    let service = AllocationService::with_pool(pool.clone());

    let request: BulkAllocationRequest = serde_json::from_value(json!({
        "email": "joiner@example.com",
        "name": "Joiner",
        "cohort": cohort,
        "amount": 2,
        "original_email": "leaver@example.com"
    }))?;
    assert_eq!(service.fr_bulk_allocate(BulkAllocationType::Allocated, request).await?, 2);

    let remaining: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM mtl.case_allocation \
         WHERE population_cohort = $1 AND assignedtoanalyst = 'leaver@example.com' AND end_ts = '9999-12-31 00:00:00'",
    )
    .bind(&cohort)
    .fetch_one(&pool)
    .await?;
    assert_eq!(remaining, 1);
    Ok(())
}

#[tokio::test]
async fn engineer_referral_accept_and_reject() -> Result<()> {
    let Some(pool) = common::database().await? else { return Ok(()) };
    let cohort = common::unique_case_id();
    let accepted = seed(&pool, &cohort, Some("fr@example.com"), None).await?;
    let rejected = seed(&pool, &cohort, Some("fr@example.com"), None).await?;
    let service = AllocationService::with_pool(pool.clone());

    let accept: EngineerReferralRequest = serde_json::from_value(json!({
        "engineer_approval": "accepted",
        "engineer_email": "engineer@example.com",
        "engineer_name": "Engineer",
        "case_id": [accepted]
    }))?;
    assert_eq!(service.engineer_referral(accept).await?, 1);

    let current = allocation(&pool, &accepted).await?;
    assert_eq!(current["engineer_referral"], "Accepted");
    assert_eq!(current["casestatuser"], "NEW");
    assert_eq!(current["assignedtoer"], "engineer@example.com");
    assert!(current["casestatusqc"].is_null());

    let reject: EngineerReferralRequest = serde_json::from_value(json!({
        "engineer_approval": "rejected",
        "case_id": rejected
    }))?;
    assert_eq!(service.engineer_referral(reject).await?, 1);

    let current = allocation(&pool, &rejected).await?;
    assert_eq!(current["engineer_referral"], "Rejected");
    assert_eq!(current["casestatusanalyst"], "NEW");
    assert!(current["assignedtoer"].is_null());

    // In-place updates: still one version each
    for case_id in [&accepted, &rejected] {
        let history = CaseStateProjector::history(&pool, &CASE_ALLOCATION, &NaturalKey::case(case_id)?).await?;
        assert_eq!(history.len(), 1);
    }
    Ok(())
}
