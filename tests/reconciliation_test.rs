//! Reconciliation engine behavior: idempotent convergence, the terminal
//! success invariant, and the security checks against the vendor's
//! validation record.

mod common;

use hostedpay::domain::TransactionStatus;
use hostedpay::error::GatewayError;
use hostedpay::services::ReconcileOutcome;

use common::{build_app, record_with_status, seeded_payment, valid_record};

#[tokio::test]
async fn test_confirmation_is_idempotent_and_syncs_once() {
    let app = build_app();
    let tx = seeded_payment(&app.store);
    app.vendor.script_validation(valid_record(&tx.reference, "100.00"));

    let first = app.state.engine.manual_confirm(&tx.reference, "VAL-1").await.unwrap();
    assert!(matches!(first, ReconcileOutcome::Confirmed(_)));

    let second = app.state.engine.manual_confirm(&tx.reference, "VAL-1").await.unwrap();
    assert!(matches!(second, ReconcileOutcome::AlreadyProcessed));

    let stored = app.store.payment(&tx.reference).unwrap();
    assert_eq!(stored.status, TransactionStatus::Succeeded);
    assert_eq!(stored.vendor_charge_id.as_deref(), Some("VAL-1"));
    assert_eq!(stored.card_last_4.as_deref(), Some("1234"));
    // exactly one order status sync despite two confirmations
    assert_eq!(app.sync.call_count(), 1);
}

#[tokio::test]
async fn test_failed_is_not_terminal_and_late_success_lands() {
    let app = build_app();
    let tx = seeded_payment(&app.store);

    app.vendor
        .script_validation(record_with_status(&tx.reference, "100.00", "FAILED"));
    let outcome = app.state.engine.manual_confirm(&tx.reference, "VAL-1").await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::MarkedFailed { reason } if reason == "FAILED"));
    assert_eq!(
        app.store.payment(&tx.reference).unwrap().status,
        TransactionStatus::Failed
    );

    app.vendor.script_validation(valid_record(&tx.reference, "100.00"));
    let outcome = app.state.engine.manual_confirm(&tx.reference, "VAL-1").await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Confirmed(_)));
    assert_eq!(app.sync.call_count(), 1);
}

#[tokio::test]
async fn test_success_never_regresses_on_late_failure_signal() {
    let app = build_app();
    let tx = seeded_payment(&app.store);

    app.vendor.script_validation(valid_record(&tx.reference, "100.00"));
    app.state.engine.manual_confirm(&tx.reference, "VAL-1").await.unwrap();

    app.vendor
        .script_validation(record_with_status(&tx.reference, "100.00", "CANCELLED"));
    let outcome = app.state.engine.manual_confirm(&tx.reference, "VAL-1").await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::AlreadyProcessed));
    assert_eq!(
        app.store.payment(&tx.reference).unwrap().status,
        TransactionStatus::Succeeded
    );
}

#[tokio::test]
async fn test_stale_snapshot_failure_reports_already_processed() {
    let app = build_app();
    let tx = seeded_payment(&app.store);

    // snapshot read while still pending
    let stale = app.store.payment(&tx.reference).unwrap();

    // another delivery commits the success in the meantime
    app.vendor.script_validation(valid_record(&tx.reference, "100.00"));
    app.state.engine.manual_confirm(&tx.reference, "VAL-1").await.unwrap();

    // a delayed failing validation arrives against the stale snapshot
    app.vendor
        .script_validation(record_with_status(&tx.reference, "100.00", "FAILED"));
    let outcome = app
        .state
        .engine
        .reconcile(&stale, "VAL-1", None)
        .await
        .unwrap();

    assert!(matches!(outcome, ReconcileOutcome::AlreadyProcessed));
    let stored = app.store.payment(&tx.reference).unwrap();
    assert_eq!(stored.status, TransactionStatus::Succeeded);
    assert_eq!(stored.metadata_str("failure_reason"), None);
}

#[tokio::test]
async fn test_unrecognized_vendor_status_maps_to_failure() {
    let app = build_app();
    let tx = seeded_payment(&app.store);

    // default-deny: anything that is not VALID/VALIDATED fails
    app.vendor
        .script_validation(record_with_status(&tx.reference, "100.00", "UNATTEMPTED"));
    let outcome = app.state.engine.manual_confirm(&tx.reference, "VAL-1").await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::MarkedFailed { .. }));

    let stored = app.store.payment(&tx.reference).unwrap();
    assert_eq!(stored.metadata_str("failure_reason"), Some("UNATTEMPTED"));
}

#[tokio::test]
async fn test_reference_mismatch_is_rejected_without_mutation() {
    let app = build_app();
    let tx = seeded_payment(&app.store);
    app.vendor.script_validation(valid_record("some-other-reference", "100.00"));

    let err = app.state.engine.manual_confirm(&tx.reference, "VAL-1").await.unwrap_err();
    assert!(matches!(err, GatewayError::ReferenceMismatch { .. }));
    assert!(err.is_security_mismatch());
    assert_eq!(
        app.store.payment(&tx.reference).unwrap().status,
        TransactionStatus::Pending
    );
    assert_eq!(app.sync.call_count(), 0);
}

#[tokio::test]
async fn test_amount_tolerance_is_one_minor_unit() {
    let app = build_app();

    // one minor unit off: accepted, validated amount becomes canonical
    let tx = seeded_payment(&app.store);
    app.vendor.script_validation(valid_record(&tx.reference, "100.01"));
    let outcome = app.state.engine.manual_confirm(&tx.reference, "VAL-1").await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Confirmed(_)));
    assert_eq!(app.store.payment(&tx.reference).unwrap().total_minor, 10_001);

    // two minor units off: rejected
    let tx = seeded_payment(&app.store);
    app.vendor.script_validation(valid_record(&tx.reference, "100.02"));
    let err = app.state.engine.manual_confirm(&tx.reference, "VAL-1").await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::AmountMismatch {
            local_minor: 10_000,
            validated_minor: 10_002,
            ..
        }
    ));
    assert_eq!(
        app.store.payment(&tx.reference).unwrap().status,
        TransactionStatus::Pending
    );
}

#[tokio::test]
async fn test_vendor_outage_leaves_state_untouched() {
    let app = build_app();
    let tx = seeded_payment(&app.store);
    app.vendor.script_validation_down();

    let err = app.state.engine.manual_confirm(&tx.reference, "VAL-1").await.unwrap_err();
    assert!(matches!(err, GatewayError::Vendor(_)));
    assert_eq!(
        app.store.payment(&tx.reference).unwrap().status,
        TransactionStatus::Pending
    );
}

#[tokio::test]
async fn test_manual_confirm_unknown_reference() {
    let app = build_app();
    let err = app
        .state
        .engine
        .manual_confirm("no-such-reference", "VAL-1")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::TransactionNotFound(_)));
}

#[tokio::test]
async fn test_return_redirect_requires_success_hint_and_val_id() {
    use hostedpay::services::RedirectOutcome;

    let app = build_app();
    let tx = seeded_payment(&app.store);
    app.vendor.script_validation(valid_record(&tx.reference, "100.00"));

    // failure hint: no vendor call at all
    let outcome = app
        .state
        .engine
        .return_redirect(&tx.reference, "FAILED", Some("VAL-1"))
        .await;
    assert_eq!(outcome, RedirectOutcome::Skipped);
    assert_eq!(app.vendor.validate_call_count(), 0);

    // missing val_id: skipped as well
    let outcome = app
        .state
        .engine
        .return_redirect(&tx.reference, "VALID", None)
        .await;
    assert_eq!(outcome, RedirectOutcome::Skipped);

    // success hint with val_id: verified against the vendor
    let outcome = app
        .state
        .engine
        .return_redirect(&tx.reference, "VALID", Some("VAL-1"))
        .await;
    assert_eq!(outcome, RedirectOutcome::Confirmed);
    assert_eq!(app.sync.call_count(), 1);
}

#[tokio::test]
async fn test_concurrent_confirmations_sync_exactly_once() {
    let app = build_app();
    let tx = seeded_payment(&app.store);
    app.vendor.script_validation(valid_record(&tx.reference, "100.00"));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = app.state.engine.clone();
        let reference = tx.reference.clone();
        handles.push(tokio::spawn(async move {
            engine.manual_confirm(&reference, "VAL-1").await
        }));
    }

    let mut confirmed = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            ReconcileOutcome::Confirmed(_) => confirmed += 1,
            ReconcileOutcome::AlreadyProcessed => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    assert_eq!(confirmed, 1);
    assert_eq!(app.sync.call_count(), 1);
}
