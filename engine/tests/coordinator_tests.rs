mod common;

use common::{Actor, Fixture, GTIN};
use pharmachain_crypto::serial_hash;
use pharmachain_engine::{EngineError, Outcome, ProofAction, ShutdownController};
use pharmachain_ledger::{LedgerAdapter, WaitOptions};
use pharmachain_types::{Commitment, Role, TxKind, TxStatus};
use std::sync::Arc;
use std::time::Duration;

// ── Register ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn register_finalizes_and_points_custody_at_registrant() {
    let fx = Fixture::new();
    let outcome = fx
        .engine
        .coordinator
        .register(fx.register_request("SN-1", &fx.manufacturer))
        .await
        .unwrap();

    let record = match outcome {
        Outcome::Finalized(r) => r,
        other => panic!("expected finality, got {other:?}"),
    };
    assert_eq!(record.item, serial_hash(GTIN, "SN-1"));
    assert_eq!(record.kind, TxKind::Register);
    assert_eq!(record.status, TxStatus::Finalized);
    assert_eq!(record.shipper, fx.manufacturer.address());
    assert_eq!(record.receiver, fx.manufacturer.address());
    assert!(record.block.is_some());
    assert_eq!(record.cost, Some(120_000));

    let custody = fx.store_custody(&record.item).await;
    assert_eq!(custody.owner, fx.manufacturer.address());
    assert_eq!(custody.registrant, fx.manufacturer.address());
    assert_eq!(custody.record, record.commitment);
    assert_eq!(fx.ledger.owner(&record.item), Some(fx.manufacturer.address()));
    assert_eq!(fx.engine.metrics.registrations.get(), 1);
    assert_eq!(fx.engine.metrics.in_flight.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn register_moves_through_pending_and_confirmed() {
    let fx = Fixture::manual();
    let req = fx.register_request("SN-1", &fx.manufacturer);
    let coordinator = Arc::clone(&fx.engine.coordinator);
    let task = tokio::spawn(async move { coordinator.register(req).await });

    tokio::time::sleep(Duration::from_millis(500)).await;
    let records = fx.store.all_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, TxStatus::Pending);

    fx.ledger.mine(1);
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(fx.store.all_records()[0].status, TxStatus::Confirmed);
    assert!(fx.store_custody_opt(&records[0].item).await.is_none());

    fx.ledger.mine(1);
    let outcome = task.await.unwrap().unwrap();
    assert!(outcome.is_finalized());
    assert_eq!(fx.store.all_records()[0].status, TxStatus::Finalized);
}

#[tokio::test(start_paused = true)]
async fn second_registration_is_a_duplicate_and_leaves_custody_alone() {
    let fx = Fixture::new();
    let item = fx.registered("SN-1").await;
    let before = fx.store_custody(&item).await;
    let submissions = fx.ledger.submission_count();

    let err = fx
        .engine
        .coordinator
        .register(fx.register_request("SN-1", &fx.manufacturer))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::DuplicateItem(i) if i == item));
    assert_eq!(fx.store_custody(&item).await, before);
    assert_eq!(fx.store.all_records().len(), 1);
    assert_eq!(fx.ledger.submission_count(), submissions);
    assert_eq!(fx.engine.metrics.failures.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn ledger_catches_duplicates_the_projection_missed() {
    let fx = Fixture::new();
    let item = serial_hash(GTIN, "SN-9");
    fx.ledger
        .submit_register(&item, &fx.manufacturer.address(), &Commitment::new([1; 32]))
        .await
        .unwrap();

    let err = fx
        .engine
        .coordinator
        .register(fx.register_request("SN-9", &fx.manufacturer))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::DuplicateItem(_)));
    assert!(fx.store.all_records().is_empty());
}

#[tokio::test(start_paused = true)]
async fn only_the_products_manufacturer_may_register() {
    let fx = Fixture::new();

    let err = fx
        .engine
        .coordinator
        .register(fx.register_request("SN-1", &fx.distributor))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Authorization(_)));

    let rival = Actor::new(40, "Rival Labs", Role::Manufacturer);
    fx.parties.insert(rival.party.clone());
    let err = fx
        .engine
        .coordinator
        .register(fx.register_request("SN-1", &rival))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Authorization(_)));

    let mut req = fx.register_request("SN-1", &fx.manufacturer);
    req.product_id = "GTIN999".into();
    let item = serial_hash("GTIN999", "SN-1");
    req.proof = fx.proof(&fx.manufacturer, ProofAction::Register, &item, None);
    let err = fx.engine.coordinator.register(req).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));

    assert!(fx.store.all_records().is_empty());
    assert_eq!(fx.ledger.submission_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn forged_or_stale_proofs_are_rejected_without_side_effects() {
    let fx = Fixture::new();

    // Claims the manufacturer's address, signed with someone else's key.
    let mut forged = fx.register_request("SN-1", &fx.manufacturer);
    let item = serial_hash(GTIN, "SN-1");
    forged.proof = fx.proof(&fx.distributor, ProofAction::Register, &item, None);
    forged.proof.address = fx.manufacturer.address();
    let err = fx.engine.coordinator.register(forged).await.unwrap_err();
    assert!(matches!(err, EngineError::Authorization(_)));

    let stale = fx.register_request("SN-1", &fx.manufacturer);
    fx.clock.advance(Duration::from_secs(fx.config.proof_max_age_secs + 1));
    let err = fx.engine.coordinator.register(stale).await.unwrap_err();
    assert!(matches!(err, EngineError::Authorization(_)));

    // A proof for one serial does not authorize another.
    let mut swapped = fx.register_request("SN-1", &fx.manufacturer);
    swapped.serial_number = "SN-2".into();
    let err = fx.engine.coordinator.register(swapped).await.unwrap_err();
    assert!(matches!(err, EngineError::Authorization(_)));

    assert!(fx.store.all_records().is_empty());
    assert_eq!(fx.ledger.submission_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn malformed_requests_never_reach_the_ledger() {
    let fx = Fixture::new();

    let mut big = fx.register_request("SN-1", &fx.manufacturer);
    big.payload = vec![0; fx.config.max_payload_bytes + 1];
    assert!(matches!(
        fx.engine.coordinator.register(big).await,
        Err(EngineError::Validation(_))
    ));

    let mut blank = fx.register_request("SN-1", &fx.manufacturer);
    blank.serial_number = "   ".into();
    assert!(matches!(
        fx.engine.coordinator.register(blank).await,
        Err(EngineError::Validation(_))
    ));

    assert!(fx.store.all_records().is_empty());
    assert_eq!(fx.ledger.submission_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn transient_ledger_failures_are_retried() {
    let fx = Fixture::new();
    fx.ledger.fail_next_calls(2);
    fx.registered("SN-1").await;
}

#[tokio::test(start_paused = true)]
async fn lost_response_resubmits_the_same_operation() {
    let fx = Fixture::new();
    fx.ledger.lose_next_responses(1);
    let item = fx.registered("SN-1").await;
    assert_eq!(fx.ledger.submission_count(), 2);
    assert_eq!(fx.store.all_records().len(), 1);
    assert_eq!(fx.ledger.owner(&item), Some(fx.manufacturer.address()));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_as_submission_errors() {
    let fx = Fixture::new();
    fx.ledger.fail_next_calls(100);
    let err = fx
        .engine
        .coordinator
        .register(fx.register_request("SN-1", &fx.manufacturer))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ChainSubmission(_)));
    assert!(fx.store.all_records().is_empty());
}

#[tokio::test(start_paused = true)]
async fn wait_timeout_returns_pending_record() {
    let fx = Fixture::manual();
    let mut req = fx.register_request("SN-1", &fx.manufacturer);
    req.wait = WaitOptions::with_timeout(Duration::from_secs(3));

    let outcome = fx.engine.coordinator.register(req).await.unwrap();

    let record = match outcome {
        Outcome::Pending(r) => r,
        other => panic!("expected pending, got {other:?}"),
    };
    assert_eq!(record.status, TxStatus::Pending);
    assert_eq!(fx.store.all_records(), vec![record]);
    assert_eq!(fx.engine.metrics.pending_outcomes.get(), 1);
    assert_eq!(fx.engine.metrics.failures.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_a_waiting_registration() {
    let fx = Fixture::manual();
    let shutdown = ShutdownController::new();
    let mut req = fx.register_request("SN-1", &fx.manufacturer);
    req.wait = shutdown.wait_options(None);

    let coordinator = Arc::clone(&fx.engine.coordinator);
    let task = tokio::spawn(async move { coordinator.register(req).await });
    tokio::time::sleep(Duration::from_secs(5)).await;
    shutdown.shutdown();

    let outcome = task.await.unwrap().unwrap();
    assert!(!outcome.is_finalized());
    assert_eq!(outcome.record().status, TxStatus::Pending);
    assert_eq!(fx.engine.metrics.in_flight.get(), 0);
}

// ── Transfer ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn register_then_transfer_then_stale_transfer() {
    let fx = Fixture::new();
    let item = fx.registered("SN-1").await;
    assert_eq!(item, serial_hash("GTIN123", "SN-1"));
    assert_eq!(fx.store_custody(&item).await.owner, fx.manufacturer.address());

    let outcome = fx.transferred(item, &fx.manufacturer, &fx.distributor).await;
    let transfer = match outcome {
        Outcome::Finalized(r) => r,
        other => panic!("expected finality, got {other:?}"),
    };
    assert_eq!(transfer.kind, TxKind::Transfer);
    assert_eq!(transfer.shipper, fx.manufacturer.address());
    assert_eq!(transfer.receiver, fx.distributor.address());
    assert!(transfer.completion_tx.is_some());
    assert_eq!(transfer.cost, Some(95_000 + 60_000));

    let custody = fx.store_custody(&item).await;
    assert_eq!(custody.owner, fx.distributor.address());
    assert_eq!(custody.registrant, fx.manufacturer.address());
    assert_eq!(custody.record, transfer.commitment);

    let history = fx.engine.coordinator.history(&item).await.unwrap();
    let statuses: Vec<_> = history.iter().map(|r| (r.kind, r.status)).collect();
    assert_eq!(
        statuses,
        vec![
            (TxKind::Register, TxStatus::Completed),
            (TxKind::Transfer, TxStatus::Finalized),
        ]
    );

    let err = fx
        .engine
        .coordinator
        .transfer(fx.transfer_request(item, &fx.manufacturer, &fx.pharmacy))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::NotCurrentOwner { item: i, ref claimed }
            if i == item && *claimed == fx.manufacturer.address()
    ));
    assert_eq!(fx.engine.coordinator.history(&item).await.unwrap().len(), 2);
    assert_eq!(fx.engine.metrics.transfers.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_honest_and_stale_transfers_have_one_winner() {
    let fx = Fixture::manual();
    let miner = fx.ledger.spawn_miner(Duration::from_millis(1_000));
    let item = fx.registered("SN-2").await;

    let to_distributor = fx.transfer_request(item, &fx.manufacturer, &fx.distributor);
    let to_pharmacy = fx.transfer_request(item, &fx.manufacturer, &fx.pharmacy);
    let (a, b) = tokio::join!(
        fx.engine.coordinator.transfer(to_distributor),
        fx.engine.coordinator.transfer(to_pharmacy),
    );
    miner.abort();

    let (winner, loser) = match (a, b) {
        (Ok(w), Err(l)) | (Err(l), Ok(w)) => (w, l),
        other => panic!("expected exactly one success, got {other:?}"),
    };
    assert!(winner.is_finalized());
    assert!(matches!(loser, EngineError::OwnershipConflict { .. }), "{loser:?}");

    let custody = fx.store_custody(&item).await;
    assert_eq!(custody.owner, winner.record().receiver);
    assert_eq!(fx.ledger.owner(&item), Some(winner.record().receiver.clone()));
    let finalized = fx
        .store
        .all_records()
        .into_iter()
        .filter(|r| r.status == TxStatus::Finalized)
        .count();
    assert_eq!(finalized, 1);
}

#[tokio::test(start_paused = true)]
async fn owner_change_after_the_check_is_a_conflict() {
    let fx = Fixture::new();
    let item = fx.registered("SN-3").await;
    fx.ledger
        .transfer_after_next_owner_query(item, fx.pharmacy.address());

    let err = fx
        .engine
        .coordinator
        .transfer(fx.transfer_request(item, &fx.manufacturer, &fx.distributor))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::OwnershipConflict { .. }), "{err:?}");
    assert_eq!(fx.store.all_records().len(), 1);
    assert_eq!(fx.store_custody(&item).await.owner, fx.manufacturer.address());
}

#[tokio::test(start_paused = true)]
async fn unknown_or_inactive_recipients_are_rejected() {
    let fx = Fixture::new();
    let item = fx.registered("SN-4").await;
    let submissions = fx.ledger.submission_count();

    let stranger = Actor::new(50, "Unlisted", Role::Pharmacy);
    let err = fx
        .engine
        .coordinator
        .transfer(fx.transfer_request(item, &fx.manufacturer, &stranger))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownRecipient(a) if a == stranger.address()));

    fx.parties.deactivate(&fx.pharmacy.address());
    let err = fx
        .engine
        .coordinator
        .transfer(fx.transfer_request(item, &fx.manufacturer, &fx.pharmacy))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownRecipient(_)));

    assert_eq!(fx.ledger.submission_count(), submissions);
    assert_eq!(fx.store.all_records().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn transfer_needs_the_receivers_acceptance() {
    let fx = Fixture::new();
    let item = fx.registered("SN-5").await;

    let mut req = fx.transfer_request(item, &fx.manufacturer, &fx.distributor);
    let sender = fx.manufacturer.address();
    req.acceptance = fx.proof(&fx.pharmacy, ProofAction::Accept, &item, Some(&sender));
    assert!(matches!(
        fx.engine.coordinator.transfer(req).await,
        Err(EngineError::Authorization(_))
    ));

    // Acceptance signed for a different sender.
    let mut req = fx.transfer_request(item, &fx.manufacturer, &fx.distributor);
    let wrong_sender = fx.pharmacy.address();
    req.acceptance = fx.proof(&fx.distributor, ProofAction::Accept, &item, Some(&wrong_sender));
    assert!(matches!(
        fx.engine.coordinator.transfer(req).await,
        Err(EngineError::Authorization(_))
    ));

    let mut req = fx.transfer_request(item, &fx.manufacturer, &fx.manufacturer);
    req.to = fx.manufacturer.address();
    assert!(matches!(
        fx.engine.coordinator.transfer(req).await,
        Err(EngineError::Validation(_))
    ));
    assert_eq!(fx.store.all_records().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn transfer_of_unregistered_item_is_not_found() {
    let fx = Fixture::new();
    let item = serial_hash(GTIN, "never");
    let err = fx
        .engine
        .coordinator
        .transfer(fx.transfer_request(item, &fx.manufacturer, &fx.distributor))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn completion_rejected_by_the_ledger_fails_the_record() {
    let fx = Fixture::manual();
    let miner = fx.ledger.spawn_miner(Duration::from_millis(1_000));
    let item = fx.registered("SN-6").await;
    miner.abort();

    let req = fx.transfer_request(item, &fx.manufacturer, &fx.distributor);
    let coordinator = Arc::clone(&fx.engine.coordinator);
    let task = tokio::spawn(async move { coordinator.transfer(req).await });

    tokio::time::sleep(Duration::from_millis(500)).await;
    fx.ledger.force_recall(&item);
    fx.ledger.mine(1);
    let err = task.await.unwrap().unwrap_err();

    assert!(matches!(err, EngineError::RecalledItem(_)));
    let transfer = fx
        .store
        .all_records()
        .into_iter()
        .find(|r| r.kind == TxKind::Transfer)
        .unwrap();
    assert_eq!(transfer.status, TxStatus::Failed);
    assert!(transfer.failure.is_some());
}

// ── Recall ──────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn recall_revokes_history_and_blocks_transfers() {
    let fx = Fixture::new();
    let item = fx.registered("SN-7").await;
    fx.transferred(item, &fx.manufacturer, &fx.distributor).await;

    let err = fx
        .engine
        .coordinator
        .recall(fx.recall_request(item, &fx.distributor))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Authorization(_)));

    let custody = fx
        .engine
        .coordinator
        .recall(fx.recall_request(item, &fx.manufacturer))
        .await
        .unwrap();
    assert!(custody.recalled);
    assert_eq!(custody.owner, fx.distributor.address());
    assert!(fx.ledger.is_recalled(&item).await.unwrap());

    let statuses: Vec<_> = fx
        .engine
        .coordinator
        .history(&item)
        .await
        .unwrap()
        .iter()
        .map(|r| r.status)
        .collect();
    assert_eq!(statuses, vec![TxStatus::Revoked, TxStatus::Finalized]);

    let err = fx
        .engine
        .coordinator
        .transfer(fx.transfer_request(item, &fx.distributor, &fx.pharmacy))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RecalledItem(_)));

    let err = fx
        .engine
        .coordinator
        .recall(fx.recall_request(item, &fx.manufacturer))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RecalledItem(_)));
    assert_eq!(fx.engine.metrics.recalls.get(), 1);
}

// ── Read path ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn only_the_two_parties_can_open_a_record() {
    let fx = Fixture::new();
    let item = fx.registered("SN-8").await;
    let transfer = fx
        .transferred(item, &fx.manufacturer, &fx.distributor)
        .await
        .into_record();
    let coordinator = &fx.engine.coordinator;

    assert!(coordinator.verify_record(&transfer));
    for actor in [&fx.manufacturer, &fx.distributor] {
        let plain = coordinator
            .open_record(&transfer.commitment, &actor.keys.private)
            .await
            .unwrap();
        assert_eq!(plain, b"shipment 9, 40 cartons, 2-8C");
    }
    assert!(matches!(
        coordinator
            .open_record(&transfer.commitment, &fx.pharmacy.keys.private)
            .await,
        Err(EngineError::AccessDenied)
    ));
    assert!(matches!(
        coordinator
            .open_record(&Commitment::new([0xee; 32]), &fx.pharmacy.keys.private)
            .await,
        Err(EngineError::NotFound(_))
    ));

    let mut tampered = transfer.clone();
    tampered.ciphertext[20] ^= 0x40;
    fx.store.force_record(tampered.clone());
    assert!(!coordinator.verify_record(&tampered));
    assert!(matches!(
        coordinator
            .open_record(&transfer.commitment, &fx.distributor.keys.private)
            .await,
        Err(EngineError::Integrity)
    ));
}

#[tokio::test(start_paused = true)]
async fn records_are_listed_per_party() {
    let fx = Fixture::new();
    let a = fx.registered("SN-10").await;
    fx.registered("SN-11").await;
    fx.transferred(a, &fx.manufacturer, &fx.distributor).await;

    let coordinator = &fx.engine.coordinator;
    assert_eq!(
        coordinator
            .records_for_party(&fx.manufacturer.address())
            .await
            .unwrap()
            .len(),
        3
    );
    let mine = coordinator
        .records_for_party(&fx.distributor.address())
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].item, a);
    assert!(coordinator
        .records_for_party(&fx.pharmacy.address())
        .await
        .unwrap()
        .is_empty());
}
