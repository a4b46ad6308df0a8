mod common;

use boxoffice_server::config::LateSettlementPolicy;
use boxoffice_server::models::{Hold, HoldStatus};
use boxoffice_server::services::holds::{create_or_reuse_hold, release_hold, RequestedItem};
use boxoffice_server::services::{
    finalize_paid_hold, run_expiry_sweep, HoldRequest, HoldSettings, SettlementRequest,
};
use boxoffice_server::utils::AppError;
use chrono::{Duration, Utc};
use common::TestDb;
use std::collections::HashSet;
use uuid::Uuid;

fn request(event_id: Uuid, ticket_type_id: Uuid, qty: i32) -> HoldRequest {
    HoldRequest {
        event_id,
        items: vec![RequestedItem {
            ticket_type_id,
            qty,
        }],
        ttl_seconds: None,
        existing_hold_id: None,
    }
}

fn settlement(hold_id: Uuid) -> SettlementRequest {
    SettlementRequest {
        hold_id,
        buyer_name: "Ana Pérez".to_string(),
        buyer_email: "ana@example.com".to_string(),
        event_title: "Festival".to_string(),
        payment_id: None,
        amount_minor: None,
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn two_seat_event_end_to_end() {
    let db = TestDb::start().await;
    let event = db.event("E1").await;
    let t1 = db.ticket_type(event, "T1", 25_000, Some(2)).await;
    let settings = HoldSettings::default();
    let now = Utc::now();

    let hold_a = create_or_reuse_hold(&db.pool, &request(event, t1, 2), &settings, now)
        .await
        .expect("hold A");
    assert_eq!(hold_a.total_minor, 50_000);
    assert_eq!(db.counters(t1).await.held, 2);

    match create_or_reuse_hold(&db.pool, &request(event, t1, 1), &settings, now).await {
        Err(AppError::InsufficientStock {
            ticket_type_id,
            max_available,
        }) => {
            assert_eq!(ticket_type_id, t1);
            assert_eq!(max_available, 0);
        }
        other => panic!("expected InsufficientStock, got {:?}", other.map(|h| h.hold.id)),
    }

    let first = finalize_paid_hold(&db.pool, &settlement(hold_a.hold.id), LateSettlementPolicy::Honor)
        .await
        .expect("first finalize");
    assert!(first.newly_settled);
    assert_eq!(first.tickets.len(), 2);

    let counters = db.counters(t1).await;
    assert_eq!((counters.sold, counters.held), (2, 0));

    let second = finalize_paid_hold(&db.pool, &settlement(hold_a.hold.id), LateSettlementPolicy::Honor)
        .await
        .expect("second finalize");
    assert!(!second.newly_settled);
    assert_eq!(second.order.id, first.order.id);

    let first_ids: HashSet<Uuid> = first.tickets.iter().map(|t| t.id).collect();
    let second_ids: HashSet<Uuid> = second.tickets.iter().map(|t| t.id).collect();
    assert_eq!(first_ids, second_ids);
    assert_eq!(db.count("orders").await, 1);
    assert_eq!(db.count("tickets").await, 2);

    db.assert_inventory_consistent().await;
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn concurrent_holds_never_oversell() {
    let db = TestDb::start().await;
    let event = db.event("Club night").await;
    let capacity = 5;
    let ticket_type = db.ticket_type(event, "General", 10_000, Some(capacity)).await;

    let attempts = (0..20).map(|_| {
        let pool = db.pool.clone();
        let request = request(event, ticket_type, 1);
        tokio::spawn(async move {
            create_or_reuse_hold(&pool, &request, &HoldSettings::default(), Utc::now()).await
        })
    });

    let mut succeeded = 0;
    for attempt in attempts.collect::<Vec<_>>() {
        match attempt.await.expect("task panicked") {
            Ok(_) => succeeded += 1,
            Err(AppError::InsufficientStock { max_available, .. }) => assert_eq!(max_available, 0),
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(succeeded, capacity);
    assert_eq!(db.counters(ticket_type).await.held, capacity);
    db.assert_inventory_consistent().await;
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn concurrent_finalize_creates_one_order() {
    let db = TestDb::start().await;
    let event = db.event("Theatre").await;
    let ticket_type = db.ticket_type(event, "Platea", 18_000, Some(10)).await;

    let hold = create_or_reuse_hold(
        &db.pool,
        &request(event, ticket_type, 3),
        &HoldSettings::default(),
        Utc::now(),
    )
    .await
    .expect("hold");

    let calls = (0..8).map(|_| {
        let pool = db.pool.clone();
        let request = settlement(hold.hold.id);
        tokio::spawn(async move {
            finalize_paid_hold(&pool, &request, LateSettlementPolicy::Honor).await
        })
    });

    let mut order_ids = HashSet::new();
    let mut newly_settled = 0;
    for call in calls.collect::<Vec<_>>() {
        let settlement = call.await.expect("task panicked").expect("finalize");
        assert_eq!(settlement.tickets.len(), 3);
        order_ids.insert(settlement.order.id);
        if settlement.newly_settled {
            newly_settled += 1;
        }
    }

    assert_eq!(order_ids.len(), 1);
    assert_eq!(newly_settled, 1);
    assert_eq!(db.count("tickets").await, 3);

    let counters = db.counters(ticket_type).await;
    assert_eq!((counters.sold, counters.held), (3, 0));
    db.assert_inventory_consistent().await;
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn expired_hold_is_reclaimed_and_policy_decides_late_settlement() {
    let db = TestDb::start().await;
    let event = db.event("Matinee").await;
    let ticket_type = db.ticket_type(event, "General", 5_000, Some(4)).await;
    let now = Utc::now();

    let mut short = request(event, ticket_type, 2);
    short.ttl_seconds = Some(1);
    let hold = create_or_reuse_hold(&db.pool, &short, &HoldSettings::default(), now)
        .await
        .expect("hold");
    // Clamped up to the minimum TTL.
    let drift = hold.hold.expires_at - (now + Duration::seconds(60));
    assert_eq!(drift.num_milliseconds(), 0);
    assert_eq!(db.counters(ticket_type).await.held, 2);

    let later = now + Duration::seconds(61);
    assert_eq!(run_expiry_sweep(&db.pool, later).await.expect("sweep"), 1);

    let expired = Hold::find(hold.hold.id, &db.pool).await.unwrap().unwrap();
    assert_eq!(expired.status, HoldStatus::Expired);
    assert_eq!(db.counters(ticket_type).await.held, 0);
    db.assert_inventory_consistent().await;

    match finalize_paid_hold(&db.pool, &settlement(hold.hold.id), LateSettlementPolicy::Reject).await {
        Err(AppError::InvalidHoldState { status, .. }) => assert_eq!(status, HoldStatus::Expired),
        other => panic!("expected InvalidHoldState, got {:?}", other.map(|s| s.order.id)),
    }

    let late = finalize_paid_hold(&db.pool, &settlement(hold.hold.id), LateSettlementPolicy::Honor)
        .await
        .expect("late settlement");
    assert_eq!(late.tickets.len(), 2);

    let counters = db.counters(ticket_type).await;
    assert_eq!((counters.sold, counters.held), (2, 0));
    db.assert_inventory_consistent().await;
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn reusing_a_hold_counts_its_own_units() {
    let db = TestDb::start().await;
    let event = db.event("Recital").await;
    let ticket_type = db.ticket_type(event, "General", 7_500, Some(3)).await;
    let settings = HoldSettings::default();
    let now = Utc::now();

    let hold = create_or_reuse_hold(&db.pool, &request(event, ticket_type, 2), &settings, now)
        .await
        .expect("hold");

    let mut grow = request(event, ticket_type, 3);
    grow.existing_hold_id = Some(hold.hold.id);
    let grown = create_or_reuse_hold(&db.pool, &grow, &settings, now)
        .await
        .expect("grow");
    assert_eq!(grown.hold.id, hold.hold.id);
    assert_eq!(grown.items[0].qty, 3);
    assert_eq!(db.counters(ticket_type).await.held, 3);

    let mut too_many = request(event, ticket_type, 4);
    too_many.existing_hold_id = Some(hold.hold.id);
    match create_or_reuse_hold(&db.pool, &too_many, &settings, now).await {
        Err(AppError::InsufficientStock { max_available, .. }) => assert_eq!(max_available, 3),
        other => panic!("expected InsufficientStock, got {:?}", other.map(|h| h.hold.id)),
    }
    assert_eq!(db.counters(ticket_type).await.held, 3);

    let released = release_hold(&db.pool, hold.hold.id).await.expect("release");
    assert_eq!(released.hold.status, HoldStatus::Expired);
    assert_eq!(db.counters(ticket_type).await.held, 0);
    db.assert_inventory_consistent().await;
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn hold_for_another_events_ticket_type_is_not_found() {
    let db = TestDb::start().await;
    let event = db.event("A").await;
    let other_event = db.event("B").await;
    let foreign = db.ticket_type(other_event, "General", 1_000, Some(10)).await;

    let result = create_or_reuse_hold(
        &db.pool,
        &request(event, foreign, 1),
        &HoldSettings::default(),
        Utc::now(),
    )
    .await;

    assert!(matches!(result, Err(AppError::NotFound(_))));
    assert_eq!(db.counters(foreign).await.held, 0);
    assert_eq!(db.count("holds").await, 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn one_second_hold_is_reclaimed_by_the_next_sweep() {
    let db = TestDb::start().await;
    let event = db.event("Flash sale").await;
    let ticket_type = db.ticket_type(event, "Early bird", 3_000, Some(10)).await;
    let settings = HoldSettings {
        min_ttl_seconds: 1,
        ..HoldSettings::default()
    };
    let now = Utc::now();

    let mut flash = request(event, ticket_type, 4);
    flash.ttl_seconds = Some(1);
    create_or_reuse_hold(&db.pool, &flash, &settings, now)
        .await
        .expect("hold");
    assert_eq!(db.counters(ticket_type).await.held, 4);

    // Any sweeping operation a second later gives the units back.
    let availability = boxoffice_server::services::availability(
        &db.pool,
        event,
        now + Duration::milliseconds(1_001),
    )
    .await
    .expect("availability");

    assert_eq!(availability.ticket_types[0].held, 0);
    assert_eq!(availability.ticket_types[0].remaining, Some(10));
    db.assert_inventory_consistent().await;
}
