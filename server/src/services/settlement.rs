use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::LateSettlementPolicy;
use crate::models::{Hold, HoldItem, HoldStatus, Order, Payment, Ticket, TicketType};
use crate::utils::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct SettlementRequest {
    pub hold_id: Uuid,
    pub buyer_name: String,
    pub buyer_email: String,
    pub event_title: String,
    pub payment_id: Option<Uuid>,
    /// Amount the buyer was charged; must equal the hold's total.
    pub amount_minor: Option<i64>,
}

impl SettlementRequest {
    pub fn for_payment(payment: &Payment) -> Self {
        Self {
            hold_id: payment.hold_id,
            buyer_name: payment.buyer_name.clone(),
            buyer_email: payment.buyer_email.clone(),
            event_title: payment.event_title.clone(),
            payment_id: Some(payment.id),
            amount_minor: Some(payment.amount_minor),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub order: Order,
    pub tickets: Vec<Ticket>,
    /// False when the hold had already been settled by an earlier call.
    #[serde(skip)]
    pub newly_settled: bool,
}

/// Turns a paid hold into an order with one ticket per unit.
///
/// Runs on the caller's transaction. Repeated or concurrent calls for the
/// same hold all observe the same order: the hold row lock serializes them,
/// and the unique `orders.hold_id` index catches anything that slips past.
/// Every check happens before the first write, so a failure leaves the
/// transaction usable for recording the outcome.
pub async fn finalize_paid_hold_in(
    conn: &mut PgConnection,
    request: &SettlementRequest,
    policy: LateSettlementPolicy,
) -> AppResult<Settlement> {
    let hold = Hold::lock(request.hold_id, conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Hold {} not found", request.hold_id)))?;

    if hold.status == HoldStatus::Consumed {
        return existing_settlement(hold.id, request.payment_id, conn).await;
    }

    let late = match (hold.status, policy) {
        (HoldStatus::Active, _) => false,
        (HoldStatus::Expired, LateSettlementPolicy::Honor) => true,
        (status, _) => {
            return Err(AppError::InvalidHoldState {
                hold_id: hold.id,
                status,
            })
        }
    };

    let items = Hold::items(hold.id, &mut *conn).await?;
    if items.is_empty() {
        return Err(AppError::Conflict(format!("Hold {} has no items", hold.id)));
    }

    let expected: i64 = items.iter().map(HoldItem::line_total_minor).sum();
    if let Some(paid) = request.amount_minor.filter(|paid| *paid != expected) {
        return Err(AppError::AmountMismatch {
            hold_id: hold.id,
            expected,
            paid,
        });
    }

    let ids: Vec<Uuid> = items.iter().map(|item| item.ticket_type_id).collect();
    let locked = TicketType::lock_many(&ids, conn).await?;

    // An expired hold no longer owns its units; they must still be free.
    if late {
        ensure_unheld_capacity(&items, &locked)?;
    }

    let order = match Order::insert_for_hold(
        hold.id,
        hold.event_id,
        &request.buyer_name,
        &request.buyer_email,
        conn,
    )
    .await?
    {
        Some(order) => order,
        None => return existing_settlement(hold.id, request.payment_id, conn).await,
    };

    for item in &items {
        if late {
            TicketType::sell_unheld(item.ticket_type_id, item.qty, conn).await?;
        } else {
            TicketType::convert_held_to_sold(item.ticket_type_id, item.qty, conn).await?;
        }
    }

    Hold::transition(hold.id, HoldStatus::Consumed, conn).await?;

    let mut tickets = Vec::new();
    for item in &items {
        tickets.extend(
            Ticket::issue_for_item(order.id, hold.event_id, &order.buyer_email, item, conn).await?,
        );
    }

    if let Some(payment_id) = request.payment_id {
        stamp_payment(payment_id, &order, conn).await?;
    }

    info!(
        hold_id = %hold.id,
        order_id = %order.id,
        tickets = tickets.len(),
        event_title = %request.event_title,
        late,
        "Hold settled"
    );

    Ok(Settlement {
        order,
        tickets,
        newly_settled: true,
    })
}

/// Same as [`finalize_paid_hold_in`] on a transaction of its own.
pub async fn finalize_paid_hold(
    pool: &PgPool,
    request: &SettlementRequest,
    policy: LateSettlementPolicy,
) -> AppResult<Settlement> {
    let mut tx = pool.begin().await?;
    let settlement = finalize_paid_hold_in(&mut tx, request, policy).await?;

    match tx.commit().await {
        Ok(()) => Ok(settlement),
        Err(e) => {
            let e = AppError::from(e);
            if !e.is_unique_violation() {
                return Err(e);
            }
            warn!(hold_id = %request.hold_id, "Settlement raced, reading existing order");
            let mut conn = pool.acquire().await?;
            existing_settlement(request.hold_id, None, &mut conn).await
        }
    }
}

/// Loads the order and tickets an earlier settlement produced.
pub async fn load_settlement(
    order: Order,
    conn: &mut PgConnection,
) -> AppResult<Settlement> {
    let tickets = Ticket::for_order(order.id, &mut *conn).await?;
    Ok(Settlement {
        order,
        tickets,
        newly_settled: false,
    })
}

async fn existing_settlement(
    hold_id: Uuid,
    payment_id: Option<Uuid>,
    conn: &mut PgConnection,
) -> AppResult<Settlement> {
    let order = Order::find_by_hold(hold_id, &mut *conn).await?.ok_or_else(|| {
        AppError::Conflict(format!("Hold {} is consumed but has no order", hold_id))
    })?;

    if let Some(payment_id) = payment_id {
        stamp_payment(payment_id, &order, conn).await?;
    }

    load_settlement(order, conn).await
}

async fn stamp_payment(payment_id: Uuid, order: &Order, conn: &mut PgConnection) -> AppResult<()> {
    if Payment::mark_paid(payment_id, order, conn).await?.is_none() {
        warn!(
            payment_id = %payment_id,
            order_id = %order.id,
            "Payment not linked to settled order"
        );
    }
    Ok(())
}

fn ensure_unheld_capacity(items: &[HoldItem], locked: &[TicketType]) -> AppResult<()> {
    let by_id: HashMap<Uuid, &TicketType> = locked.iter().map(|tt| (tt.id, tt)).collect();

    for item in items {
        let ticket_type = by_id.get(&item.ticket_type_id).ok_or_else(|| {
            AppError::NotFound(format!("Ticket type {} not found", item.ticket_type_id))
        })?;

        if let Some(remaining) = ticket_type.remaining() {
            if item.qty > remaining {
                return Err(AppError::InsufficientStock {
                    ticket_type_id: item.ticket_type_id,
                    max_available: remaining,
                });
            }
        }
    }
    Ok(())
}
