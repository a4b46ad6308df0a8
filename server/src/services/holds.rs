use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use std::collections::{BTreeMap, HashMap};
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::models::{Event, Hold, HoldItem, HoldStatus, HoldWithItems, Payment, TicketType};
use crate::services::inventory::run_expiry_sweep;
use crate::utils::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldSettings {
    pub default_ttl_seconds: i64,
    pub min_ttl_seconds: i64,
    pub max_ttl_seconds: i64,
}

impl HoldSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_ttl_seconds: config.hold_ttl_seconds,
            min_ttl_seconds: config.hold_min_ttl_seconds,
            max_ttl_seconds: config.hold_max_ttl_seconds.max(config.hold_min_ttl_seconds),
        }
    }

    pub fn clamp_ttl(&self, requested: Option<i64>) -> i64 {
        requested
            .unwrap_or(self.default_ttl_seconds)
            .clamp(self.min_ttl_seconds, self.max_ttl_seconds)
    }
}

impl Default for HoldSettings {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 600,
            min_ttl_seconds: 60,
            max_ttl_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RequestedItem {
    pub ticket_type_id: Uuid,
    pub qty: i32,
}

#[derive(Debug, Clone)]
pub struct HoldRequest {
    pub event_id: Uuid,
    pub items: Vec<RequestedItem>,
    pub ttl_seconds: Option<i64>,
    /// A hold the buyer already owns. It is reused only while it is still
    /// active and belongs to the same event.
    pub existing_hold_id: Option<Uuid>,
}

/// Merges duplicate lines and rejects empty or non-positive requests.
/// The map is keyed in ticket type id order.
pub fn collapse_items(items: &[RequestedItem]) -> AppResult<BTreeMap<Uuid, i32>> {
    if items.is_empty() {
        return Err(AppError::ValidationError(
            "At least one item is required".to_string(),
        ));
    }

    let mut collapsed = BTreeMap::new();
    for item in items {
        if item.qty <= 0 {
            return Err(AppError::ValidationError(format!(
                "Quantity for ticket type {} must be positive",
                item.ticket_type_id
            )));
        }
        let qty = collapsed.entry(item.ticket_type_id).or_insert(0i32);
        *qty = qty.checked_add(item.qty).ok_or_else(|| {
            AppError::ValidationError(format!(
                "Quantity for ticket type {} is too large",
                item.ticket_type_id
            ))
        })?;
    }
    Ok(collapsed)
}

/// Net change to each ticket type's `held` counter when a hold's item set
/// goes from `previous` to `wanted`. Unchanged types are omitted.
fn held_deltas(
    previous: &BTreeMap<Uuid, i32>,
    wanted: &BTreeMap<Uuid, i32>,
) -> BTreeMap<Uuid, i32> {
    let mut deltas = BTreeMap::new();
    for (id, qty) in wanted {
        *deltas.entry(*id).or_insert(0) += qty;
    }
    for (id, qty) in previous {
        *deltas.entry(*id).or_insert(0) -= qty;
    }
    deltas.retain(|_, delta| *delta != 0);
    deltas
}

/// Whether two item lists reserve the same quantities at the same prices.
fn same_lines(previous: &[HoldItem], next: &[HoldItem]) -> bool {
    let key = |items: &[HoldItem]| -> BTreeMap<Uuid, (i32, i64)> {
        items
            .iter()
            .map(|item| (item.ticket_type_id, (item.qty, item.unit_price_minor)))
            .collect()
    };
    key(previous) == key(next)
}

/// Reserves the requested quantities, either on a fresh hold or by rewriting
/// an active hold the caller already owns.
///
/// Capacity is checked against the locked rows; units the reused hold
/// already holds count as available to it. On any failure nothing changes.
pub async fn create_or_reuse_hold(
    pool: &PgPool,
    request: &HoldRequest,
    settings: &HoldSettings,
    now: DateTime<Utc>,
) -> AppResult<HoldWithItems> {
    let wanted = collapse_items(&request.items)?;
    let ttl_seconds = settings.clamp_ttl(request.ttl_seconds);

    run_expiry_sweep(pool, now).await?;

    let mut tx = pool.begin().await?;

    let event = Event::find(request.event_id, &mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Event {} not found", request.event_id)))?;

    // Lock order: hold row first, then ticket types by id.
    let existing = match request.existing_hold_id {
        Some(hold_id) => Hold::lock(hold_id, &mut tx)
            .await?
            .filter(|hold| hold.is_active() && hold.event_id == event.id && hold.expires_at > now),
        None => None,
    };

    let previous_items = match &existing {
        Some(hold) => Hold::items(hold.id, &mut *tx).await?,
        None => Vec::new(),
    };
    let previous: BTreeMap<Uuid, i32> = previous_items
        .iter()
        .map(|item| (item.ticket_type_id, item.qty))
        .collect();

    let ids: Vec<Uuid> = wanted.keys().chain(previous.keys()).copied().collect();
    let locked: HashMap<Uuid, TicketType> = TicketType::lock_many(&ids, &mut tx)
        .await?
        .into_iter()
        .map(|ticket_type| (ticket_type.id, ticket_type))
        .collect();

    let mut items = Vec::with_capacity(wanted.len());
    for (ticket_type_id, qty) in &wanted {
        let ticket_type = locked
            .get(ticket_type_id)
            .filter(|ticket_type| ticket_type.event_id == event.id)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Ticket type {} not found for event {}",
                    ticket_type_id, event.id
                ))
            })?;

        if let Some(remaining) = ticket_type.remaining() {
            let max_available = remaining + previous.get(ticket_type_id).copied().unwrap_or(0);
            if *qty > max_available {
                return Err(AppError::InsufficientStock {
                    ticket_type_id: *ticket_type_id,
                    max_available,
                });
            }
        }

        items.push(HoldItem {
            hold_id: Uuid::nil(),
            ticket_type_id: *ticket_type_id,
            ticket_type_name: ticket_type.name.clone(),
            unit_price_minor: ticket_type.unit_price_minor,
            qty: *qty,
        });
    }

    // A bound checkout was priced from the current lines.
    if let Some(hold) = &existing {
        if !same_lines(&previous_items, &items) {
            if let Some(payment) = Payment::find_by_hold(hold.id, &mut *tx)
                .await?
                .filter(Payment::is_open)
            {
                return Err(AppError::Conflict(format!(
                    "Hold {} has a {:?} payment and cannot be changed",
                    hold.id, payment.status
                )));
            }
        }
    }

    let expires_at = now + Duration::seconds(ttl_seconds);
    let reused = existing.is_some();
    let hold = match existing {
        Some(hold) => Hold::extend(hold.id, expires_at, &mut tx).await?,
        None => Hold::insert(event.id, expires_at, &mut tx).await?,
    };

    for (ticket_type_id, delta) in held_deltas(&previous, &wanted) {
        TicketType::adjust_held(ticket_type_id, delta, &mut tx).await?;
    }

    let items = Hold::replace_items(hold.id, &items, &mut tx).await?;
    tx.commit().await?;

    info!(
        hold_id = %hold.id,
        event_id = %event.id,
        reused,
        ttl_seconds,
        "Hold reserved"
    );

    Ok(HoldWithItems::new(hold, items))
}

/// Gives an active hold's units back ahead of its deadline. Terminal holds
/// are returned as they are.
pub async fn release_hold(pool: &PgPool, hold_id: Uuid) -> AppResult<HoldWithItems> {
    let mut tx = pool.begin().await?;

    let hold = Hold::lock(hold_id, &mut tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Hold {} not found", hold_id)))?;
    let items = Hold::items(hold.id, &mut *tx).await?;

    if !hold.is_active() {
        tx.commit().await?;
        return Ok(HoldWithItems::new(hold, items));
    }

    let ids: Vec<Uuid> = items.iter().map(|item| item.ticket_type_id).collect();
    TicketType::lock_many(&ids, &mut tx).await?;
    for item in &items {
        TicketType::adjust_held(item.ticket_type_id, -item.qty, &mut tx).await?;
    }

    let hold = Hold::transition(hold.id, HoldStatus::Expired, &mut tx).await?;
    tx.commit().await?;

    info!(hold_id = %hold.id, "Hold released");
    Ok(HoldWithItems::new(hold, items))
}

pub async fn get_hold(pool: &PgPool, hold_id: Uuid) -> AppResult<HoldWithItems> {
    let hold = Hold::find(hold_id, pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Hold {} not found", hold_id)))?;
    let items = Hold::items(hold.id, pool).await?;
    Ok(HoldWithItems::new(hold, items))
}
