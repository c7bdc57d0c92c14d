use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db_types::{Order, OrderStatusType};

/// Published after a status change has been committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusChangedEvent {
    pub order: Order,
    pub from: OrderStatusType,
    pub to: OrderStatusType,
    /// Who caused the change, e.g. `webhook:stripe`, `scheduler:order_expiry` or an admin id
    pub actor: String,
    pub changed_at: DateTime<Utc>,
}

impl OrderStatusChangedEvent {
    pub fn new(order: Order, from: OrderStatusType, actor: &str) -> Self {
        let to = order.status;
        let changed_at = order.updated_at;
        Self { order, from, to, actor: actor.to_string(), changed_at }
    }
}
