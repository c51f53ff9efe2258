//! Line item model for payflow-service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::money;

/// Line item on an invoice. `unit_price` and `line_total` are integer cents.
/// Items are immutable once written; edits replace the invoice's item set.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LineItem {
    pub line_item_id: Uuid,
    pub invoice_id: Uuid,
    pub description: String,
    pub quantity: i32,
    pub unit_price: i64,
    pub line_total: i64,
    pub sort_order: i32,
    pub created_utc: DateTime<Utc>,
}

impl LineItem {
    pub fn line_total(&self) -> i64 {
        money::line_total(self.quantity, self.unit_price)
    }
}

/// Input for a line item on a new or edited invoice.
#[derive(Debug, Clone)]
pub struct NewLineItem {
    pub description: String,
    pub quantity: i32,
    pub unit_price: i64,
}

impl NewLineItem {
    pub fn line_total(&self) -> i64 {
        money::line_total(self.quantity, self.unit_price)
    }
}
