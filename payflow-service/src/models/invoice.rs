//! Invoice model and lifecycle policy for payflow-service.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::NewLineItem;

/// Invoice lifecycle status.
///
/// This enum is the single representation of invoice state; the database
/// stores its `as_str` form and every external boundary converts through it.
/// `Overdue` is never written by a ledger operation -- it is the read-time
/// view of a sent invoice past its due date with an outstanding balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Overdue,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "sent" => InvoiceStatus::Sent,
            "paid" => InvoiceStatus::Paid,
            "overdue" => InvoiceStatus::Overdue,
            _ => InvoiceStatus::Draft,
        }
    }

    /// Derive the stored status from the payment position.
    ///
    /// Overpayment clamps to `Paid`. With no payments a draft stays a draft,
    /// while any invoice that has been beyond draft returns to `Sent` rather
    /// than `Draft` -- deleting payments does not un-send an invoice.
    pub fn derive(total_paid: i64, invoice_total: i64, prior: InvoiceStatus) -> InvoiceStatus {
        if invoice_total > 0 && total_paid >= invoice_total {
            InvoiceStatus::Paid
        } else if total_paid > 0 {
            InvoiceStatus::Sent
        } else if prior == InvoiceStatus::Draft {
            InvoiceStatus::Draft
        } else {
            InvoiceStatus::Sent
        }
    }
}

/// Invoice record. Monetary columns are integer cents.
///
/// `subtotal`, `tax_amount` and `total` are a cache of the pure totals
/// computation over the invoice's line items; every item or `vat_rate`
/// mutation recomputes them in the same transaction. `amount_paid` is
/// likewise re-derived from the payment ledger by every ledger operation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub client_id: Uuid,
    pub status: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub vat_rate: Decimal,
    pub subtotal: i64,
    pub tax_amount: i64,
    pub total: i64,
    pub amount_paid: i64,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn lifecycle(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }

    pub fn amount_due(&self) -> i64 {
        self.total - self.amount_paid
    }
}

/// Effective status of an invoice as reported to callers.
///
/// A sent invoice past its due date with money outstanding reads as overdue;
/// nothing is persisted for this transition.
pub fn effective_status(invoice: &Invoice, today: NaiveDate) -> InvoiceStatus {
    let status = invoice.lifecycle();
    if status == InvoiceStatus::Sent && invoice.due_date < today && invoice.amount_due() > 0 {
        return InvoiceStatus::Overdue;
    }
    status
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default)]
pub struct ListInvoicesFilter {
    pub status: Option<InvoiceStatus>,
    pub client_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}

/// Input for creating an invoice with its line items.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub client_id: Uuid,
    pub status: InvoiceStatus,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub vat_rate: Decimal,
    pub notes: Option<String>,
    pub items: Vec<NewLineItem>,
}

/// Input for updating a draft invoice. `items`, when present, replaces the
/// full line item set and retriggers the totals computation.
#[derive(Debug, Clone, Default)]
pub struct UpdateInvoice {
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub vat_rate: Option<Decimal>,
    pub notes: Option<String>,
    pub items: Option<Vec<NewLineItem>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_payment_derives_paid() {
        assert_eq!(
            InvoiceStatus::derive(10000, 10000, InvoiceStatus::Sent),
            InvoiceStatus::Paid
        );
    }

    #[test]
    fn overpayment_clamps_to_paid() {
        assert_eq!(
            InvoiceStatus::derive(12000, 10000, InvoiceStatus::Sent),
            InvoiceStatus::Paid
        );
    }

    #[test]
    fn partial_payment_derives_sent() {
        assert_eq!(
            InvoiceStatus::derive(5000, 10000, InvoiceStatus::Draft),
            InvoiceStatus::Sent
        );
    }

    #[test]
    fn zero_paid_keeps_draft_as_draft() {
        assert_eq!(
            InvoiceStatus::derive(0, 10000, InvoiceStatus::Draft),
            InvoiceStatus::Draft
        );
    }

    #[test]
    fn zero_paid_returns_paid_invoice_to_sent() {
        // Deleting the only payment moves the status backward, but never
        // back to draft.
        assert_eq!(
            InvoiceStatus::derive(0, 10000, InvoiceStatus::Paid),
            InvoiceStatus::Sent
        );
    }

    #[test]
    fn empty_invoice_never_reads_paid() {
        assert_eq!(
            InvoiceStatus::derive(0, 0, InvoiceStatus::Draft),
            InvoiceStatus::Draft
        );
    }

    fn invoice(status: InvoiceStatus, due_date: NaiveDate, total: i64, paid: i64) -> Invoice {
        Invoice {
            invoice_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            status: status.as_str().to_string(),
            issue_date: due_date,
            due_date,
            vat_rate: Decimal::ZERO,
            subtotal: total,
            tax_amount: 0,
            total,
            amount_paid: paid,
            notes: None,
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn sent_invoice_past_due_reads_overdue() {
        let due = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 2, 10).unwrap();
        let inv = invoice(InvoiceStatus::Sent, due, 10000, 2500);
        assert_eq!(effective_status(&inv, today), InvoiceStatus::Overdue);
    }

    #[test]
    fn paid_invoice_never_reads_overdue() {
        let due = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 2, 10).unwrap();
        let inv = invoice(InvoiceStatus::Paid, due, 10000, 10000);
        assert_eq!(effective_status(&inv, today), InvoiceStatus::Paid);
    }

    #[test]
    fn sent_invoice_before_due_reads_sent() {
        let due = NaiveDate::from_ymd_opt(2026, 3, 31).unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 2, 10).unwrap();
        let inv = invoice(InvoiceStatus::Sent, due, 10000, 0);
        assert_eq!(effective_status(&inv, today), InvoiceStatus::Sent);
    }
}
