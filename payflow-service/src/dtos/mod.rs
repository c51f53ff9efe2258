//! Request and response types for the REST boundary.
//!
//! Monetary fields cross this boundary as integer cents; formatting to major
//! units is the presentation layer's job.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{
    Client, Invoice, InvoiceStatus, LineItem, Payment, PaymentMethod, effective_status,
};

// -----------------------------------------------------------------------------
// Clients
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct CreateClientRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateClientRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClientResponse {
    pub client_id: Uuid,
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

impl From<Client> for ClientResponse {
    fn from(client: Client) -> Self {
        Self {
            client_id: client.client_id,
            name: client.name,
            email: client.email,
            company: client.company,
            phone: client.phone,
            notes: client.notes,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ClientListResponse {
    pub clients: Vec<ClientResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<Uuid>,
}

// -----------------------------------------------------------------------------
// Invoices
// -----------------------------------------------------------------------------

/// Bounds keep every line total, and the sum over a full invoice, far inside
/// `i64` cents.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct LineItemRequest {
    #[validate(length(min = 1, max = 512))]
    pub description: String,
    #[validate(range(min = 1, max = 100_000))]
    pub quantity: i32,
    #[validate(range(min = 0, max = 100_000_000_000_i64))]
    pub unit_price: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInvoiceRequest {
    pub client_id: Uuid,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    /// Flat VAT fraction in [0, 1]; defaults to zero.
    pub vat_rate: Option<Decimal>,
    /// Initial lifecycle state; only `draft` or `sent` are accepted.
    pub status: Option<InvoiceStatus>,
    pub notes: Option<String>,
    #[validate(length(max = 100), nested)]
    pub items: Vec<LineItemRequest>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateInvoiceRequest {
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub vat_rate: Option<Decimal>,
    pub notes: Option<String>,
    #[validate(length(max = 100), nested)]
    pub items: Option<Vec<LineItemRequest>>,
}

#[derive(Debug, Deserialize)]
pub struct ListInvoicesQuery {
    pub status: Option<InvoiceStatus>,
    pub client_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page_size: Option<i32>,
    pub page_token: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct LineItemResponse {
    pub line_item_id: Uuid,
    pub description: String,
    pub quantity: i32,
    pub unit_price: i64,
    pub line_total: i64,
}

impl From<LineItem> for LineItemResponse {
    fn from(item: LineItem) -> Self {
        Self {
            line_item_id: item.line_item_id,
            description: item.description,
            quantity: item.quantity,
            unit_price: item.unit_price,
            line_total: item.line_total,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    pub invoice_id: Uuid,
    pub client_id: Uuid,
    /// Effective status: a sent invoice past its due date with an outstanding
    /// balance reads as `overdue` without being persisted as such.
    pub status: InvoiceStatus,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub vat_rate: Decimal,
    pub subtotal: i64,
    pub tax_amount: i64,
    pub total: i64,
    pub amount_paid: i64,
    pub amount_due: i64,
    pub notes: Option<String>,
}

impl InvoiceResponse {
    pub fn from_invoice(invoice: Invoice, today: NaiveDate) -> Self {
        let status = effective_status(&invoice, today);
        Self {
            invoice_id: invoice.invoice_id,
            client_id: invoice.client_id,
            status,
            issue_date: invoice.issue_date,
            due_date: invoice.due_date,
            vat_rate: invoice.vat_rate,
            subtotal: invoice.subtotal,
            tax_amount: invoice.tax_amount,
            total: invoice.total,
            amount_paid: invoice.amount_paid,
            amount_due: invoice.total - invoice.amount_paid,
            notes: invoice.notes,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InvoiceDetailResponse {
    #[serde(flatten)]
    pub invoice: InvoiceResponse,
    pub items: Vec<LineItemResponse>,
    pub payments: Vec<PaymentResponse>,
}

#[derive(Debug, Serialize)]
pub struct InvoiceListResponse {
    pub invoices: Vec<InvoiceResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<Uuid>,
}

#[derive(Debug, Deserialize, Default)]
pub struct MarkPaidRequest {
    pub method: Option<PaymentMethod>,
    pub payment_date: Option<NaiveDate>,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

// -----------------------------------------------------------------------------
// Payments
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    pub invoice_id: Uuid,
    #[validate(range(min = 1))]
    pub amount: i64,
    pub method: PaymentMethod,
    pub payment_date: NaiveDate,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdatePaymentRequest {
    pub invoice_id: Option<Uuid>,
    #[validate(range(min = 1))]
    pub amount: Option<i64>,
    pub method: Option<PaymentMethod>,
    pub payment_date: Option<NaiveDate>,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListPaymentsQuery {
    pub invoice_id: Option<Uuid>,
    pub method: Option<PaymentMethod>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page_size: Option<i32>,
    pub page_token: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    pub amount: i64,
    pub method: PaymentMethod,
    pub payment_date: NaiveDate,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        let method = payment.method();
        Self {
            payment_id: payment.payment_id,
            invoice_id: payment.invoice_id,
            amount: payment.amount,
            method,
            payment_date: payment.payment_date,
            reference: payment.reference,
            notes: payment.notes,
        }
    }
}

/// Returned by payment mutations so callers see the invoice's new position
/// without a second round trip.
#[derive(Debug, Serialize)]
pub struct PaymentWithInvoiceResponse {
    pub payment: PaymentResponse,
    pub invoice: InvoiceResponse,
}

#[derive(Debug, Serialize)]
pub struct PaymentListResponse {
    pub payments: Vec<PaymentResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<Uuid>,
}
