//! Invoice handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use payflow_core::error::AppError;
use rust_decimal::Decimal;
use uuid::Uuid;
use validator::Validate;

use crate::{
    AppState,
    dtos::{
        CreateInvoiceRequest, InvoiceDetailResponse, InvoiceListResponse, InvoiceResponse,
        LineItemRequest, LineItemResponse, ListInvoicesQuery, MarkPaidRequest, PaymentResponse,
        PaymentWithInvoiceResponse, UpdateInvoiceRequest,
    },
    models::{
        CreateInvoice, InvoiceStatus, ListInvoicesFilter, NewLineItem, PaymentMethod,
        UpdateInvoice,
    },
};

fn to_new_line_items(items: Vec<LineItemRequest>) -> Vec<NewLineItem> {
    items
        .into_iter()
        .map(|item| NewLineItem {
            description: item.description,
            quantity: item.quantity,
            unit_price: item.unit_price,
        })
        .collect()
}

fn check_vat_rate(vat_rate: Decimal) -> Result<(), AppError> {
    if vat_rate < Decimal::ZERO || vat_rate > Decimal::ONE {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "vat_rate must be a fraction between 0 and 1"
        )));
    }
    Ok(())
}

pub async fn create_invoice(
    State(state): State<AppState>,
    Json(payload): Json<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<InvoiceDetailResponse>), AppError> {
    payload.validate()?;

    if payload.due_date < payload.issue_date {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "due_date must not precede issue_date"
        )));
    }

    let vat_rate = payload.vat_rate.unwrap_or(Decimal::ZERO);
    check_vat_rate(vat_rate)?;

    let status = payload.status.unwrap_or(InvoiceStatus::Draft);
    if !matches!(status, InvoiceStatus::Draft | InvoiceStatus::Sent) {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "New invoices must start as draft or sent"
        )));
    }

    let input = CreateInvoice {
        client_id: payload.client_id,
        status,
        issue_date: payload.issue_date,
        due_date: payload.due_date,
        vat_rate,
        notes: payload.notes,
        items: to_new_line_items(payload.items),
    };

    let (invoice, items) = state.db.create_invoice(&input).await?;

    let today = Utc::now().date_naive();
    Ok((
        StatusCode::CREATED,
        Json(InvoiceDetailResponse {
            invoice: InvoiceResponse::from_invoice(invoice, today),
            items: items.into_iter().map(LineItemResponse::from).collect(),
            payments: Vec::new(),
        }),
    ))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceDetailResponse>, AppError> {
    let invoice = state
        .db
        .get_invoice(invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    let items = state.db.get_line_items(invoice_id).await?;
    let payments = state.db.get_invoice_payments(invoice_id).await?;

    let today = Utc::now().date_naive();
    Ok(Json(InvoiceDetailResponse {
        invoice: InvoiceResponse::from_invoice(invoice, today),
        items: items.into_iter().map(LineItemResponse::from).collect(),
        payments: payments.into_iter().map(PaymentResponse::from).collect(),
    }))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    Query(query): Query<ListInvoicesQuery>,
) -> Result<Json<InvoiceListResponse>, AppError> {
    let filter = ListInvoicesFilter {
        status: query.status,
        client_id: query.client_id,
        start_date: query.start_date,
        end_date: query.end_date,
        page_size: super::default_page_size(query.page_size),
        page_token: query.page_token,
    };

    let invoices = state.db.list_invoices(&filter).await?;
    let next_page_token = super::next_page_token(&invoices, query.page_size, |i| i.invoice_id);

    let today = Utc::now().date_naive();
    Ok(Json(InvoiceListResponse {
        invoices: invoices
            .into_iter()
            .map(|inv| InvoiceResponse::from_invoice(inv, today))
            .collect(),
        next_page_token,
    }))
}

pub async fn update_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<UpdateInvoiceRequest>,
) -> Result<Json<InvoiceDetailResponse>, AppError> {
    payload.validate()?;

    if let Some(vat_rate) = payload.vat_rate {
        check_vat_rate(vat_rate)?;
    }

    let input = UpdateInvoice {
        issue_date: payload.issue_date,
        due_date: payload.due_date,
        vat_rate: payload.vat_rate,
        notes: payload.notes,
        items: payload.items.map(to_new_line_items),
    };

    let (invoice, items) = state
        .db
        .update_invoice(invoice_id, &input)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    let today = Utc::now().date_naive();
    Ok(Json(InvoiceDetailResponse {
        invoice: InvoiceResponse::from_invoice(invoice, today),
        items: items.into_iter().map(LineItemResponse::from).collect(),
        payments: Vec::new(),
    }))
}

pub async fn delete_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let deleted = state.db.delete_invoice(invoice_id).await?;
    if !deleted {
        return Err(AppError::NotFound(anyhow::anyhow!("Invoice not found")));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Settle an invoice in full by synthesizing a payment for the outstanding
/// balance.
pub async fn mark_paid(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    payload: Option<Json<MarkPaidRequest>>,
) -> Result<Json<PaymentWithInvoiceResponse>, AppError> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let method = payload.method.unwrap_or(PaymentMethod::Other);
    let payment_date = payload
        .payment_date
        .unwrap_or_else(|| Utc::now().date_naive());

    let (payment, invoice) = state
        .db
        .mark_invoice_paid(
            invoice_id,
            method,
            payment_date,
            payload.reference,
            payload.notes,
        )
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    let today = Utc::now().date_naive();
    Ok(Json(PaymentWithInvoiceResponse {
        payment: PaymentResponse::from(payment),
        invoice: InvoiceResponse::from_invoice(invoice, today),
    }))
}
