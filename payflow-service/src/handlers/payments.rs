//! Payment handlers.
//!
//! Every mutation here is a ledger operation: the database layer recomputes
//! the owning invoice's paid total and status in the same transaction, so the
//! response always carries the invoice's post-mutation position.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use payflow_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    AppState,
    dtos::{
        CreatePaymentRequest, InvoiceResponse, ListPaymentsQuery, PaymentListResponse,
        PaymentResponse, PaymentWithInvoiceResponse, UpdatePaymentRequest,
    },
    models::{CreatePayment, ListPaymentsFilter, UpdatePayment},
};

pub async fn create_payment(
    State(state): State<AppState>,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<PaymentWithInvoiceResponse>), AppError> {
    payload.validate()?;

    tracing::info!(
        invoice_id = %payload.invoice_id,
        amount = payload.amount,
        "Recording payment"
    );

    let input = CreatePayment {
        invoice_id: payload.invoice_id,
        amount: payload.amount,
        method: payload.method,
        payment_date: payload.payment_date,
        reference: payload.reference,
        notes: payload.notes,
    };

    let (payment, invoice) = state.db.create_payment(&input).await?;

    let today = Utc::now().date_naive();
    Ok((
        StatusCode::CREATED,
        Json(PaymentWithInvoiceResponse {
            payment: PaymentResponse::from(payment),
            invoice: InvoiceResponse::from_invoice(invoice, today),
        }),
    ))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<PaymentResponse>, AppError> {
    let payment = state
        .db
        .get_payment(payment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment not found")))?;

    Ok(Json(PaymentResponse::from(payment)))
}

pub async fn list_payments(
    State(state): State<AppState>,
    Query(query): Query<ListPaymentsQuery>,
) -> Result<Json<PaymentListResponse>, AppError> {
    let filter = ListPaymentsFilter {
        invoice_id: query.invoice_id,
        method: query.method,
        start_date: query.start_date,
        end_date: query.end_date,
        page_size: super::default_page_size(query.page_size),
        page_token: query.page_token,
    };

    let payments = state.db.list_payments(&filter).await?;
    let next_page_token = super::next_page_token(&payments, query.page_size, |p| p.payment_id);

    Ok(Json(PaymentListResponse {
        payments: payments.into_iter().map(PaymentResponse::from).collect(),
        next_page_token,
    }))
}

pub async fn update_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    Json(payload): Json<UpdatePaymentRequest>,
) -> Result<Json<PaymentWithInvoiceResponse>, AppError> {
    payload.validate()?;

    tracing::info!(payment_id = %payment_id, "Updating payment");

    let input = UpdatePayment {
        invoice_id: payload.invoice_id,
        amount: payload.amount,
        method: payload.method,
        payment_date: payload.payment_date,
        reference: payload.reference,
        notes: payload.notes,
    };

    let (payment, invoice) = state
        .db
        .update_payment(payment_id, &input)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment not found")))?;

    let today = Utc::now().date_naive();
    Ok(Json(PaymentWithInvoiceResponse {
        payment: PaymentResponse::from(payment),
        invoice: InvoiceResponse::from_invoice(invoice, today),
    }))
}

pub async fn delete_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    tracing::info!(payment_id = %payment_id, "Deleting payment");

    state
        .db
        .delete_payment(payment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment not found")))?;

    Ok(StatusCode::NO_CONTENT)
}
