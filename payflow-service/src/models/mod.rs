//! Domain models for payflow-service.

mod client;
mod invoice;
mod line_item;
mod payment;

pub use client::{Client, CreateClient, UpdateClient};
pub use invoice::{
    CreateInvoice, Invoice, InvoiceStatus, ListInvoicesFilter, UpdateInvoice, effective_status,
};
pub use line_item::{LineItem, NewLineItem};
pub use payment::{CreatePayment, ListPaymentsFilter, Payment, PaymentMethod, UpdatePayment};
