//! Database service for payflow-service.
//!
//! Every payment ledger operation (create/update/delete payment, mark-paid)
//! runs as a single transaction holding a row lock on the owning invoice, so
//! the balance check and the status write always see a consistent paid total.

use crate::models::{
    Client, CreateClient, CreateInvoice, CreatePayment, Invoice, InvoiceStatus, LineItem,
    ListInvoicesFilter, ListPaymentsFilter, NewLineItem, Payment, PaymentMethod, UpdateClient,
    UpdateInvoice, UpdatePayment,
};
use crate::money;
use chrono::NaiveDate;
use payflow_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::Transaction;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const INSUFFICIENT_BALANCE_MSG: &str = "payment amount exceeds remaining invoice balance";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "payflow-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Client Operations
    // -------------------------------------------------------------------------

    /// Create a new client.
    #[instrument(skip(self, input))]
    pub async fn create_client(&self, input: &CreateClient) -> Result<Client, AppError> {
        let client_id = Uuid::new_v4();
        let client = sqlx::query_as::<_, Client>(
            r#"
            INSERT INTO clients (client_id, name, email, company, phone, notes)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING client_id, name, email, company, phone, notes, created_utc
            "#,
        )
        .bind(client_id)
        .bind(&input.name)
        .bind(&input.email)
        .bind(&input.company)
        .bind(&input.phone)
        .bind(&input.notes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "A client with email '{}' already exists",
                    input.email
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create client: {}", e)),
        })?;

        info!(client_id = %client.client_id, "Client created");

        Ok(client)
    }

    /// Get a client by ID.
    #[instrument(skip(self), fields(client_id = %client_id))]
    pub async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, AppError> {
        let client = sqlx::query_as::<_, Client>(
            r#"
            SELECT client_id, name, email, company, phone, notes, created_utc
            FROM clients
            WHERE client_id = $1
            "#,
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get client: {}", e)))?;

        Ok(client)
    }

    /// List clients with keyset pagination.
    #[instrument(skip(self))]
    pub async fn list_clients(
        &self,
        page_size: i32,
        page_token: Option<Uuid>,
    ) -> Result<Vec<Client>, AppError> {
        let limit = page_size.clamp(1, 100) as i64;

        let clients = sqlx::query_as::<_, Client>(
            r#"
            SELECT client_id, name, email, company, phone, notes, created_utc
            FROM clients
            WHERE ($1::uuid IS NULL OR client_id > $1)
            ORDER BY client_id
            LIMIT $2
            "#,
        )
        .bind(page_token)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list clients: {}", e)))?;

        Ok(clients)
    }

    /// Update a client.
    #[instrument(skip(self, input), fields(client_id = %client_id))]
    pub async fn update_client(
        &self,
        client_id: Uuid,
        input: &UpdateClient,
    ) -> Result<Option<Client>, AppError> {
        let client = sqlx::query_as::<_, Client>(
            r#"
            UPDATE clients
            SET name = COALESCE($2, name),
                email = COALESCE($3, email),
                company = COALESCE($4, company),
                phone = COALESCE($5, phone),
                notes = COALESCE($6, notes)
            WHERE client_id = $1
            RETURNING client_id, name, email, company, phone, notes, created_utc
            "#,
        )
        .bind(client_id)
        .bind(&input.name)
        .bind(&input.email)
        .bind(&input.company)
        .bind(&input.phone)
        .bind(&input.notes)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!("A client with that email already exists"))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to update client: {}", e)),
        })?;

        if let Some(ref c) = client {
            info!(client_id = %c.client_id, "Client updated");
        }

        Ok(client)
    }

    /// Delete a client. Rejected while invoices still reference the client.
    #[instrument(skip(self), fields(client_id = %client_id))]
    pub async fn delete_client(&self, client_id: Uuid) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM clients WHERE client_id = $1)")
                .bind(client_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to check client: {}", e))
                })?;
        if !exists {
            return Ok(false);
        }

        let invoice_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM invoices WHERE client_id = $1")
                .bind(client_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to count invoices: {}", e))
                })?;
        if invoice_count > 0 {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Cannot delete client with {} existing invoice(s)",
                invoice_count
            )));
        }

        sqlx::query("DELETE FROM clients WHERE client_id = $1")
            .bind(client_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete client: {}", e))
            })?;

        tx.commit().await?;

        info!(client_id = %client_id, "Client deleted");

        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Invoice Operations
    // -------------------------------------------------------------------------

    /// Create a new invoice with its line items, deriving all totals.
    #[instrument(skip(self, input), fields(client_id = %input.client_id))]
    pub async fn create_invoice(
        &self,
        input: &CreateInvoice,
    ) -> Result<(Invoice, Vec<LineItem>), AppError> {
        let mut tx = self.pool.begin().await?;

        let client_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM clients WHERE client_id = $1)")
                .bind(input.client_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to check client: {}", e))
                })?;
        if !client_exists {
            return Err(AppError::NotFound(anyhow::anyhow!("Client not found")));
        }

        let totals = money::compute_totals(
            input.items.iter().map(NewLineItem::line_total),
            input.vat_rate,
        );

        let invoice_id = Uuid::new_v4();
        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (
                invoice_id, client_id, status, issue_date, due_date, vat_rate,
                subtotal, tax_amount, total, amount_paid, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, $10)
            RETURNING invoice_id, client_id, status, issue_date, due_date, vat_rate,
                subtotal, tax_amount, total, amount_paid, notes, created_utc
            "#,
        )
        .bind(invoice_id)
        .bind(input.client_id)
        .bind(input.status.as_str())
        .bind(input.issue_date)
        .bind(input.due_date)
        .bind(input.vat_rate)
        .bind(totals.subtotal)
        .bind(totals.tax_amount)
        .bind(totals.total)
        .bind(&input.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create invoice: {}", e)))?;

        let items = Self::insert_line_items(&mut tx, invoice_id, &input.items).await?;

        tx.commit().await?;

        info!(invoice_id = %invoice.invoice_id, total = invoice.total, "Invoice created");

        Ok((invoice, items))
    }

    async fn insert_line_items(
        tx: &mut Transaction<'_, Postgres>,
        invoice_id: Uuid,
        items: &[NewLineItem],
    ) -> Result<Vec<LineItem>, AppError> {
        let mut inserted = Vec::with_capacity(items.len());
        for (sort_order, item) in items.iter().enumerate() {
            let line_item = sqlx::query_as::<_, LineItem>(
                r#"
                INSERT INTO line_items (
                    line_item_id, invoice_id, description, quantity, unit_price, line_total, sort_order
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING line_item_id, invoice_id, description, quantity, unit_price, line_total,
                    sort_order, created_utc
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(invoice_id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.line_total())
            .bind(sort_order as i32)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to insert line item: {}", e))
            })?;
            inserted.push(line_item);
        }
        Ok(inserted)
    }

    /// Get an invoice by ID.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, client_id, status, issue_date, due_date, vat_rate,
                subtotal, tax_amount, total, amount_paid, notes, created_utc
            FROM invoices
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        Ok(invoice)
    }

    /// Get line items for an invoice.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_line_items(&self, invoice_id: Uuid) -> Result<Vec<LineItem>, AppError> {
        let line_items = sqlx::query_as::<_, LineItem>(
            r#"
            SELECT line_item_id, invoice_id, description, quantity, unit_price, line_total,
                sort_order, created_utc
            FROM line_items
            WHERE invoice_id = $1
            ORDER BY sort_order, created_utc
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get line items: {}", e)))?;

        Ok(line_items)
    }

    /// Get every payment recorded against an invoice, oldest first. Unpaged;
    /// the single-invoice view must show the complete ledger.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice_payments(&self, invoice_id: Uuid) -> Result<Vec<Payment>, AppError> {
        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, invoice_id, amount, method, payment_date, reference, notes, created_utc
            FROM payments
            WHERE invoice_id = $1
            ORDER BY created_utc, payment_id
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice payments: {}", e))
        })?;

        Ok(payments)
    }

    /// List invoices with optional filters and keyset pagination.
    ///
    /// `overdue` is never stored, so filtering on it matches its read-time
    /// definition instead: sent, past due, money outstanding.
    #[instrument(skip(self, filter))]
    pub async fn list_invoices(
        &self,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let limit = filter.page_size.clamp(1, 100) as i64;
        let status_str = filter.status.map(|s| s.as_str().to_string());
        let today = chrono::Utc::now().date_naive();

        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, client_id, status, issue_date, due_date, vat_rate,
                subtotal, tax_amount, total, amount_paid, notes, created_utc
            FROM invoices
            WHERE ($1::varchar IS NULL
                   OR (status = $1 AND $1 <> 'overdue')
                   OR ($1 = 'overdue' AND status = 'sent' AND due_date < $6 AND amount_paid < total))
              AND ($2::uuid IS NULL OR client_id = $2)
              AND ($3::date IS NULL OR issue_date >= $3)
              AND ($4::date IS NULL OR issue_date <= $4)
              AND ($5::uuid IS NULL OR invoice_id > $5)
            ORDER BY invoice_id
            LIMIT $7
            "#,
        )
        .bind(&status_str)
        .bind(filter.client_id)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(filter.page_token)
        .bind(today)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        Ok(invoices)
    }

    /// Update a draft invoice. Replacing `items` or changing `vat_rate`
    /// recomputes the stored totals in the same transaction; the stored
    /// values are never carried across an item mutation.
    #[instrument(skip(self, input), fields(invoice_id = %invoice_id))]
    pub async fn update_invoice(
        &self,
        invoice_id: Uuid,
        input: &UpdateInvoice,
    ) -> Result<Option<(Invoice, Vec<LineItem>)>, AppError> {
        let mut tx = self.pool.begin().await?;

        let existing = Self::lock_invoice(&mut tx, invoice_id).await?;
        let existing = match existing {
            Some(inv) if inv.lifecycle() == InvoiceStatus::Draft => inv,
            Some(_) => {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Only draft invoices can be updated"
                )))
            }
            None => return Ok(None),
        };

        let issue_date = input.issue_date.unwrap_or(existing.issue_date);
        let due_date = input.due_date.unwrap_or(existing.due_date);
        if due_date < issue_date {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "due_date must not precede issue_date"
            )));
        }

        let vat_rate = input.vat_rate.unwrap_or(existing.vat_rate);

        let items = match &input.items {
            Some(items) => {
                sqlx::query("DELETE FROM line_items WHERE invoice_id = $1")
                    .bind(invoice_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        AppError::DatabaseError(anyhow::anyhow!(
                            "Failed to replace line items: {}",
                            e
                        ))
                    })?;
                Self::insert_line_items(&mut tx, invoice_id, items).await?
            }
            None => {
                sqlx::query_as::<_, LineItem>(
                    r#"
                    SELECT line_item_id, invoice_id, description, quantity, unit_price, line_total,
                        sort_order, created_utc
                    FROM line_items
                    WHERE invoice_id = $1
                    ORDER BY sort_order, created_utc
                    "#,
                )
                .bind(invoice_id)
                .fetch_all(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to get line items: {}", e))
                })?
            }
        };

        let totals = money::compute_totals(items.iter().map(LineItem::line_total), vat_rate);

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET issue_date = $2,
                due_date = $3,
                vat_rate = $4,
                subtotal = $5,
                tax_amount = $6,
                total = $7,
                notes = COALESCE($8, notes)
            WHERE invoice_id = $1
            RETURNING invoice_id, client_id, status, issue_date, due_date, vat_rate,
                subtotal, tax_amount, total, amount_paid, notes, created_utc
            "#,
        )
        .bind(invoice_id)
        .bind(issue_date)
        .bind(due_date)
        .bind(vat_rate)
        .bind(totals.subtotal)
        .bind(totals.tax_amount)
        .bind(totals.total)
        .bind(&input.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice: {}", e)))?;

        tx.commit().await?;

        info!(invoice_id = %invoice.invoice_id, total = invoice.total, "Invoice updated");

        Ok(Some((invoice, items)))
    }

    /// Delete an invoice. Rejected while payments still reference it.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn delete_invoice(&self, invoice_id: Uuid) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let invoice = Self::lock_invoice(&mut tx, invoice_id).await?;
        if invoice.is_none() {
            return Ok(false);
        }

        let payment_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE invoice_id = $1")
                .bind(invoice_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to count payments: {}", e))
                })?;
        if payment_count > 0 {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Cannot delete invoice with {} recorded payment(s)",
                payment_count
            )));
        }

        sqlx::query("DELETE FROM invoices WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete invoice: {}", e))
            })?;

        tx.commit().await?;

        info!(invoice_id = %invoice_id, "Invoice deleted");

        Ok(true)
    }

    /// Settle an invoice in full: synthesize a payment for the outstanding
    /// balance and mark the invoice paid.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn mark_invoice_paid(
        &self,
        invoice_id: Uuid,
        method: PaymentMethod,
        payment_date: NaiveDate,
        reference: Option<String>,
        notes: Option<String>,
    ) -> Result<Option<(Payment, Invoice)>, AppError> {
        let mut tx = self.pool.begin().await?;

        let invoice = match Self::lock_invoice(&mut tx, invoice_id).await? {
            Some(inv) => inv,
            None => return Ok(None),
        };

        let paid = Self::total_paid(&mut tx, invoice_id, None).await?;
        let outstanding = invoice.total - paid;
        if outstanding <= 0 {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice has no outstanding balance"
            )));
        }

        let payment = Self::insert_payment(
            &mut tx,
            &CreatePayment {
                invoice_id,
                amount: outstanding,
                method,
                payment_date,
                reference,
                notes,
            },
        )
        .await?;

        let invoice = Self::settle_invoice(&mut tx, &invoice).await?;

        tx.commit().await?;

        info!(
            invoice_id = %invoice_id,
            amount = payment.amount,
            "Invoice marked paid"
        );

        Ok(Some((payment, invoice)))
    }

    // -------------------------------------------------------------------------
    // Payment Ledger Operations
    // -------------------------------------------------------------------------

    /// Record a payment against an invoice.
    ///
    /// Fails without side effects when the amount would push the paid total
    /// above the invoice total.
    #[instrument(skip(self, input), fields(invoice_id = %input.invoice_id))]
    pub async fn create_payment(
        &self,
        input: &CreatePayment,
    ) -> Result<(Payment, Invoice), AppError> {
        let mut tx = self.pool.begin().await?;

        let invoice = Self::lock_invoice(&mut tx, input.invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        let paid = Self::total_paid(&mut tx, input.invoice_id, None).await?;
        if input.amount + paid > invoice.total {
            return Err(AppError::InsufficientBalance(
                INSUFFICIENT_BALANCE_MSG.to_string(),
            ));
        }

        let payment = Self::insert_payment(&mut tx, input).await?;
        let invoice = Self::settle_invoice(&mut tx, &invoice).await?;

        tx.commit().await?;

        info!(
            payment_id = %payment.payment_id,
            invoice_id = %invoice.invoice_id,
            amount = payment.amount,
            status = %invoice.status,
            "Payment recorded"
        );

        Ok((payment, invoice))
    }

    /// Get a payment by ID.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, AppError> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, invoice_id, amount, method, payment_date, reference, notes, created_utc
            FROM payments
            WHERE payment_id = $1
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get payment: {}", e)))?;

        Ok(payment)
    }

    /// List payments with optional filters and keyset pagination.
    #[instrument(skip(self, filter))]
    pub async fn list_payments(
        &self,
        filter: &ListPaymentsFilter,
    ) -> Result<Vec<Payment>, AppError> {
        let limit = filter.page_size.clamp(1, 100) as i64;
        let method_str = filter.method.map(|m| m.as_str().to_string());

        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, invoice_id, amount, method, payment_date, reference, notes, created_utc
            FROM payments
            WHERE ($1::uuid IS NULL OR invoice_id = $1)
              AND ($2::varchar IS NULL OR method = $2)
              AND ($3::date IS NULL OR payment_date >= $3)
              AND ($4::date IS NULL OR payment_date <= $4)
              AND ($5::uuid IS NULL OR payment_id > $5)
            ORDER BY payment_id
            LIMIT $6
            "#,
        )
        .bind(filter.invoice_id)
        .bind(&method_str)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(filter.page_token)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list payments: {}", e)))?;

        Ok(payments)
    }

    /// Update a payment and re-derive the status of every invoice involved.
    ///
    /// The balance invariant is re-validated against the target invoice with
    /// the payment's own previous amount excluded from the paid total.
    #[instrument(skip(self, input), fields(payment_id = %payment_id))]
    pub async fn update_payment(
        &self,
        payment_id: Uuid,
        input: &UpdatePayment,
    ) -> Result<Option<(Payment, Invoice)>, AppError> {
        let mut tx = self.pool.begin().await?;

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, invoice_id, amount, method, payment_date, reference, notes, created_utc
            FROM payments
            WHERE payment_id = $1
            FOR UPDATE
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get payment: {}", e)))?;
        let payment = match payment {
            Some(p) => p,
            None => return Ok(None),
        };

        let source_invoice_id = payment.invoice_id;
        let target_invoice_id = input.invoice_id.unwrap_or(source_invoice_id);

        // Lock in a stable order so two movers cannot deadlock.
        let mut lock_order = [source_invoice_id, target_invoice_id];
        lock_order.sort();
        let mut source_invoice = None;
        let mut target_invoice = None;
        for id in lock_order {
            if (id == source_invoice_id && source_invoice.is_some())
                || (id == target_invoice_id && target_invoice.is_some())
            {
                continue;
            }
            let locked = Self::lock_invoice(&mut tx, id).await?;
            if id == source_invoice_id {
                source_invoice = locked.clone();
            }
            if id == target_invoice_id {
                target_invoice = locked;
            }
        }

        let target_invoice = target_invoice
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Target invoice not found")))?;

        let amount = input.amount.unwrap_or(payment.amount);
        let paid_others = Self::total_paid(&mut tx, target_invoice_id, Some(payment_id)).await?;
        if amount + paid_others > target_invoice.total {
            return Err(AppError::InsufficientBalance(
                INSUFFICIENT_BALANCE_MSG.to_string(),
            ));
        }

        let method_str = input.method.map(|m| m.as_str().to_string());
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET invoice_id = $2,
                amount = $3,
                method = COALESCE($4, method),
                payment_date = COALESCE($5, payment_date),
                reference = COALESCE($6, reference),
                notes = COALESCE($7, notes)
            WHERE payment_id = $1
            RETURNING payment_id, invoice_id, amount, method, payment_date, reference, notes, created_utc
            "#,
        )
        .bind(payment_id)
        .bind(target_invoice_id)
        .bind(amount)
        .bind(&method_str)
        .bind(input.payment_date)
        .bind(&input.reference)
        .bind(&input.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update payment: {}", e)))?;

        if target_invoice_id != source_invoice_id {
            if let Some(ref source) = source_invoice {
                Self::settle_invoice(&mut tx, source).await?;
            }
        }
        let invoice = Self::settle_invoice(&mut tx, &target_invoice).await?;

        tx.commit().await?;

        info!(
            payment_id = %payment.payment_id,
            invoice_id = %invoice.invoice_id,
            status = %invoice.status,
            "Payment updated"
        );

        Ok(Some((payment, invoice)))
    }

    /// Delete a payment and re-derive the owning invoice's status.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn delete_payment(&self, payment_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let mut tx = self.pool.begin().await?;

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, invoice_id, amount, method, payment_date, reference, notes, created_utc
            FROM payments
            WHERE payment_id = $1
            FOR UPDATE
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get payment: {}", e)))?;
        let payment = match payment {
            Some(p) => p,
            None => return Ok(None),
        };

        let invoice = Self::lock_invoice(&mut tx, payment.invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        sqlx::query("DELETE FROM payments WHERE payment_id = $1")
            .bind(payment_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete payment: {}", e))
            })?;

        let invoice = Self::settle_invoice(&mut tx, &invoice).await?;

        tx.commit().await?;

        info!(
            payment_id = %payment_id,
            invoice_id = %invoice.invoice_id,
            status = %invoice.status,
            "Payment deleted"
        );

        Ok(Some(invoice))
    }

    // -------------------------------------------------------------------------
    // Reconciliation helpers
    // -------------------------------------------------------------------------

    /// Fetch an invoice row under `FOR UPDATE`, pinning it for the remainder
    /// of the transaction.
    async fn lock_invoice(
        tx: &mut Transaction<'_, Postgres>,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, client_id, status, issue_date, due_date, vat_rate,
                subtotal, tax_amount, total, amount_paid, notes, created_utc
            FROM invoices
            WHERE invoice_id = $1
            FOR UPDATE
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock invoice: {}", e)))?;

        Ok(invoice)
    }

    /// Sum the payments currently linked to an invoice, optionally excluding
    /// one payment (used when re-validating an update against its own row).
    async fn total_paid(
        tx: &mut Transaction<'_, Postgres>,
        invoice_id: Uuid,
        exclude_payment_id: Option<Uuid>,
    ) -> Result<i64, AppError> {
        // SUM(bigint) yields numeric; cast back before decoding.
        let paid: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount), 0)::bigint
            FROM payments
            WHERE invoice_id = $1
              AND ($2::uuid IS NULL OR payment_id <> $2)
            "#,
        )
        .bind(invoice_id)
        .bind(exclude_payment_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to sum payments: {}", e)))?;

        Ok(paid)
    }

    async fn insert_payment(
        tx: &mut Transaction<'_, Postgres>,
        input: &CreatePayment,
    ) -> Result<Payment, AppError> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (payment_id, invoice_id, amount, method, payment_date, reference, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING payment_id, invoice_id, amount, method, payment_date, reference, notes, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.invoice_id)
        .bind(input.amount)
        .bind(input.method.as_str())
        .bind(input.payment_date)
        .bind(&input.reference)
        .bind(&input.notes)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to insert payment: {}", e)))?;

        Ok(payment)
    }

    /// Recompute an invoice's paid total from the payment ledger and persist
    /// the derived status. The caller must already hold the row lock.
    async fn settle_invoice(
        tx: &mut Transaction<'_, Postgres>,
        invoice: &Invoice,
    ) -> Result<Invoice, AppError> {
        let paid = Self::total_paid(tx, invoice.invoice_id, None).await?;
        let status = InvoiceStatus::derive(paid, invoice.total, invoice.lifecycle());

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET amount_paid = $2,
                status = $3
            WHERE invoice_id = $1
            RETURNING invoice_id, client_id, status, issue_date, due_date, vat_rate,
                subtotal, tax_amount, total, amount_paid, notes, created_utc
            "#,
        )
        .bind(invoice.invoice_id)
        .bind(paid)
        .bind(status.as_str())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to settle invoice: {}", e)))?;

        Ok(invoice)
    }
}
