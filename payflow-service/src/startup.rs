//! Application startup and lifecycle management.

use axum::{
    Router,
    middleware::from_fn,
    routing::{get, patch, post},
};
use payflow_core::error::AppError;
use payflow_core::middleware::tracing::request_id_middleware;
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::handlers;
use crate::services::Database;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Config,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: Config) -> Result<Self, AppError> {
        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await?;

        db.run_migrations().await?;

        let state = AppState {
            db,
            config: config.clone(),
        };

        let router = Router::new()
            .route("/health", get(handlers::health_check))
            .route(
                "/clients",
                post(handlers::clients::create_client).get(handlers::clients::list_clients),
            )
            .route(
                "/clients/:id",
                get(handlers::clients::get_client)
                    .put(handlers::clients::update_client)
                    .delete(handlers::clients::delete_client),
            )
            .route(
                "/invoices",
                post(handlers::invoices::create_invoice).get(handlers::invoices::list_invoices),
            )
            .route(
                "/invoices/:id",
                get(handlers::invoices::get_invoice)
                    .put(handlers::invoices::update_invoice)
                    .delete(handlers::invoices::delete_invoice),
            )
            .route("/invoices/:id/mark-paid", patch(handlers::invoices::mark_paid))
            .route(
                "/payments",
                post(handlers::payments::create_payment).get(handlers::payments::list_payments),
            )
            .route(
                "/payments/:id",
                get(handlers::payments::get_payment)
                    .put(handlers::payments::update_payment)
                    .delete(handlers::payments::delete_payment),
            )
            .layer(from_fn(request_id_middleware))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                        version = ?request.version(),
                    )
                }),
            )
            .layer(CorsLayer::permissive())
            .with_state(state);

        // Port 0 binds a random free port, used by the test harness.
        let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("payflow-service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(self.listener, self.router).await
    }
}
