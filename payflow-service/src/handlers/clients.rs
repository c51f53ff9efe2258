//! Client handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use payflow_core::error::AppError;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    AppState,
    dtos::{ClientListResponse, ClientResponse, CreateClientRequest, UpdateClientRequest},
    handlers::{default_page_size, next_page_token},
    models::{CreateClient, UpdateClient},
};

pub async fn create_client(
    State(state): State<AppState>,
    Json(payload): Json<CreateClientRequest>,
) -> Result<(StatusCode, Json<ClientResponse>), AppError> {
    payload.validate()?;

    let input = CreateClient {
        name: payload.name,
        email: payload.email,
        company: payload.company,
        phone: payload.phone,
        notes: payload.notes,
    };

    let client = state.db.create_client(&input).await?;

    Ok((StatusCode::CREATED, Json(ClientResponse::from(client))))
}

pub async fn get_client(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
) -> Result<Json<ClientResponse>, AppError> {
    let client = state
        .db
        .get_client(client_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Client not found")))?;

    Ok(Json(ClientResponse::from(client)))
}

#[derive(Debug, Deserialize)]
pub struct ListClientsQuery {
    pub page_size: Option<i32>,
    pub page_token: Option<Uuid>,
}

pub async fn list_clients(
    State(state): State<AppState>,
    Query(query): Query<ListClientsQuery>,
) -> Result<Json<ClientListResponse>, AppError> {
    let clients = state
        .db
        .list_clients(default_page_size(query.page_size), query.page_token)
        .await?;

    let next_page_token = next_page_token(&clients, query.page_size, |c| c.client_id);

    Ok(Json(ClientListResponse {
        clients: clients.into_iter().map(ClientResponse::from).collect(),
        next_page_token,
    }))
}

pub async fn update_client(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
    Json(payload): Json<UpdateClientRequest>,
) -> Result<Json<ClientResponse>, AppError> {
    payload.validate()?;

    let input = UpdateClient {
        name: payload.name,
        email: payload.email,
        company: payload.company,
        phone: payload.phone,
        notes: payload.notes,
    };

    let client = state
        .db
        .update_client(client_id, &input)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Client not found")))?;

    Ok(Json(ClientResponse::from(client)))
}

pub async fn delete_client(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let deleted = state.db.delete_client(client_id).await?;
    if !deleted {
        return Err(AppError::NotFound(anyhow::anyhow!("Client not found")));
    }

    Ok(StatusCode::NO_CONTENT)
}
