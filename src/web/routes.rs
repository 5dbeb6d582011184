//! Web routes and handlers

use super::pages;
use crate::controller::{NetworkInfo, ServiceError, ServiceState, StatusSnapshot, WifiService};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    Form, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Landing page
pub async fn index(State(service): State<Arc<WifiService>>) -> Response {
    let device_name = &service.config().device_name;
    match service.current_state() {
        ServiceState::Connected | ServiceState::Initializing => Redirect::to("/status").into_response(),
        ServiceState::HotspotMode => {
            // Cached results only, a full scan would drop the client
            let networks = service.lightweight_networks().await;
            Html(pages::render_portal_page(
                device_name,
                ServiceState::HotspotMode,
                &networks,
                None,
            ))
            .into_response()
        }
        state => Html(pages::render_portal_page(
            device_name,
            state,
            &[],
            Some("Service initializing..."),
        ))
        .into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfirmQuery {
    #[serde(default)]
    ssid: String,
    #[serde(default)]
    encrypted: String,
}

pub async fn confirm(
    State(service): State<Arc<WifiService>>,
    Query(query): Query<ConfirmQuery>,
) -> Response {
    if query.ssid.is_empty() {
        return Redirect::to("/").into_response();
    }
    let encrypted = matches!(query.encrypted.as_str(), "encrypted" | "true");
    Html(pages::render_confirm_page(
        &service.config().device_name,
        &query.ssid,
        encrypted,
    ))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    #[serde(default)]
    ssid: String,
    #[serde(default)]
    password: String,
}

/// Form submission from the portal pages
pub async fn connect_form(
    State(service): State<Arc<WifiService>>,
    Form(req): Form<ConnectRequest>,
) -> Redirect {
    tracing::info!(ssid = %req.ssid, has_password = !req.password.is_empty(), "Connection request received");
    match service.request_connect(&req.ssid, &req.password) {
        Ok(()) => Redirect::to("/status"),
        Err(e) => {
            tracing::warn!(error = %e, "Rejected connection request");
            Redirect::to("/")
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// API: Connect to network
pub async fn api_connect(
    State(service): State<Arc<WifiService>>,
    Json(req): Json<ConnectRequest>,
) -> Response {
    tracing::info!(ssid = %req.ssid, has_password = !req.password.is_empty(), "Connection request received");
    match service.request_connect(&req.ssid, &req.password) {
        Ok(()) => Json(ApiResponse {
            success: true,
            message: Some("Connection started".to_string()),
            error: None,
        })
        .into_response(),
        Err(ServiceError::EmptySsid) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse {
                success: false,
                message: None,
                error: Some("No SSID provided".to_string()),
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse {
                success: false,
                message: None,
                error: Some(e.to_string()),
            }),
        )
            .into_response(),
    }
}

pub async fn status_page(State(service): State<Arc<WifiService>>) -> Html<String> {
    let status = service.status().await;
    Html(pages::render_status_page(&service.config().device_name, &status))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    success: bool,
    #[serde(flatten)]
    status: StatusSnapshot,
}

/// API: Get current status
pub async fn api_status(State(service): State<Arc<WifiService>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        success: true,
        status: service.status().await,
    })
}

#[derive(Debug, Serialize)]
pub struct NetworksResponse {
    success: bool,
    networks: Vec<NetworkInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl NetworksResponse {
    fn new(networks: Vec<NetworkInfo>) -> Self {
        Self {
            success: true,
            networks,
            message: None,
        }
    }
}

/// API: Networks for the portal list, without disturbing the hotspot
pub async fn api_networks(State(service): State<Arc<WifiService>>) -> Json<NetworksResponse> {
    let response = match service.current_state() {
        ServiceState::Connecting => NetworksResponse {
            success: true,
            networks: Vec::new(),
            message: Some("Connection in progress".to_string()),
        },
        ServiceState::HotspotMode => NetworksResponse::new(service.lightweight_networks().await),
        _ => NetworksResponse::new(service.scan_networks().await),
    };
    Json(response)
}

/// API: Full rescan
pub async fn api_scan(State(service): State<Arc<WifiService>>) -> Json<NetworksResponse> {
    Json(NetworksResponse::new(service.scan_networks().await))
}

pub async fn change_network(State(service): State<Arc<WifiService>>) -> Html<String> {
    tracing::info!("Change network requested");
    service.request_change_network();

    let config = service.config();
    Html(pages::render_change_network_page(
        &config.device_name,
        service.timings().change_network_grace.as_secs(),
        &config.hotspot_ssid,
        &config.setup_url(),
    ))
}
