//! Setup portal served over the hotspot

mod assets;
mod pages;
mod routes;

use crate::controller::{ServiceState, WifiService};
use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};

pub fn router(service: Arc<WifiService>) -> Router {
    Router::new()
        .route("/", get(routes::index))
        .route("/confirm", get(routes::confirm))
        .route("/connect", post(routes::connect_form))
        .route("/status", get(routes::status_page))
        .route("/change-network", get(routes::change_network))
        // API endpoints
        .route("/api/status", get(routes::api_status))
        .route("/api/networks", get(routes::api_networks))
        .route("/api/scan", get(routes::api_scan))
        .route("/api/connect", post(routes::api_connect))
        // Captive portal detection endpoints
        .route("/generate_204", get(captive_check))
        .route("/hotspot-detect.html", get(captive_redirect))
        .route("/connecttest.txt", get(captive_redirect))
        .route("/ncsi.txt", get(captive_redirect))
        // Static assets
        .route("/style.css", get(assets::serve_css))
        // Fallback - redirect everything to portal
        .fallback(fallback_redirect)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(SetResponseHeaderLayer::overriding(
                    header::CACHE_CONTROL,
                    HeaderValue::from_static("no-cache, no-store, must-revalidate, max-age=0"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::PRAGMA,
                    HeaderValue::from_static("no-cache"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::EXPIRES,
                    HeaderValue::from_static("0"),
                )),
        )
        .with_state(service)
}

/// Run the web server
pub async fn run_server(service: Arc<WifiService>) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", service.config().port);
    let app = router(service);

    tracing::info!(addr = %addr, "Starting web portal");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Captive portal check - return 204 when connected, redirect when not
async fn captive_check(State(service): State<Arc<WifiService>>) -> Response {
    if service.current_state() == ServiceState::Connected {
        StatusCode::NO_CONTENT.into_response()
    } else {
        captive_redirect(State(service)).await
    }
}

/// Connectivity checks arrive for foreign hosts, so send them to the portal by address
async fn captive_redirect(State(service): State<Arc<WifiService>>) -> Response {
    (
        StatusCode::FOUND,
        [(header::LOCATION, format!("{}/", service.config().setup_url()))],
    )
        .into_response()
}

async fn fallback_redirect() -> Redirect {
    Redirect::to("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::service::testing::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Option<String>, String) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let location = response
            .headers()
            .get(header::LOCATION)
            .map(|v| v.to_str().unwrap().to_string());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, location, String::from_utf8(body.to_vec()).unwrap())
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn portal_lists_cached_networks_in_hotspot_mode() {
        let h = harness();
        h.service.enter_hotspot_mode().await.unwrap();

        let (status, _, body) = send(router(h.service.clone()), get_request("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("HomeNetwork"));
        assert!(h.radio.hotspot_active());
    }

    #[tokio::test]
    async fn index_redirects_to_status_when_connected() {
        let h = harness();
        h.radio.force_client("HomeNetwork");
        h.service.determine_initial_state().await;

        let (status, location, _) = send(router(h.service.clone()), get_request("/")).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(location.as_deref(), Some("/status"));
    }

    #[tokio::test]
    async fn api_connect_rejects_empty_ssid() {
        let h = harness();
        h.service.enter_hotspot_mode().await.unwrap();

        let (status, _, body) = send(
            router(h.service.clone()),
            json_post("/api/connect", r#"{"ssid":"","password":"x"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(h.service.current_state(), ServiceState::HotspotMode);
    }

    #[tokio::test]
    async fn form_connect_starts_worker_and_redirects() {
        let h = harness();
        h.service.enter_hotspot_mode().await.unwrap();

        let request = Request::builder()
            .method("POST")
            .uri("/connect")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("ssid=Home+Network&password=secret"))
            .unwrap();
        let (status, location, _) = send(router(h.service.clone()), request).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(location.as_deref(), Some("/status"));
        assert_eq!(h.service.target_ssid().as_deref(), Some("Home Network"));
        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn api_status_is_flat_json_with_success() {
        let h = harness();
        h.service.enter_hotspot_mode().await.unwrap();

        let (status, _, body) = send(router(h.service.clone()), get_request("/api/status")).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["current_state"], "hotspot_mode");
        assert_eq!(json["connected"], false);
    }

    #[tokio::test]
    async fn api_networks_is_empty_while_connecting() {
        let h = harness();
        h.radio.set_connect_delay(std::time::Duration::from_secs(5));
        h.service.request_connect("HomeNetwork", "secret").unwrap();

        let (_, _, body) = send(router(h.service.clone()), get_request("/api/networks")).await;
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["networks"].as_array().unwrap().len(), 0);
        assert_eq!(json["message"], "Connection in progress");
        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_paths_redirect_and_responses_are_uncached() {
        let h = harness();
        let response = router(h.service.clone())
            .oneshot(get_request("/some/random/path"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/");
        assert!(response.headers()[header::CACHE_CONTROL]
            .to_str()
            .unwrap()
            .contains("no-cache"));
    }

    #[tokio::test]
    async fn captive_check_redirects_to_setup_address() {
        let h = harness();
        h.service.enter_hotspot_mode().await.unwrap();

        let (status, location, _) =
            send(router(h.service.clone()), get_request("/generate_204")).await;
        assert_eq!(status, StatusCode::FOUND);
        assert_eq!(location.as_deref(), Some("http://192.168.4.1:8080/"));
    }

    #[tokio::test]
    async fn change_network_enters_transition() {
        let h = harness();
        h.radio.force_client("HomeNetwork");
        h.service.determine_initial_state().await;

        let (status, _, body) =
            send(router(h.service.clone()), get_request("/change-network")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("DistillerSetup"));
        assert_eq!(h.service.current_state(), ServiceState::Initializing);
        h.service.shutdown().await;
    }
}
