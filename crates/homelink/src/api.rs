use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::devices::DeviceKey;
use crate::devices::DeviceState;
use crate::devices::SensorReadings;
use crate::event_log::LogEntry;
use crate::session::BrokerRole;
use crate::session::PublishOutcome;
use crate::session::SessionError;
use crate::session::SessionHandle;
use crate::session::SessionState;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
    client_id: String,
}

/// Response for the /v1/state endpoint
#[derive(Serialize)]
struct StateResponse {
    state: SessionState,
    broker: Option<BrokerRole>,
    devices: BTreeMap<DeviceKey, DeviceState>,
    sensors: SensorReadings,
}

/// Response for the session endpoints
#[derive(Serialize)]
struct SessionResponse {
    state: SessionState,
}

#[derive(Deserialize)]
struct CommandRequest {
    payload: String,
}

#[derive(Serialize)]
struct CommandResponse {
    outcome: PublishOutcome,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Session errors mapped onto HTTP statuses
struct ApiError(SessionError);

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SessionError::UnknownDevice(_) => StatusCode::NOT_FOUND,
            SessionError::InvalidCommand { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            SessionError::NotConnected => StatusCode::CONFLICT,
            SessionError::Publish(_) => StatusCode::BAD_GATEWAY,
            SessionError::ControllerGone => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = ErrorResponse {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    session: SessionHandle,
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
            client_id: state.session.snapshot().client_id.clone(),
        }),
    )
}

/// Handler for GET /v1/state
#[tracing::instrument(skip(state))]
async fn session_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.session.snapshot();
    Json(StateResponse {
        state: snapshot.state,
        broker: snapshot.broker,
        devices: snapshot.devices.clone(),
        sensors: snapshot.sensors.clone(),
    })
}

/// Handler for GET /v1/log
#[tracing::instrument(skip(state))]
async fn event_log(State(state): State<Arc<AppState>>) -> Json<Vec<LogEntry>> {
    Json(state.session.snapshot().log.clone())
}

/// Handler for POST /v1/session/connect
#[tracing::instrument(skip(state))]
async fn connect(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionResponse>, ApiError> {
    let state = state.session.connect().await?;
    Ok(Json(SessionResponse { state }))
}

/// Handler for POST /v1/session/disconnect
#[tracing::instrument(skip(state))]
async fn disconnect(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionResponse>, ApiError> {
    state.session.disconnect().await?;
    Ok(Json(SessionResponse {
        state: SessionState::Disconnected,
    }))
}

/// Handler for POST /v1/devices/:key/command
#[tracing::instrument(skip(state, request))]
async fn device_command(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(request): Json<CommandRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    tracing::debug!("Command {} for {}", request.payload, key);
    let outcome = state.session.send_command(&key, request.payload).await?;
    Ok(Json(CommandResponse { outcome }))
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/state", get(session_state))
        .route("/v1/log", get(event_log))
        .route("/v1/session/connect", post(connect))
        .route("/v1/session/disconnect", post(disconnect))
        .route("/v1/devices/:key/command", post(device_command))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// This function will bind to the specified address and serve the API endpoints.
/// It will run until the provided shutdown signal is triggered.
///
/// # Arguments
/// * `listen` - The IP address to listen on (e.g., "127.0.0.1")
/// * `port` - The port to listen on (e.g., 8565)
/// * `session` - Handle to the running session controller
/// * `shutdown_rx` - A oneshot receiver that will trigger graceful shutdown
///
/// # Returns
/// Returns Ok(()) if the server shuts down gracefully, or an error if startup fails
pub async fn serve(
    listen: String,
    port: u16,
    session: SessionHandle,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error>> {
    let version = env!("CARGO_PKG_VERSION");

    let state = Arc::new(AppState { version, session });
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::config::DebounceConfig;
    use crate::config::MqttConfig;
    use crate::session::MockTransport;
    use crate::session::SessionController;

    fn router() -> Router {
        let (session, _task) = SessionController::new(
            MockTransport::new(),
            &MqttConfig::default(),
            &DebounceConfig::default(),
        )
        .spawn();
        create_router(Arc::new(AppState {
            version: "test",
            session,
        }))
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<&str>,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_ping() {
        let app = router();
        let (status, json) = send(&app, "GET", "/v1/ping", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_info_reports_client_id() {
        let app = router();
        let (status, json) = send(&app, "GET", "/v1/info", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["version"], "test");
        assert!(json["client_id"].as_str().unwrap().starts_with("dashboard_"));
    }

    #[tokio::test]
    async fn test_command_requires_connection() {
        let app = router();
        let (status, json) = send(
            &app,
            "POST",
            "/v1/devices/living_room_light/command",
            Some(r#"{"payload":"ON"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"], "not connected to an MQTT broker");
    }

    #[tokio::test]
    async fn test_connect_and_command() {
        let app = router();
        let (status, json) = send(&app, "POST", "/v1/session/connect", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["state"], "connected");

        let body = Some(r#"{"payload":"ABRIR"}"#);
        let (status, json) = send(&app, "POST", "/v1/devices/curtain/command", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["outcome"], "sent");

        let (status, json) = send(&app, "POST", "/v1/devices/curtain/command", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["outcome"], "debounced");

        let (_, log) = send(&app, "GET", "/v1/log", None).await;
        assert_eq!(log[0]["message"], "Command debounced: casa/quarto/cortina: ABRIR");
        assert_eq!(log[1]["category"], "sent");
    }

    #[tokio::test]
    async fn test_command_errors() {
        let app = router();
        send(&app, "POST", "/v1/session/connect", None).await;

        let (status, _) = send(
            &app,
            "POST",
            "/v1/devices/garage/command",
            Some(r#"{"payload":"ON"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            "POST",
            "/v1/devices/smart_plug/command",
            Some(r#"{"payload":"FECHAR"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_state_and_disconnect() {
        let app = router();
        let (status, json) = send(&app, "GET", "/v1/state", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["state"], "disconnected");
        assert_eq!(json["devices"]["social_gate"], "FECHADO");
        assert_eq!(json["sensors"]["temperature"], 0.0);

        let (status, _) = send(&app, "POST", "/v1/session/disconnect", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        send(&app, "POST", "/v1/session/connect", None).await;
        let (status, json) = send(&app, "POST", "/v1/session/disconnect", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["state"], "disconnected");
    }
}
