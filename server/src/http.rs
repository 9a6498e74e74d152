use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use callmesh::config::{IceServerConfig, ServerConfig};
use tower_http::{
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
};
use ulid::Ulid;

/// What the HTTP handlers need
#[derive(Clone)]
pub struct AppState {
    ice_servers: Arc<Vec<IceServerConfig>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewRoom {
    room_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AppConfig<'a> {
    ice_servers: &'a [IceServerConfig],
}

/// Build the HTTP surface: room creation, room pages, runtime config and
/// static assets from the public directory
pub fn router(public_dir: PathBuf, cors_origins: &[String], ice_servers: Vec<IceServerConfig>) -> Router {
    let state = AppState {
        ice_servers: Arc::new(ice_servers),
    };

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/new", get(new_room))
        .route("/app-config.js", get(app_config))
        .route_service("/room/:room_id", ServeFile::new(public_dir.join("room.html")))
        .fallback_service(ServeDir::new(public_dir))
        .with_state(state);

    if cors_origins.is_empty() {
        return router;
    }

    let origins: Vec<HeaderValue> = cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(origin) => Some(origin),
            Err(_) => {
                warn!("Ignoring invalid CORS origin `{origin}`");
                None
            }
        })
        .collect();
    router.layer(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST])
            .allow_credentials(true),
    )
}

/// Serve HTTP on the configured address
pub async fn launch(config: &ServerConfig, ice_servers: Vec<IceServerConfig>) -> Result<()> {
    let app = router(config.public_dir.clone(), &config.cors_origins, ice_servers);
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!("HTTP listening on {}", listener.local_addr()?);
    if !config.cors_origins.is_empty() {
        info!("CORS allowlist: {}", config.cors_origins.join(", "));
    }

    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn new_room() -> impl IntoResponse {
    Json(NewRoom {
        room_id: Ulid::new().to_string(),
    })
}

async fn app_config(State(state): State<AppState>) -> impl IntoResponse {
    let config = AppConfig {
        ice_servers: &state.ice_servers,
    };
    let body = match serde_json::to_string(&config) {
        Ok(json) => format!("window.APP_CONFIG = {json};"),
        Err(e) => {
            error!("Unable to encode app config: {e}");
            "window.APP_CONFIG = {};".to_owned()
        }
    };

    (
        [
            (header::CONTENT_TYPE, "application/javascript; charset=utf-8"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        body,
    )
}
