use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::HeaderMap,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use relay_rs::config::Config;
use relay_rs::pipeline::{Engine, Services};
use relay_rs::store::PgStore;
use relay_rs::{relay_info, socket};

#[derive(Clone)]
struct AppState {
    services: Services,
    engine: Arc<Engine>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let _ = dotenvy::dotenv();

    let config = Config::from_env().expect("invalid configuration");
    let bind_addr = config.bind_addr;

    let pool = PgPoolOptions::new()
        .max_connections(50)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    let store = PgStore::new(pool);
    store
        .run_migrations()
        .await
        .expect("failed to run schema migrations");

    let (tx, _rx) = broadcast::channel(100);

    let services = Services {
        store: Arc::new(store),
        config: Arc::new(config),
        broadcast: tx,
    };

    let state = AppState {
        services,
        engine: Arc::new(Engine::new(Engine::default_stages())),
    };

    let app = Router::new()
        .route("/", get(handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("listening on {bind_addr}");
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .expect("failed to bind listener");
    axum::serve(listener, app).await.expect("server error");
}

async fn handler(
    ws: Option<WebSocketUpgrade>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    if let Some(ws) = ws {
        return ws
            .on_upgrade(move |socket| {
                let services = state.services.clone();
                let engine = state.engine.clone();
                async move { socket::handle_socket(socket, services, &engine).await }
            })
            .into_response();
    }

    if headers
        .get("accept")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("application/nostr+json"))
        .unwrap_or(false)
    {
        return Json(relay_info::document(&state.services.config)).into_response();
    }

    "Welcome to the relay".into_response()
}
