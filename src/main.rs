use actix_web::{web, App, HttpServer};
use direct_chat_service::{config, db, error, logging, routes, state::AppState};
use std::sync::Arc;

#[actix_web::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let state = match &cfg.database_url {
        Some(url) => {
            let pool = db::init_pool(url, cfg.database_max_connections).await?;
            AppState::with_pool(cfg.clone(), pool)?
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store (data is lost on restart)");
            AppState::in_memory(cfg.clone())?
        }
    };

    // Accounts left online by an unclean shutdown have no live connection
    let stale = state
        .stores
        .accounts
        .reset_presence(chrono::Utc::now())
        .await?;
    if stale > 0 {
        tracing::info!(accounts = stale, "reset stale online flags");
    }

    let sweep = state.spawn_pending_sweep();

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting direct-chat-service");

    let http_state = state.clone();
    let origins = cfg.cors_allowed_origins.clone();
    let server = HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);
        let cors = if origins.is_empty() {
            cors.allow_any_origin()
        } else {
            origins
                .iter()
                .fold(cors, |cors, origin| cors.allowed_origin(origin))
        };

        App::new()
            .wrap(cors)
            .app_data(web::Data::new(http_state.clone()))
            .service(routes::wsroute::ws_handler)
            .service(routes::health)
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind {bind_addr}: {e}")))?
    .run();

    let result = server
        .await
        .map_err(|e| error::AppError::StartServer(format!("run server: {e}")));

    tracing::info!("shutting down");
    sweep.abort();
    state.shutdown().await;
    result
}
