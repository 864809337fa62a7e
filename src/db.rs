use crate::error::AppError;
use deadpool_postgres::{Config as PoolConfig, Pool, PoolConfig as PoolSizing, Runtime};
use tokio_postgres::NoTls;

const INIT_SCHEMA: &str = include_str!("../migrations/0001_init.sql");

pub async fn init_pool(database_url: &str, max_size: usize) -> Result<Pool, AppError> {
    let mut cfg = PoolConfig::new();
    cfg.url = Some(database_url.to_string());
    cfg.pool = Some(PoolSizing::new(max_size));

    let pool = cfg
        .create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| AppError::StartServer(format!("db pool: {e}")))?;

    run_migrations(&pool).await?;
    tracing::info!(max_connections = max_size, "database pool ready");
    Ok(pool)
}

/// Apply the schema; every statement is idempotent
pub async fn run_migrations(pool: &Pool) -> Result<(), AppError> {
    let client = pool.get().await?;
    client
        .batch_execute(INIT_SCHEMA)
        .await
        .map_err(|e| AppError::StartServer(format!("migrations: {e}")))?;
    Ok(())
}
