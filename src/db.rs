use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::Config;

/// Type alias for the PostgreSQL connection pool
pub type DbPool = PgPool;

/// Creates and configures a PostgreSQL connection pool
///
/// # Arguments
/// * `config` - Connection string and pool limits
///
/// # Returns
/// * `Result<DbPool>` - Configured connection pool or error
pub async fn create_pool(config: &Config) -> Result<DbPool, sqlx::Error> {
    tracing::debug!(
        "Creating database connection pool (max {} connections)",
        config.database_max_connections
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(config.database_acquire_timeout)
        .connect(&config.database_url)
        .await?;

    tracing::info!("Database connection pool created successfully");
    Ok(pool)
}

/// Apply the SQL migrations under `migrations/`
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Migrations completed successfully");
    Ok(())
}
