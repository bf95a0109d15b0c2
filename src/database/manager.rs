use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgPool, Postgres, Transaction};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::database::secrets::{DatabaseSecrets, EnvSecretStore, SecretStore};

/// Errors from DatabaseManager
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing secret: {0}")]
    SecretMissing(String),

    #[error("Invalid secret value: {0}")]
    InvalidSecret(String),

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Database unavailable after {attempts} attempts: {source}")]
    Unavailable {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error(transparent)]
    Filter(#[from] crate::filter::FilterError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Process-wide owner of the connection pool
pub struct DatabaseManager {
    pool: Arc<RwLock<Option<PgPool>>>,
}

impl DatabaseManager {
    fn instance() -> &'static DatabaseManager {
        use std::sync::OnceLock;
        static INSTANCE: OnceLock<DatabaseManager> = OnceLock::new();
        INSTANCE.get_or_init(|| DatabaseManager {
            pool: Arc::new(RwLock::new(None)),
        })
    }

    /// Get the shared pool, creating it lazily on first use
    pub async fn pool() -> Result<PgPool, DatabaseError> {
        Self::instance().get_pool().await
    }

    async fn get_pool(&self) -> Result<PgPool, DatabaseError> {
        // Fast path: try read lock
        {
            let pool = self.pool.read().await;
            if let Some(pool) = pool.as_ref() {
                return Ok(pool.clone());
            }
        }

        let mut slot = self.pool.write().await;
        if let Some(pool) = slot.as_ref() {
            return Ok(pool.clone());
        }

        let connection_string = Self::connection_string(&EnvSecretStore).await?;
        let pool = Self::connect_lazy(&connection_string)?;
        *slot = Some(pool.clone());

        info!("Created database pool");
        Ok(pool)
    }

    /// `DATABASE_URL` wins; otherwise credentials come from the secret store.
    pub async fn connection_string(store: &dyn SecretStore) -> Result<String, DatabaseError> {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            url::Url::parse(&url).map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
            return Ok(url);
        }
        DatabaseSecrets::load(store).await?.connection_url()
    }

    fn pool_options(connection_string: &str) -> Result<(PgPoolOptions, PgConnectOptions), DatabaseError> {
        let cfg = &crate::config::config().database;
        let mut options = PgConnectOptions::from_str(connection_string)
            .map_err(|_| DatabaseError::InvalidDatabaseUrl)?
            .options([("statement_timeout", cfg.statement_timeout_ms.to_string())]);
        if !cfg.enable_query_logging {
            options = options.disable_statement_logging();
        }
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(Duration::from_secs(cfg.connection_timeout));
        Ok((pool, options))
    }

    /// Open a pool with the configured limits, retrying transient failures
    pub async fn connect(connection_string: &str) -> Result<PgPool, DatabaseError> {
        let (pool, options) = Self::pool_options(connection_string)?;
        with_retry("connect", || pool.clone().connect_with(options.clone())).await
    }

    /// Same limits, but connections open on first use
    pub fn connect_lazy(connection_string: &str) -> Result<PgPool, DatabaseError> {
        let (pool, options) = Self::pool_options(connection_string)?;
        Ok(pool.connect_lazy_with(options))
    }

    /// Begin a transaction, retrying only if the connection itself could not be obtained
    pub async fn begin(pool: &PgPool) -> Result<Transaction<'static, Postgres>, DatabaseError> {
        with_retry("begin", || pool.begin()).await
    }

    /// Pings the pool to ensure connectivity
    pub async fn health_check() -> Result<(), DatabaseError> {
        let pool = Self::pool().await?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(())
    }

    /// Close the pool (e.g., on shutdown)
    pub async fn close() {
        let manager = Self::instance();
        let mut slot = manager.pool.write().await;
        if let Some(pool) = slot.take() {
            pool.close().await;
            info!("Closed database pool");
        }
    }
}

/// Connection-level failures worth another attempt. Business statement
/// failures (constraint violations, syntax, timeouts on a statement) are not.
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| code.starts_with("08") || code == "57P03" || code == "53300")
            .unwrap_or(false),
        _ => false,
    }
}

async fn with_retry<T, F, Fut>(what: &str, mut op: F) -> Result<T, DatabaseError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    let cfg = &crate::config::config().database;
    let attempts = cfg.connect_retry_attempts.max(1);
    let mut backoff = Duration::from_millis(cfg.connect_retry_backoff_ms);

    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_transient(&e) && attempt < attempts => {
                warn!("Transient database failure during {} (attempt {}/{}): {}", what, attempt, attempts, e);
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            Err(e) if is_transient(&e) => {
                return Err(DatabaseError::Unavailable { attempts, source: e });
            }
            Err(e) => return Err(DatabaseError::Sqlx(e)),
        }
    }
}
