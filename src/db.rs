use crate::config::AppConfig;
use crate::errors::ServiceError;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::time::Duration;
use tracing::{debug, info};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Idle timeout duration
    pub idle_timeout: Duration,
    /// Acquire connection timeout
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
        }
    }
}

/// Establishes a connection pool to the database
pub async fn establish_connection(database_url: &str) -> Result<DbPool, ServiceError> {
    let config = DbConfig {
        url: database_url.to_string(),
        ..Default::default()
    };

    establish_connection_with_config(&config).await
}

/// Establishes a connection pool using settings from the application config
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    establish_connection_with_config(&DbConfig::from(cfg)).await
}

/// Establishes a connection pool to the database with custom configuration
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!("Configuring database connection with: {:?}", config);

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    info!(
        "Connecting to database with max_connections={}",
        config.max_connections
    );

    let db_pool = Database::connect(opt).await?;

    info!("Database connection pool established successfully");

    Ok(db_pool)
}

/// Creates the schema if it does not exist.
///
/// The DDL targets SQLite's dynamic typing, which the test harness and the
/// default deployment use; Postgres deployments run their own migrations.
/// Money columns are REAL, not NUMERIC: NUMERIC affinity stores integral
/// amounts as INTEGER, which the decimal decoder rejects.
pub async fn run_migrations(db: &DbPool) -> Result<(), ServiceError> {
    let backend = db.get_database_backend();

    let statements = [
        r#"CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY NOT NULL,
            title TEXT NOT NULL,
            sku TEXT NOT NULL,
            price REAL NOT NULL,
            is_available INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT
        );"#,
        r#"CREATE TABLE IF NOT EXISTS carts (
            id TEXT PRIMARY KEY NOT NULL,
            user_id TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT
        );"#,
        r#"CREATE TABLE IF NOT EXISTS cart_items (
            id TEXT PRIMARY KEY NOT NULL,
            cart_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            position INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT
        );"#,
        r#"CREATE TABLE IF NOT EXISTS stock_records (
            id TEXT PRIMARY KEY NOT NULL,
            item_id TEXT NOT NULL,
            location_id TEXT NOT NULL,
            quantity_on_hand INTEGER NOT NULL DEFAULT 0,
            quantity_reserved INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            UNIQUE (item_id, location_id)
        );"#,
        r#"CREATE TABLE IF NOT EXISTS stock_reservations (
            id TEXT PRIMARY KEY NOT NULL,
            item_id TEXT NOT NULL,
            location_id TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            status TEXT NOT NULL,
            order_id TEXT,
            expires_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT
        );"#,
        r#"CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY NOT NULL,
            order_number TEXT NOT NULL,
            user_id TEXT NOT NULL,
            status TEXT NOT NULL,
            subtotal REAL NOT NULL,
            discount_total REAL NOT NULL,
            total_amount REAL NOT NULL,
            currency TEXT NOT NULL,
            coupon_code TEXT,
            shipping_address TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT
        );"#,
        r#"CREATE TABLE IF NOT EXISTS order_items (
            id TEXT PRIMARY KEY NOT NULL,
            order_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            unit_price REAL NOT NULL,
            line_total REAL NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT
        );"#,
        r#"CREATE TABLE IF NOT EXISTS payment_transactions (
            id TEXT PRIMARY KEY NOT NULL,
            order_id TEXT NOT NULL,
            transaction_code TEXT NOT NULL UNIQUE,
            provider TEXT NOT NULL,
            method TEXT NOT NULL,
            amount REAL NOT NULL,
            status TEXT NOT NULL,
            raw_payload TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT
        );"#,
        r#"CREATE TABLE IF NOT EXISTS coupons (
            id TEXT PRIMARY KEY NOT NULL,
            code TEXT NOT NULL UNIQUE,
            discount_type TEXT NOT NULL,
            discount_value REAL NOT NULL,
            max_discount_amount REAL,
            usage_limit INTEGER,
            usage_count INTEGER NOT NULL DEFAULT 0,
            starts_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT
        );"#,
    ];

    for sql in statements {
        db.execute(Statement::from_string(backend, sql.to_string()))
            .await?;
    }

    info!("Database schema is up to date");
    Ok(())
}
