use anyhow::Result;
use sqlx::SqlitePool;
use tracing::{error, info};

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations");

    // Create records table if it doesn't exist
    let create_records_table = r#"
    CREATE TABLE IF NOT EXISTS records (
        id INTEGER PRIMARY KEY,
        display_name TEXT NOT NULL DEFAULT '',
        owner_address TEXT NOT NULL DEFAULT '',
        subject_address TEXT NOT NULL DEFAULT '',
        category TEXT NOT NULL DEFAULT '',
        verified INTEGER NOT NULL DEFAULT 0,
        locked INTEGER NOT NULL DEFAULT 0,
        origin_kind TEXT NOT NULL DEFAULT 'UNKNOWN',
        score REAL NOT NULL DEFAULT 0,
        weight REAL NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL DEFAULT 0,
        last_updated INTEGER NOT NULL DEFAULT 0
    )
    "#;

    // Single-row-per-key progress table
    let create_sync_state_table = r#"
    CREATE TABLE IF NOT EXISTS sync_state (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#;

    let indexes = [
        ("category", "CREATE INDEX IF NOT EXISTS idx_records_category ON records (category)"),
        ("verified", "CREATE INDEX IF NOT EXISTS idx_records_verified ON records (verified)"),
        ("score", "CREATE INDEX IF NOT EXISTS idx_records_score ON records (score)"),
        (
            "display_name",
            "CREATE INDEX IF NOT EXISTS idx_records_display_name ON records (display_name COLLATE NOCASE)",
        ),
    ];

    info!("Creating records table if it doesn't exist");
    sqlx::query(create_records_table)
        .execute(pool)
        .await
        .map_err(|e| {
            error!("Failed to create records table: {}", e);
            e
        })?;

    info!("Creating sync_state table if it doesn't exist");
    sqlx::query(create_sync_state_table)
        .execute(pool)
        .await
        .map_err(|e| {
            error!("Failed to create sync_state table: {}", e);
            e
        })?;

    for (column, statement) in indexes {
        info!("Creating {} index", column);
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| {
                error!("Failed to create {} index: {}", column, e);
                e
            })?;
    }

    info!("Database migrations completed successfully");
    Ok(())
}
