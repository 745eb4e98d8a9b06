use anyhow::Result;
use sqlx::SqlitePool;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::sqlite_graph::fold;

/// Folded search columns, added to databases created before they existed.
const FOLDED_COLUMNS: [(&str, &str, &str); 4] = [
    ("nodes", "name_folded", "TEXT NOT NULL DEFAULT ''"),
    ("nodes", "description_folded", "TEXT"),
    ("edges", "source_folded", "TEXT NOT NULL DEFAULT ''"),
    ("edges", "target_folded", "TEXT NOT NULL DEFAULT ''"),
];

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the graph schema. Safe to run repeatedly.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Nodes are unique by exact name
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS nodes (
            name TEXT PRIMARY KEY,
            name_folded TEXT NOT NULL DEFAULT '',
            kind TEXT NOT NULL DEFAULT 'Entity',
            description TEXT,
            description_folded TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Every source that contributed a node; rowid keeps first-seen order
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS node_sources (
            node_name TEXT NOT NULL,
            source_id TEXT NOT NULL,
            UNIQUE(node_name, source_id),
            FOREIGN KEY (node_name) REFERENCES nodes(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS edges (
            source TEXT NOT NULL,
            relation TEXT NOT NULL,
            target TEXT NOT NULL,
            source_folded TEXT NOT NULL DEFAULT '',
            target_folded TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            UNIQUE(source, relation, target),
            FOREIGN KEY (source) REFERENCES nodes(name),
            FOREIGN KEY (target) REFERENCES nodes(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_node_sources_node ON node_sources(node_name)")
        .execute(pool)
        .await?;

    add_folded_columns(pool).await?;

    Ok(())
}

async fn add_folded_columns(pool: &SqlitePool) -> Result<()> {
    let mut added = false;
    for (table, column, decl) in FOLDED_COLUMNS {
        let present: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
                .bind(table)
                .bind(column)
                .fetch_one(pool)
                .await?;
        if present == 0 {
            sqlx::query(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl))
                .execute(pool)
                .await?;
            added = true;
        }
    }
    if added {
        backfill_folded(pool).await?;
    }
    Ok(())
}

/// Fill the folded columns of rows written before they existed.
async fn backfill_folded(pool: &SqlitePool) -> Result<()> {
    let nodes: Vec<(String, Option<String>)> =
        sqlx::query_as("SELECT name, description FROM nodes")
            .fetch_all(pool)
            .await?;
    let edges: Vec<(i64, String, String)> =
        sqlx::query_as("SELECT rowid, source, target FROM edges")
            .fetch_all(pool)
            .await?;

    let mut tx = pool.begin().await?;
    for (name, description) in &nodes {
        sqlx::query("UPDATE nodes SET name_folded = ?, description_folded = ? WHERE name = ?")
            .bind(fold(name))
            .bind(description.as_deref().map(fold))
            .bind(name)
            .execute(&mut *tx)
            .await?;
    }
    for (rowid, source, target) in &edges {
        sqlx::query("UPDATE edges SET source_folded = ?, target_folded = ? WHERE rowid = ?")
            .bind(fold(source))
            .bind(fold(target))
            .bind(rowid)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    info!(nodes = nodes.len(), edges = edges.len(), "backfilled folded search columns");
    Ok(())
}
