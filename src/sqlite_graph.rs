//! SQLite-backed [`GraphStore`].
//!
//! Schema (see [`crate::migrate`]): `nodes` keyed by name, `node_sources`
//! holding the provenance list, `edges` unique on
//! `(source, relation, target)`. Each import runs in one transaction and
//! every insert is `ON CONFLICT DO NOTHING`, so re-importing is a no-op.
//!
//! Substring lookups use `instr(col, ?)` rather than `LIKE` so user terms
//! containing `%` or `_` match literally. SQLite's `lower()` only folds
//! ASCII, so every searchable name is also stored in a `*_folded` column
//! lowercased by [`fold`], and the term is folded the same way.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::warn;

use hybrid_retrieval_core::error::{RetrievalError, RetrievalResult};
use hybrid_retrieval_core::graph::{node_kind, GraphStore, ImportSummary};
use hybrid_retrieval_core::models::{
    Entity, GraphEdge, GraphNode, GraphStatistics, Relation, Triple, GENERIC_NODE_KIND,
};

pub struct SqliteGraphStore {
    pool: SqlitePool,
}

impl SqliteGraphStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Case folding shared by writes and lookups.
pub(crate) fn fold(text: &str) -> String {
    text.to_lowercase()
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Insert a generic node if missing and record `source_id`. Returns
/// `true` when the node was created.
async fn merge_node(
    conn: &mut sqlx::SqliteConnection,
    name: &str,
    source_id: &str,
    ts: i64,
) -> Result<bool, sqlx::Error> {
    let created = sqlx::query(
        "INSERT INTO nodes (name, name_folded, kind, description, created_at) \
         VALUES (?, ?, ?, NULL, ?) \
         ON CONFLICT(name) DO NOTHING",
    )
    .bind(name)
    .bind(fold(name))
    .bind(GENERIC_NODE_KIND)
    .bind(ts)
    .execute(&mut *conn)
    .await?
    .rows_affected()
        > 0;

    if !source_id.is_empty() {
        sqlx::query(
            "INSERT INTO node_sources (node_name, source_id) VALUES (?, ?) \
             ON CONFLICT(node_name, source_id) DO NOTHING",
        )
        .bind(name)
        .bind(source_id)
        .execute(&mut *conn)
        .await?;
    }

    Ok(created)
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn import_triples(&self, triples: &[Triple]) -> RetrievalResult<ImportSummary> {
        let ts = now();
        let mut summary = ImportSummary::default();
        let mut tx = self.pool.begin().await.map_err(RetrievalError::graph)?;

        for t in triples {
            for name in [&t.subject, &t.object] {
                if merge_node(&mut tx, name, &t.source_id, ts)
                    .await
                    .map_err(RetrievalError::graph)?
                {
                    summary.nodes_created += 1;
                }
            }

            let result = sqlx::query(
                "INSERT INTO edges (source, relation, target, source_folded, target_folded, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(source, relation, target) DO NOTHING",
            )
            .bind(&t.subject)
            .bind(t.relation.as_str())
            .bind(&t.object)
            .bind(fold(&t.subject))
            .bind(fold(&t.object))
            .bind(ts)
            .execute(&mut *tx)
            .await
            .map_err(RetrievalError::graph)?;
            summary.edges_created += result.rows_affected();
        }

        tx.commit().await.map_err(RetrievalError::graph)?;
        Ok(summary)
    }

    async fn import_entities(
        &self,
        entities: &[Entity],
        source_id: &str,
    ) -> RetrievalResult<ImportSummary> {
        let ts = now();
        let mut summary = ImportSummary::default();
        let mut tx = self.pool.begin().await.map_err(RetrievalError::graph)?;

        for e in entities {
            if merge_node(&mut tx, &e.text, source_id, ts)
                .await
                .map_err(RetrievalError::graph)?
            {
                summary.nodes_created += 1;
            }

            let description = (!e.context.is_empty()).then_some(e.context.as_str());
            sqlx::query(
                r#"
                UPDATE nodes SET
                    kind = CASE WHEN kind = ? THEN ? ELSE kind END,
                    description = COALESCE(description, ?),
                    description_folded = COALESCE(description_folded, ?)
                WHERE name = ?
                "#,
            )
            .bind(GENERIC_NODE_KIND)
            .bind(node_kind(e.label))
            .bind(description)
            .bind(description.map(fold))
            .bind(&e.text)
            .execute(&mut *tx)
            .await
            .map_err(RetrievalError::graph)?;
        }

        tx.commit().await.map_err(RetrievalError::graph)?;
        Ok(summary)
    }

    async fn lookup_entities(&self, term: &str, limit: usize) -> RetrievalResult<Vec<GraphNode>> {
        let needle = fold(term.trim());
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT n.name, n.kind, n.description,
                   json_group_array(s.source_id ORDER BY s.rowid)
                       FILTER (WHERE s.source_id IS NOT NULL) AS provenance
            FROM nodes n
            LEFT JOIN node_sources s ON s.node_name = n.name
            WHERE instr(n.name_folded, ?) > 0
               OR instr(lower(n.kind), ?) > 0
               OR instr(COALESCE(n.description_folded, ''), ?) > 0
            GROUP BY n.name
            ORDER BY n.name
            LIMIT ?
            "#,
        )
        .bind(&needle)
        .bind(&needle)
        .bind(&needle)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(RetrievalError::graph)?;

        rows.into_iter()
            .map(|row| {
                let provenance: String = row.get("provenance");
                Ok(GraphNode {
                    name: row.get("name"),
                    kind: row.get("kind"),
                    description: row.get("description"),
                    provenance: serde_json::from_str(&provenance).map_err(RetrievalError::graph)?,
                })
            })
            .collect()
    }

    async fn lookup_relationships(
        &self,
        term: &str,
        limit: usize,
    ) -> RetrievalResult<Vec<GraphEdge>> {
        let needle = fold(term.trim());
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT source, relation, target
            FROM edges
            WHERE instr(source_folded, ?) > 0
               OR instr(target_folded, ?) > 0
               OR instr(lower(relation), ?) > 0
            ORDER BY source, relation, target
            LIMIT ?
            "#,
        )
        .bind(&needle)
        .bind(&needle)
        .bind(&needle)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(RetrievalError::graph)?;

        let mut edges = Vec::with_capacity(rows.len());
        for row in rows {
            let relation: String = row.get("relation");
            match relation.parse::<Relation>() {
                Ok(relation) => edges.push(GraphEdge {
                    source: row.get("source"),
                    relation,
                    target: row.get("target"),
                }),
                Err(e) => warn!(error = %e, "skipping edge with unknown relation"),
            }
        }
        Ok(edges)
    }

    async fn statistics(&self) -> RetrievalResult<GraphStatistics> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM nodes) AS nodes,
                (SELECT COUNT(*) FROM edges) AS edges,
                (SELECT COUNT(DISTINCT relation) FROM edges) AS relation_types,
                (SELECT COUNT(DISTINCT kind) FROM nodes) AS node_kinds
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(RetrievalError::graph)?;

        let count = |col: &str| row.get::<i64, _>(col).max(0) as u64;
        Ok(GraphStatistics {
            nodes: count("nodes"),
            edges: count("edges"),
            relation_types: count("relation_types"),
            node_kinds: count("node_kinds"),
        })
    }

    async fn clear(&self) -> RetrievalResult<()> {
        let mut tx = self.pool.begin().await.map_err(RetrievalError::graph)?;
        for table in ["edges", "node_sources", "nodes"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await
                .map_err(RetrievalError::graph)?;
        }
        tx.commit().await.map_err(RetrievalError::graph)?;
        Ok(())
    }

    async fn health(&self) -> RetrievalResult<()> {
        sqlx::query("SELECT 1 FROM nodes LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(RetrievalError::graph)?;
        Ok(())
    }
}
