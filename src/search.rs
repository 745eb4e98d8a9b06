use anyhow::Result;

use hybrid_retrieval_core::memory::preview;
use hybrid_retrieval_core::models::SourceStatus;
use hybrid_retrieval_core::retrieve::HybridContext;

use crate::engine::Engine;

const EXCERPT_CHARS: usize = 160;

pub async fn run_search(engine: &Engine, query: &str, k: Option<usize>, json: bool) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let k = k.unwrap_or(engine.config().retrieval.top_k);
    let ctx = engine.retrieve(query.trim(), k).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&ctx)?);
        return Ok(());
    }
    print!("{}", render(&ctx));
    Ok(())
}

fn status_note(label: &str, status: &SourceStatus) -> Option<String> {
    match status {
        SourceStatus::Available => None,
        SourceStatus::Unavailable => Some(format!("({} unavailable)", label)),
        SourceStatus::Error(reason) => Some(format!("({} degraded: {})", label, reason)),
    }
}

fn render(ctx: &HybridContext) -> String {
    let mut out = String::new();

    for note in [
        status_note("vector index", &ctx.vector_status),
        status_note("graph", &ctx.graph_status),
    ]
    .into_iter()
    .flatten()
    {
        out.push_str(&note);
        out.push('\n');
    }

    if ctx.vector_hits.is_empty() && ctx.graph_hits.is_empty() {
        out.push_str("No results.\n");
        return out;
    }

    for (i, hit) in ctx.vector_hits.iter().enumerate() {
        out.push_str(&format!(
            "{}. [{:.2}] {} #{}\n",
            i + 1,
            hit.score,
            hit.chunk.source_id,
            hit.chunk.chunk_index
        ));
        out.push_str(&format!(
            "    excerpt: \"{}\"\n",
            preview(&hit.chunk.content.replace('\n', " "), EXCERPT_CHARS).trim()
        ));
        out.push_str(&format!("    id: {}\n\n", hit.chunk.id));
    }

    if !ctx.graph_hits.entities.is_empty() {
        out.push_str("Entities:\n");
        for n in &ctx.graph_hits.entities {
            out.push_str(&format!("  - {} ({})", n.name, n.kind));
            if !n.provenance.is_empty() {
                out.push_str(&format!("  sources: {}", n.provenance.join(", ")));
            }
            out.push('\n');
        }
    }
    if !ctx.graph_hits.relationships.is_empty() {
        out.push_str("Relationships:\n");
        for e in &ctx.graph_hits.relationships {
            out.push_str(&format!("  - {} --[{}]--> {}\n", e.source, e.relation, e.target));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use hybrid_retrieval_core::models::{GraphEdge, GraphHits, Relation};

    fn context(graph_hits: GraphHits, graph_status: SourceStatus) -> HybridContext {
        HybridContext {
            vector_hits: Vec::new(),
            graph_hits,
            vector_status: SourceStatus::Available,
            graph_status,
        }
    }

    #[test]
    fn test_render_empty_reports_degraded_graph() {
        let out = render(&context(
            GraphHits::default(),
            SourceStatus::Error("connection refused".into()),
        ));
        assert!(out.contains("graph degraded: connection refused"));
        assert!(out.ends_with("No results.\n"));
    }

    #[test]
    fn test_render_relationships() {
        let hits = GraphHits {
            entities: Vec::new(),
            relationships: vec![GraphEdge {
                source: "INSAT-3D".into(),
                relation: Relation::Provides,
                target: "Sea Surface Temperature".into(),
            }],
        };
        let out = render(&context(hits, SourceStatus::Available));
        assert!(out.contains("INSAT-3D --[PROVIDES]--> Sea Surface Temperature"));
    }
}
