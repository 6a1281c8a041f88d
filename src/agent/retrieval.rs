//! Turning retriever output into prompt context.

use tracing::{debug, warn};

use crate::runtime::component::{ContextChunk, Retriever};

/// Rendered in place of context when nothing was retrieved.
pub const EMPTY_CONTEXT: &str = "(empty)";

/// Render chunks for the system prompt.
pub fn format_context(chunks: Option<&[ContextChunk]>) -> String {
    match chunks {
        Some(chunks) if !chunks.is_empty() => chunks
            .iter()
            .map(|chunk| {
                format!(
                    "### {} ({})\n{}",
                    chunk.heading,
                    chunk.source_id,
                    chunk.content.trim_end()
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n"),
        _ => EMPTY_CONTEXT.to_string(),
    }
}

/// Query the retriever, degrading to empty context on failure.
///
/// A blank query skips the retriever entirely and yields `None`.
pub async fn retrieve_context(
    retriever: &dyn Retriever,
    query: &str,
    limit: usize,
) -> Option<Vec<ContextChunk>> {
    let query = query.trim();
    if query.is_empty() {
        debug!("empty retrieval query, skipping retriever");
        return None;
    }
    match retriever.retrieve(query.to_string(), limit).await {
        Ok(chunks) => {
            debug!(retriever = retriever.retriever_id(), count = chunks.len(), "context retrieved");
            Some(chunks)
        }
        Err(err) => {
            warn!(
                retriever = retriever.retriever_id(),
                error = %err,
                "retrieval failed, continuing without context"
            );
            Some(Vec::new())
        }
    }
}

/// Add chunks not already present (by source id and heading).
pub fn merge_chunks(existing: &mut Vec<ContextChunk>, incoming: Vec<ContextChunk>) {
    for chunk in incoming {
        let duplicate = existing
            .iter()
            .any(|known| known.source_id == chunk.source_id && known.heading == chunk.heading);
        if !duplicate {
            existing.push(chunk);
        }
    }
}
