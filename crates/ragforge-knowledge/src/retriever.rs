use crate::settings::SharedSettings;
use futures_util::future::try_join_all;
use ragforge_core::{Chunk, KnowledgeBase, RagError, RagResult};
use ragforge_memory::{rank_chunks, EmbeddingProvider, EmbeddingRegistry, VectorStoreEngine};
use ragforge_session::{KnowledgeBaseStore, ModelStore};
use std::sync::Arc;
use tracing::{debug, info};

/// Builds the embedding provider bound to a knowledge base.
pub(crate) async fn embedding_for(
    models: &dyn ModelStore,
    registry: &EmbeddingRegistry,
    kb: &KnowledgeBase,
) -> RagResult<Arc<dyn EmbeddingProvider>> {
    let model = models
        .get_model(&kb.embed_model_id)
        .await?
        .filter(|m| m.user_id == kb.user_id)
        .ok_or_else(|| {
            RagError::Config(format!(
                "embedding model {} of knowledge base {} is not available",
                kb.embed_model_id, kb.id
            ))
        })?;
    registry.build(&model)
}

/// Answers a query across several knowledge bases.
///
/// Every knowledge base may use a different embedding model, so the query is
/// embedded once per knowledge base. Sub-searches run concurrently; the merge
/// re-sorts everything before truncating, so completion order never matters.
pub struct MultiKbRetriever {
    knowledge_bases: Arc<dyn KnowledgeBaseStore>,
    models: Arc<dyn ModelStore>,
    embeddings: EmbeddingRegistry,
    engine: Arc<VectorStoreEngine>,
    settings: SharedSettings,
}

impl MultiKbRetriever {
    /// Wires the retriever to its collaborators.
    pub fn new(
        knowledge_bases: Arc<dyn KnowledgeBaseStore>,
        models: Arc<dyn ModelStore>,
        embeddings: EmbeddingRegistry,
        engine: Arc<VectorStoreEngine>,
        settings: SharedSettings,
    ) -> Self {
        Self {
            knowledge_bases,
            models,
            embeddings,
            engine,
            settings,
        }
    }

    /// The best `top_k` chunks for `query` over `kb_ids`, best first.
    ///
    /// Each knowledge base contributes at most `retrieve_per_kb_top_k`
    /// candidates. Any ownership or per-knowledge-base failure fails the whole
    /// call. No ids means no results.
    pub async fn retrieve(
        &self,
        kb_ids: &[String],
        user_id: &str,
        query: &str,
        top_k: usize,
    ) -> RagResult<Vec<Chunk>> {
        if kb_ids.is_empty() {
            return Ok(Vec::new());
        }
        check_query(query)?;
        let per_kb = self.settings.read().retrieve_per_kb_top_k;

        let mut unique: Vec<&String> = Vec::with_capacity(kb_ids.len());
        for id in kb_ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }

        let partials = try_join_all(
            unique
                .into_iter()
                .map(|kb_id| self.search_one(kb_id, user_id, query, per_kb)),
        )
        .await?;
        let candidates: usize = partials.iter().map(Vec::len).sum();
        let ranked = rank_chunks(partials, top_k);
        info!(
            knowledge_bases = kb_ids.len(),
            candidates,
            returned = ranked.len(),
            "Multi knowledge base retrieval done"
        );
        Ok(ranked)
    }

    /// The best `top_k` chunks of a single knowledge base.
    pub async fn retrieve_from(
        &self,
        kb_id: &str,
        user_id: &str,
        query: &str,
        top_k: usize,
    ) -> RagResult<Vec<Chunk>> {
        check_query(query)?;
        self.search_one(kb_id, user_id, query, top_k).await
    }

    async fn search_one(
        &self,
        kb_id: &str,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> RagResult<Vec<Chunk>> {
        let kb = self
            .knowledge_bases
            .get_knowledge_base(kb_id)
            .await?
            .filter(|kb| kb.user_id == user_id)
            .ok_or_else(|| RagError::not_found_or_denied(format!("knowledge base {kb_id}")))?;
        let provider = embedding_for(self.models.as_ref(), &self.embeddings, &kb).await?;
        let vector = provider
            .embed(query)
            .await
            .map_err(|e| e.context("Retriever.embed_query"))?;
        let chunks = self
            .engine
            .search(&kb.collection_name, std::slice::from_ref(&kb.id), &vector, limit)
            .await?;
        debug!(kb_id, hits = chunks.len(), "Knowledge base searched");
        Ok(chunks)
    }
}

fn check_query(query: &str) -> RagResult<()> {
    if query.trim().is_empty() {
        return Err(RagError::Validation("query cannot be empty".into()));
    }
    Ok(())
}
