use crate::loader::LoaderRegistry;
use crate::retriever::embedding_for;
use crate::settings::SharedSettings;
use crate::splitter::{RecursiveSplitter, Splitter};
use crate::storage::FileStorage;
use ragforge_core::{Chunk, Document, DocumentStatus, KnowledgeBase, RagError, RagResult};
use ragforge_memory::{EmbeddingRegistry, VectorStoreEngine, WriteOptions};
use ragforge_session::{DocumentStore, KnowledgeBaseStore, ModelStore};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Turns one attached document into embedded, indexed chunks.
///
/// Status moves `Pending -> Processing -> Completed`. A failure after the
/// document entered `Processing` marks it `Failed`; a `Failed` (or
/// `Completed`) document can be ingested again from the top, replacing its
/// previous vector rows.
pub struct IngestionPipeline {
    knowledge_bases: Arc<dyn KnowledgeBaseStore>,
    documents: Arc<dyn DocumentStore>,
    models: Arc<dyn ModelStore>,
    embeddings: EmbeddingRegistry,
    engine: Arc<VectorStoreEngine>,
    storage: Arc<dyn FileStorage>,
    loaders: LoaderRegistry,
    settings: SharedSettings,
}

impl IngestionPipeline {
    /// Wires the pipeline to its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        knowledge_bases: Arc<dyn KnowledgeBaseStore>,
        documents: Arc<dyn DocumentStore>,
        models: Arc<dyn ModelStore>,
        embeddings: EmbeddingRegistry,
        engine: Arc<VectorStoreEngine>,
        storage: Arc<dyn FileStorage>,
        loaders: LoaderRegistry,
        settings: SharedSettings,
    ) -> Self {
        Self {
            knowledge_bases,
            documents,
            models,
            embeddings,
            engine,
            storage,
            loaders,
            settings,
        }
    }

    /// Ingests `document_id` of knowledge base `kb_id` on behalf of `user_id`.
    ///
    /// Returns the number of chunks written.
    pub async fn ingest(&self, user_id: &str, kb_id: &str, document_id: &str) -> RagResult<usize> {
        let kb = self
            .knowledge_bases
            .get_knowledge_base(kb_id)
            .await?
            .filter(|kb| kb.user_id == user_id)
            .ok_or_else(|| RagError::not_found_or_denied(format!("knowledge base {kb_id}")))?;
        let document = self
            .documents
            .get_document(document_id)
            .await?
            .filter(|d| d.kb_id == kb.id)
            .ok_or_else(|| RagError::NotFound(format!("document {document_id} in {kb_id}")))?;
        if document.status == DocumentStatus::Processing {
            return Err(RagError::Validation(format!(
                "document {document_id} is already being ingested"
            )));
        }

        self.documents
            .update_document_status(&document.id, DocumentStatus::Processing)
            .await?;
        info!(kb_id = %kb.id, document_id = %document.id, title = %document.title, "Ingestion started");

        match self.run(&kb, &document).await {
            Ok(written) => {
                self.documents
                    .update_document_status(&document.id, DocumentStatus::Completed)
                    .await?;
                info!(document_id = %document.id, chunks = written, "Ingestion completed");
                Ok(written)
            }
            Err(e) => {
                warn!(document_id = %document.id, error = %e, "Ingestion failed");
                if let Err(status_err) = self
                    .documents
                    .update_document_status(&document.id, DocumentStatus::Failed)
                    .await
                {
                    error!(
                        document_id = %document.id,
                        error = %status_err,
                        "Could not mark document as failed; it stays in Processing"
                    );
                }
                Err(e.context("Ingestion"))
            }
        }
    }

    async fn run(&self, kb: &KnowledgeBase, document: &Document) -> RagResult<usize> {
        let provider = embedding_for(self.models.as_ref(), &self.embeddings, kb).await?;

        let uri = self.storage.readable_uri(&document.file_key).await?;
        let sources = self.loaders.for_file(&document.title).load(&uri).await?;

        let (chunk_size, overlap) = {
            let settings = self.settings.read();
            (settings.chunk_size, settings.overlap_size)
        };
        let texts = RecursiveSplitter::new(chunk_size, overlap)?.split(&sources);
        if texts.is_empty() {
            return Err(RagError::Validation(format!(
                "document {} produced no text chunks; check its content and format",
                document.title
            )));
        }
        info!(document_id = %document.id, sources = sources.len(), chunks = texts.len(), "Document split");

        let mut chunks = Vec::with_capacity(texts.len());
        for (position, content) in texts.into_iter().enumerate() {
            let embedding = provider.embed(&content).await.map_err(|e| {
                e.context(&format!("embedding chunk {position} of {}", document.id))
            })?;
            let index = i32::try_from(position)
                .map_err(|_| RagError::Validation("document has too many chunks".into()))?;
            chunks.push(Chunk {
                id: Uuid::new_v4().to_string(),
                content,
                kb_id: kb.id.clone(),
                document_id: document.id.clone(),
                document_name: document.title.clone(),
                index,
                embedding,
                score: None,
                metadata: None,
            });
        }

        self.engine
            .ensure_collection(&kb.collection_name, provider.dimension())
            .await?;
        self.engine
            .delete_chunks(&kb.collection_name, std::slice::from_ref(&document.id))
            .await?;
        self.engine
            .write_chunks_with(&kb.collection_name, chunks, WriteOptions { flush: true })
            .await
    }
}
