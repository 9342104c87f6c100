use crate::pipeline::IngestionPipeline;
use crate::retriever::MultiKbRetriever;
use ragforge_core::{Chunk, Document, KnowledgeBase, ModelKind, Page, RagError, RagResult};
use ragforge_memory::VectorStoreEngine;
use ragforge_session::{DocumentStore, KnowledgeBaseStore, ModelStore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info};

/// A stored file to attach to a knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    /// Display name, also used to pick the parser by extension.
    #[serde(alias = "file_name")]
    pub name: String,
    /// Key of the object in file storage.
    pub storage_key: String,
    /// MIME type, recorded as the document type.
    #[serde(default)]
    pub mime_type: String,
}

/// Knowledge-base and document operations on behalf of a user.
///
/// Every operation checks that the caller owns the knowledge base and
/// reports a foreign or missing one with the same message.
pub struct KnowledgeBaseService {
    knowledge_bases: Arc<dyn KnowledgeBaseStore>,
    documents: Arc<dyn DocumentStore>,
    models: Arc<dyn ModelStore>,
    engine: Arc<VectorStoreEngine>,
    pipeline: Arc<IngestionPipeline>,
    retriever: Arc<MultiKbRetriever>,
}

impl KnowledgeBaseService {
    /// Wires the service to its collaborators.
    pub fn new(
        knowledge_bases: Arc<dyn KnowledgeBaseStore>,
        documents: Arc<dyn DocumentStore>,
        models: Arc<dyn ModelStore>,
        engine: Arc<VectorStoreEngine>,
        pipeline: Arc<IngestionPipeline>,
        retriever: Arc<MultiKbRetriever>,
    ) -> Self {
        Self {
            knowledge_bases,
            documents,
            models,
            engine,
            pipeline,
            retriever,
        }
    }

    /// The retriever shared with answer producers.
    pub fn retriever(&self) -> Arc<MultiKbRetriever> {
        Arc::clone(&self.retriever)
    }

    /// Creates a knowledge base bound to one of the user's embedding models.
    pub async fn create_knowledge_base(
        &self,
        user_id: &str,
        name: &str,
        description: &str,
        embed_model_id: &str,
    ) -> RagResult<KnowledgeBase> {
        if name.trim().is_empty() {
            return Err(RagError::Validation("knowledge base name cannot be empty".into()));
        }
        let model = self
            .models
            .get_model(embed_model_id)
            .await?
            .filter(|m| m.user_id == user_id)
            .ok_or_else(|| RagError::not_found_or_denied(format!("model {embed_model_id}")))?;
        if model.kind != ModelKind::Embedding {
            return Err(RagError::Validation(format!(
                "model {embed_model_id} is not an embedding model"
            )));
        }

        let kb = KnowledgeBase::new(user_id, name.trim(), description, embed_model_id);
        self.knowledge_bases.create_knowledge_base(&kb).await?;
        info!(kb_id = %kb.id, collection = %kb.collection_name, "Knowledge base created");
        Ok(kb)
    }

    /// A knowledge base owned by `user_id`.
    pub async fn get_knowledge_base(&self, user_id: &str, kb_id: &str) -> RagResult<KnowledgeBase> {
        self.knowledge_bases
            .get_knowledge_base(kb_id)
            .await?
            .filter(|kb| kb.user_id == user_id)
            .ok_or_else(|| RagError::not_found_or_denied(format!("knowledge base {kb_id}")))
    }

    /// One page of the user's knowledge bases.
    pub async fn list_knowledge_bases(
        &self,
        user_id: &str,
        page: usize,
        size: usize,
    ) -> RagResult<Page<KnowledgeBase>> {
        self.knowledge_bases
            .list_knowledge_bases(user_id, page, size)
            .await
    }

    /// One page of a knowledge base's documents.
    pub async fn list_documents(
        &self,
        user_id: &str,
        kb_id: &str,
        page: usize,
        size: usize,
    ) -> RagResult<Page<Document>> {
        let kb = self.get_knowledge_base(user_id, kb_id).await?;
        self.documents.list_documents(&kb.id, page, size).await
    }

    /// Records a stored file as a `Pending` document of the knowledge base.
    pub async fn attach_document(
        &self,
        user_id: &str,
        kb_id: &str,
        file: &FileRef,
    ) -> RagResult<Document> {
        if file.name.trim().is_empty() || file.storage_key.is_empty() {
            return Err(RagError::Validation(
                "file name and storage key are required".into(),
            ));
        }
        let kb = self.get_knowledge_base(user_id, kb_id).await?;
        let document = Document::new(&kb.id, &file.storage_key, &file.name, &file.mime_type);
        self.documents.create_document(&document).await?;
        info!(kb_id = %kb.id, document_id = %document.id, title = %document.title, "Document attached");
        Ok(document)
    }

    /// Runs the ingestion pipeline for one document.
    pub async fn ingest(&self, user_id: &str, kb_id: &str, document_id: &str) -> RagResult<usize> {
        self.pipeline.ingest(user_id, kb_id, document_id).await
    }

    /// Single knowledge base retrieval.
    pub async fn retrieve(
        &self,
        user_id: &str,
        kb_id: &str,
        query: &str,
        top_k: usize,
    ) -> RagResult<Vec<Chunk>> {
        self.retriever.retrieve_from(kb_id, user_id, query, top_k).await
    }

    /// Deletes a knowledge base, its documents and their vector rows.
    ///
    /// Vector rows go first since they cannot be rolled back. If the
    /// relational delete then fails, the knowledge base survives without
    /// vectors; that window is logged and the error returned.
    pub async fn delete_knowledge_base(&self, user_id: &str, kb_id: &str) -> RagResult<()> {
        let kb = self.get_knowledge_base(user_id, kb_id).await?;
        let document_ids = self.documents.document_ids(&kb.id).await?;

        self.engine
            .delete_chunks(&kb.collection_name, &document_ids)
            .await?;
        if let Err(e) = self.knowledge_bases.delete_knowledge_base_cascade(&kb.id).await {
            error!(
                kb_id = %kb.id,
                collection = %kb.collection_name,
                documents = document_ids.len(),
                error = %e,
                "Vector rows deleted but knowledge base records remain; retry the delete"
            );
            return Err(e.context("KnowledgeBase.delete"));
        }
        info!(kb_id = %kb.id, documents = document_ids.len(), "Knowledge base deleted");
        Ok(())
    }

    /// Deletes documents of one knowledge base and their vector rows.
    ///
    /// Ids that do not belong to the knowledge base are ignored. Returns the
    /// number of documents removed. Same ordering and failure window as
    /// [`KnowledgeBaseService::delete_knowledge_base`].
    pub async fn delete_documents(
        &self,
        user_id: &str,
        kb_id: &str,
        document_ids: &[String],
    ) -> RagResult<usize> {
        let kb = self.get_knowledge_base(user_id, kb_id).await?;
        let owned: HashSet<String> = self.documents.document_ids(&kb.id).await?.into_iter().collect();
        let targets: Vec<String> = document_ids
            .iter()
            .filter(|id| owned.contains(*id))
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if targets.is_empty() {
            return Ok(0);
        }

        self.engine.delete_chunks(&kb.collection_name, &targets).await?;
        match self.documents.delete_documents(&kb.id, &targets).await {
            Ok(removed) => {
                info!(kb_id = %kb.id, removed, "Documents deleted");
                Ok(removed)
            }
            Err(e) => {
                error!(
                    kb_id = %kb.id,
                    documents = ?targets,
                    error = %e,
                    "Vector rows deleted but document records remain; retry the delete"
                );
                Err(e.context("KnowledgeBase.delete_documents"))
            }
        }
    }
}
