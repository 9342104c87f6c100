//! Builds every long-lived component once, at process start.

use crate::config::{RagforgeConfig, VectorDriverKind};
use ragforge_agent::{LlmRegistry, NoTools, StreamingController};
use ragforge_core::RagError;
use ragforge_gateway::AppState;
use ragforge_knowledge::{
    FileRef, IngestionPipeline, KnowledgeBaseService, LoaderRegistry, LocalStorage,
    MultiKbRetriever, SharedSettings,
};
use ragforge_memory::{
    EmbeddingOptions, EmbeddingRegistry, InMemoryDriver, MilvusRestDriver, VectorDriver,
    VectorStoreEngine,
};
use ragforge_session::{ModelStore, SqliteRecordStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// The wired application.
pub struct App {
    pub records: Arc<SqliteRecordStore>,
    pub settings: SharedSettings,
    pub storage: Arc<LocalStorage>,
    pub knowledge: Arc<KnowledgeBaseService>,
    pub retriever: Arc<MultiKbRetriever>,
    pub controller: Arc<StreamingController>,
}

impl App {
    /// Opens the stores and connects the components.
    ///
    /// `shutdown` is cancelled when the process stops; background answer
    /// persistence ends with it.
    pub fn build(config: &RagforgeConfig, shutdown: CancellationToken) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir).map_err(|e| {
            anyhow::anyhow!(
                "Failed to create data directory '{}': {}",
                config.data_dir.display(),
                e
            )
        })?;

        let records = Arc::new(SqliteRecordStore::open(config.database_path())?);
        let storage = Arc::new(LocalStorage::new(config.storage_dir())?);
        let settings = config.rag.clone().shared();

        let driver: Arc<dyn VectorDriver> = match config.vector.driver {
            VectorDriverKind::Memory => Arc::new(InMemoryDriver::new()),
            VectorDriverKind::Milvus => {
                let milvus = &config.vector.milvus;
                Arc::new(
                    MilvusRestDriver::new(&milvus.address, Duration::from_secs(milvus.timeout_secs))?
                        .with_token(&milvus.token)
                        .with_database(&milvus.database),
                )
            }
        };
        info!(driver = ?config.vector.driver, metric = ?config.vector.engine.index.metric, "Vector store configured");
        let engine = Arc::new(VectorStoreEngine::new(driver, config.vector.engine.clone()));

        let embeddings = EmbeddingRegistry::with_defaults(EmbeddingOptions {
            timeout: Duration::from_secs(config.rag.embedding_timeout_secs),
        });
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.rag.embedding_timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {e}"))?;

        let pipeline = Arc::new(IngestionPipeline::new(
            records.clone(),
            records.clone(),
            records.clone(),
            embeddings.clone(),
            engine.clone(),
            storage.clone(),
            LoaderRegistry::with_defaults(http),
            settings.clone(),
        ));
        let retriever = Arc::new(MultiKbRetriever::new(
            records.clone(),
            records.clone(),
            embeddings,
            engine.clone(),
            settings.clone(),
        ));
        let knowledge = Arc::new(KnowledgeBaseService::new(
            records.clone(),
            records.clone(),
            records.clone(),
            engine,
            pipeline,
            retriever.clone(),
        ));
        let controller = Arc::new(StreamingController::new(
            records.clone(),
            settings.clone(),
            shutdown,
        ));

        Ok(Self {
            records,
            settings,
            storage,
            knowledge,
            retriever,
            controller,
        })
    }

    /// Registers the configured models, keeping records that already exist.
    pub async fn seed_models(&self, config: &RagforgeConfig) -> anyhow::Result<usize> {
        let mut created = 0;
        for model in &config.models {
            match self.records.create_model(model).await {
                Ok(()) => created += 1,
                Err(RagError::AlreadyExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        if created > 0 {
            info!(count = created, "Models registered from config");
        }
        Ok(created)
    }

    /// Handler state for the gateway.
    pub fn gateway_state(&self, config: &RagforgeConfig) -> Arc<AppState> {
        Arc::new(AppState {
            knowledge: self.knowledge.clone(),
            retriever: self.retriever.clone(),
            controller: self.controller.clone(),
            models: self.records.clone(),
            llm: LlmRegistry::with_defaults(),
            default_llm: config.llm.clone(),
            agents: config
                .agents
                .iter()
                .map(|agent| (agent.id.clone(), agent.clone()))
                .collect(),
            tools: Arc::new(NoTools),
        })
    }

    /// Copies a local file into storage, attaches it to `kb_id` and ingests it.
    ///
    /// Returns the document id and the number of chunks written.
    pub async fn ingest_file(
        &self,
        user_id: &str,
        kb_id: &str,
        path: &Path,
    ) -> anyhow::Result<(String, usize)> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("'{}' has no file name", path.display()))?
            .to_string();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read '{}': {}", path.display(), e))?;

        let storage_key = format!("{kb_id}/{name}");
        self.storage.put(&storage_key, &bytes).await?;
        let document = self
            .knowledge
            .attach_document(
                user_id,
                kb_id,
                &FileRef {
                    mime_type: mime_for(&name).to_string(),
                    name,
                    storage_key,
                },
            )
            .await?;
        let chunks = self.knowledge.ingest(user_id, kb_id, &document.id).await?;
        Ok((document.id, chunks))
    }
}

fn mime_for(name: &str) -> &'static str {
    match name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "pdf" => "application/pdf",
        Some(ext) if ext == "md" || ext == "markdown" => "text/markdown",
        _ => "text/plain",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn config(dir: &Path) -> RagforgeConfig {
        RagforgeConfig::parse(&format!(
            r#"
data_dir = "{}"

[rag]
chunk_size = 60
overlap_size = 0

[[agents]]
id = "support"

[[models]]
id = "bow"
user_id = "alice"
kind = "embedding"
provider = "local"
base_url = ""
model_name = "bag-of-words"
dimension = 64
"#,
            dir.display()
        ))
        .unwrap()
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for("guide.PDF"), "application/pdf");
        assert_eq!(mime_for("notes.md"), "text/markdown");
        assert_eq!(mime_for("README"), "text/plain");
    }

    #[tokio::test]
    async fn test_seed_models_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let app = App::build(&config, CancellationToken::new()).unwrap();
        assert_eq!(app.seed_models(&config).await.unwrap(), 1);
        assert_eq!(app.seed_models(&config).await.unwrap(), 0);
        assert!(dir.path().join("ragforge.db").exists());
    }

    #[tokio::test]
    async fn test_ingest_file_then_retrieve() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let app = App::build(&config, CancellationToken::new()).unwrap();
        app.seed_models(&config).await.unwrap();
        let kb = app
            .knowledge
            .create_knowledge_base("alice", "handbook", "", "bow")
            .await
            .unwrap();

        let source = dir.path().join("handbook.txt");
        std::fs::write(&source, "The coffee machine is on floor three.").unwrap();
        let (_, chunks) = app.ingest_file("alice", &kb.id, &source).await.unwrap();
        assert_eq!(chunks, 1);

        let found = app
            .retriever
            .retrieve(&[kb.id.clone()], "alice", "coffee machine", 3)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].document_name, "handbook.txt");
    }

    #[tokio::test]
    async fn test_gateway_state_indexes_agents() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let app = App::build(&config, CancellationToken::new()).unwrap();
        let state = app.gateway_state(&config);
        assert!(state.agents.contains_key("support"));
    }
}
