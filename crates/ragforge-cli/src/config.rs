//! The `ragforge.toml` configuration file.
//!
//! Every section has serde defaults, so an empty file starts a server with
//! the in-memory vector driver and SQLite records under `./data`.

use ragforge_agent::{AgentDefinition, LlmSettings};
use ragforge_core::ModelRecord;
use ragforge_knowledge::RagSettings;
use ragforge_memory::VectorStoreConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
pub struct RagforgeConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub rag: RagSettings,
    /// Default chat model.
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub agents: Vec<AgentDefinition>,
    /// Models registered at startup; existing ids are left untouched.
    #[serde(default)]
    pub models: Vec<ModelRecord>,
}

impl Default for RagforgeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            server: ServerConfig::default(),
            vector: VectorConfig::default(),
            rag: RagSettings::default(),
            llm: LlmSettings::default(),
            agents: Vec::new(),
            models: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Keys accepted on `/api`; empty disables the check.
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// In-flight API request cap; 0 disables it.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_keys: Vec::new(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

/// Which vector database backs the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorDriverKind {
    /// Process-local brute force search; contents are lost on restart.
    #[default]
    Memory,
    Milvus,
}

#[derive(Debug, Default, Deserialize)]
pub struct VectorConfig {
    #[serde(default)]
    pub driver: VectorDriverKind,
    #[serde(default)]
    pub milvus: MilvusConfig,
    /// `[vector.index]`, `[vector.limits]` and `[vector.retry]`.
    #[serde(flatten)]
    pub engine: VectorStoreConfig,
}

#[derive(Debug, Deserialize)]
pub struct MilvusConfig {
    #[serde(default = "default_milvus_address")]
    pub address: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub database: String,
    #[serde(default = "default_milvus_timeout")]
    pub timeout_secs: u64,
}

impl Default for MilvusConfig {
    fn default() -> Self {
        Self {
            address: default_milvus_address(),
            token: String::new(),
            database: String::new(),
            timeout_secs: default_milvus_timeout(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_concurrent() -> usize {
    256
}

fn default_milvus_address() -> String {
    "http://localhost:19530".to_string()
}

fn default_milvus_timeout() -> u64 {
    30
}

impl RagforgeConfig {
    /// Reads and parses the configuration file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;
        Self::parse(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))
    }

    /// Parses configuration text.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Directory of uploaded source files.
    pub fn storage_dir(&self) -> PathBuf {
        self.data_dir.join("files")
    }

    /// SQLite database of knowledge bases, documents, models and history.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("ragforge.db")
    }
}
