use async_trait::async_trait;
use ragforge_core::{RagError, RagResult};
use reqwest::Url;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Raw text loaded from one source, before splitting.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    /// Extracted text.
    pub content: String,
    /// URI the text was loaded from.
    pub source: String,
}

/// Turns a readable URI into one or more source documents.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Loads and parses the object at `uri`.
    async fn load(&self, uri: &str) -> RagResult<Vec<SourceDocument>>;
}

/// Reads the bytes behind a `file://` or `http(s)://` URI.
async fn fetch(http: &reqwest::Client, uri: &str) -> RagResult<Vec<u8>> {
    let url = Url::parse(uri)
        .map_err(|e| RagError::Validation(format!("invalid document URI '{uri}': {e}")))?;
    match url.scheme() {
        "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| RagError::Validation(format!("invalid file URI '{uri}'")))?;
            tokio::fs::read(&path)
                .await
                .map_err(|e| RagError::Storage(format!("cannot read '{}': {e}", path.display())))
        }
        "http" | "https" => {
            let response = http
                .get(url)
                .send()
                .await
                .map_err(|e| RagError::Http(format!("GET {uri} failed: {e}")))?;
            let status = response.status();
            if !status.is_success() {
                return Err(RagError::Storage(format!("GET {uri} returned {status}")));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|e| RagError::Http(format!("reading {uri} failed: {e}")))?;
            Ok(bytes.to_vec())
        }
        other => Err(RagError::Validation(format!(
            "unsupported URI scheme '{other}'"
        ))),
    }
}

/// Generic handler: the object is UTF-8 text.
pub struct TextLoader {
    http: reqwest::Client,
}

impl TextLoader {
    /// Creates a loader fetching remote URIs with `http`.
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Loader for TextLoader {
    async fn load(&self, uri: &str) -> RagResult<Vec<SourceDocument>> {
        let bytes = fetch(&self.http, uri).await?;
        let content = String::from_utf8(bytes)
            .map_err(|_| RagError::Validation(format!("'{uri}' is not valid UTF-8 text")))?;
        Ok(vec![SourceDocument {
            content,
            source: uri.to_string(),
        }])
    }
}

/// PDF text extraction.
pub struct PdfLoader {
    http: reqwest::Client,
}

impl PdfLoader {
    /// Creates a loader fetching remote URIs with `http`.
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Loader for PdfLoader {
    async fn load(&self, uri: &str) -> RagResult<Vec<SourceDocument>> {
        let bytes = fetch(&self.http, uri).await?;
        let content = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| RagError::Ingestion(format!("PDF extraction task failed: {e}")))?
            .map_err(|e| RagError::Ingestion(format!("PDF parse error: {e}")))?;
        if content.trim().is_empty() {
            return Err(RagError::Validation(format!(
                "'{uri}' contains no extractable text"
            )));
        }
        Ok(vec![SourceDocument {
            content,
            source: uri.to_string(),
        }])
    }
}

/// Picks a loader by file extension, falling back to the text loader.
#[derive(Clone)]
pub struct LoaderRegistry {
    by_extension: HashMap<String, Arc<dyn Loader>>,
    fallback: Arc<dyn Loader>,
}

impl LoaderRegistry {
    /// A registry with only the fallback loader.
    pub fn new(fallback: Arc<dyn Loader>) -> Self {
        Self {
            by_extension: HashMap::new(),
            fallback,
        }
    }

    /// PDF for `.pdf`, UTF-8 text for everything else.
    pub fn with_defaults(http: reqwest::Client) -> Self {
        let mut registry = Self::new(Arc::new(TextLoader::new(http.clone())));
        registry.register("pdf", Arc::new(PdfLoader::new(http)));
        registry
    }

    /// Binds an extension (without the dot, any case) to a loader.
    pub fn register(&mut self, extension: &str, loader: Arc<dyn Loader>) {
        self.by_extension
            .insert(extension.trim_start_matches('.').to_lowercase(), loader);
    }

    /// The loader for a file name.
    pub fn for_file(&self, file_name: &str) -> Arc<dyn Loader> {
        let extension = std::path::Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match self.by_extension.get(&extension) {
            Some(loader) => Arc::clone(loader),
            None => {
                debug!(file_name, extension = %extension, "No dedicated parser, reading as text");
                Arc::clone(&self.fallback)
            }
        }
    }
}
