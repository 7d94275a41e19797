//! Runtime configuration, read from the process environment.

use crate::error::ConfigError;
use crate::llm::openai::OpenAiConfig;
use crate::rag::RagOptions;
use crate::vector_store::pinecone::PineconeConfig;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const PINECONE_VARS: &[&str] = &["PINECONE_API_KEY", "PINECONE_INDEX_NAME"];
const LLM_VARS: &[&str] = &["GROQ_API_KEY", "OPENAI_API_KEY"];

const DEFAULT_INDEX_NAME: &str = "rag-ai-agent";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorStoreKind {
    Pinecone,
    /// In-process index; nothing survives a restart.
    Memory,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub groq_api_key: String,
    pub groq_base_url: String,
    pub groq_model: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub vector_store: VectorStoreKind,
    pub pinecone_api_key: String,
    pub pinecone_index_name: String,
    pub pinecone_controller_url: String,
    pub pinecone_host: Option<String>,
    pub pinecone_cloud: String,
    pub pinecone_region: String,
    pub pinecone_namespace: String,
    pub max_file_size_mb: u64,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub history_limit: usize,
    pub http_timeout_secs: u64,
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub frontend_url: Option<String>,
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            message: format!("{:?}: {}", raw, e),
        }),
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        message: message.into(),
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let vector_store = match get("VECTOR_STORE").as_deref() {
            None | Some("pinecone") => VectorStoreKind::Pinecone,
            Some("memory") => VectorStoreKind::Memory,
            Some(other) => {
                return Err(invalid(
                    "VECTOR_STORE",
                    format!("expected 'pinecone' or 'memory', got {:?}", other),
                ))
            }
        };

        let mut required: Vec<&str> = LLM_VARS.to_vec();
        if vector_store == VectorStoreKind::Pinecone {
            required.extend_from_slice(PINECONE_VARS);
        }
        let missing: Vec<String> = required
            .iter()
            .filter(|key| get(key).is_none())
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let settings = Settings {
            groq_api_key: get("GROQ_API_KEY").unwrap_or_default(),
            groq_base_url: get("GROQ_BASE_URL")
                .unwrap_or_else(|| "https://api.groq.com/openai/v1".to_string()),
            groq_model: get("GROQ_MODEL").unwrap_or_else(|| "llama3-8b-8192".to_string()),
            openai_api_key: get("OPENAI_API_KEY").unwrap_or_default(),
            openai_base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            embedding_model: get("EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-ada-002".to_string()),
            embedding_dimension: parse_or(get("EMBEDDING_DIMENSION"), "EMBEDDING_DIMENSION", 1536)?,
            vector_store,
            pinecone_api_key: get("PINECONE_API_KEY").unwrap_or_default(),
            pinecone_index_name: get("PINECONE_INDEX_NAME")
                .unwrap_or_else(|| DEFAULT_INDEX_NAME.to_string()),
            pinecone_controller_url: get("PINECONE_CONTROLLER_URL")
                .unwrap_or_else(|| "https://api.pinecone.io".to_string()),
            pinecone_host: get("PINECONE_HOST"),
            pinecone_cloud: get("PINECONE_CLOUD").unwrap_or_else(|| "aws".to_string()),
            pinecone_region: get("PINECONE_ENVIRONMENT").unwrap_or_else(|| "us-east-1".to_string()),
            pinecone_namespace: get("PINECONE_NAMESPACE").unwrap_or_default(),
            max_file_size_mb: parse_or(get("MAX_FILE_SIZE"), "MAX_FILE_SIZE", 10)?,
            chunk_size: parse_or(get("CHUNK_SIZE"), "CHUNK_SIZE", 500)?,
            chunk_overlap: parse_or(get("CHUNK_OVERLAP"), "CHUNK_OVERLAP", 100)?,
            top_k: parse_or(get("TOP_K"), "TOP_K", 3)?,
            similarity_threshold: parse_or(get("SIMILARITY_THRESHOLD"), "SIMILARITY_THRESHOLD", 0.7)?,
            history_limit: parse_or(get("HISTORY_LIMIT"), "HISTORY_LIMIT", 10)?,
            http_timeout_secs: parse_or(get("HTTP_TIMEOUT_SECS"), "HTTP_TIMEOUT_SECS", 60)?,
            data_dir: get("DATA_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("./data")),
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(get("PORT"), "PORT", 7860)?,
            frontend_url: get("FRONTEND_URL"),
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding_dimension == 0 {
            return Err(invalid("EMBEDDING_DIMENSION", "must be greater than zero"));
        }
        if self.chunk_size == 0 {
            return Err(invalid("CHUNK_SIZE", "must be greater than zero"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(invalid(
                "CHUNK_OVERLAP",
                format!("must be smaller than CHUNK_SIZE ({})", self.chunk_size),
            ));
        }
        if self.top_k == 0 {
            return Err(invalid("TOP_K", "must be greater than zero"));
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(invalid("SIMILARITY_THRESHOLD", "must be within [-1, 1]"));
        }
        if self.max_file_size_mb == 0 {
            return Err(invalid("MAX_FILE_SIZE", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn max_file_bytes(&self) -> usize {
        (self.max_file_size_mb as usize).saturating_mul(1024 * 1024)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| invalid("HOST", format!("{}:{} is not a socket address: {}", self.host, self.port, e)))
    }

    /// Shared HTTP client for every upstream service.
    pub fn http_client(&self) -> Result<reqwest::Client, ConfigError> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.http_timeout_secs))
            .build()
            .map_err(|e| invalid("HTTP_TIMEOUT_SECS", e.to_string()))
    }

    pub fn groq_config(&self) -> OpenAiConfig {
        OpenAiConfig {
            api_key: self.groq_api_key.clone(),
            base_url: self.groq_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn openai_config(&self) -> OpenAiConfig {
        OpenAiConfig {
            api_key: self.openai_api_key.clone(),
            base_url: self.openai_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn pinecone_config(&self) -> PineconeConfig {
        PineconeConfig {
            api_key: self.pinecone_api_key.clone(),
            index_name: self.pinecone_index_name.clone(),
            controller_url: self.pinecone_controller_url.trim_end_matches('/').to_string(),
            host: self.pinecone_host.clone(),
            cloud: self.pinecone_cloud.clone(),
            region: self.pinecone_region.clone(),
            namespace: self.pinecone_namespace.clone(),
            dimension: self.embedding_dimension,
        }
    }

    pub fn rag_options(&self) -> RagOptions {
        RagOptions {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            top_k: self.top_k,
            similarity_threshold: self.similarity_threshold,
            model: self.groq_model.clone(),
            ..RagOptions::default()
        }
    }

    /// Active configuration with API keys masked, for diagnostics.
    pub fn masked(&self) -> BTreeMap<&'static str, String> {
        let mut map = BTreeMap::new();
        map.insert("GROQ_API_KEY", mask_secret(&self.groq_api_key));
        map.insert("GROQ_BASE_URL", self.groq_base_url.clone());
        map.insert("GROQ_MODEL", self.groq_model.clone());
        map.insert("OPENAI_API_KEY", mask_secret(&self.openai_api_key));
        map.insert("OPENAI_BASE_URL", self.openai_base_url.clone());
        map.insert("EMBEDDING_MODEL", self.embedding_model.clone());
        map.insert("EMBEDDING_DIMENSION", self.embedding_dimension.to_string());
        map.insert(
            "VECTOR_STORE",
            match self.vector_store {
                VectorStoreKind::Pinecone => "pinecone".to_string(),
                VectorStoreKind::Memory => "memory".to_string(),
            },
        );
        map.insert("PINECONE_API_KEY", mask_secret(&self.pinecone_api_key));
        map.insert("PINECONE_INDEX_NAME", self.pinecone_index_name.clone());
        map.insert("PINECONE_ENVIRONMENT", self.pinecone_region.clone());
        if let Some(host) = &self.pinecone_host {
            map.insert("PINECONE_HOST", host.clone());
        }
        map.insert("MAX_FILE_SIZE", self.max_file_size_mb.to_string());
        map.insert("CHUNK_SIZE", self.chunk_size.to_string());
        map.insert("CHUNK_OVERLAP", self.chunk_overlap.to_string());
        map.insert("TOP_K", self.top_k.to_string());
        map.insert("SIMILARITY_THRESHOLD", self.similarity_threshold.to_string());
        map.insert("HISTORY_LIMIT", self.history_limit.to_string());
        if let Some(url) = &self.frontend_url {
            map.insert("FRONTEND_URL", url.clone());
        }
        map
    }
}

/// Mask an API key for display, keeping only its first and last four characters.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.is_empty() {
        return String::new();
    }
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Load a `.env` file into the process environment. Variables that are
/// already set win over the file.
pub fn load_dotenv(path: Option<&Path>) {
    match path {
        Some(path) => match dotenvy::from_path(path) {
            Ok(()) => log::info!("loaded environment from {}", path.display()),
            Err(e) => log::warn!("could not load {}: {}", path.display(), e),
        },
        None => {
            if let Ok(path) = dotenvy::dotenv() {
                log::info!("loaded environment from {}", path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("GROQ_API_KEY", "gsk_0123456789abcdef"),
        ("OPENAI_API_KEY", "sk-0123456789abcdef"),
        ("PINECONE_API_KEY", "pc-0123456789abcdef"),
        ("PINECONE_INDEX_NAME", "docs"),
    ];

    #[test]
    fn test_missing_variables_fail_fast_with_all_names() {
        let err = Settings::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-x")])).unwrap_err();
        match err {
            ConfigError::Missing(vars) => assert_eq!(
                vars,
                vec!["GROQ_API_KEY", "PINECONE_API_KEY", "PINECONE_INDEX_NAME"]
            ),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_blank_values_count_as_missing() {
        let mut pairs = REQUIRED.to_vec();
        pairs[0] = ("GROQ_API_KEY", "   ");
        let err = Settings::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(err.to_string().contains("GROQ_API_KEY"));
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_lookup(lookup(REQUIRED)).unwrap();
        assert_eq!(settings.embedding_dimension, 1536);
        assert_eq!(settings.chunk_size, 500);
        assert_eq!(settings.chunk_overlap, 100);
        assert_eq!(settings.top_k, 3);
        assert_eq!(settings.max_file_bytes(), 10 * 1024 * 1024);
        assert_eq!(settings.groq_model, "llama3-8b-8192");
        assert_eq!(settings.vector_store, VectorStoreKind::Pinecone);
        assert_eq!(settings.socket_addr().unwrap().port(), 7860);
    }

    #[test]
    fn test_memory_store_does_not_need_pinecone() {
        let settings = Settings::from_lookup(lookup(&[
            ("GROQ_API_KEY", "g"),
            ("OPENAI_API_KEY", "o"),
            ("VECTOR_STORE", "memory"),
        ]))
        .unwrap();
        assert_eq!(settings.vector_store, VectorStoreKind::Memory);
        assert_eq!(settings.pinecone_index_name, DEFAULT_INDEX_NAME);
    }

    #[test]
    fn test_rejects_unparsable_numbers() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("TOP_K", "three"));
        let err = Settings::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(err.to_string().starts_with("invalid value for TOP_K"));
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_chunk() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("CHUNK_SIZE", "100"));
        pairs.push(("CHUNK_OVERLAP", "100"));
        assert!(Settings::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn test_masked_hides_keys() {
        let settings = Settings::from_lookup(lookup(REQUIRED)).unwrap();
        let masked = settings.masked();
        assert_eq!(masked["GROQ_API_KEY"], "gsk_...cdef");
        assert_eq!(masked["PINECONE_INDEX_NAME"], "docs");
        assert!(masked.values().all(|v| !v.contains("0123456789")));
    }

    #[test]
    fn test_mask_short_secret() {
        assert_eq!(mask_secret("abc"), "****");
        assert_eq!(mask_secret(""), "");
    }
}
