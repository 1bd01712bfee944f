use medichat_core::SearchScope;
use medichat_core::gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Configuration for the chat service, read from the environment
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub pinecone_api_key: Option<String>,
    pub pinecone_index_host: Option<String>,
    pub scope: SearchScope,
    pub generation_timeout: Duration,
    pub fastembed_cache_dir: Option<PathBuf>,
    pub max_upload_bytes: usize,
    pub port: u16,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let gemini_api_key = get("GEMINI_API_KEY").ok_or(ConfigError::Missing("GEMINI_API_KEY"))?;

        let scope = SearchScope::new(
            get("PINECONE_INDEX").unwrap_or_else(|| "medic".to_string()),
            get("PINECONE_NAMESPACE").unwrap_or_else(|| "ns1".to_string()),
            parse_or(&get, "RETRIEVAL_TOP_K", 5usize)?,
        );
        if scope.top_k == 0 {
            return Err(ConfigError::Invalid {
                key: "RETRIEVAL_TOP_K",
                value: "0".into(),
            });
        }

        Ok(Self {
            gemini_api_key,
            gemini_model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            gemini_base_url: get("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            pinecone_api_key: get("PINECONE_API_KEY"),
            pinecone_index_host: get("PINECONE_INDEX_HOST"),
            scope,
            generation_timeout: Duration::from_secs(parse_or(&get, "GENERATION_TIMEOUT_SECS", 60u64)?),
            fastembed_cache_dir: get("FASTEMBED_CACHE_DIR").map(PathBuf::from),
            max_upload_bytes: parse_or(&get, "MAX_UPLOAD_BYTES", 10 * 1024 * 1024usize)?,
            port: parse_or(&get, "PORT", 3000u16)?,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}
