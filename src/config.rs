use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub linking: LinkingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    /// Glob patterns matched against file names when importing a directory.
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.json".to_string(), "**/*.jsonl".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LinkingConfig {
    /// Cosine similarity cutoff for `similar` links.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Maximum gap between conversations in the same project for a
    /// `continuation` link.
    #[serde(default = "default_continuation_window_hours")]
    pub continuation_window_hours: i64,
}

impl Default for LinkingConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            continuation_window_hours: default_continuation_window_hours(),
        }
    }
}

fn default_similarity_threshold() -> f64 {
    0.7
}
fn default_continuation_window_hours() -> i64 {
    6
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// Weight toward the semantic channel in hybrid scoring.
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: i64,
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: default_hybrid_alpha(),
            candidate_k: default_candidate_k(),
            final_limit: default_final_limit(),
        }
    }
}

fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_candidate_k() -> i64 {
    80
}
fn default_final_limit() -> i64 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.search.final_limit < 1 {
        anyhow::bail!("search.final_limit must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.search.hybrid_alpha) {
        anyhow::bail!("search.hybrid_alpha must be in [0.0, 1.0]");
    }

    if !(0.0..=1.0).contains(&config.linking.similarity_threshold) {
        anyhow::bail!("linking.similarity_threshold must be in [0.0, 1.0]");
    }

    if config.linking.continuation_window_hours < 0 {
        anyhow::bail!("linking.continuation_window_hours must be >= 0");
    }

    match config.embedding.provider.as_str() {
        "local" | "disabled" => {}
        "openai" => {
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!("embedding.dims must be > 0 when provider is 'openai'");
            }
            if config.embedding.model.is_none() {
                anyhow::bail!("embedding.model must be specified when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be local, openai, or disabled.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_minimal_config_defaults() {
        let f = write_config(
            r#"
[db]
path = "/tmp/atlas.sqlite"

[server]
bind = "127.0.0.1:7700"
"#,
        );
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.embedding.provider, "local");
        assert!((cfg.linking.similarity_threshold - 0.7).abs() < 1e-9);
        assert_eq!(cfg.linking.continuation_window_hours, 6);
        assert_eq!(cfg.search.final_limit, 20);
        assert_eq!(cfg.import.include_globs.len(), 2);
    }

    #[test]
    fn test_openai_requires_model_and_dims() {
        let f = write_config(
            r#"
[db]
path = "/tmp/atlas.sqlite"

[embedding]
provider = "openai"

[server]
bind = "127.0.0.1:7700"
"#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let f = write_config(
            r#"
[db]
path = "/tmp/atlas.sqlite"

[linking]
similarity_threshold = 1.5

[server]
bind = "127.0.0.1:7700"
"#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let f = write_config(
            r#"
[db]
path = "/tmp/atlas.sqlite"

[embedding]
provider = "chroma"

[server]
bind = "127.0.0.1:7700"
"#,
        );
        assert!(load_config(f.path()).is_err());
    }
}
