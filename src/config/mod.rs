// src/config/mod.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::marketplace::providers::{FixtureListing, WireFormat};

pub const ENV_CONFIG_PATH: &str = "WORTHIFY_CONFIG_PATH";
const ENV_VISION_KEY: &str = "GOOGLE_VISION_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub recognition: RecognitionConfig,
    pub marketplace: MarketplaceConfig,
    pub pipeline: PipelineConfig,
    pub call_log: CallLogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub endpoint: String,
    /// "ENV" means: read from GOOGLE_VISION_API_KEY
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub max_results: u32,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://vision.googleapis.com/v1/images:annotate".to_string(),
            api_key: Some("ENV".to_string()),
            timeout_ms: 8_000,
            max_results: 10,
        }
    }
}

impl RecognitionConfig {
    /// None leaves the recognizer without credentials (every call falls back).
    pub fn resolved_api_key(&self) -> Option<String> {
        resolve_key(self.api_key.as_deref(), ENV_VISION_KEY)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    /// Per-source time budget.
    pub timeout_ms: u64,
    /// Query order; also the order of the fetch output.
    pub sources: Vec<SourceConfig>,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            sources: vec![
                SourceConfig {
                    name: "eBay".to_string(),
                    kind: SourceKind::Http,
                    endpoint: Some(
                        "https://api.sandbox.ebay.com/buy/browse/v1/item_summary/search"
                            .to_string(),
                    ),
                    format: WireFormat::EbayBrowse,
                    api_key: Some("ENV".to_string()),
                    search_url: Some("https://www.ebay.com/sch/i.html?_nkw={keywords}".to_string()),
                    ..SourceConfig::default()
                },
                SourceConfig::fixture(
                    "Etsy",
                    vec![
                        FixtureListing::new(
                            "Handcrafted {keywords}",
                            185.0,
                            "https://www.etsy.com/search?q={keywords}",
                        ),
                        FixtureListing::new(
                            "Vintage {keywords} Art",
                            240.0,
                            "https://www.etsy.com/search?q={keywords}",
                        ),
                    ],
                ),
                SourceConfig::fixture(
                    "Amazon",
                    vec![
                        FixtureListing::new(
                            "{keywords} - New",
                            120.0,
                            "https://www.amazon.com/s?k={keywords}",
                        ),
                        FixtureListing::new(
                            "{keywords} - Bestseller",
                            95.0,
                            "https://www.amazon.com/s?k={keywords}",
                        ),
                    ],
                ),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Http,
    Fixture,
}

fn default_limit() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default)]
    pub kind: SourceKind,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub format: WireFormat,
    /// "ENV" means: read from `<NAME>_API_KEY` (upper-cased, non-alphanumerics as `_`)
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub search_url: Option<String>,
    /// Canned listings for `kind = "fixture"`.
    #[serde(default)]
    pub listings: Vec<FixtureListing>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: SourceKind::Http,
            endpoint: None,
            format: WireFormat::Listings,
            api_key: None,
            limit: default_limit(),
            search_url: None,
            listings: Vec::new(),
        }
    }
}

impl SourceConfig {
    pub fn fixture(name: &str, listings: Vec<FixtureListing>) -> Self {
        Self {
            name: name.to_string(),
            kind: SourceKind::Fixture,
            listings,
            ..Self::default()
        }
    }

    pub fn key_env_var(&self) -> String {
        let stem: String = self
            .name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{stem}_API_KEY")
    }

    pub fn resolved_api_key(&self) -> Option<String> {
        resolve_key(self.api_key.as_deref(), &self.key_env_var())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bound on one whole analysis (recognition + fan-out).
    pub deadline_ms: u64,
    /// Priced listings persisted as evidence.
    pub evidence_limit: usize,
    pub visual_match_cap: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 15_000,
            evidence_limit: 20,
            visual_match_cap: 15,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Memory,
    Jsonl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallLogConfig {
    /// Queue slots between callers and the sink task.
    pub capacity: usize,
    pub sink: SinkKind,
    /// JSONL file for `sink = "jsonl"`.
    pub path: Option<PathBuf>,
    /// Records kept in memory for the log endpoints.
    pub retention: usize,
}

impl Default for CallLogConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            sink: SinkKind::Memory,
            path: None,
            retention: 10_000,
        }
    }
}

impl AppConfig {
    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg: AppConfig = if ext == "json" {
            serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load config using env var + fallbacks:
    /// 1) $WORTHIFY_CONFIG_PATH
    /// 2) config/worthify.toml
    /// 3) config/worthify.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        let toml_p = PathBuf::from("config/worthify.toml");
        if toml_p.exists() {
            return Self::load_from(&toml_p);
        }
        let json_p = PathBuf::from("config/worthify.json");
        if json_p.exists() {
            return Self::load_from(&json_p);
        }
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for s in &self.marketplace.sources {
            if s.name.trim().is_empty() {
                bail!("marketplace source with empty name");
            }
            if !seen.insert(s.name.to_ascii_lowercase()) {
                bail!("duplicate marketplace source `{}`", s.name);
            }
            if s.kind == SourceKind::Http && s.endpoint.is_none() {
                bail!("source `{}`: http source needs an endpoint", s.name);
            }
        }
        if self.call_log.sink == SinkKind::Jsonl && self.call_log.path.is_none() {
            bail!("call_log.sink = \"jsonl\" requires call_log.path");
        }
        if self.pipeline.deadline_ms == 0 {
            bail!("pipeline.deadline_ms must be > 0");
        }
        Ok(())
    }
}

fn resolve_key(raw: Option<&str>, env_var: &str) -> Option<String> {
    let raw = raw?.trim();
    let key = if raw.eq_ignore_ascii_case("env") {
        std::env::var(env_var).ok()?
    } else {
        raw.to_string()
    };
    let key = key.trim().to_string();
    (!key.is_empty()).then_some(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn defaults_keep_source_order() {
        let cfg = AppConfig::default();
        let names: Vec<&str> = cfg
            .marketplace
            .sources
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["eBay", "Etsy", "Amazon"]);
        assert_eq!(cfg.pipeline.evidence_limit, 20);
        cfg.validate().unwrap();
    }

    #[test]
    fn key_env_var_is_derived_from_name() {
        let s = SourceConfig::fixture("Ruby Lane", Vec::new());
        assert_eq!(s.key_env_var(), "RUBY_LANE_API_KEY");
    }

    #[serial_test::serial]
    #[test]
    fn env_keys_resolve_and_blank_means_missing() {
        env::set_var(ENV_VISION_KEY, "  vision-123 ");
        assert_eq!(
            RecognitionConfig::default().resolved_api_key().as_deref(),
            Some("vision-123")
        );
        env::set_var(ENV_VISION_KEY, "");
        assert_eq!(RecognitionConfig::default().resolved_api_key(), None);
        env::remove_var(ENV_VISION_KEY);
        assert_eq!(RecognitionConfig::default().resolved_api_key(), None);

        let literal = RecognitionConfig {
            api_key: Some("literal".into()),
            ..RecognitionConfig::default()
        };
        assert_eq!(literal.resolved_api_key().as_deref(), Some("literal"));
    }

    #[test]
    fn validation_rejects_duplicates_and_missing_endpoint() {
        let mut cfg = AppConfig::default();
        cfg.marketplace
            .sources
            .push(SourceConfig::fixture("etsy", Vec::new()));
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.marketplace.sources[0].endpoint = None;
        assert!(cfg.validate().is_err());
    }
}
