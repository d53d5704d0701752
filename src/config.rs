// src/config.rs
use std::path::{Path, PathBuf};
use std::{env, fs};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

pub const ENV_CONFIG_PATH: &str = "PROSPECTOR_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/prospector.toml";

fn default_post_limit() -> u32 {
    50
}
fn default_temperature() -> f32 {
    0.5
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Source identifiers to activate, in scan order.
    pub sources: Vec<String>,
    pub forum: ForumConfig,
    pub feed: FeedConfig,
    pub qualifier: QualifierConfig,
    pub resume_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForumConfig {
    /// "ENV" means: read from FORUM_CLIENT_ID.
    pub client_id: String,
    /// "ENV" means: read from FORUM_CLIENT_SECRET.
    pub client_secret: String,
    /// "ENV" means: read from FORUM_USER_AGENT.
    pub user_agent: String,
    /// Sub-forums to scan, in order.
    pub subforums: Vec<String>,
    /// Most-recent posts fetched per sub-forum.
    pub post_limit: u32,
}

impl Default for ForumConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            user_agent: String::new(),
            subforums: Vec::new(),
            post_limit: default_post_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Feed URLs to scan, in order.
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QualifierConfig {
    /// "ENV" means: read from OPENAI_API_KEY.
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    /// Skills and interests the model should weigh, in order.
    pub keywords: Vec<String>,
}

impl Default for QualifierConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            temperature: default_temperature(),
            keywords: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load using env override then the default path:
    /// 1) $PROSPECTOR_CONFIG_PATH
    /// 2) config/prospector.toml
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from_file(&pb);
            }
            bail!("{ENV_CONFIG_PATH} points to a non-existent path");
        }
        Self::load_from_file(Path::new(DEFAULT_CONFIG_PATH))
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: AppConfig = toml::from_str(s).context("parsing config toml")?;

        cfg.forum.client_id = resolve_env(&cfg.forum.client_id, "FORUM_CLIENT_ID");
        cfg.forum.client_secret = resolve_env(&cfg.forum.client_secret, "FORUM_CLIENT_SECRET");
        cfg.forum.user_agent = resolve_env(&cfg.forum.user_agent, "FORUM_USER_AGENT");
        cfg.qualifier.api_key = resolve_env(&cfg.qualifier.api_key, "OPENAI_API_KEY");

        // Sanitize temperature to a usable sampling range.
        if !(0.0..=2.0).contains(&cfg.qualifier.temperature) {
            cfg.qualifier.temperature = default_temperature();
        }

        Ok(cfg)
    }
}

/// Resolve the "ENV" indirection: a literal value passes through, "ENV"
/// reads the named variable. A missing variable resolves to an empty string;
/// components treat empty credentials as a disabled state rather than an
/// error at load time.
fn resolve_env(value: &str, var: &str) -> String {
    if value.trim().eq_ignore_ascii_case("env") {
        env::var(var).unwrap_or_default()
    } else {
        value.to_string()
    }
}

/// Read the resume file supplied for qualifier context. A missing or
/// unreadable file degrades to an empty resume with a warning.
pub fn load_resume(path: Option<&Path>) -> String {
    let Some(p) = path else {
        return String::new();
    };
    match fs::read_to_string(p) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(
                error = ?e,
                path = %p.display(),
                "could not read resume file; continuing without resume"
            );
            String::new()
        }
    }
}
