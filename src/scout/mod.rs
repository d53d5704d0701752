// src/scout/mod.rs
pub mod feed;
pub mod forum;
pub mod types;

use std::collections::HashMap;

use anyhow::{anyhow, Result};

use crate::config::AppConfig;
use crate::scout::types::Scout;

/// Normalize text pulled out of a feed or posting: decode HTML entities,
/// strip tags, collapse whitespace, trim.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();

    out.trim().to_string()
}

/// Factory used by the registry to build a scout from configuration.
pub type ScoutFactory = Box<dyn Fn(&AppConfig) -> Result<Box<dyn Scout>> + Send + Sync>;

/// Static mapping from source identifiers to scout constructors.
///
/// Identifiers come from the `sources` list in the config file. An id with
/// no registered factory, or a factory that fails (missing credentials,
/// empty endpoint list), surfaces as an error the pipeline logs and skips.
pub struct ScoutRegistry {
    factories: HashMap<&'static str, ScoutFactory>,
}

impl ScoutRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in scouts: `forum` and `feed`.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register(
            "forum",
            Box::new(|cfg: &AppConfig| {
                Ok(Box::new(forum::ForumScout::try_new(&cfg.forum)?) as Box<dyn Scout>)
            }),
        );
        reg.register(
            "feed",
            Box::new(|cfg: &AppConfig| {
                Ok(Box::new(feed::FeedScout::try_new(&cfg.feed)?) as Box<dyn Scout>)
            }),
        );
        reg
    }

    pub fn register(&mut self, id: &'static str, factory: ScoutFactory) {
        self.factories.insert(id, factory);
    }

    pub fn resolve(&self, id: &str, cfg: &AppConfig) -> Result<Box<dyn Scout>> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| anyhow!("unknown source identifier: {id}"))?;
        factory(cfg)
    }
}

impl Default for ScoutRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
