// src/scout/types.rs

/// One standardized job lead, as produced by any scout.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct Lead {
    pub id: String,
    pub title: String,
    pub body: String,
    pub url: String,
    pub source: String, // e.g., "r/forhire", "weworkremotely.com"
}

/// A scout searches one external origin for potential job leads.
///
/// Implementations own their configuration and handle recoverable failures
/// (network errors, auth problems, malformed payloads) internally, returning
/// whatever leads they did manage to collect. The set returned by one call
/// carries no duplicate dedup keys (post id or entry link, per variant).
#[async_trait::async_trait]
pub trait Scout: Send + Sync {
    async fn find_leads(&self) -> Vec<Lead>;
    fn name(&self) -> &'static str;
}
