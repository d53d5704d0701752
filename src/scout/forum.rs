// src/scout/forum.rs
use std::collections::HashSet;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;

use crate::config::ForumConfig;
use crate::scout::types::{Lead, Scout};

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_BASE: &str = "https://oauth.reddit.com";
const PUBLIC_BASE: &str = "https://www.reddit.com";

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<ListingChild>,
}

#[derive(Debug, Deserialize)]
struct ListingChild {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    id: String,
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    permalink: String,
    #[serde(default)]
    url: String,
}

/// Error payload the API returns instead of a listing (404/403 bodies).
#[derive(Debug, Deserialize)]
struct ApiError {
    error: u32,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Scans a read-only forum API for recent postings across configured
/// sub-forums.
pub struct ForumScout {
    subforums: Vec<String>,
    post_limit: u32,
    mode: Mode,
}

enum Mode {
    Http {
        http: reqwest::Client,
        client_id: String,
        client_secret: String,
    },
    // (subforum, raw listing body) pairs, scanned in order.
    Fixture(Vec<(String, String)>),
}

impl ForumScout {
    /// Build an HTTP-backed scout. Fails when any credential is missing so
    /// the pipeline can skip this source and keep going.
    pub fn try_new(cfg: &ForumConfig) -> Result<Self> {
        if cfg.client_id.is_empty() || cfg.client_secret.is_empty() || cfg.user_agent.is_empty() {
            tracing::error!(
                "forum credentials (FORUM_CLIENT_ID, FORUM_CLIENT_SECRET, FORUM_USER_AGENT) \
                 are not fully configured; forum scout disabled"
            );
            bail!("forum credentials not configured");
        }
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(15))
            .build()
            .context("building forum http client")?;
        Ok(Self {
            subforums: cfg.subforums.clone(),
            post_limit: cfg.post_limit,
            mode: Mode::Http {
                http,
                client_id: cfg.client_id.clone(),
                client_secret: cfg.client_secret.clone(),
            },
        })
    }

    /// Scout over canned listing bodies; used by tests and offline runs.
    pub fn from_fixture(pairs: Vec<(String, String)>, post_limit: u32) -> Self {
        Self {
            subforums: pairs.iter().map(|(s, _)| s.clone()).collect(),
            post_limit,
            mode: Mode::Fixture(pairs),
        }
    }

    /// Client-credentials token fetch; the API only needs read access.
    async fn authenticate(&self) -> Result<Option<String>> {
        match &self.mode {
            Mode::Fixture(_) => Ok(None),
            Mode::Http {
                http,
                client_id,
                client_secret,
            } => {
                let resp = http
                    .post(TOKEN_URL)
                    .basic_auth(client_id, Some(client_secret))
                    .form(&[("grant_type", "client_credentials")])
                    .send()
                    .await
                    .context("requesting forum access token")?;
                let status = resp.status();
                if !status.is_success() {
                    bail!("forum token endpoint returned {status}");
                }
                let token: TokenResponse = resp
                    .json()
                    .await
                    .context("decoding forum token response")?;
                Ok(Some(token.access_token))
            }
        }
    }

    async fn listing_body(&self, token: Option<&str>, subforum: &str) -> Result<String> {
        match &self.mode {
            Mode::Fixture(pairs) => pairs
                .iter()
                .find(|(s, _)| s == subforum)
                .map(|(_, body)| body.clone())
                .ok_or_else(|| anyhow!("no fixture for subforum {subforum}")),
            Mode::Http { http, .. } => {
                let url = format!(
                    "{API_BASE}/r/{subforum}/new.json?limit={}",
                    self.post_limit
                );
                let mut req = http.get(&url);
                if let Some(t) = token {
                    req = req.bearer_auth(t);
                }
                let resp = req.send().await.context("fetching subforum listing")?;
                let status = resp.status();
                if status == reqwest::StatusCode::FORBIDDEN {
                    bail!("access denied");
                }
                if status == reqwest::StatusCode::NOT_FOUND {
                    bail!("not found or private");
                }
                if !status.is_success() {
                    bail!("listing request returned {status}");
                }
                resp.text().await.context("reading subforum listing body")
            }
        }
    }
}

fn parse_listing(subforum: &str, body: &str, limit: u32) -> Result<Vec<Lead>> {
    // 404/403-style bodies arrive as an error object, not a listing.
    if let Ok(err) = serde_json::from_str::<ApiError>(body) {
        bail!(
            "api error {}: {}",
            err.error,
            err.message.unwrap_or_else(|| "unknown".to_string())
        );
    }

    let listing: Listing =
        serde_json::from_str(body).context("parsing subforum listing json")?;

    let mut out = Vec::with_capacity(listing.data.children.len());
    for child in listing.data.children.into_iter().take(limit as usize) {
        let post = child.data;
        let url = if post.permalink.is_empty() {
            post.url
        } else {
            format!("{PUBLIC_BASE}{}", post.permalink)
        };
        out.push(Lead {
            id: post.id,
            title: post.title,
            body: post.selftext,
            url,
            source: format!("r/{subforum}"),
        });
    }
    Ok(out)
}

#[async_trait]
impl Scout for ForumScout {
    async fn find_leads(&self) -> Vec<Lead> {
        let token = match self.authenticate().await {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(error = ?e, "forum authentication failed; skipping forum scan");
                counter!("scout_errors_total").increment(1);
                return Vec::new();
            }
        };

        tracing::info!(
            subforums = self.subforums.len(),
            limit = self.post_limit,
            "starting forum scan"
        );

        let mut leads: Vec<Lead> = Vec::new();
        let mut seen_ids: HashSet<String> = HashSet::new();

        for subforum in &self.subforums {
            let body = match self.listing_body(token.as_deref(), subforum).await {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(error = ?e, subforum = %subforum, "subforum scan failed");
                    counter!("scout_errors_total").increment(1);
                    continue;
                }
            };
            match parse_listing(subforum, &body, self.post_limit) {
                Ok(batch) => {
                    // Cross-posts repeat ids across sub-forums; keep the first.
                    for lead in batch {
                        if seen_ids.insert(lead.id.clone()) {
                            leads.push(lead);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = ?e, subforum = %subforum, "subforum listing unusable");
                    counter!("scout_errors_total").increment(1);
                }
            }
        }

        counter!("scout_leads_total").increment(leads.len() as u64);
        tracing::info!(count = leads.len(), "forum scan complete");
        leads
    }

    fn name(&self) -> &'static str {
        "forum"
    }
}
