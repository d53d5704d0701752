// src/scout/feed.rs
use std::collections::HashSet;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;

use crate::config::FeedConfig;
use crate::scout::normalize_text;
use crate::scout::types::{Lead, Scout};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Default, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    #[serde(rename = "content:encoded")]
    content_encoded: Option<String>,
}

/// Scans configured RSS feeds for job postings.
pub struct FeedScout {
    mode: Mode,
}

enum Mode {
    Http {
        http: reqwest::Client,
        urls: Vec<String>,
    },
    // (feed url, raw xml body) pairs, scanned in order.
    Fixture(Vec<(String, String)>),
}

impl FeedScout {
    /// Build an HTTP-backed scout. Fails when no feeds are configured so
    /// the pipeline can skip this source and keep going.
    pub fn try_new(cfg: &FeedConfig) -> Result<Self> {
        if cfg.urls.is_empty() {
            bail!("no feed urls configured");
        }
        let http = reqwest::Client::builder()
            .user_agent("job-prospector/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(15))
            .build()
            .context("building feed http client")?;
        Ok(Self {
            mode: Mode::Http {
                http,
                urls: cfg.urls.clone(),
            },
        })
    }

    /// Scout over canned feed bodies; used by tests and offline runs.
    pub fn from_fixture(pairs: Vec<(String, String)>) -> Self {
        Self {
            mode: Mode::Fixture(pairs),
        }
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        let Mode::Http { http, .. } = &self.mode else {
            bail!("fetch called in fixture mode");
        };
        let resp = http.get(url).send().await.context("fetching feed")?;
        let status = resp.status();
        if !status.is_success() {
            bail!("feed request returned {status}");
        }
        resp.text().await.context("reading feed body")
    }
}

#[async_trait]
impl Scout for FeedScout {
    async fn find_leads(&self) -> Vec<Lead> {
        let feeds: Vec<(String, Option<String>)> = match &self.mode {
            Mode::Fixture(pairs) => pairs
                .iter()
                .map(|(u, b)| (u.clone(), Some(b.clone())))
                .collect(),
            Mode::Http { urls, .. } => urls.iter().map(|u| (u.clone(), None)).collect(),
        };

        tracing::info!(feeds = feeds.len(), "starting feed scan");

        let mut leads: Vec<Lead> = Vec::new();
        let mut seen_links: HashSet<String> = HashSet::new();

        for (feed_url, fixture_body) in feeds {
            let body = match fixture_body {
                Some(b) => b,
                None => match self.fetch(&feed_url).await {
                    Ok(b) => b,
                    Err(e) => {
                        tracing::warn!(error = ?e, feed = %feed_url, "feed fetch failed");
                        counter!("scout_errors_total").increment(1);
                        continue;
                    }
                },
            };

            let t0 = std::time::Instant::now();
            let (items, malformed) = parse_feed(&body);
            histogram!("feed_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
            if malformed {
                tracing::warn!(
                    feed = %feed_url,
                    recovered = items.len(),
                    "feed may be malformed; using recoverable entries"
                );
                counter!("scout_errors_total").increment(1);
            }

            let source = host_label(&feed_url);
            for item in items {
                let Some(link) = item.link.filter(|l| !l.trim().is_empty()) else {
                    continue;
                };
                if !seen_links.insert(link.clone()) {
                    continue;
                }
                let body_raw = match item.description {
                    Some(d) if !d.trim().is_empty() => d,
                    _ => item.content_encoded.unwrap_or_default(),
                };
                leads.push(Lead {
                    // Entry link doubles as the id; feeds dedup by link anyway.
                    id: link.clone(),
                    title: normalize_text(item.title.as_deref().unwrap_or_default()),
                    body: normalize_text(&body_raw),
                    url: link,
                    source: source.clone(),
                });
            }
        }

        counter!("scout_leads_total").increment(leads.len() as u64);
        tracing::info!(count = leads.len(), "feed scan complete");
        leads
    }

    fn name(&self) -> &'static str {
        "feed"
    }
}

/// Strict serde parse first; on failure, salvage every fully-closed `<item>`
/// that precedes the error. Returns the items plus whether the feed was
/// malformed.
fn parse_feed(xml: &str) -> (Vec<Item>, bool) {
    let scrubbed = scrub_html_entities_for_xml(xml);
    match from_str::<Rss>(&scrubbed) {
        Ok(rss) => (rss.channel.items, false),
        Err(e) => {
            tracing::debug!(error = ?e, "strict feed parse failed; salvaging");
            (salvage_items(&scrubbed), true)
        }
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

fn salvage_items(xml: &str) -> Vec<Item> {
    #[derive(Clone, Copy)]
    enum Field {
        Title,
        Link,
        Description,
        Content,
    }

    let mut reader = Reader::from_str(xml);
    let mut items = Vec::new();
    let mut current: Option<Item> = None;
    let mut field: Option<Field> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                match e.name().as_ref() {
                    b"item" => current = Some(Item::default()),
                    b"title" => field = Some(Field::Title),
                    b"link" => field = Some(Field::Link),
                    b"description" => field = Some(Field::Description),
                    b"content:encoded" => field = Some(Field::Content),
                    _ => field = None,
                }
                text.clear();
            }
            Ok(Event::Text(t)) => {
                if field.is_some() {
                    if let Ok(t) = t.unescape() {
                        text.push_str(&t);
                    }
                }
            }
            Ok(Event::CData(t)) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"item" {
                    if let Some(item) = current.take() {
                        items.push(item);
                    }
                } else if let (Some(f), Some(item)) = (field.take(), current.as_mut()) {
                    let value = Some(text.trim().to_string());
                    match f {
                        Field::Title => item.title = value,
                        Field::Link => item.link = value,
                        Field::Description => item.description = value,
                        Field::Content => item.content_encoded = value,
                    }
                }
                text.clear();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            // Keep whatever parsed cleanly before the error.
            Err(_) => break,
        }
    }
    items
}

fn host_label(feed_url: &str) -> String {
    reqwest::Url::parse(feed_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| feed_url.to_string())
}
