use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{Context, Result};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::http::{FetchError, HttpTransport, Pause, RetryPolicy};

const TALK_PREFIX: &str = "Talk:";
pub const CONTENT_RETRY_DELAY_MS: u64 = 500;
const MAX_QUERY_PARTS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TalkPage {
    Text(String),
    Missing,
    Redirect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleRevision {
    pub revision_id: u64,
    pub text: String,
}

/// Bulk access to talk pages and current revisions, keyed by the titles the caller asked for.
pub trait ContentProvider {
    fn talk_pages(&self, titles: &[String]) -> Result<HashMap<String, TalkPage>>;
    fn revisions(&self, titles: &[String]) -> Result<HashMap<String, ArticleRevision>>;
}

pub struct MediaWikiProvider<'a> {
    transport: &'a dyn HttpTransport,
    pause: &'a dyn Pause,
    api: Url,
    retry: RetryPolicy,
}

impl<'a> MediaWikiProvider<'a> {
    pub fn new(
        api_url: &str,
        retry: RetryPolicy,
        transport: &'a dyn HttpTransport,
        pause: &'a dyn Pause,
    ) -> Result<Self> {
        let api = Url::parse(api_url).with_context(|| format!("invalid wiki API URL: {api_url}"))?;
        Ok(Self {
            transport,
            pause,
            api,
            retry,
        })
    }

    fn query_url(&self, titles: &[String], continuation: &[(String, String)]) -> Url {
        let mut url = self.api.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("action", "query")
                .append_pair("format", "json")
                .append_pair("formatversion", "2")
                .append_pair("prop", "revisions|info")
                .append_pair("rvprop", "ids|content")
                .append_pair("rvslots", "main")
                .append_pair("titles", &titles.join("|"));
            for (key, value) in continuation {
                pairs.append_pair(key, value);
            }
        }
        url
    }

    /// Follows `continue` until the API reports the result complete, merging every part.
    fn query_pages(&self, titles: &[String]) -> Result<QueryPayload, FetchError> {
        let mut merged = QueryPayload::default();
        let mut continuation = Vec::<(String, String)>::new();

        for part in 1..=MAX_QUERY_PARTS {
            let url = self.query_url(titles, &continuation);
            let response = self.retry.run(self.pause, "wiki content query", || {
                let payload = self.transport.get(&url)?.into_json()?;
                if let Some(error) = payload.get("error") {
                    let code = error.get("code").and_then(Value::as_str).unwrap_or("unknown_error");
                    return Err(FetchError::Malformed(format!("wiki API error [{code}]")));
                }
                serde_json::from_value::<QueryResponse>(payload)
                    .map_err(|err| FetchError::Malformed(format!("unexpected query shape: {err}")))
            })?;

            merged.merge(response.query);
            continuation = response.continuation.map(continuation_pairs).unwrap_or_default();
            if continuation.is_empty() {
                return Ok(merged);
            }
            debug!(part, titles = titles.len(), "following query continuation");
        }

        Err(FetchError::Malformed(format!(
            "query still incomplete after {MAX_QUERY_PARTS} parts"
        )))
    }
}

fn continuation_pairs(values: BTreeMap<String, Value>) -> Vec<(String, String)> {
    values
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::String(text) => Some((key, text)),
            Value::Number(number) => Some((key, number.to_string())),
            _ => None,
        })
        .collect()
}

impl ContentProvider for MediaWikiProvider<'_> {
    fn talk_pages(&self, titles: &[String]) -> Result<HashMap<String, TalkPage>> {
        let requested = unique_titles(titles.iter().map(|title| format!("{TALK_PREFIX}{title}")));
        let payload = self
            .query_pages(&requested)
            .context("failed to fetch talk pages")?;
        let pages = payload.pages_by_requested_title();

        let mut found = HashMap::new();
        for title in titles {
            let Some(page) = pages.get(format!("{TALK_PREFIX}{title}").as_str()) else {
                continue;
            };
            let talk = if page.missing || page.invalid {
                TalkPage::Missing
            } else if page.redirect {
                TalkPage::Redirect
            } else {
                match page.main_content() {
                    Some((_, content)) => TalkPage::Text(content.to_string()),
                    None => TalkPage::Missing,
                }
            };
            found.insert(title.clone(), talk);
        }

        debug!(requested = titles.len(), found = found.len(), "fetched talk pages");
        Ok(found)
    }

    fn revisions(&self, titles: &[String]) -> Result<HashMap<String, ArticleRevision>> {
        let requested = unique_titles(titles.iter().cloned());
        let payload = self
            .query_pages(&requested)
            .context("failed to fetch article revisions")?;
        let pages = payload.pages_by_requested_title();

        let mut found = HashMap::new();
        for title in titles {
            let Some(page) = pages.get(title.as_str()) else {
                continue;
            };
            if page.missing || page.invalid {
                continue;
            }
            if page.redirect {
                warn!(title = %title, "article is a redirect; using redirect page content");
            }
            if let Some((revision_id, content)) = page.main_content() {
                found.insert(
                    title.clone(),
                    ArticleRevision {
                        revision_id,
                        text: content.to_string(),
                    },
                );
            }
        }

        debug!(requested = titles.len(), found = found.len(), "fetched article revisions");
        Ok(found)
    }
}

fn unique_titles(titles: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    titles.filter(|title| seen.insert(title.clone())).collect()
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    normalized: Vec<NormalizedTitle>,
    #[serde(default)]
    pages: Vec<PageItem>,
}

impl QueryPayload {
    /// Continued parts repeat pages whose revisions did not fit into an earlier part.
    fn merge(&mut self, part: QueryPayload) {
        self.normalized.extend(part.normalized);
        for page in part.pages {
            match self.pages.iter_mut().find(|known| known.title == page.title) {
                Some(known) => {
                    if known.revisions.is_empty() {
                        known.revisions = page.revisions;
                    }
                    known.missing |= page.missing;
                    known.invalid |= page.invalid;
                    known.redirect |= page.redirect;
                }
                None => self.pages.push(page),
            }
        }
    }

    /// Pages keyed by the title as it was sent, following `normalized` back from the canonical form.
    fn pages_by_requested_title(&self) -> HashMap<&str, &PageItem> {
        let by_title = self
            .pages
            .iter()
            .map(|page| (page.title.as_str(), page))
            .collect::<HashMap<&str, &PageItem>>();

        let mut pages = by_title.clone();
        for entry in &self.normalized {
            if let Some(page) = by_title.get(entry.to.as_str()) {
                pages.insert(entry.from.as_str(), *page);
            }
        }
        pages
    }
}

#[derive(Debug, Deserialize)]
struct NormalizedTitle {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
struct PageItem {
    title: String,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    invalid: bool,
    #[serde(default)]
    redirect: bool,
    #[serde(default)]
    revisions: Vec<RevisionItem>,
}

impl PageItem {
    fn main_content(&self) -> Option<(u64, &str)> {
        let revision = self.revisions.first()?;
        let content = revision
            .slots
            .main
            .content
            .as_deref()
            .or(revision.content.as_deref())?;
        Some((revision.revid, content))
    }
}

#[derive(Debug, Deserialize)]
struct RevisionItem {
    #[serde(default)]
    revid: u64,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    slots: RevisionSlots,
}

#[derive(Debug, Deserialize, Default)]
struct RevisionSlots {
    #[serde(default)]
    main: MainSlot,
}

#[derive(Debug, Deserialize, Default)]
struct MainSlot {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
pub mod testing {
    use std::cell::Cell;
    use std::collections::HashMap;

    use anyhow::{Result, bail};

    use super::{ArticleRevision, ContentProvider, TalkPage};

    /// Serves fixed pages; batches containing a title in `failing` fail as a whole.
    #[derive(Default)]
    pub struct InMemoryProvider {
        pub talk: HashMap<String, TalkPage>,
        pub articles: HashMap<String, ArticleRevision>,
        pub failing: Vec<String>,
        pub talk_calls: Cell<usize>,
        pub revision_calls: Cell<usize>,
    }

    impl InMemoryProvider {
        pub fn with_page(mut self, title: &str, talk: &str, revision_id: u64, text: &str) -> Self {
            self.talk
                .insert(title.to_string(), TalkPage::Text(talk.to_string()));
            self.articles.insert(
                title.to_string(),
                ArticleRevision {
                    revision_id,
                    text: text.to_string(),
                },
            );
            self
        }

        fn check(&self, titles: &[String]) -> Result<()> {
            if let Some(title) = titles.iter().find(|title| self.failing.contains(title)) {
                bail!("simulated outage while fetching {title}");
            }
            Ok(())
        }
    }

    impl ContentProvider for InMemoryProvider {
        fn talk_pages(&self, titles: &[String]) -> Result<HashMap<String, TalkPage>> {
            self.talk_calls.set(self.talk_calls.get() + 1);
            self.check(titles)?;
            Ok(titles
                .iter()
                .filter_map(|title| self.talk.get(title).map(|page| (title.clone(), page.clone())))
                .collect())
        }

        fn revisions(&self, titles: &[String]) -> Result<HashMap<String, ArticleRevision>> {
            self.revision_calls.set(self.revision_calls.get() + 1);
            self.check(titles)?;
            Ok(titles
                .iter()
                .filter_map(|title| {
                    self.articles
                        .get(title)
                        .map(|revision| (title.clone(), revision.clone()))
                })
                .collect())
        }
    }
}
