use anyhow::{Context, Result, bail};
use chrono::{Days, NaiveDate};
use reqwest::Url;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::PageviewSettings;
use crate::http::{FetchError, HttpTransport, Pause, RetryPolicy};
use crate::model::{ArticleRecord, PageviewWindowSummary};
use crate::util::compact_date;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageviewWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PageviewWindow {
    /// Fourteen days ending two days before `today`.
    pub fn ending_before(today: NaiveDate) -> Self {
        Self {
            start: today - Days::new(15),
            end: today - Days::new(2),
        }
    }

    pub fn summary(&self) -> PageviewWindowSummary {
        PageviewWindowSummary {
            start: compact_date(self.start),
            end: compact_date(self.end),
        }
    }
}

pub struct PageviewAggregator<'a> {
    transport: &'a dyn HttpTransport,
    pause: &'a dyn Pause,
    base: Url,
    lang: String,
    window: PageviewWindow,
    retry: RetryPolicy,
}

impl<'a> PageviewAggregator<'a> {
    pub fn new(
        lang: &str,
        settings: &PageviewSettings,
        today: NaiveDate,
        transport: &'a dyn HttpTransport,
        pause: &'a dyn Pause,
    ) -> Result<Self> {
        let base = Url::parse(&settings.api_url)
            .with_context(|| format!("invalid pageview API URL: {}", settings.api_url))?;
        if base.cannot_be_a_base() {
            bail!("pageview API URL cannot take path segments: {}", settings.api_url);
        }

        Ok(Self {
            transport,
            pause,
            base,
            lang: lang.to_string(),
            window: PageviewWindow::ending_before(today),
            retry: RetryPolicy::new(settings.max_attempts, settings.retry_delay_ms),
        })
    }

    pub fn window(&self) -> PageviewWindow {
        self.window
    }

    pub fn url_for(&self, title: &str) -> Url {
        let project = format!("{}.wikipedia", self.lang);
        let start = compact_date(self.window.start);
        let end = compact_date(self.window.end);
        let article = title.replace(' ', "_");

        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend([
                project.as_str(),
                "all-access",
                "all-agents",
                article.as_str(),
                "daily",
                start.as_str(),
                end.as_str(),
            ]);
        }
        url
    }

    pub fn average_views(&self, title: &str) -> Option<f64> {
        let url = self.url_for(title);
        let items = self.retry.run(self.pause, "pageviews", || {
            let body = self.transport.get(&url)?.into_json()?;
            let items = body
                .get("items")
                .and_then(Value::as_array)
                .ok_or_else(|| FetchError::Malformed("missing items".to_string()))?;
            if items.is_empty() {
                return Err(FetchError::Empty);
            }
            Ok(items.clone())
        });

        let items = match items {
            Ok(items) => items,
            Err(err) => {
                warn!(title, error = %err, "no pageview data");
                return None;
            }
        };

        let average = average_of(&items);
        debug!(title, days = items.len(), average = ?average, "aggregated pageviews");
        average
    }

    pub fn apply(&self, mut record: ArticleRecord) -> ArticleRecord {
        if record.average_views.is_none() {
            record.average_views = self.average_views(&record.title);
        }
        record
    }
}

/// Items without a numeric `views` field are left out of both sum and count.
fn average_of(items: &[Value]) -> Option<f64> {
    let (total, days) = items
        .iter()
        .filter_map(|item| item.get("views").and_then(Value::as_f64))
        .fold((0.0, 0usize), |(total, days), views| (total + views, days + 1));

    (days > 0).then(|| total / days as f64)
}
