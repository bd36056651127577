use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::Result;

use tracing::{debug, info, warn};

use crate::classify::classify;
use crate::model::ArticleRecord;
use crate::pageviews::PageviewAggregator;
use crate::prediction::PredictionClient;
use crate::provider::{ArticleRevision, ContentProvider, TalkPage};
use crate::rating::AssessmentExtractor;
use crate::tasks::TaskFeatureEngine;

/// Content preloaded for one requested title.
#[derive(Debug, Clone)]
pub struct PreloadedPage {
    pub title: String,
    pub talk: Option<TalkPage>,
    pub revision: Option<ArticleRevision>,
}

pub struct BatchPipeline<'a> {
    provider: &'a dyn ContentProvider,
    assessor: AssessmentExtractor,
    predictor: PredictionClient<'a>,
    pageviews: PageviewAggregator<'a>,
    tasks: TaskFeatureEngine,
    batch_size: usize,
}

impl<'a> BatchPipeline<'a> {
    pub fn new(
        provider: &'a dyn ContentProvider,
        assessor: AssessmentExtractor,
        predictor: PredictionClient<'a>,
        pageviews: PageviewAggregator<'a>,
        tasks: TaskFeatureEngine,
        batch_size: usize,
    ) -> Self {
        Self {
            provider,
            assessor,
            predictor,
            pageviews,
            tasks,
            batch_size: batch_size.max(1),
        }
    }

    pub fn process<I>(&self, titles: I) -> ProcessedRecords<'_, 'a, I::IntoIter>
    where
        I: IntoIterator<Item = String>,
    {
        ProcessedRecords {
            pipeline: self,
            titles: titles.into_iter(),
            buffered: VecDeque::new(),
        }
    }

    fn preload(&self, titles: Vec<String>) -> Vec<PreloadedPage> {
        info!(batch = titles.len(), "preloading batch");

        let talk = fetch_isolating_failures("talk pages", &titles, |chunk| {
            self.provider.talk_pages(chunk)
        });
        let revisions = fetch_isolating_failures("revisions", &titles, |chunk| {
            self.provider.revisions(chunk)
        });

        titles
            .into_iter()
            .map(|title| PreloadedPage {
                talk: talk.get(&title).cloned(),
                revision: revisions.get(&title).cloned(),
                title,
            })
            .collect()
    }

    pub fn assess(&self, mut record: ArticleRecord, page: &PreloadedPage) -> ArticleRecord {
        record.rating = match &page.talk {
            Some(TalkPage::Text(text)) => self.assessor.extract(text),
            Some(TalkPage::Missing) => {
                debug!(title = %record.title, "talk page missing");
                None
            }
            Some(TalkPage::Redirect) => {
                debug!(title = %record.title, "talk page is a redirect");
                None
            }
            None => None,
        };
        record
    }

    pub fn suggest_tasks(&self, mut record: ArticleRecord, page: &PreloadedPage) -> ArticleRecord {
        if let Some(revision) = &page.revision {
            record.tasks = self.tasks.verdicts_for_text(&revision.text);
        }
        record
    }

    pub fn process_page(&self, page: PreloadedPage) -> ArticleRecord {
        let mut record = ArticleRecord::new(page.title.clone());
        record.revision_id = page.revision.as_ref().map(|revision| revision.revision_id);

        let record = self.assess(record, &page);
        let text = page.revision.as_ref().map(|revision| revision.text.as_str());
        let record = self.predictor.apply(record, text);
        let record = self.pageviews.apply(record);
        let mut record = self.suggest_tasks(record, &page);

        let classification = classify(record.rating.as_ref(), record.prediction.as_ref());
        debug!(
            title = %record.title,
            bucket = classification.bucket.as_str(),
            "classified page"
        );
        record.classification = Some(classification);
        record
    }
}

/// Runs `fetch` over the whole batch; when that fails, retries each distinct title on its own
/// so only the titles that still fail go without content.
fn fetch_isolating_failures<T>(
    what: &str,
    titles: &[String],
    fetch: impl Fn(&[String]) -> Result<HashMap<String, T>>,
) -> HashMap<String, T> {
    let err = match fetch(titles) {
        Ok(found) => return found,
        Err(err) => err,
    };

    if titles.len() < 2 {
        warn!(what, error = %format!("{err:#}"), "fetch failed");
        return HashMap::new();
    }
    warn!(
        what,
        batch = titles.len(),
        error = %format!("{err:#}"),
        "batch fetch failed; fetching titles one at a time"
    );

    let mut seen = HashSet::new();
    let mut found = HashMap::new();
    for title in titles {
        if !seen.insert(title.as_str()) {
            continue;
        }
        match fetch(std::slice::from_ref(title)) {
            Ok(single) => found.extend(single),
            Err(err) => warn!(what, title = %title, error = %format!("{err:#}"), "fetch failed"),
        }
    }
    found
}

/// Pull-based: the next batch is fetched only once every buffered page has been emitted.
pub struct ProcessedRecords<'p, 'a, I> {
    pipeline: &'p BatchPipeline<'a>,
    titles: I,
    buffered: VecDeque<PreloadedPage>,
}

impl<I> Iterator for ProcessedRecords<'_, '_, I>
where
    I: Iterator<Item = String>,
{
    type Item = ArticleRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffered.is_empty() {
            let batch = self
                .titles
                .by_ref()
                .take(self.pipeline.batch_size)
                .collect::<Vec<String>>();
            if batch.is_empty() {
                return None;
            }
            self.buffered.extend(self.pipeline.preload(batch));
        }

        let page = self.buffered.pop_front()?;
        Some(self.pipeline.process_page(page))
    }
}
