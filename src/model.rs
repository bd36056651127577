use serde::Serialize;

use crate::classify::{Classification, POPULARITY_LABEL, QualityBucket, display_label};
use crate::rating::QualityLabel;
use crate::tasks::TaskSuggestion;

pub const UNSET_COUNT: i64 = -1;

#[derive(Debug, Clone, PartialEq)]
pub struct ArticleRecord {
    pub title: String,
    pub revision_id: Option<u64>,
    pub rating: Option<QualityLabel>,
    pub prediction: Option<QualityLabel>,
    pub average_views: Option<f64>,
    pub tasks: Vec<TaskSuggestion>,
    pub classification: Option<Classification>,
}

impl ArticleRecord {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            revision_id: None,
            rating: None,
            prediction: None,
            average_views: None,
            tasks: Vec::new(),
            classification: None,
        }
    }

    pub fn to_output(&self) -> PopqualRecord {
        let (bucket, score) = match self.classification {
            Some(classification) => (classification.bucket.as_str(), classification.score),
            None => (QualityBucket::Low.as_str(), UNSET_COUNT),
        };

        PopqualRecord {
            title: self.title.clone(),
            pop: POPULARITY_LABEL.to_string(),
            popcount: self
                .average_views
                .map(|views| views.round_ties_even() as i64)
                .unwrap_or(UNSET_COUNT),
            qual: display_label(self.rating.as_ref()),
            pred: bucket.to_string(),
            predclass: display_label(self.prediction.as_ref()),
            work: self.tasks.iter().map(TaskSuggestion::work_entry).collect(),
            pred_numeric: score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopqualRecord {
    pub title: String,
    pub pop: String,
    pub popcount: i64,
    pub qual: String,
    pub pred: String,
    pub predclass: String,
    pub work: Vec<String>,
    #[serde(rename = "pred-numeric")]
    pub pred_numeric: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunCounts {
    pub titles_requested: usize,
    pub records_emitted: usize,
    pub unrated: usize,
    pub unpredicted: usize,
    pub views_unset: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl RunCounts {
    pub fn observe(&mut self, record: &ArticleRecord) {
        self.records_emitted += 1;
        if record.rating.is_none() {
            self.unrated += 1;
        }
        if record.prediction.is_none() {
            self.unpredicted += 1;
        }
        if record.average_views.is_none() {
            self.views_unset += 1;
        }
        match record.classification.map(|value| value.bucket) {
            Some(QualityBucket::High) => self.high += 1,
            Some(QualityBucket::Medium) => self.medium += 1,
            Some(QualityBucket::Low) | None => self.low += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PopqualRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub lang: String,
    pub prediction_backend: String,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: u128,
    pub batch_size: usize,
    pub pageview_window: PageviewWindowSummary,
    pub counts: RunCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageviewWindowSummary {
    pub start: String,
    pub end: String,
}
