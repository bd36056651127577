use anyhow::{Context, Result};
use reqwest::Url;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::{BackendKind, PredictionSettings, SiteSettings};
use crate::http::{FetchError, HttpTransport, Pause, RetryPolicy};
use crate::model::ArticleRecord;
use crate::rating::{QualityLabel, RatingScale};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredictionBackend {
    LiftWing { url: Url, wiki: String },
    FeatureService { url: Url },
}

impl PredictionBackend {
    /// Chosen from the site's settings alone; a misconfigured backend aborts the run.
    pub fn for_site(lang: &str, site: &SiteSettings, settings: &PredictionSettings) -> Result<Self> {
        match site.prediction_backend {
            BackendKind::LiftWing => {
                let wiki = format!("{lang}wiki");
                let raw = settings.lift_wing_url.replace("{wiki}", &wiki);
                let url = Url::parse(&raw)
                    .with_context(|| format!("invalid Lift Wing URL for {lang}: {raw}"))?;
                Ok(Self::LiftWing { url, wiki })
            }
            BackendKind::FeatureService => {
                let raw = settings.feature_service_url.as_deref().with_context(|| {
                    format!("site {lang} predicts through the feature service but prediction.feature_service_url is not set")
                })?;
                let url = Url::parse(raw)
                    .with_context(|| format!("invalid feature service URL: {raw}"))?;
                Ok(Self::FeatureService { url })
            }
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::LiftWing { .. } => BackendKind::LiftWing,
            Self::FeatureService { .. } => BackendKind::FeatureService,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PredictionRequest<'a> {
    pub lang: &'a str,
    pub title: &'a str,
    pub revision_id: Option<u64>,
    pub text: Option<&'a str>,
}

pub struct PredictionClient<'a> {
    transport: &'a dyn HttpTransport,
    pause: &'a dyn Pause,
    backend: PredictionBackend,
    retry: RetryPolicy,
    scale: RatingScale,
    lang: String,
}

impl<'a> PredictionClient<'a> {
    pub fn new(
        lang: &str,
        backend: PredictionBackend,
        settings: &PredictionSettings,
        scale: RatingScale,
        transport: &'a dyn HttpTransport,
        pause: &'a dyn Pause,
    ) -> Self {
        let delay_ms = match backend.kind() {
            BackendKind::LiftWing => settings.lift_wing_delay_ms,
            BackendKind::FeatureService => settings.feature_service_delay_ms,
        };

        Self {
            transport,
            pause,
            backend,
            retry: RetryPolicy::new(settings.max_attempts, delay_ms),
            scale,
            lang: lang.to_string(),
        }
    }

    pub fn backend(&self) -> &PredictionBackend {
        &self.backend
    }

    /// Never fails: exhausted retries and off-scale labels both come back as `None`.
    pub fn predict(&self, request: &PredictionRequest<'_>) -> Option<QualityLabel> {
        let raw = match &self.backend {
            PredictionBackend::LiftWing { url, wiki } => {
                let Some(revision_id) = request.revision_id else {
                    warn!(title = %request.title, "no revision id; skipping Lift Wing prediction");
                    return None;
                };
                let body = lift_wing_body(request, revision_id);
                self.retry.run(self.pause, "lift-wing prediction", || {
                    let reply = self.transport.post_json(url, &body)?;
                    parse_lift_wing(&reply.into_json()?, wiki, revision_id)
                })
            }
            PredictionBackend::FeatureService { url } => {
                let mut url = url.clone();
                url.query_pairs_mut()
                    .append_pair("lang", request.lang)
                    .append_pair("title", request.title);
                self.retry.run(self.pause, "feature-service prediction", || {
                    let reply = self.transport.get(&url)?;
                    parse_feature_service(&reply.into_json()?)
                })
            }
        };

        let raw = match raw {
            Ok(raw) => raw,
            Err(err) => {
                warn!(title = %request.title, error = %err, "prediction unavailable after retries");
                return None;
            }
        };

        match self.scale.resolve(&raw) {
            Some(label) => {
                debug!(title = %request.title, prediction = %label, "received prediction");
                Some(label)
            }
            None => {
                warn!(title = %request.title, label = %raw, "prediction is not on the rating scale; discarding");
                None
            }
        }
    }

    /// A record that already carries a prediction is returned untouched.
    pub fn apply(&self, mut record: ArticleRecord, text: Option<&str>) -> ArticleRecord {
        if record.prediction.is_some() {
            return record;
        }

        let request = PredictionRequest {
            lang: &self.lang,
            title: &record.title,
            revision_id: record.revision_id,
            text,
        };
        record.prediction = self.predict(&request);
        if record.prediction.is_none() {
            info!(title = %record.title, "no prediction for page");
        }
        record
    }
}

fn lift_wing_body(request: &PredictionRequest<'_>, revision_id: u64) -> Value {
    let mut body = json!({
        "rev_id": revision_id,
        "page_title": request.title,
    });
    if let Some(text) = request.text {
        body["text"] = Value::String(text.to_string());
    }
    body
}

fn parse_lift_wing(body: &Value, wiki: &str, revision_id: u64) -> Result<String, FetchError> {
    let pointer = format!("/{wiki}/scores/{revision_id}/articlequality/score/prediction");
    body.pointer(&pointer)
        .and_then(Value::as_str)
        .map(str::to_lowercase)
        .ok_or_else(|| FetchError::Malformed(format!("missing {pointer}")))
}

fn parse_feature_service(body: &Value) -> Result<String, FetchError> {
    body.get("class")
        .and_then(Value::as_str)
        .map(str::to_lowercase)
        .ok_or_else(|| FetchError::Malformed("missing class".to_string()))
}
