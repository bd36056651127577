use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use statrs::distribution::{ContinuousCDF, Gamma, LogNormal, Normal};
use tracing::{debug, warn};

use crate::config::{DistributionSpec, TaskSettings, Tail};
use crate::features::{QualityFeatures, WikitextFeatureExtractor};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskVerdict {
    Yes,
    Maybe,
    No,
}

impl TaskVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::Maybe => "maybe",
            Self::No => "no",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskSuggestion {
    pub task: String,
    pub verdict: TaskVerdict,
}

impl TaskSuggestion {
    pub fn work_entry(&self) -> String {
        format!("{}:{}", self.task, self.verdict.as_str())
    }
}

#[derive(Debug)]
enum Reference {
    Normal(Normal),
    LogNormal(LogNormal),
    Gamma(Gamma),
}

impl Reference {
    fn build(spec: &DistributionSpec) -> Result<Self> {
        let reference = match *spec {
            DistributionSpec::Normal { mean, std_dev } => Self::Normal(
                Normal::new(mean, std_dev)
                    .map_err(|err| anyhow!("invalid normal distribution: {err}"))?,
            ),
            DistributionSpec::LogNormal { location, scale } => Self::LogNormal(
                LogNormal::new(location, scale)
                    .map_err(|err| anyhow!("invalid log-normal distribution: {err}"))?,
            ),
            DistributionSpec::Gamma { shape, rate } => Self::Gamma(
                Gamma::new(shape, rate).map_err(|err| anyhow!("invalid gamma distribution: {err}"))?,
            ),
        };
        Ok(reference)
    }

    fn cdf(&self, value: f64) -> f64 {
        match self {
            Self::Normal(dist) => dist.cdf(value),
            Self::LogNormal(dist) => dist.cdf(value),
            Self::Gamma(dist) => dist.cdf(value),
        }
    }
}

#[derive(Debug)]
struct MetricModel {
    reference: Reference,
    tail: Tail,
}

impl MetricModel {
    fn p_value(&self, value: f64) -> f64 {
        let cdf = self.reference.cdf(value);
        match self.tail {
            Tail::Lower => cdf,
            Tail::Upper => 1.0 - cdf,
        }
    }
}

#[derive(Debug)]
pub struct TaskFeatureEngine {
    models: BTreeMap<String, MetricModel>,
    p_yes: f64,
    p_maybe: f64,
    extractor: WikitextFeatureExtractor,
}

impl TaskFeatureEngine {
    pub fn new(settings: &TaskSettings, extractor: WikitextFeatureExtractor) -> Result<Self> {
        let mut models = BTreeMap::new();
        for (metric, configured) in &settings.metrics {
            let reference = Reference::build(&configured.distribution)
                .with_context(|| format!("failed to configure distribution for metric {metric}"))?;
            models.insert(
                metric.clone(),
                MetricModel {
                    reference,
                    tail: configured.tail,
                },
            );
        }

        Ok(Self {
            models,
            p_yes: settings.p_yes,
            p_maybe: settings.p_maybe,
            extractor,
        })
    }

    pub fn verdict_for(&self, p_value: f64) -> TaskVerdict {
        if p_value < self.p_yes {
            TaskVerdict::Yes
        } else if p_value < self.p_maybe {
            TaskVerdict::Maybe
        } else {
            TaskVerdict::No
        }
    }

    pub fn verdicts(&self, features: &QualityFeatures) -> Vec<TaskSuggestion> {
        let mut suggestions = Vec::new();

        for (metric, value) in features.metrics() {
            let Some(model) = self.models.get(metric) else {
                warn!(metric, "no distribution configured for metric; skipping task");
                continue;
            };

            let p_value = model.p_value(value);
            debug!(metric, value, p_value, "scored task metric");
            suggestions.push(TaskSuggestion {
                task: metric.to_string(),
                verdict: self.verdict_for(p_value),
            });
        }

        suggestions
    }

    pub fn verdicts_for_text(&self, wikitext: &str) -> Vec<TaskSuggestion> {
        let features = self.extractor.measure(wikitext);
        self.verdicts(&features)
    }
}
