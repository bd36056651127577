use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const CONFIG_PATH_ENV: &str = "POPQUAL_CONFIG";
pub const DEFAULT_USER_AGENT: &str = "popqual/0.1 (article popularity and quality classifier)";
pub const DEFAULT_LIFT_WING_URL: &str =
    "https://api.wikimedia.org/service/lw/inference/v1/models/{wiki}-articlequality:predict";
pub const DEFAULT_PAGEVIEW_URL: &str =
    "https://wikimedia.org/api/rest_v1/metrics/pageviews/per-article/";
pub const MAX_BATCH_SIZE: usize = 50;

const DEFAULT_RATING_SCALE: [&str; 7] = ["stub", "start", "c", "b", "ga", "a", "fa"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub http: HttpSettings,
    pub sites: BTreeMap<String, SiteSettings>,
    pub prediction: PredictionSettings,
    pub pageviews: PageviewSettings,
    pub tasks: TaskSettings,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub user_agent: String,
    pub from: Option<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteSettings {
    pub rating_scale: Vec<String>,
    #[serde(default)]
    pub prediction_backend: BackendKind,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub image_prefixes: Vec<String>,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    LiftWing,
    FeatureService,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LiftWing => "lift_wing",
            Self::FeatureService => "feature_service",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionSettings {
    pub lift_wing_url: String,
    pub feature_service_url: Option<String>,
    pub max_attempts: u32,
    pub lift_wing_delay_ms: u64,
    pub feature_service_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PageviewSettings {
    pub api_url: String,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSettings {
    pub p_yes: f64,
    pub p_maybe: f64,
    pub metrics: BTreeMap<String, MetricDistribution>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDistribution {
    pub distribution: DistributionSpec,
    #[serde(default)]
    pub tail: Tail,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DistributionSpec {
    Normal { mean: f64, std_dev: f64 },
    LogNormal { location: f64, scale: f64 },
    Gamma { shape: f64, rate: f64 },
}

/// Which side of the distribution counts as "needs work".
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tail {
    #[default]
    Lower,
    Upper,
}

impl Default for Settings {
    fn default() -> Self {
        let mut sites = BTreeMap::new();
        sites.insert(
            "en".to_string(),
            SiteSettings {
                rating_scale: default_rating_scale(),
                prediction_backend: BackendKind::LiftWing,
                api_url: None,
                image_prefixes: Vec::new(),
            },
        );
        sites.insert(
            "ar".to_string(),
            SiteSettings {
                rating_scale: default_rating_scale(),
                prediction_backend: BackendKind::FeatureService,
                api_url: None,
                image_prefixes: vec!["ملف".to_string(), "صورة".to_string()],
            },
        );

        Self {
            http: HttpSettings::default(),
            sites,
            prediction: PredictionSettings::default(),
            pageviews: PageviewSettings::default(),
            tasks: TaskSettings::default(),
            batch_size: MAX_BATCH_SIZE,
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            from: None,
            timeout_ms: 30_000,
        }
    }
}

impl Default for PredictionSettings {
    fn default() -> Self {
        Self {
            lift_wing_url: DEFAULT_LIFT_WING_URL.to_string(),
            feature_service_url: None,
            max_attempts: 3,
            lift_wing_delay_ms: 1_000,
            feature_service_delay_ms: 5_000,
        }
    }
}

impl Default for PageviewSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_PAGEVIEW_URL.to_string(),
            max_attempts: 3,
            retry_delay_ms: 250,
        }
    }
}

impl Default for TaskSettings {
    fn default() -> Self {
        let mut metrics = BTreeMap::new();
        metrics.insert(
            "length".to_string(),
            MetricDistribution {
                distribution: DistributionSpec::Normal {
                    mean: 12.5,
                    std_dev: 1.9,
                },
                tail: Tail::Lower,
            },
        );
        metrics.insert(
            "lengthToRefs".to_string(),
            MetricDistribution {
                distribution: DistributionSpec::LogNormal {
                    location: 7.0,
                    scale: 1.2,
                },
                tail: Tail::Upper,
            },
        );
        metrics.insert(
            "completeness".to_string(),
            MetricDistribution {
                distribution: DistributionSpec::LogNormal {
                    location: 3.0,
                    scale: 1.1,
                },
                tail: Tail::Lower,
            },
        );
        metrics.insert(
            "numImages".to_string(),
            MetricDistribution {
                distribution: DistributionSpec::Gamma {
                    shape: 1.2,
                    rate: 0.35,
                },
                tail: Tail::Lower,
            },
        );
        metrics.insert(
            "headings".to_string(),
            MetricDistribution {
                distribution: DistributionSpec::Gamma {
                    shape: 2.0,
                    rate: 0.35,
                },
                tail: Tail::Lower,
            },
        );

        Self {
            p_yes: 0.1,
            p_maybe: 0.2,
            metrics,
        }
    }
}

impl Settings {
    /// Explicit path wins over `POPQUAL_CONFIG`; with neither, built-in defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let from_env = env::var(CONFIG_PATH_ENV).ok().filter(|value| !value.trim().is_empty());
        let resolved = path
            .map(Path::to_path_buf)
            .or_else(|| from_env.map(Into::into));

        let mut settings = match resolved {
            Some(path) => {
                let raw = fs::read(&path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                let settings: Settings = serde_json::from_slice(&raw)
                    .with_context(|| format!("failed to parse config {}", path.display()))?;
                info!(path = %path.display(), "loaded configuration");
                settings
            }
            None => Settings::default(),
        };

        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(user_agent) = env_value("POPQUAL_USER_AGENT") {
            self.http.user_agent = user_agent;
        }
        if let Some(from) = env_value("POPQUAL_HTTP_FROM") {
            self.http.from = Some(from);
        }
        if let Some(timeout_ms) = env_value("POPQUAL_TIMEOUT_MS").and_then(|value| value.parse().ok())
        {
            self.http.timeout_ms = timeout_ms;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.http.user_agent.trim().is_empty() {
            bail!("http.user_agent must not be empty");
        }
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.prediction.max_attempts == 0 || self.pageviews.max_attempts == 0 {
            bail!("retry budgets must allow at least one attempt");
        }

        let TaskSettings { p_yes, p_maybe, .. } = self.tasks;
        if !(0.0..=1.0).contains(&p_yes) || !(0.0..=1.0).contains(&p_maybe) || p_yes > p_maybe {
            bail!("task thresholds must satisfy 0 <= p_yes <= p_maybe <= 1 (got {p_yes}, {p_maybe})");
        }

        for (lang, site) in &self.sites {
            if site.rating_scale.is_empty() {
                bail!("site {lang} has an empty rating scale");
            }
        }

        Ok(())
    }

    pub fn site(&self, lang: &str) -> Result<&SiteSettings> {
        self.sites
            .get(lang)
            .with_context(|| format!("no site settings configured for language '{lang}'"))
    }

    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }
}

impl SiteSettings {
    pub fn resolved_api_url(&self, lang: &str) -> String {
        self.api_url
            .clone()
            .unwrap_or_else(|| format!("https://{lang}.wikipedia.org/w/api.php"))
    }
}

fn default_rating_scale() -> Vec<String> {
    DEFAULT_RATING_SCALE
        .iter()
        .map(|label| (*label).to_string())
        .collect()
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
