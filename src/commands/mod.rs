pub mod assess;
pub mod predict;
pub mod run;
pub mod views;

use anyhow::Result;
use tracing::info;

use crate::cli::SiteArgs;
use crate::config::{Settings, SiteSettings};
use crate::http::{HttpTransport, Pause, RetryPolicy};
use crate::prediction::{PredictionBackend, PredictionClient};
use crate::provider::{CONTENT_RETRY_DELAY_MS, MediaWikiProvider};
use crate::rating::RatingScale;

/// Settings resolved for the one language a command works on.
pub struct SiteContext {
    pub lang: String,
    pub settings: Settings,
    pub site: SiteSettings,
}

impl SiteContext {
    pub fn load(args: &SiteArgs) -> Result<Self> {
        let settings = Settings::load(args.config.as_deref())?;
        let site = settings.site(&args.lang)?.clone();
        info!(lang = %args.lang, backend = site.prediction_backend.as_str(), "resolved site settings");

        Ok(Self {
            lang: args.lang.clone(),
            settings,
            site,
        })
    }

    pub fn rating_scale(&self) -> Result<RatingScale> {
        RatingScale::new(self.site.rating_scale.as_slice())
    }

    pub fn predictor<'a>(
        &self,
        transport: &'a dyn HttpTransport,
        pause: &'a dyn Pause,
    ) -> Result<PredictionClient<'a>> {
        let backend = PredictionBackend::for_site(&self.lang, &self.site, &self.settings.prediction)?;
        Ok(PredictionClient::new(
            &self.lang,
            backend,
            &self.settings.prediction,
            self.rating_scale()?,
            transport,
            pause,
        ))
    }

    pub fn provider<'a>(
        &self,
        transport: &'a dyn HttpTransport,
        pause: &'a dyn Pause,
    ) -> Result<MediaWikiProvider<'a>> {
        let retry = RetryPolicy::new(self.settings.prediction.max_attempts, CONTENT_RETRY_DELAY_MS);
        MediaWikiProvider::new(&self.site.resolved_api_url(&self.lang), retry, transport, pause)
    }
}
