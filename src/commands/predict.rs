use std::io::{self, Write};

use anyhow::Result;
use tracing::{info, warn};

use crate::classify::display_label;
use crate::cli::PredictArgs;
use crate::commands::SiteContext;
use crate::http::{ReqwestTransport, ThreadPause};
use crate::prediction::PredictionRequest;
use crate::provider::ContentProvider;

pub fn run(args: PredictArgs) -> Result<()> {
    let context = SiteContext::load(&args.site)?;
    let transport = ReqwestTransport::new(&context.settings.http)?;
    let pause = ThreadPause;

    let provider = context.provider(&transport, &pause)?;
    let predictor = context.predictor(&transport, &pause)?;

    let titles = vec![args.title.clone()];
    let revision = match provider.revisions(&titles) {
        Ok(mut revisions) => revisions.remove(&args.title),
        Err(err) => {
            warn!(title = %args.title, error = %format!("{err:#}"), "could not load current revision");
            None
        }
    };
    info!(
        title = %args.title,
        revision_id = ?revision.as_ref().map(|revision| revision.revision_id),
        backend = predictor.backend().kind().as_str(),
        "requesting prediction"
    );

    let prediction = predictor.predict(&PredictionRequest {
        lang: &context.lang,
        title: &args.title,
        revision_id: revision.as_ref().map(|revision| revision.revision_id),
        text: revision.as_ref().map(|revision| revision.text.as_str()),
    });

    let mut output = io::stdout().lock();
    writeln!(output, "{}\t{}", args.title, display_label(prediction.as_ref()))?;
    Ok(())
}
