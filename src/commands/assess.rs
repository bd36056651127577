use std::fs;
use std::io::{self, Write};

use anyhow::{Context, Result};
use tracing::info;

use crate::classify::display_label;
use crate::cli::AssessArgs;
use crate::commands::SiteContext;
use crate::rating::AssessmentExtractor;

pub fn run(args: AssessArgs) -> Result<()> {
    let context = SiteContext::load(&args.site)?;
    let extractor = AssessmentExtractor::new(context.rating_scale()?);

    let wikitext = fs::read_to_string(&args.talk_file)
        .with_context(|| format!("failed to read talk page file: {}", args.talk_file.display()))?;
    let rating = extractor.extract(&wikitext);

    info!(
        path = %args.talk_file.display(),
        scale = %extractor.scale().labels().join(","),
        rated = rating.is_some(),
        "assessed talk page"
    );

    let mut output = io::stdout().lock();
    writeln!(output, "{}", display_label(rating.as_ref()))?;
    Ok(())
}
