use std::io::{self, Write};

use anyhow::Result;
use chrono::Utc;
use tracing::info;

use crate::cli::ViewsArgs;
use crate::commands::SiteContext;
use crate::http::{ReqwestTransport, ThreadPause};
use crate::pageviews::PageviewAggregator;

pub fn run(args: ViewsArgs) -> Result<()> {
    let context = SiteContext::load(&args.site)?;
    let transport = ReqwestTransport::new(&context.settings.http)?;
    let pause = ThreadPause;

    let aggregator = PageviewAggregator::new(
        &context.lang,
        &context.settings.pageviews,
        Utc::now().date_naive(),
        &transport,
        &pause,
    )?;
    let window = aggregator.window().summary();
    info!(title = %args.title, start = %window.start, end = %window.end, "fetching pageviews");

    let mut output = io::stdout().lock();
    match aggregator.average_views(&args.title) {
        Some(average) => writeln!(output, "{}\t{average:.2}", args.title)?,
        None => writeln!(output, "{}\tunset", args.title)?,
    }
    Ok(())
}
