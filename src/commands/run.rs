use std::io::{self, Write};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::info;

use crate::cli::RunArgs;
use crate::commands::SiteContext;
use crate::features::WikitextFeatureExtractor;
use crate::http::{ReqwestTransport, ThreadPause};
use crate::model::{PopqualRecord, PopqualRunManifest, RunCounts};
use crate::pageviews::PageviewAggregator;
use crate::pipeline::BatchPipeline;
use crate::rating::AssessmentExtractor;
use crate::tasks::TaskFeatureEngine;
use crate::util::{now_utc_string, read_titles_file, utc_compact_string, write_json_pretty};

const MANIFEST_VERSION: u32 = 1;

pub fn run(args: RunArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let started = Instant::now();
    let run_id = format!("popqual-{}", utc_compact_string(started_ts));

    let context = SiteContext::load(&args.site)?;
    let titles = collect_titles(&args)?;

    let transport = ReqwestTransport::new(&context.settings.http)?;
    let pause = ThreadPause;

    let provider = context.provider(&transport, &pause)?;
    let predictor = context.predictor(&transport, &pause)?;
    let backend = predictor.backend().kind();
    let pageviews = PageviewAggregator::new(
        &context.lang,
        &context.settings.pageviews,
        started_ts.date_naive(),
        &transport,
        &pause,
    )?;
    let window = pageviews.window();
    let extractor = WikitextFeatureExtractor::new(&context.site.image_prefixes)?;
    let tasks = TaskFeatureEngine::new(&context.settings.tasks, extractor)?;
    let batch_size = context.settings.effective_batch_size();

    let pipeline = BatchPipeline::new(
        &provider,
        AssessmentExtractor::new(context.rating_scale()?),
        predictor,
        pageviews,
        tasks,
        batch_size,
    );

    info!(
        run_id = %run_id,
        lang = %context.lang,
        titles = titles.len(),
        backend = backend.as_str(),
        batch_size,
        "starting classification run"
    );

    let mut counts = RunCounts {
        titles_requested: titles.len(),
        ..RunCounts::default()
    };
    let mut output = io::BufWriter::new(io::stdout().lock());
    for record in pipeline.process(titles) {
        counts.observe(&record);
        let row = record.to_output();
        if args.json {
            serde_json::to_writer(&mut output, &row).context("failed to serialize record")?;
            writeln!(output)?;
        } else {
            write_text_row(&mut output, &row)?;
        }
        output.flush()?;
    }

    info!(
        run_id = %run_id,
        emitted = counts.records_emitted,
        unrated = counts.unrated,
        unpredicted = counts.unpredicted,
        views_unset = counts.views_unset,
        high = counts.high,
        medium = counts.medium,
        low = counts.low,
        "classification run finished"
    );

    if let Some(manifest_path) = &args.manifest_path {
        let manifest = PopqualRunManifest {
            manifest_version: MANIFEST_VERSION,
            run_id,
            lang: context.lang.clone(),
            prediction_backend: backend.as_str().to_string(),
            started_at,
            finished_at: now_utc_string(),
            duration_ms: started.elapsed().as_millis(),
            batch_size,
            pageview_window: window.summary(),
            counts,
        };
        write_json_pretty(manifest_path, &manifest)?;
        info!(path = %manifest_path.display(), "wrote run manifest");
    }

    Ok(())
}

fn collect_titles(args: &RunArgs) -> Result<Vec<String>> {
    let mut titles = args
        .titles
        .iter()
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
        .collect::<Vec<String>>();
    if let Some(path) = &args.titles_file {
        titles.extend(read_titles_file(path)?);
    }

    if titles.is_empty() {
        bail!("no titles given; pass --title or --titles-file");
    }
    Ok(titles)
}

fn write_text_row(output: &mut impl Write, row: &PopqualRecord) -> Result<()> {
    writeln!(
        output,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        row.title,
        row.pop,
        row.popcount,
        row.qual,
        row.pred,
        row.predclass,
        row.pred_numeric,
        row.work.join(","),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{collect_titles, write_text_row};
    use crate::cli::{RunArgs, SiteArgs};
    use crate::model::PopqualRecord;

    fn args(titles: &[&str]) -> RunArgs {
        RunArgs {
            site: SiteArgs {
                lang: "en".to_string(),
                config: None,
            },
            titles: titles.iter().map(|title| (*title).to_string()).collect(),
            titles_file: None,
            json: false,
            manifest_path: None,
        }
    }

    #[test]
    fn titles_from_flags_come_before_titles_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("titles.txt");
        fs::write(&path, "# batch\nFes\n\nAC/DC\nFes\n").expect("write titles");

        let mut args = args(&["Andre Dawson", "  "]);
        args.titles_file = Some(path);
        let titles = collect_titles(&args).expect("titles");
        assert_eq!(titles, vec!["Andre Dawson", "Fes", "AC/DC", "Fes"]);
    }

    #[test]
    fn no_titles_is_an_error() {
        assert!(collect_titles(&args(&[])).is_err());
    }

    #[test]
    fn text_rows_are_tab_separated() {
        let row = PopqualRecord {
            title: "Fes".to_string(),
            pop: "High".to_string(),
            popcount: 812,
            qual: "B".to_string(),
            pred: "Medium".to_string(),
            predclass: "NA".to_string(),
            work: vec!["length:no".to_string(), "numImages:yes".to_string()],
            pred_numeric: 2,
        };
        let mut buffer = Vec::new();
        write_text_row(&mut buffer, &row).expect("write row");
        assert_eq!(
            String::from_utf8(buffer).expect("utf8"),
            "Fes\tHigh\t812\tB\tMedium\tNA\t2\tlength:no,numImages:yes\n"
        );
    }
}
