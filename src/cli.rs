use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "popqual",
    version,
    about = "Popularity and quality classification for Wikipedia articles"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Run(RunArgs),
    Assess(AssessArgs),
    Views(ViewsArgs),
    Predict(PredictArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SiteArgs {
    #[arg(long)]
    pub lang: String,

    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub site: SiteArgs,

    #[arg(long = "title")]
    pub titles: Vec<String>,

    #[arg(long)]
    pub titles_file: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct AssessArgs {
    #[command(flatten)]
    pub site: SiteArgs,

    #[arg(long)]
    pub talk_file: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct ViewsArgs {
    #[command(flatten)]
    pub site: SiteArgs,

    #[arg(long)]
    pub title: String,
}

#[derive(Args, Debug, Clone)]
pub struct PredictArgs {
    #[command(flatten)]
    pub site: SiteArgs,

    #[arg(long)]
    pub title: String,
}
