use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "formflow",
    version,
    about = "Resolve signing-template fields, labels and signers from PDF documents"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Resolve(ResolveArgs),
    MatchFields(MatchFieldsArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct TuningArgs {
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long)]
    pub overlap_threshold: Option<f64>,

    #[arg(long)]
    pub vertical_overlap_ratio: Option<f64>,

    #[arg(long)]
    pub right_side_tolerance: Option<f64>,

    #[arg(long)]
    pub render_dpi: Option<u32>,

    #[arg(long)]
    pub language: Option<String>,

    #[arg(long, default_value_t = false)]
    pub skip_relabel: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ResolveArgs {
    #[arg(long)]
    pub document: PathBuf,

    #[arg(long, conflicts_with = "prompt_file")]
    pub prompt: Option<String>,

    #[arg(long)]
    pub prompt_file: Option<PathBuf>,

    #[arg(long, default_value = ".cache/formflow")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long, default_value = "formflow-engine")]
    pub engine_command: String,

    #[arg(long, default_value = "formflow-oracle")]
    pub oracle_command: String,

    #[arg(long, default_value = "pdftoppm")]
    pub pdftoppm_command: String,

    #[command(flatten)]
    pub tuning: TuningArgs,
}

#[derive(Args, Debug, Clone)]
pub struct MatchFieldsArgs {
    #[arg(long)]
    pub positions: PathBuf,

    #[arg(long)]
    pub layout: PathBuf,

    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long, default_value = "match")]
    pub id_seed: String,

    #[command(flatten)]
    pub tuning: TuningArgs,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/formflow")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}
