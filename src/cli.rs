use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "segcompare",
    version,
    about = "Compare manual and automatic RT structure segmentations across patient studies"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Run(RunArgs),
    Inventory(InventoryArgs),
    Status(StatusArgs),
    Export(ExportArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Folder holding one sub-folder per patient study.
    #[arg(short = 'i', long)]
    pub input_root: PathBuf,

    #[arg(short = 'c', long, default_value = "config.json")]
    pub config: PathBuf,

    /// Where the extended configuration is written; defaults to `--config`.
    #[arg(long)]
    pub config_output: Option<PathBuf>,

    #[arg(short = 'r', long, default_value = "results.sqlite")]
    pub results_db: PathBuf,

    /// Processed studies are moved here after their rows were collected.
    #[arg(short = 'o', long)]
    pub archive_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = StoreMode::Merge)]
    pub store_mode: StoreMode,

    #[arg(long, value_enum, default_value_t = UnknownLabelPolicy::Prompt)]
    pub unknown_labels: UnknownLabelPolicy,

    /// Use a constant surface Dice tolerance instead of the largest voxel dimension.
    #[arg(long)]
    pub fixed_tolerance_mm: Option<f64>,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum StoreMode {
    Merge,
    Overwrite,
}

impl StoreMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Overwrite => "overwrite",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum UnknownLabelPolicy {
    Prompt,
    Discard,
}

impl UnknownLabelPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prompt => "prompt",
            Self::Discard => "discard",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct InventoryArgs {
    #[arg(short = 'i', long)]
    pub input_root: PathBuf,

    #[arg(short = 'c', long, default_value = "config.json")]
    pub config: PathBuf,

    #[arg(short = 'r', long, default_value = "results.sqlite")]
    pub results_db: PathBuf,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(short = 'r', long, default_value = "results.sqlite")]
    pub results_db: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    #[arg(short = 'r', long, default_value = "results.sqlite")]
    pub results_db: PathBuf,

    #[arg(long)]
    pub output: PathBuf,
}
