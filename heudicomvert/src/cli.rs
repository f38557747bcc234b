use clap::{Args, Parser, Subcommand};

/// Converts DICOM series into a BIDS-conformant dataset.
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about,
    long_about = "
Discovers DICOM files for a subject/session, groups them into series, \
consults a heuristic to decide where each series belongs, drives an \
external transcoder, and emits a BIDS dataset with consistent sidecars, \
fieldmap associations and resumable provenance."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub convert: Option<ConvertArgs>,

    /// Path to a TOML configuration file, as written by heudicomvert-config-init.
    #[arg(short, long, group = "conf")]
    pub config: Option<String>,

    /// Enable logging at INFO level.
    #[arg(long, default_value_t = false)]
    pub verbose: bool,
    /// Enable logging at DEBUG level.
    #[arg(long, default_value_t = false)]
    pub debug: bool,
    /// Enable logging at TRACE level.
    #[arg(long, default_value_t = false)]
    pub trace: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run discovery, grouping and heuristic evaluation, and print the
    /// planned outputs without invoking the transcoder or touching disk.
    DryRun(ConvertArgs),
    /// Perform only the top-level dataset aggregation pass (dataset
    /// description, CHANGES, README, participants, scans tables), useful
    /// after a run performed under `bids = notop`.
    Finalize(FinalizeArgs),
    /// Print the computed seqinfo table for a set of inputs without
    /// converting anything.
    Inspect(InspectArgs),
}

#[derive(Args, Debug, Clone)]
#[group(required = false, multiple = true)]
pub struct ConvertArgs {
    /// Root directory of the BIDS dataset to write into.
    #[arg(short, long)]
    pub output_dir: String,
    /// Subject identifier, without the `sub-` prefix.
    #[arg(short, long)]
    pub subject: String,
    /// Session identifier, without the `ses-` prefix.
    #[arg(long)]
    pub session: Option<String>,
    /// Path template(s) for locating this subject/session's DICOM input.
    /// May contain `{subject}`/`{session}` placeholders.
    #[arg(short = 'd', long = "dicom-dir-template")]
    pub templates: Vec<String>,
    /// Explicit files or directories to scan in addition to any templates.
    #[arg(short = 'f', long = "files")]
    pub explicit_paths: Vec<String>,
    /// Heuristic to use: a path to a declarative TOML rule file, or the
    /// name of a compiled heuristic ("reference").
    #[arg(short = 'c', long = "heuristic", default_value = "reference")]
    pub heuristic: String,
    /// Series-grouping strategy: accession_number, study_uid, all, custom.
    #[arg(short = 'g', long, default_value = "accession_number")]
    pub grouping: String,
    /// Restrict sidecar JSON to the BIDS-declared metadata vocabulary.
    #[arg(long, default_value_t = false)]
    pub minmeta: bool,
    /// Allow overwriting files that already exist at the destination.
    #[arg(long, default_value_t = false)]
    pub overwrite: bool,
    /// Suppress top-level dataset file writes for this run ("notop").
    #[arg(long, default_value_t = false)]
    pub notop: bool,
    /// Seed the working-prefix token generator for reproducible temp names.
    #[arg(long)]
    pub random_seed: Option<u64>,
    /// Transcoder to drive: "dcm2niix" (default) or "none" to skip
    /// transcoding and only write provenance/sidecar artefacts.
    #[arg(long, default_value = "dcm2niix")]
    pub converter: String,
    /// Path to the dcm2niix executable, when `--converter dcm2niix`.
    #[arg(long, default_value = "dcm2niix")]
    pub dcm2niix_path: String,
}

#[derive(Args, Debug, Clone)]
pub struct FinalizeArgs {
    /// Root directory of the BIDS dataset to aggregate.
    #[arg(short, long)]
    pub output_dir: String,
    /// Allow overwriting top-level files that already exist.
    #[arg(long, default_value_t = false)]
    pub overwrite: bool,
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    /// Path template(s) or explicit paths to scan.
    #[arg(short = 'f', long = "files")]
    pub paths: Vec<String>,
    /// Subject identifier used only to label the resulting table.
    #[arg(short, long, default_value = "")]
    pub subject: String,
}
