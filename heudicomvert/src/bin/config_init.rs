use clap::Parser;
use heudicomvert::config::FileConfig;
use heudicomvert_core::{ask_bool_with_default, ask_question, ask_question_with_default};
use std::io::Write;

/// Writes a starter configuration file for `heudicomvert`.
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about,
    long_about = "
A command line interface application to generate a configuration file used by heudicomvert."
)]
struct Cli {
    /// Path where the config file is written.
    #[arg(short, long, default_value = "heudicomvert.toml")]
    pub output: String,
    /// Interactive mode: prompt for each setting instead of writing defaults.
    #[arg(short, long, default_value_t = false)]
    interactive: bool,
}

fn main() {
    let cli = Cli::parse();

    let mut config = FileConfig::default();
    if cli.interactive {
        config.output_dir = Some(ask_question("BIDS dataset output directory"));
        config.subject = Some(ask_question("Default subject identifier"));
        let heuristic = ask_question_with_default("Heuristic (path or 'reference')", "reference");
        config.heuristic = Some(heuristic);
        let grouping = ask_question_with_default("Grouping mode", "accession_number");
        config.grouping = Some(grouping);
        config.minmeta = Some(ask_bool_with_default("Restrict sidecars to minimal metadata?", false));
        config.overwrite = Some(ask_bool_with_default("Allow overwriting existing outputs?", false));
        config.notop = Some(ask_bool_with_default("Suppress top-level dataset files (notop)?", false));
    }

    let text = toml::to_string_pretty(&config).expect("Failed to serialize configuration");
    let mut file = std::fs::File::create(&cli.output).expect("Failed to create output file");
    file.write_all(text.as_bytes()).expect("Failed to write configuration");
    println!("Wrote {}", cli.output);
}
