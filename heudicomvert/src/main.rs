use std::process::ExitCode;

use anyhow::{anyhow, Result};
use clap::Parser;
use heudicomvert::cli::{Cli, Command, ConvertArgs, FinalizeArgs, InspectArgs};
use heudicomvert::config;
use heudicomvert_common::get_log_level;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let result = match cli.command.clone() {
        Some(Command::DryRun(args)) => run_dry_run(&cli, &args),
        Some(Command::Finalize(args)) => run_finalize(&args),
        Some(Command::Inspect(args)) => run_inspect(&args),
        None => match &cli.convert {
            Some(args) => run_convert(&cli, args),
            None => Err(anyhow!("No subcommand or convert arguments were given; see --help")),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli) {
    let level = get_log_level!(cli);
    tracing_subscriber::fmt()
        .with_thread_ids(true)
        .with_target(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("HEUDICONVERT_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .init();

    let _ = ctrlc::set_handler(|| {
        warn!("Interrupted, exiting");
        std::process::exit(130);
    });
}

fn load_request(cli: &Cli, args: &ConvertArgs) -> Result<heudicomvert_convert::run::RunRequest> {
    let file = match &cli.config {
        Some(path) => Some(config::load_file_config(path)?),
        None => None,
    };
    Ok(config::build_request(args, file)?)
}

fn run_convert(cli: &Cli, args: &ConvertArgs) -> Result<()> {
    let request = load_request(cli, args)?;
    let report = heudicomvert_convert::run(&request)?;
    info!(
        "converted={} skipped_unchanged={} discovery_failures={} errors={}",
        report.converted.len(),
        report.skipped_unchanged.len(),
        report.discovery_failures,
        report.errors.len()
    );
    if !report.is_success() {
        return Err(anyhow!(report.errors.join("; ")));
    }
    Ok(())
}

fn run_dry_run(cli: &Cli, args: &ConvertArgs) -> Result<()> {
    let request = load_request(cli, args)?;
    let discovery = heudicomvert_convert::discovery::discover(&heudicomvert_convert::discovery::DiscoveryRequest {
        subject: request.subject.clone(),
        session: request.session.clone(),
        templates: request.templates.clone(),
        explicit_paths: request.explicit_paths.clone(),
    });
    let mut headers = Vec::new();
    for path in &discovery.files {
        if let Ok(header) = heudicomvert_convert::grouping::read_header(path) {
            headers.push(header);
        }
    }
    let series = heudicomvert_convert::grouping::group(request.config.grouping, &request.subject, headers)?;
    let seqinfos: Vec<_> = series.iter().map(|s| s.seqinfo.clone()).collect();
    let host = heudicomvert_convert::heuristic::HeuristicHost::resolve(&request.heuristic_spec)
        .map_err(|e| anyhow!(e.to_string()))?;
    let dict = host.convert(&seqinfos).map_err(|e| anyhow!(e.to_string()))?;
    let jobs = heudicomvert_convert::orchestrator::plan(&request.subject, request.session.as_deref(), &dict);
    println!("Planned {} output(s):", jobs.len());
    for job in &jobs {
        println!("  {} <- series {}", job.relative_path.display(), job.series_id);
    }
    Ok(())
}

fn run_finalize(args: &FinalizeArgs) -> Result<()> {
    let root = std::path::PathBuf::from(&args.output_dir);
    heudicomvert_convert::toplevel::ensure_dataset_files(
        &root,
        heudicomvert_convert::config::BidsMode::Enabled,
        args.overwrite,
    )?;
    Ok(())
}

fn run_inspect(args: &InspectArgs) -> Result<()> {
    let discovery = heudicomvert_convert::discovery::discover(&heudicomvert_convert::discovery::DiscoveryRequest {
        subject: args.subject.clone(),
        session: None,
        templates: Vec::new(),
        explicit_paths: args.paths.iter().map(std::path::PathBuf::from).collect(),
    });
    let mut headers = Vec::new();
    for path in &discovery.files {
        if let Ok(header) = heudicomvert_convert::grouping::read_header(path) {
            headers.push(header);
        }
    }
    let series = heudicomvert_convert::grouping::group(
        heudicomvert_convert::config::GroupingMode::All,
        &args.subject,
        headers,
    )?;

    let mut table = comfy_table::Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS);
    table.set_header(vec!["series", "protocol", "dim1", "dim2", "TR", "TE"]);
    for s in &series {
        table.add_row(vec![
            s.seqinfo.series_id.clone(),
            s.seqinfo.protocol_name.clone(),
            s.seqinfo.dim1.to_string(),
            s.seqinfo.dim2.to_string(),
            s.seqinfo.tr.to_string(),
            s.seqinfo.te.to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}
