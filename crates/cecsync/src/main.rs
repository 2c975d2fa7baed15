use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};

use cecsync_core::config::load_config;
use cecsync_core::deploy::{
    DeployReport, SyncContext, deploy_site, persist_missing_slugs, site_status,
};
use cecsync_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, deploy_enabled,
    ensure_runtime_ready_for_deploy, inspect_runtime, resolve_paths,
};
use cecsync_core::toolkit::CecCliClient;

#[derive(Debug, Parser)]
#[command(
    name = "cecsync",
    version,
    about = "Synchronize a rendered static site into Oracle Content Management"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    content_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    site_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Sync pages, assets, and publication state to the remote repository")]
    Deploy(DeployArgs),
    #[command(about = "Persist derived slugs into front matter")]
    Slugs,
    #[command(about = "Scan the site and report what a deploy would see")]
    Status,
}

#[derive(Debug, Args)]
struct DeployArgs {
    #[arg(long, value_name = "PATH", help = "Sync a single page instead of the whole site")]
    page: Option<PathBuf>,
    #[arg(
        long,
        help = "Write derived slugs back to source files",
        conflicts_with = "no_persist_slugs"
    )]
    persist_slugs: bool,
    #[arg(long, help = "Never write slugs back to source files")]
    no_persist_slugs: bool,
}

fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let paths = resolve_runtime(&cli)?;
    if cli.diagnostics {
        println!("[diagnostics]\n{}", paths.diagnostics());
    }

    match cli.command {
        Commands::Deploy(args) => run_deploy(&paths, args),
        Commands::Slugs => run_slugs(&paths),
        Commands::Status => run_status(&paths),
    }
}

/// `DEBUG_CEC` selects the verbosity (0 errors only, 1 info, 2 debug,
/// 3 trace); `RUST_LOG` still wins when set.
fn init_logging() {
    let level = match env::var("DEBUG_CEC").ok().as_deref().map(str::trim) {
        Some("1") => "info",
        Some("2") => "debug",
        Some("3") => "trace",
        _ => "error",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn resolve_runtime(cli: &Cli) -> Result<ResolvedPaths> {
    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: cli.project_root.clone(),
        content_dir: cli.content_dir.clone(),
        site_dir: cli.site_dir.clone(),
        config: cli.config.clone(),
    };
    resolve_paths(&context, &overrides)
}

fn run_deploy(paths: &ResolvedPaths, args: DeployArgs) -> Result<ExitCode> {
    if !deploy_enabled() {
        bail!("CEC_DEPLOY is not set; refusing to touch the remote repository");
    }

    let status = inspect_runtime(paths)?;
    for warning in &status.warnings {
        eprintln!("warning: {warning}");
    }
    ensure_runtime_ready_for_deploy(paths, &status)?;

    let config = load_config(&paths.config_path)?;
    let server = config.server_name()?;
    let repository = config.repository()?;
    let channel = config.channel()?;
    let mut api = CecCliClient::new(paths, &server, &repository, &channel);

    let persist_slugs = match (args.persist_slugs, args.no_persist_slugs) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    };
    let mut ctx = SyncContext::new(config, paths.clone(), persist_slugs)?;
    let report = deploy_site(&mut api, &mut ctx, args.page.as_deref())?;
    print_deploy_report(&report);

    Ok(if report.errors.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_deploy_report(report: &DeployReport) {
    for outcome in &report.outcomes {
        println!(
            "page {}: {} ({})",
            outcome.source.display(),
            outcome.result.as_str(),
            outcome.slug
        );
    }
    println!("pages: {}", report.outcomes.len());
    println!("created: {}", report.created);
    println!("updated: {}", report.updated);
    println!("unchanged: {}", report.unchanged);
    println!("retired: {}", report.retired);
    println!("skipped: {}", report.skipped);
    println!("failed: {}", report.failed);
    println!("commands: {}", report.request_count);
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    for error in &report.errors {
        eprintln!("error: {error}");
    }
}

fn run_slugs(paths: &ResolvedPaths) -> Result<ExitCode> {
    let config = load_config(&paths.config_path)?;
    let report = persist_missing_slugs(paths, config.article_slug_prefix())?;
    for source in &report.written {
        println!("wrote slug: {}", source.display());
    }
    println!("written: {}", report.written.len());
    println!("already_present: {}", report.already_present);
    Ok(ExitCode::SUCCESS)
}

fn run_status(paths: &ResolvedPaths) -> Result<ExitCode> {
    let runtime = inspect_runtime(paths)?;
    for warning in &runtime.warnings {
        println!("warning: {warning}");
    }
    if !runtime.content_dir_exists {
        return Ok(ExitCode::FAILURE);
    }

    let status = site_status(paths)?;
    println!("pages: {}", status.pages);
    println!("published: {}", status.published);
    println!("unpublished: {}", status.unpublished);
    println!("missing_slug: {}", status.missing_slug);
    println!("missing_html: {}", status.missing_html);
    for warning in &status.warnings {
        println!("warning: {warning}");
    }
    Ok(ExitCode::SUCCESS)
}
