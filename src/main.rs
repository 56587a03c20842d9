//! Ferry CLI - release configuration objects between environments
//!
//! Usage: ferry <COMMAND>
//!
//! Commands:
//!   plan              Show what a release would do
//!   apply             Plan, confirm and deploy
//!   revert            Delete deployed targets
//!   reverse-manifest  Write the manifest of the opposite release
//!   purge             Forget one source object in the deploy state

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Parser;
use is_terminal::IsTerminal;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use ferry::config::{self, FerryConfig};
use ferry::domain::ports::ManifestRepository;
use ferry::infrastructure::YamlManifestRepository;
use ferry::presentation::cli::{Cli, Commands, ManifestArgs};
use ferry::presentation::factory::{
    create_release_use_case, ConcreteReleaseUseCase, ReleasePaths, RunMode,
};
use ferry::presentation::output::{create_renderer, OutputFormat, ReleaseRenderer};
use ferry::ResourceType;

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "ferry=warn",
        1 => "ferry=info",
        2 => "ferry=debug",
        _ => "ferry=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn paths(files: &ManifestArgs) -> ReleasePaths {
    let mut paths = ReleasePaths::beside(&files.manifest);
    if let Some(snapshots) = &files.snapshots {
        paths.snapshots = snapshots.clone();
    }
    if let Some(state) = &files.state {
        paths.state = state.clone();
    }
    paths
}

fn load_config(cli: &Cli) -> Result<FerryConfig> {
    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    let (config, warnings) =
        config::load(cli.config.as_deref(), &cwd).context("failed to load configuration")?;
    for warning in warnings {
        warn!("{warning}");
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = load_config(&cli)?;
    match &cli.command {
        Commands::Plan { no_compare, .. } | Commands::Apply { no_compare, .. } if *no_compare => {
            config.release.compare = false;
        }
        _ => {}
    }
    if let Commands::Apply {
        concurrency: Some(concurrency),
        ..
    } = &cli.command
    {
        config.release.concurrency = *concurrency;
    }

    let files = cli.command.files();
    let paths = paths(files);
    let mode = RunMode {
        auto_approve: cli.yes,
        json_events: cli.json,
    };
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };
    let renderer = create_renderer(format, std::io::stdout().is_terminal(), cli.verbose);

    let use_case = create_release_use_case(&config, &paths, mode)
        .context("failed to set up the release")?;
    let mut manifest = use_case
        .manifest_repository()
        .load()
        .with_context(|| format!("failed to load manifest {}", paths.manifest.display()))?;

    match &cli.command {
        Commands::Plan { .. } => cmd_plan(&use_case, &manifest, renderer.as_ref()).await,
        Commands::Apply { .. } => {
            let result = use_case.apply(&mut manifest).await.context("release failed")?;
            println!("{}", renderer.render_result(&result));
            Ok(())
        }
        Commands::Revert { .. } => {
            let result = use_case.revert(&mut manifest).await.context("revert failed")?;
            println!("{}", renderer.render_revert(&result));
            Ok(())
        }
        Commands::ReverseManifest { output, .. } => {
            cmd_reverse_manifest(&use_case, &manifest, output)
        }
        Commands::Purge {
            resource_type, id, ..
        } => {
            let Some(resource_type) = ResourceType::from_plural(resource_type) else {
                bail!("unknown resource type '{resource_type}'");
            };
            if use_case.purge(resource_type, *id)? {
                println!("Purged {resource_type} {id} from the deploy state");
            } else {
                println!("No deploy state for {resource_type} {id}");
            }
            Ok(())
        }
    }
}

async fn cmd_plan(
    use_case: &ConcreteReleaseUseCase,
    manifest: &ferry::Manifest,
    renderer: &dyn ReleaseRenderer,
) -> Result<()> {
    let plan = use_case.plan(manifest).await.context("planning failed")?;
    println!("{}", renderer.render_plan(&plan));
    if plan.has_conflicts() {
        bail!("the plan has unresolved conflicts");
    }
    Ok(())
}

fn cmd_reverse_manifest(
    use_case: &ConcreteReleaseUseCase,
    manifest: &ferry::Manifest,
    output: &Path,
) -> Result<()> {
    let reversed = use_case
        .reverse_manifest(manifest)
        .context("failed to build the reverse manifest")?;
    YamlManifestRepository::new(output)
        .save(&reversed)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Reverse manifest written to {}", output.display());
    Ok(())
}
