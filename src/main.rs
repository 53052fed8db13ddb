//! # nest CLI Entry Point
//!
//! Parses arguments with clap and drives a build session.
//!
//! ## Commands
//!
//! - `build` (default): resolve, fetch and build the tree
//! - `tree`: resolve and print the dependency graph
//! - `clean`: remove the project's `build/` folder

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use nestbuild::build::{self, Session};
use nestbuild::config::{self, Settings};
use nestbuild::error::BuildError;
use nestbuild::tree;

#[derive(Parser)]
#[command(name = "nest")]
#[command(about = "Recursive build orchestrator for C/C++ project trees", version = env!("CARGO_PKG_VERSION"))]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve dependencies and build the project tree
    Build(BuildArgs),
    /// Print the resolved dependency graph without building
    Tree {
        #[command(flatten)]
        project: ProjectArgs,
    },
    /// Remove the project's build folder
    Clean {
        #[command(flatten)]
        project: ProjectArgs,
    },
}

#[derive(Args, Default)]
struct ProjectArgs {
    /// Project directory [default: current directory]
    #[arg(long)]
    path: Option<PathBuf>,
    /// Extra settings file, applied over the standard locations
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args, Default)]
struct BuildArgs {
    #[command(flatten)]
    project: ProjectArgs,
    /// Re-sync dependencies that are already fetched
    #[arg(long, conflicts_with = "dont_update_dependencies")]
    update_dependencies: bool,
    /// Never re-sync fetched dependencies, whatever the settings say
    #[arg(long)]
    dont_update_dependencies: bool,
    /// Echo every command and staleness decision
    #[arg(short, long)]
    verbose: bool,
    /// Compile each target with a single job
    #[arg(long)]
    serial: bool,
}

impl ProjectArgs {
    fn root(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => std::env::current_dir().context("Failed to read current directory"),
        }
    }

    fn settings(&self, root: &Path) -> Result<Settings> {
        config::load_settings(root, self.config.as_deref())
            .with_context(|| format!("Failed to load settings for {}", root.display()))
    }
}

fn main() {
    let cli = Cli::parse();
    let outcome = match cli.command {
        Some(Commands::Build(args)) => run_build(args),
        None => run_build(BuildArgs::default()),
        Some(Commands::Tree { project }) => run_tree(project),
        Some(Commands::Clean { project }) => project
            .root()
            .and_then(|root| build::clean(&root).map_err(Into::into))
            .map(|_| ()),
    };

    if let Err(e) = outcome {
        report_error(&e);
        std::process::exit(1);
    }
}

fn report_error(error: &anyhow::Error) {
    println!("{} {}", "x".red(), error);
    for cause in error.chain().skip(1) {
        println!("  {} {}", "caused by:".dimmed(), cause);
    }
    let diagnostics = error
        .chain()
        .find_map(|cause| cause.downcast_ref::<BuildError>())
        .and_then(BuildError::diagnostics);
    if let Some(stderr) = diagnostics {
        println!("{}", "--- stderr ---".dimmed());
        println!("{}", stderr.trim_end());
    }
}

fn run_build(args: BuildArgs) -> Result<()> {
    let start = Instant::now();
    let root = args.project.root()?;
    let mut settings = args.project.settings(&root)?;
    if args.update_dependencies {
        settings.update_dependencies = true;
    }
    if args.dont_update_dependencies {
        settings.update_dependencies = false;
    }
    if args.verbose {
        settings.verbose = true;
    }
    if args.serial {
        settings.jobs = Some(1);
    }

    let mut session = Session::new(settings);

    println!("{} Building {}", "🔨".cyan(), root.display());
    let root_context = session
        .open_root(&root)
        .with_context(|| format!("Failed to open project at {}", root.display()))?;
    session.build_all(root_context)?;

    println!();
    session.report.print();
    let warnings = session.graph.warnings.len();
    if warnings > 0 {
        println!("{} {} warning(s) during the run", "!".yellow(), warnings);
    }
    println!(
        "{} Build finished in {:.2?}",
        "✓".green(),
        start.elapsed()
    );
    Ok(())
}

fn run_tree(project: ProjectArgs) -> Result<()> {
    let root = project.root()?;
    let settings = project.settings(&root)?;
    let mut session = Session::new(settings);
    let root_context = session
        .open_root(&root)
        .with_context(|| format!("Failed to open project at {}", root.display()))?;
    session.resolve_tree(root_context)?;
    tree::print_tree(&session.graph, root_context);
    Ok(())
}
