mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::Context;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "mill",
    about = "Run your development services and tasks inside a reproducible nix-shell",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: nearest directory containing the config file)
    #[arg(long, short = 'd', global = true, env = "MILL_ROOT")]
    root: Option<PathBuf>,

    /// Config file name, relative to the root
    #[arg(long, short = 'f', global = true, default_value = mill_core::paths::CONFIG_FILE)]
    file: String,

    /// Extra env file loaded into every environment (repeatable)
    #[arg(long = "env", short = 'e', global = true)]
    env_files: Vec<PathBuf>,

    /// Skip package resolution and run commands through /bin/sh
    #[arg(long, global = true)]
    no_nix: bool,

    /// Log lifecycle events
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter mill.yml
    Init,

    /// Run services concurrently until they exit or you stop them
    Run {
        /// Only run these services (comma-separated)
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,
        /// Run every service except these (comma-separated)
        #[arg(long, value_delimiter = ',')]
        except: Vec<String>,
    },

    /// Open an interactive shell with every required package
    Shell {
        /// Use this service's environment and packages
        service: Option<String>,
    },

    /// Run one command inside the environment shell
    Exec {
        /// Use this service's environment and packages
        #[arg(long, short = 's')]
        service: Option<String>,
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Print the composed environment of a service or task
    #[command(hide = true)]
    Env {
        name: Option<String>,
    },

    /// Show the state of every required package
    Deps {
        #[arg(long, short = 'j')]
        json: bool,
    },

    /// List the tasks defined in the config
    Tasks {
        #[arg(long, short = 'j')]
        json: bool,
    },

    /// Run a task: mill <task> [args..]
    #[command(external_subcommand)]
    Task(Vec<String>),
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let ctx = Context {
        root: root::resolve_root(cli.root.as_deref(), &cli.file),
        file: cli.file,
        env_files: cli.env_files,
        no_nix: cli.no_nix,
    };

    let result = match cli.command {
        Commands::Init => cmd::init::run(&ctx),
        Commands::Run { only, except } => cmd::run::run(&ctx, &only, &except),
        Commands::Shell { service } => cmd::shell::run(&ctx, service.as_deref()),
        Commands::Exec { service, command } => cmd::exec::run(&ctx, service.as_deref(), &command),
        Commands::Env { name } => cmd::env::run(&ctx, name.as_deref()),
        Commands::Deps { json } => cmd::deps::run(&ctx, json),
        Commands::Tasks { json } => cmd::tasks::run(&ctx, json),
        Commands::Task(args) => cmd::task::run(&ctx, &args),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
