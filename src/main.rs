mod app;
mod cache;
mod config;
mod fingerprint;
mod hw;
mod output;
mod process;
mod results;
mod runner;
mod shader;
mod toolchain;
mod types;
mod variants;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use types::Define;

#[derive(Parser, Debug)]
#[command(author, version, about = "Shader build cache and benchmark driver for ImperialEngine")]
struct Cli {
    /// YAML session config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    project_root: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Recompile shaders if the shader directory changed
    Shaders {
        #[arg(long)]
        dir: Option<PathBuf>,
        #[arg(long)]
        force: bool,
        /// NAME=VALUE, repeatable
        #[arg(short = 'D', long = "define")]
        defines: Vec<Define>,
    },
    /// Print the fingerprint of a directory
    Fingerprint { dir: PathBuf },
    Experiments,
    Plan { experiment: String },
    Run {
        experiment: String,
        /// Run only these suites (repeatable)
        #[arg(long)]
        only: Vec<String>,
    },
    /// Per-run measurement stats from a session manifest
    Summarize { manifest: Option<PathBuf> },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();

    let mut session = config::load_config(cli.config.as_deref())?
        .resolve(cli.project_root, std::env::var_os("VK_SDK_PATH").map(PathBuf::from))?;

    log::debug!("project root = {}", session.project_root.display());
    log::debug!("shader dir   = {}", session.shader_dir.display());
    log::debug!("results dir  = {}", session.results_dir.display());

    let exec = process::SystemExecutor;

    match cli.cmd {
        Commands::Shaders {
            dir,
            force,
            defines,
        } => {
            if let Some(dir) = dir {
                session.shader_dir = dir;
            }
            let cfg = app::AppConfig { session };
            app::shaders(&cfg, &exec, force, &defines)?
        }
        Commands::Fingerprint { dir } => app::fingerprint(&dir, &session.state_file)?,
        Commands::Experiments => app::list_experiments(&app::AppConfig { session })?,
        Commands::Plan { experiment } => app::plan(&app::AppConfig { session }, &experiment)?,
        Commands::Run { experiment, only } => {
            let cfg = app::AppConfig { session };
            let manifest = app::run(&cfg, &exec, &experiment, &only)?;
            let code = app::exit_code(&manifest);
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Summarize { manifest } => app::summarize(&app::AppConfig { session }, manifest)?,
    }

    Ok(())
}
