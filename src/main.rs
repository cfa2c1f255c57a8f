mod app;
mod installer;
mod model;
mod msg;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;
use std::thread;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use app::{App, Shell};
use installer::stages::StageResult;
use model::config::AppConfig;
use model::toolchain::Slot;
use msg::Msg;

#[derive(Debug, Parser)]
#[command(name = "rez-bootstrap", version, about = "Installs a private Rez toolchain")]
struct Cli {
    /// Extra config file layered over the user config.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Mirror debug logs to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Install whatever the manifest does not already record (default).
    Install,
    /// Show requested and recorded versions per component.
    Status,
    /// Print shell assignments that expose the installed toolchain.
    Env {
        #[arg(long, value_enum)]
        shell: Option<Shell>,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.verbose)?;

    tracing::info!("rez-bootstrap starting");

    let config = AppConfig::load(cli.config.as_deref())?;
    let mut app = App::new(config)?;

    match cli.command.unwrap_or(Command::Install) {
        Command::Install => install(&mut app),
        Command::Status => {
            let orchestrator = app.orchestrator()?;
            for line in app.status_lines(&orchestrator) {
                println!("{line}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Env { shell } => {
            for line in app.env_lines(shell.unwrap_or_else(Shell::native)) {
                println!("{line}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(verbose: bool) -> Result<WorkerGuard> {
    // Logs go to a file; stdout is reserved for command output.
    let log_dir = directories::ProjectDirs::from("", "", "rez-bootstrap")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(std::env::temp_dir);
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "rez-bootstrap.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rez_bootstrap=info"));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(filter);
    let stderr_layer = verbose.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(EnvFilter::new("rez_bootstrap=debug"))
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .init();

    Ok(guard)
}

fn install(app: &mut App) -> Result<ExitCode> {
    let orchestrator = app.orchestrator()?;
    if orchestrator.check_if_installed() {
        tracing::info!(bundle = %orchestrator.layout().bundle(), "already installed");
        println!("already installed: {}", orchestrator.launch_path().display());
        return Ok(ExitCode::SUCCESS);
    }

    let launch_path = orchestrator.launch_path();
    let (tx, rx) = mpsc::channel::<Msg>();

    // Worker thread: runs every phase and reports back over the channel.
    let tx_progress = tx.clone();
    let mut orchestrator = orchestrator.with_progress(move |percent: u8, label: &str| {
        let _ = tx_progress.send(Msg::Progress {
            percent,
            label: label.to_string(),
        });
    });
    let worker = thread::spawn(move || {
        let report = orchestrator.run();
        let _ = tx.send(Msg::Finished(report));
    });

    for msg in rx {
        for line in app.update(msg) {
            println!("{line}");
        }
        if app.finished().is_some() {
            break;
        }
    }

    worker
        .join()
        .map_err(|_| anyhow!("installer thread panicked"))?;

    let report = app
        .finished()
        .ok_or_else(|| anyhow!("installer stopped without a report"))?;
    if report.result(Slot::Runtime).is_some_and(StageResult::success) {
        println!("launch path: {}", launch_path.display());
    }
    if report.success() {
        // Unsaved manifest writes: installed now, reinstalled next launch.
        for problem in report.problem_notifications() {
            eprintln!("warning: {problem}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    for problem in report.problem_notifications() {
        eprintln!("error: {problem}");
    }
    eprintln!(
        "install incomplete: {} of {} components failed",
        report.failed_count(),
        report.results.len()
    );
    Ok(ExitCode::FAILURE)
}
