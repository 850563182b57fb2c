//! `jupyter-web` command line front-end.
//!
//! Runs notebooks against an execution backend from the terminal and wraps
//! the backend's file endpoints.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kernel_client::{FileEntry, KernelClient};
use log::info;
use notebook::autosave::{Autosaver, DEFAULT_AUTOSAVE_INTERVAL};
use notebook::output::decode_data_url;
use notebook::settings::{load_settings, AppSettings};
use notebook::{CellKind, LogSink, Session};
use tabled::{settings::Style, Table, Tabled};

#[derive(Parser, Debug)]
#[command(name = "jupyter-web", author, version, about = "Notebook client for a remote Python backend")]
struct Cli {
    /// Backend base URL (default: $JUPYTER_WEB_BACKEND, then the settings file, then http://localhost:5000/api)
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every cell of a local .ipynb or .py file and print the outputs
    Run {
        path: PathBuf,

        /// Install missing packages without asking
        #[arg(long)]
        install: bool,

        /// Write the notebook (with outputs) back to PATH afterwards
        #[arg(long)]
        save: bool,

        /// Write plot images into this directory
        #[arg(long)]
        plots_dir: Option<PathBuf>,
    },
    /// List files known to the backend
    Files {
        /// Folder to list (default: the backend's root listing)
        path: Option<String>,
    },
    /// Download a file from the backend and show it as a notebook
    Fetch {
        path: String,

        /// Also write the loaded notebook to this local file
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Check that the backend is running
    Status,
    /// Restart the backend's Python namespace
    Reset,
    /// Recover the last autosaved notebook
    Restore {
        /// Where to write it (default: a timestamped name in the current directory)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[derive(Tabled)]
struct FileTableRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "TYPE")]
    kind: String,
    #[tabled(rename = "SIZE")]
    size: String,
    #[tabled(rename = "PATH")]
    path: String,
}

impl From<&FileEntry> for FileTableRow {
    fn from(entry: &FileEntry) -> Self {
        Self {
            name: entry.name.clone(),
            kind: entry.kind.to_string(),
            size: entry.size.map(format_size).unwrap_or_else(|| "-".to_string()),
            path: entry.path.clone(),
        }
    }
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let settings = load_settings();
    let backend_url = cli
        .backend
        .clone()
        .unwrap_or_else(|| settings.backend_url());

    match cli.command {
        Commands::Run {
            path,
            install,
            save,
            plots_dir,
        } => run_notebook(&settings, &backend_url, &path, install, save, plots_dir.as_deref()).await,
        Commands::Files { path } => list_files(&backend_url, path.as_deref()).await,
        Commands::Fetch { path, output } => fetch(&settings, &backend_url, &path, output.as_deref()).await,
        Commands::Status => status(&backend_url).await,
        Commands::Reset => reset(&backend_url).await,
        Commands::Restore { output } => restore(&settings, &backend_url, output),
    }
}

fn new_session(settings: &AppSettings, client: &KernelClient) -> Session {
    let session = Session::with_sink(
        Arc::new(client.clone()),
        Arc::new(LogSink),
        settings.session_config(),
    );
    match settings.autosaver() {
        Some(autosaver) => session.with_autosave(autosaver),
        None => session,
    }
}

fn print_cells(session: &Session) {
    for (index, cell) in session.document().cells().iter().enumerate() {
        let label = match cell.kind() {
            CellKind::Code => "code",
            CellKind::Markdown => "markdown",
        };
        println!("── [{index}] {label} ──");
        println!("{}", cell.source());
        if let Some(output) = cell.output() {
            let text = output.plain_text();
            if !text.is_empty() {
                let marker = if output.is_error() { "!" } else { ">" };
                for line in text.lines() {
                    println!("{marker} {line}");
                }
            }
            let plots = output.images().count();
            if plots > 0 {
                println!("> [{plots} plot(s)]");
            }
        }
        println!();
    }
}

fn write_plots(session: &Session, dir: &Path) -> Result<usize> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let mut written = 0;
    for (index, cell) in session.document().cells().iter().enumerate() {
        let Some(output) = cell.output() else {
            continue;
        };
        for (n, data_url) in output.images().enumerate() {
            let Some(image) = decode_data_url(data_url) else {
                log::warn!("Skipping undecodable plot {} of cell {index}", n + 1);
                continue;
            };
            let file = dir.join(format!("cell{index}-plot{}.{}", n + 1, image.extension()));
            std::fs::write(&file, &image.bytes)
                .with_context(|| format!("Failed to write {}", file.display()))?;
            written += 1;
        }
    }
    Ok(written)
}

async fn run_notebook(
    settings: &AppSettings,
    backend_url: &str,
    path: &Path,
    install: bool,
    save: bool,
    plots_dir: Option<&Path>,
) -> Result<()> {
    let client = KernelClient::new(backend_url)?;
    let mut session = new_session(settings, &client);
    session.open_path(path)?;

    info!("Running {} against {}", path.display(), client.base_url());
    session.run_all_cells();
    session.run_until_idle().await;

    loop {
        let pending: Vec<_> = session.pending_installs().cloned().collect();
        if pending.is_empty() {
            break;
        }
        for request in &pending {
            let packages: Vec<&str> = request.packages.iter().map(|p| p.package.as_str()).collect();
            if install {
                println!("Installing {} ...", packages.join(", "));
                session.confirm_install(request.cell_id);
            } else {
                println!(
                    "Missing packages: {} (re-run with --install to install them)",
                    request
                        .packages
                        .iter()
                        .map(|p| p.install_command.as_str())
                        .collect::<Vec<_>>()
                        .join("; ")
                );
                session.decline_install(request.cell_id);
            }
        }
        session.run_until_idle().await;
    }

    print_cells(&session);

    if let Some(dir) = plots_dir {
        let written = write_plots(&session, dir)?;
        println!("Wrote {written} plot(s) to {}", dir.display());
    }
    if save {
        session.save_to_path(path)?;
        println!("Saved {}", path.display());
    }
    Ok(())
}

async fn list_files(backend_url: &str, path: Option<&str>) -> Result<()> {
    let client = KernelClient::new(backend_url)?;
    let listing = match path {
        Some(path) => client.list_folder(path).await?,
        None => client.list_files().await?,
    };
    if listing.files.is_empty() {
        println!("No files found.");
        return Ok(());
    }
    let rows: Vec<FileTableRow> = listing.files.iter().map(FileTableRow::from).collect();
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
    Ok(())
}

async fn fetch(
    settings: &AppSettings,
    backend_url: &str,
    path: &str,
    output: Option<&Path>,
) -> Result<()> {
    let client = KernelClient::new(backend_url)?;
    let mut session = new_session(settings, &client);
    session.open_remote(&client, path).await?;
    print_cells(&session);
    if let Some(output) = output {
        session.save_to_path(output)?;
        println!("Saved {}", output.display());
    }
    Ok(())
}

async fn status(backend_url: &str) -> Result<()> {
    let client = KernelClient::new(backend_url)?;
    match client.status().await {
        Ok(status) => {
            println!(
                "Backend {}: {}",
                client.base_url(),
                status.status.as_deref().unwrap_or("running")
            );
            if let Some(version) = status.python_version {
                println!("Python {version}");
            }
            Ok(())
        }
        Err(e) if e.is_unreachable() => {
            anyhow::bail!(
                "Backend server not running at {}. Start it with: python backend_server.py",
                client.base_url()
            )
        }
        Err(e) => Err(e.into()),
    }
}

async fn reset(backend_url: &str) -> Result<()> {
    let client = KernelClient::new(backend_url)?;
    let response = client.reset().await?;
    println!(
        "{}",
        response
            .message
            .as_deref()
            .unwrap_or("Kernel restarted successfully!")
    );
    Ok(())
}

fn restore(settings: &AppSettings, backend_url: &str, output: Option<PathBuf>) -> Result<()> {
    let client = KernelClient::new(backend_url)?;
    let store = settings.autosave_store();
    let mut session = Session::with_sink(
        Arc::new(client),
        Arc::new(LogSink),
        settings.session_config(),
    )
    .with_autosave(Autosaver::new(store.clone(), DEFAULT_AUTOSAVE_INTERVAL));

    if !session.restore_autosave() {
        println!("No autosaved notebook at {}", store.path().display());
        return Ok(());
    }
    let output =
        output.unwrap_or_else(|| PathBuf::from(notebook::session::default_notebook_name()));
    session.save_to_path(&output)?;
    println!(
        "Restored {} cells to {}",
        session.document().len(),
        output.display()
    );
    Ok(())
}
