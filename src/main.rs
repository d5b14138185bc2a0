use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

use cardsmith::auth::{Authenticator, HttpTokenExchange};
use cardsmith::{
    BatchBudgets, BatchFile, CardService, Config, HttpCardService, JobRegistry, JobStatus,
    PublishRequest, submit_publish,
};

#[derive(Parser)]
#[command(
    name = "cardsmith",
    version,
    about = "Build and publish playlist cards from local audio"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize with the card service (interactive device flow)
    #[command(name = "login")]
    Login,

    /// Upload a directory of audio files and publish them as a card
    #[command(name = "publish")]
    Publish {
        /// Card title (prompted for if omitted)
        #[arg(long)]
        title: Option<String>,
        /// Directory holding the audio files, in playback (filename) order
        #[arg(long, default_value = "downloads")]
        dir: PathBuf,
        /// Append to this existing card instead of creating a new one
        #[arg(long)]
        card: Option<String>,
        /// Icon reference for a new card (media id or full yoto:# reference)
        #[arg(long)]
        icon: Option<String>,
        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// List your existing cards
    #[command(name = "cards")]
    Cards,

    /// View or modify config (~/.cardsmith/config.toml)
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current config
    Show,
    /// Set a config value
    Set {
        /// Key to set (client_id, api_url, auth_url)
        key: String,
        /// Value to set
        value: String,
    },
    /// Reset config to defaults
    Reset,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Login => run_login(),
        Commands::Publish {
            title,
            dir,
            card,
            icon,
            yes,
        } => run_publish_command(title, &dir, card, icon, yes),
        Commands::Cards => run_cards(),
        Commands::Config { action } => handle_config(action),
    }
}

fn run_login() -> Result<()> {
    let config = Config::load()?;
    let exchange = HttpTokenExchange::new(&config)?;
    let mut auth = Authenticator::from_home(Box::new(exchange))?;

    if auth.ensure_valid() {
        println!("Already authenticated.");
        return Ok(());
    }
    if auth.authorize()? {
        println!("  Authentication successful!");
        Ok(())
    } else {
        bail!("authorization was not completed");
    }
}

fn run_cards() -> Result<()> {
    let config = Config::load()?;
    let service = HttpCardService::new(&config)?;
    if !service.ensure_authenticated() {
        bail!("not authenticated with the card service; run: cardsmith login");
    }

    let cards = service.list_cards()?;
    if cards.is_empty() {
        println!("No cards yet.");
        return Ok(());
    }
    for card in cards {
        println!("{}  {}", card.id, card.title);
    }
    Ok(())
}

const AUDIO_EXTENSIONS: [&str; 7] = ["mp3", "m4a", "aac", "ogg", "wav", "flac", "opus"];

/// Collect audio files from a directory in filename order. The display label
/// is the file stem, which the download step names "Artist - Title".
fn collect_audio_files(dir: &Path) -> Result<Vec<BatchFile>> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);
        if ext.as_deref().is_some_and(|e| AUDIO_EXTENSIONS.contains(&e)) {
            let label = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or("Untitled")
                .to_string();
            files.push(BatchFile { path, label });
        }
    }
    if files.is_empty() {
        bail!("no audio files found in {}", dir.display());
    }
    Ok(files)
}

fn run_publish_command(
    title: Option<String>,
    dir: &Path,
    card: Option<String>,
    icon: Option<String>,
    yes: bool,
) -> Result<()> {
    let config = Config::load()?;
    let files = collect_audio_files(dir)?;

    println!("\n  Files to publish ({}):", files.len());
    for (i, file) in files.iter().enumerate() {
        println!("  {:2}. {}", i + 1, file.label);
    }
    println!();

    if !yes {
        let confirm = dialoguer::Confirm::with_theme(&dialoguer::theme::ColorfulTheme::default())
            .with_prompt("Proceed with these files?")
            .default(true)
            .interact()?;
        if !confirm {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let title = match title {
        Some(title) => title,
        None => dialoguer::Input::with_theme(&dialoguer::theme::ColorfulTheme::default())
            .with_prompt("Card title")
            .interact_text()?,
    };

    let service = Arc::new(HttpCardService::new(&config)?);
    if !service.ensure_authenticated() {
        bail!("not authenticated with the card service; run: cardsmith login");
    }

    let request = PublishRequest {
        title,
        files,
        icon: icon.map(normalize_icon_reference),
        existing_card: card,
    };

    let registry = JobRegistry::new();
    let budgets = BatchBudgets::from_limits(&config.limits);
    let job_id = submit_publish(&registry, service, budgets, request);

    // Poll until the job is terminal, rendering progress in place
    loop {
        std::thread::sleep(Duration::from_millis(500));
        let Some(snapshot) = registry.poll(&job_id) else {
            bail!("job {job_id} disappeared from the registry");
        };
        match snapshot.status {
            JobStatus::Running | JobStatus::Cancelling => {
                print!(
                    "\r  [{}/{}] {}                ",
                    snapshot.current_index, snapshot.total_count, snapshot.current_label
                );
                std::io::stdout().flush()?;
            }
            JobStatus::Done => {
                println!();
                let result = snapshot
                    .result
                    .context("terminal job snapshot is missing its result")?;
                println!(
                    "  Card \"{}\" published with {} track(s). Card ID: {}",
                    result.title, result.track_count, result.card_id
                );
                for error in &result.errors {
                    println!("  skipped: {error}");
                }
                println!("\n  Next step: open the app and link this card to a player.");
                return Ok(());
            }
            JobStatus::Error => {
                println!();
                for error in &snapshot.errors {
                    eprintln!("  {error}");
                }
                bail!("publish failed");
            }
        }
    }
}

/// Accept either a bare media id or a full reference string.
fn normalize_icon_reference(icon: String) -> String {
    if icon.starts_with("yoto:#") {
        icon
    } else {
        format!("yoto:#{icon}")
    }
}

fn handle_config(action: Option<ConfigAction>) -> Result<()> {
    match action {
        None | Some(ConfigAction::Show) => {
            let config = Config::load().unwrap_or_default();
            println!("client_id = \"{}\"", config.client_id);
            println!("api_url = \"{}\"", config.api_url);
            println!("auth_url = \"{}\"", config.auth_url);
        }
        Some(ConfigAction::Set { key, value }) => {
            let mut config = Config::load().unwrap_or_default();
            match key.as_str() {
                "client_id" => config.client_id = value,
                "api_url" => config.api_url = value,
                "auth_url" => config.auth_url = value,
                _ => bail!("unknown config key: {key}"),
            }
            let path = config.save()?;
            println!("saved to {}", path.display());
        }
        Some(ConfigAction::Reset) => {
            let config = Config::default();
            let path = config.save()?;
            println!("reset to defaults at {}", path.display());
        }
    }
    Ok(())
}
