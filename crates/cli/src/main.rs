//! sandsync command-line management tool.
//!
//! Registers sandbox projects, links them to GitHub repositories and runs
//! pull / commit cycles from the terminal, with interactive conflict
//! resolution. Also generates and validates configuration files.

mod style;
mod sync;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing_subscriber::EnvFilter;

use sandsync_core::config::AppConfig;
use sandsync_core::db::Database;
use sandsync_core::models::Resolution;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// sandsync command-line management tool.
#[derive(Parser, Debug)]
#[command(
    name = "sandsync",
    version,
    about = "Sync sandbox projects with GitHub repositories"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        global = true,
        default_value = "~/.config/sandsync/config.toml"
    )]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./sandsync.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Register a sandbox project.
    Register {
        /// Project id; also the directory name under the sandbox root.
        id: String,
        /// Display name, used to name the GitHub repository.
        #[arg(short, long)]
        name: String,
    },

    /// List registered projects.
    Projects,

    /// Check whether a project needs a pull.
    Status { project: String },

    /// Pull remote changes into the sandbox.
    Pull {
        project: String,

        /// Resolve every conflict this way instead of prompting.
        #[arg(long)]
        accept: Option<Resolution>,
    },

    /// Commit the sandbox contents and push them.
    Commit {
        project: String,

        #[arg(short, long)]
        message: Option<String>,
    },

    /// Create a GitHub repository for a project and push its files.
    CreateRepo { project: String },

    /// Delete a project's GitHub repository and unlink it.
    RemoveRepo {
        project: String,

        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Show recent sync activity for a project.
    History {
        project: String,

        /// Maximum number of entries to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    // Minimal logging for CLI
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_target(false)
        .without_time()
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = expand_tilde(&cli.config);
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(&config_path),
        command => {
            let config = load_config(&config_path)?;
            let db = open_database(&config)?;

            match command {
                Commands::Register { id, name } => cmd_register(&db, &id, &name),
                Commands::Projects => cmd_projects(&db),
                Commands::History { project, limit } => cmd_history(&db, &project, limit),
                Commands::Status { project } => {
                    sync::status(&sync::connect(&config, db)?, &project).await
                }
                Commands::Pull { project, accept } => {
                    sync::pull(&sync::connect(&config, db)?, &config, &project, accept).await
                }
                Commands::Commit { project, message } => {
                    let service = sync::connect(&config, db)?;
                    sync::commit(&service, &config, &project, message.as_deref()).await
                }
                Commands::CreateRepo { project } => {
                    sync::create_repo(&sync::connect(&config, db)?, &config, &project).await
                }
                Commands::RemoveRepo { project, yes } => {
                    sync::remove_repo(&sync::connect(&config, db)?, &project, yes).await
                }
                Commands::Init { .. } | Commands::Validate => Ok(()),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<AppConfig> {
    let mut config =
        AppConfig::load_from_file(path).context("failed to load configuration file")?;
    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    config.validate().context("configuration validation failed")?;
    Ok(config)
}

fn open_database(config: &AppConfig) -> Result<Database> {
    let db = Database::new(config.daemon.database_path()).context("failed to open database")?;
    db.initialize().context("failed to initialize database")?;
    Ok(db)
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

// ---------------------------------------------------------------------------
// Local subcommands
// ---------------------------------------------------------------------------

fn default_config(data_dir: &Path, sandbox_root: &Path) -> String {
    format!(
        r#"# sandsync configuration

[daemon]
log_level = "info"
data_dir = "{data_dir}"

[github]
api_url = "https://api.github.com"
token_env = "GITHUB_TOKEN"
# owner = "my-org"
private_repos = true

[sandbox]
root = "{sandbox_root}"
# file_owner = "1000:1000"

[sync]
blob_batch_size = 7
batch_pause_ms = 1000
empty_files = "skip"
default_commit_message = "Update from sandbox"

[web]
listen = "127.0.0.1:3000"
"#,
        data_dir = data_dir.display(),
        sandbox_root = sandbox_root.display(),
    )
}

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    let data_dir = dirs::data_local_dir()
        .map(|d| d.join("sandsync"))
        .unwrap_or_else(|| PathBuf::from("/var/lib/sandsync"));
    let sandbox_root = dirs::home_dir()
        .map(|d| d.join("sandbox"))
        .unwrap_or_else(|| PathBuf::from("/srv/sandbox"));

    std::fs::write(output, default_config(&data_dir, &sandbox_root))
        .context("failed to write config file")?;

    println!(
        "{}",
        style::success(&format!(
            "Default configuration written to {}",
            output.display()
        ))
    );
    println!();
    println!("Next steps:");
    println!("  1. Edit the config file with your GitHub and sandbox details");
    println!("  2. Export the token variable it references (GITHUB_TOKEN)");
    println!(
        "  3. Validate with: sandsync validate --config {}",
        output.display()
    );
    println!(
        "  4. Start the daemon: sandsync-daemon --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("  [OK] Environment variable references processed");

    if let Err(e) = config.validate() {
        println!("  [FAIL] Validation error: {}", e);
        anyhow::bail!("configuration validation failed");
    }
    println!("  [OK] All required fields are valid");

    println!();
    println!("{}", style::header("Configuration summary:"));
    println!("  GitHub API    : {}", config.github.api_url);
    println!(
        "  GitHub token  : {}",
        if config.github.token.is_some() {
            "set"
        } else {
            "NOT SET"
        }
    );
    println!(
        "  Repo owner    : {}",
        config.github.owner.as_deref().unwrap_or("(token user)")
    );
    println!("  Sandbox root  : {}", config.sandbox.root.display());
    println!(
        "  Batch         : {} blobs, {}ms pause",
        config.sync.blob_batch_size, config.sync.batch_pause_ms
    );
    println!("  Web listen    : {}", config.web.listen);
    println!("  Database      : {}", config.daemon.database_path().display());
    println!();
    println!("{}", style::success("Configuration is valid."));

    Ok(())
}

fn cmd_register(db: &Database, id: &str, name: &str) -> Result<()> {
    if db.get_project(id).context("database error")?.is_some() {
        anyhow::bail!("project '{}' is already registered", id);
    }
    let project = db
        .insert_project(id, name)
        .context("failed to register project")?;
    println!(
        "{}",
        style::success(&format!("Registered {} ({})", project.id, project.name))
    );
    Ok(())
}

fn cmd_projects(db: &Database) -> Result<()> {
    let projects = db.list_projects().context("failed to list projects")?;
    if projects.is_empty() {
        println!("No projects registered.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["ID", "Name", "Repository", "Last commit", "Updated"]);

    for p in &projects {
        table.add_row(vec![
            Cell::new(&p.id),
            Cell::new(&p.name),
            Cell::new(p.repository_id.as_deref().unwrap_or("—")),
            Cell::new(short_sha(p.last_commit.as_deref())),
            Cell::new(p.updated_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }

    println!("{}", table);
    Ok(())
}

fn cmd_history(db: &Database, project: &str, limit: u32) -> Result<()> {
    if db.get_project(project).context("database error")?.is_none() {
        anyhow::bail!("project '{}' not found", project);
    }
    let entries = db
        .list_audit_log(project, limit)
        .context("failed to list history")?;

    if entries.is_empty() {
        println!("No sync history for {}.", project);
        return Ok(());
    }

    println!();
    println!(
        "{}",
        style::header(&format!("Sync history for {} (last {})", project, limit))
    );
    println!();

    for entry in &entries {
        let timestamp = &entry.created_at[..19.min(entry.created_at.len())];
        let outcome = if entry.success {
            style::success(&entry.action)
        } else {
            style::error(&entry.action)
        };
        println!(
            "  {}  {:<22} {:<8} {}",
            style::dim(timestamp),
            outcome,
            short_sha(entry.commit_sha.as_deref()),
            entry.details.as_deref().unwrap_or("")
        );
    }

    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn short_sha(sha: Option<&str>) -> &str {
    match sha {
        Some(sha) => &sha[..7.min(sha.len())],
        None => "—",
    }
}
