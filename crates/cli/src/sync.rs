//! Subcommands that talk to GitHub through the sync service.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dialoguer::{Confirm, Select};
use indicatif::{ProgressBar, ProgressStyle};

use sandsync_core::config::AppConfig;
use sandsync_core::db::Database;
use sandsync_core::fs::LocalFilesystem;
use sandsync_core::git::GitHubClient;
use sandsync_core::models::{Conflict, ConflictResolution, Resolution};
use sandsync_core::service::ProjectSyncService;

use crate::style;

/// Build a sync service backed by the GitHub API.
pub fn connect(config: &AppConfig, db: Database) -> Result<ProjectSyncService> {
    let token = config
        .require_github_token()
        .context("GitHub token is required")?;
    let mut github = GitHubClient::new(&config.github.api_url, token)
        .context("failed to build GitHub client")?
        .with_private_repos(config.github.private_repos);
    if let Some(owner) = &config.github.owner {
        github = github.with_owner(owner.clone());
    }
    Ok(ProjectSyncService::new(Arc::new(github), db, &config.sync)
        .with_owner(config.github.owner.clone()))
}

fn sandbox(config: &AppConfig, project: &str) -> Result<LocalFilesystem> {
    let ownership = config.sandbox.ownership()?;
    Ok(LocalFilesystem::new(config.sandbox.project_dir(project)).with_ownership(ownership))
}

/// Run `fut` behind a spinner showing `msg`.
async fn with_spinner<F: Future>(msg: &str, fut: F) -> F::Output {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "✓"]),
    );
    spinner.set_message(msg.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    let out = fut.await;
    spinner.finish_and_clear();
    out
}

pub async fn status(service: &ProjectSyncService, project: &str) -> Result<()> {
    let check = with_spinner("Checking remote...", service.check_if_pull_needed(project)).await?;

    if check.needs_pull {
        println!("{}", style::warn(&format!("{} is behind its repository", project)));
    } else {
        println!("{}", style::success(&format!("{} is up to date", project)));
    }
    if let Some(commit) = check.latest_commit {
        println!(
            "  Latest commit: {} {} {}",
            &commit.sha[..7.min(commit.sha.len())],
            style::dim(&commit.date.format("%Y-%m-%d %H:%M").to_string()),
            commit.message.lines().next().unwrap_or("")
        );
    }
    Ok(())
}

pub async fn pull(
    service: &ProjectSyncService,
    config: &AppConfig,
    project: &str,
    accept: Option<Resolution>,
) -> Result<()> {
    let fs = sandbox(config, project)?;
    let result = with_spinner("Pulling...", service.pull(project, &fs)).await?;

    if result.is_noop() {
        println!("{}", style::success("Already up to date"));
        return Ok(());
    }

    for path in &result.new_files {
        println!("{}", style::change('+', path));
    }
    for path in &result.deleted_files {
        println!("{}", style::change('-', path));
    }
    for conflict in &result.conflicts {
        println!("{}", style::change('!', &conflict.path));
    }
    for path in &result.skipped_files {
        println!("{}", style::change('?', path));
    }
    println!();

    if !result.has_conflicts() {
        println!("{}", style::success("Pull complete"));
        return Ok(());
    }

    println!(
        "{}",
        style::header(&format!("{} conflict(s) to resolve", result.conflicts.len()))
    );
    let resolutions = result
        .conflicts
        .iter()
        .map(|c| match accept {
            Some(resolution) => Ok(ConflictResolution::for_conflict(c, resolution)),
            None => prompt_resolution(c),
        })
        .collect::<Result<Vec<_>>>()?;

    let pulled_sha = result
        .commit_sha
        .as_deref()
        .context("pull did not report the commit it was resolved against")?;
    let response = service
        .resolve_conflicts(project, &fs, pulled_sha, &resolutions)
        .await?;
    println!(
        "{}",
        style::success(&format!(
            "Conflicts resolved, {} file(s) overwritten",
            response.overwritten.len()
        ))
    );
    Ok(())
}

fn prompt_resolution(conflict: &Conflict) -> Result<ConflictResolution> {
    println!();
    println!("{}", style::header(&conflict.path));
    println!(
        "  local    : {} bytes, {} lines",
        conflict.local_content.len(),
        conflict.local_content.lines().count()
    );
    println!(
        "  incoming : {} bytes, {} lines",
        conflict.incoming_content.len(),
        conflict.incoming_content.lines().count()
    );

    let choice = Select::new()
        .with_prompt("Keep which version?")
        .items(&["local (keep sandbox copy)", "incoming (take remote copy)"])
        .default(0)
        .interact()
        .context("failed to read resolution")?;
    let resolution = if choice == 0 {
        Resolution::Local
    } else {
        Resolution::Incoming
    };
    Ok(ConflictResolution::for_conflict(conflict, resolution))
}

pub async fn commit(
    service: &ProjectSyncService,
    config: &AppConfig,
    project: &str,
    message: Option<&str>,
) -> Result<()> {
    let fs = sandbox(config, project)?;
    let response = with_spinner("Committing...", service.commit(project, &fs, message)).await?;
    println!(
        "{}",
        style::success(&format!(
            "Pushed {} to {}",
            &response.commit_sha[..7.min(response.commit_sha.len())],
            response.repo_url
        ))
    );
    Ok(())
}

pub async fn create_repo(
    service: &ProjectSyncService,
    config: &AppConfig,
    project: &str,
) -> Result<()> {
    let fs = sandbox(config, project)?;
    let response =
        with_spinner("Creating repository...", service.create_repo(project, &fs)).await?;
    println!(
        "{}",
        style::success(&format!("Repository created: {}", response.repo_url))
    );
    Ok(())
}

pub async fn remove_repo(service: &ProjectSyncService, project: &str, yes: bool) -> Result<()> {
    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete the GitHub repository linked to {}? This cannot be undone",
                project
            ))
            .default(false)
            .interact()
            .context("failed to read confirmation")?;
        if !confirmed {
            println!("{}", style::warn("Cancelled. Repository was not deleted."));
            return Ok(());
        }
    }

    with_spinner("Deleting repository...", service.remove_repo(project)).await?;
    println!(
        "{}",
        style::success(&format!("Repository removed and {} unlinked", project))
    );
    Ok(())
}
