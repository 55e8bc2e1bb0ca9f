use std::{collections::HashMap, path::PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use client_core::{
    config::{load_settings_with, normalize_backend_url, DEFAULT_SETTINGS_FILE},
    DataSource, LifelogApi, LifelogClient, ResourceState, TimelineFilters, UploadEvent,
    UploadFile, UploadStatus,
};
use serde::Serialize;
use shared::{
    domain::{EntryId, EntryType, UploadTaskId},
    protocol::{TimelineEntry, WeeklySummary},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lifelog", about = "LifeLog command-line client")]
struct Cli {
    /// Settings file read before environment overrides.
    #[arg(long, env = "LIFELOG_CONFIG", default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,
    #[arg(long)]
    backend_url: Option<String>,
    #[arg(long, env = "LIFELOG_DEMO_EMAIL")]
    demo_email: Option<String>,
    #[arg(long, env = "LIFELOG_DEMO_PASSWORD", hide_env_values = true)]
    demo_password: Option<String>,
    /// Print JSON instead of text.
    #[arg(long, global = true)]
    json: bool,
    /// Skip the network and the token database; reads show sample data.
    #[arg(long, global = true, env = "LIFELOG_OFFLINE")]
    offline: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Health,
    Timeline {
        #[arg(long = "type")]
        entry_type: Option<EntryType>,
        #[arg(long)]
        start: Option<DateTime<Utc>>,
        #[arg(long)]
        end: Option<DateTime<Utc>>,
    },
    Search {
        query: String,
    },
    Suggestions,
    Summaries,
    GenerateSummary,
    Stats,
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Delete an entry on the service.
    Delete {
        id: String,
    },
    /// Forget the stored backend token.
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings_with(&cli.config, |key: &str| std::env::var(key).ok())
        .context("failed to load lifelog settings")?;
    if let Some(url) = &cli.backend_url {
        settings.backend_url = normalize_backend_url(url)?;
    }
    if let Some(email) = cli.demo_email.filter(|email| !email.trim().is_empty()) {
        settings.demo_email = Some(email);
    }
    if let Some(password) = cli.demo_password {
        settings.demo_password = password;
    }

    if cli.offline && matches!(cli.command, Command::Logout) {
        bail!("logout needs the token database; run it without --offline");
    }
    let client = if cli.offline {
        LifelogClient::offline(settings)
    } else {
        LifelogClient::connect(settings).await?
    };
    if matches!(cli.command, Command::Logout) {
        client.logout().await.context("failed to clear backend token")?;
        println!("logged out");
        return Ok(());
    }
    if !cli.offline && !client.session().has_token().await {
        client.bootstrap_auth().await;
    }

    let json = cli.json;
    match cli.command {
        Command::Health => {
            let health = client
                .api()
                .health_check()
                .await
                .context("backend health check failed")?;
            if json {
                print_json(&health)?;
            } else {
                println!("{}", health.status);
            }
        }
        Command::Timeline {
            entry_type,
            start,
            end,
        } => {
            client
                .timeline
                .fetch(TimelineFilters {
                    entry_type,
                    start_date: start,
                    end_date: end,
                })
                .await;
            print_entries(&client.timeline.state(), json)?;
        }
        Command::Search { query } => {
            client.search.search(&query).await;
            print_entries(&client.search.state(), json)?;
        }
        Command::Suggestions => {
            let suggestions = client
                .api()
                .get_search_suggestions()
                .await
                .context("failed to load search suggestions")?;
            if json {
                print_json(&suggestions)?;
            } else {
                suggestions.suggestions.iter().for_each(|s| println!("{s}"));
            }
        }
        Command::Summaries => {
            client.summaries.fetch().await;
            let state = client.summaries.state();
            note_fallback(&state.source);
            if json {
                print_json(&state.data)?;
            } else {
                state.data.iter().for_each(print_summary);
            }
        }
        Command::GenerateSummary => {
            let summary = client
                .summaries
                .generate()
                .await
                .context("failed to generate weekly summary")?;
            if json {
                print_json(&summary)?;
            } else {
                print_summary(&summary);
            }
        }
        Command::Stats => {
            let stats = client
                .api()
                .get_timeline_stats()
                .await
                .context("failed to load timeline stats")?;
            if json {
                print_json(&stats)?;
            } else {
                println!(
                    "{} entries ({} text, {} audio, {} image), {} processed, {} pending, {} this week",
                    stats.total_entries,
                    stats.entries_by_type.text,
                    stats.entries_by_type.audio,
                    stats.entries_by_type.image,
                    stats.processed_entries,
                    stats.pending_entries,
                    stats.recent_activity
                );
            }
        }
        Command::Upload { paths } => upload(&client, paths).await?,
        Command::Delete { id } => {
            let deleted = client
                .api()
                .delete_entry(&EntryId::from(id))
                .await
                .context("failed to delete entry")?;
            println!("{}", deleted.message);
        }
        Command::Logout => {}
    }

    Ok(())
}

async fn upload(client: &LifelogClient, paths: Vec<PathBuf>) -> Result<()> {
    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        files.push(UploadFile::from_path(path).await?);
    }

    let mut events = client.uploads.subscribe_events();
    let batch = client.uploads.accept(files).await;
    for rejected in &batch.rejected {
        warn!(file = %rejected.name, "upload: skipped: {}", rejected.reason);
        println!("skipped {}: {}", rejected.name, rejected.reason);
    }
    if batch.accepted.is_empty() {
        bail!("no files were accepted for upload");
    }
    info!(count = batch.accepted.len(), "upload: batch accepted");

    let mut last_status: HashMap<UploadTaskId, UploadStatus> = HashMap::new();
    let settled = client.uploads.wait_until_settled();
    tokio::pin!(settled);
    loop {
        tokio::select! {
            _ = &mut settled => break,
            event = events.recv() => match event {
                Ok(UploadEvent::TaskAdded(task)) | Ok(UploadEvent::TaskUpdated(task)) => {
                    if last_status.insert(task.id, task.status) != Some(task.status) {
                        println!("{:<24} {}", task.file.name, task.status.label());
                    }
                }
                Ok(UploadEvent::TaskRemoved(_)) | Err(_) => {}
            },
        }
    }

    let tasks = client.uploads.tasks().await;
    for task in &tasks {
        if last_status.get(&task.id) != Some(&task.status) {
            println!("{:<24} {}", task.file.name, task.status.label());
        }
    }
    let failed: Vec<_> = tasks
        .iter()
        .filter(|task| task.status == UploadStatus::Error)
        .collect();
    for task in &failed {
        println!(
            "{:<24} {}",
            task.file.name,
            task.error.as_deref().unwrap_or("Upload failed")
        );
    }
    if !failed.is_empty() {
        bail!("{} of {} uploads failed", failed.len(), tasks.len());
    }
    Ok(())
}

fn note_fallback(source: &DataSource) {
    if let DataSource::Fallback { reason } = source {
        eprintln!("backend unavailable ({reason}); showing sample data");
    }
}

fn print_entries(state: &ResourceState<Vec<TimelineEntry>>, json: bool) -> Result<()> {
    note_fallback(&state.source);
    if json {
        return print_json(&state.data);
    }
    if state.data.is_empty() {
        println!("no entries");
    }
    for entry in &state.data {
        let marker = if entry.processed { ' ' } else { '*' };
        println!(
            "{} {:<5}{marker} {}",
            entry.created_at.format("%Y-%m-%d %H:%M"),
            entry.entry_type.as_str(),
            entry.title
        );
    }
    Ok(())
}

fn print_summary(summary: &WeeklySummary) {
    println!(
        "{} - {} ({} entries)\n  {}",
        summary.week_start.format("%Y-%m-%d"),
        summary.week_end.format("%Y-%m-%d"),
        summary.total_entries,
        summary.summary
    );
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
