//! # Scrumbot — recurring scrum check-ins
//!
//! Usage:
//!   scrumbot run                                   # Sweep + archival until Ctrl-C
//!   scrumbot add-job -g acme -j standup --team Core --start 09:00 \
//!       --zone Europe/Berlin --channel telegram:-1001234
//!   scrumbot next --start 09:00 --zone "Eastern Standard Time" --count 5
//!   scrumbot archive-now                           # Purge old runs once

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use scrumbot_channels::ChannelSink;
use scrumbot_core::config::ScrumbotConfig;
use scrumbot_core::traits::{JobStore, NotificationSink};
use scrumbot_core::types::{ChannelRef, JobConfig, MemberResponse};
use scrumbot_core::zone::resolve_zone;
use scrumbot_scheduler::{
    ArchivalScheduler, Clock, DispatchOutcome, DispatchPipeline, OccurrenceScheduler, RetryPolicy,
    SweepLoop, SystemClock, candidate_buckets, compute_utc_hour_bucket, next_occurrence,
    refresh_bucket, sweep_buckets,
};
use scrumbot_store::SqliteStore;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scrumbot", version, about = "📋 Scrumbot — recurring scrum check-ins")]
struct Cli {
    /// Config file (default: ~/.scrumbot/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sweep loop, job timers and archival until Ctrl-C
    Run,

    /// Write a default config file
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Create or replace a scrum job
    AddJob {
        #[arg(short, long)]
        group: String,
        #[arg(short, long)]
        job: String,
        #[arg(long)]
        team: String,
        /// Local start time, HH:MM
        #[arg(long)]
        start: String,
        /// IANA or Windows zone id
        #[arg(long, default_value = "UTC")]
        zone: String,
        /// kind:address, e.g. telegram:-1001234 or webhook:https://…
        #[arg(long)]
        channel: ChannelRef,
        /// Used when the primary channel is gone
        #[arg(long)]
        fallback: Option<ChannelRef>,
        /// Expected member (repeatable)
        #[arg(short, long = "member")]
        members: Vec<String>,
        /// Skip Saturdays and Sundays
        #[arg(long)]
        weekdays: bool,
    },

    /// List jobs of a group
    ListJobs {
        #[arg(short, long)]
        group: String,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Stop a job from being scheduled
    Deactivate {
        #[arg(short, long)]
        group: String,
        #[arg(short, long)]
        job: String,
    },

    /// Delete a job. Its runs stay until archived.
    DeleteJob {
        #[arg(short, long)]
        group: String,
        #[arg(short, long)]
        job: String,
    },

    /// Start a run of a job right now
    DispatchNow {
        #[arg(short, long)]
        group: String,
        #[arg(short, long)]
        job: String,
    },

    /// Print upcoming occurrences of a start time
    Next {
        #[arg(long)]
        start: String,
        #[arg(long, default_value = "UTC")]
        zone: String,
        #[arg(long)]
        weekdays: bool,
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,
    },

    /// Show the UTC hour bucket of a start time and the sweep sets it falls in
    Bucket {
        #[arg(long)]
        start: String,
        #[arg(long, default_value = "UTC")]
        zone: String,
    },

    /// Record a member's update on an open run
    Respond {
        #[arg(long)]
        run: String,
        #[arg(short, long)]
        member: String,
        #[arg(long)]
        yesterday: String,
        #[arg(long)]
        today: String,
        #[arg(long)]
        blockers: Option<String>,
    },

    /// Close an open run and post its final summary
    EndRun {
        #[arg(long)]
        run: String,
    },

    /// Purge runs older than the retention window once
    ArchiveNow,
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn load_config(path: Option<&str>) -> Result<ScrumbotConfig> {
    let config = match path {
        Some(p) => ScrumbotConfig::load_from(&expand_path(p))?,
        None => ScrumbotConfig::load()?,
    };
    Ok(config)
}

fn open_store(config: &ScrumbotConfig) -> Result<Arc<SqliteStore>> {
    let path = config.database_path();
    let store = SqliteStore::open(&path)
        .with_context(|| format!("opening database {}", path.display()))?;
    Ok(Arc::new(store))
}

fn build_pipeline(config: &ScrumbotConfig, store: Arc<dyn JobStore>, clock: Arc<dyn Clock>) -> Arc<DispatchPipeline> {
    let sink: Arc<dyn NotificationSink> = Arc::new(ChannelSink::from_config(config));
    Arc::new(DispatchPipeline::new(
        store,
        sink,
        clock,
        RetryPolicy::from(&config.dispatch),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "scrumbot=debug,scrumbot_scheduler=debug,scrumbot_channels=debug,scrumbot_store=debug"
    } else {
        "info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();
    }

    if let Commands::Init { force } = cli.command {
        return init_config(cli.config.as_deref(), force);
    }

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Run => run(config).await,
        Commands::AddJob {
            group,
            job,
            team,
            start,
            zone,
            channel,
            fallback,
            members,
            weekdays,
        } => {
            let store = open_store(&config)?;
            let mut new_job = JobConfig::new(&group, &job, &team, &start, &zone, channel);
            if let Some(existing) = store.get_job(&group, &job).await? {
                new_job.created_at = existing.created_at;
            }
            new_job.fallback_channel = fallback;
            new_job.members = members;
            new_job.weekdays_only = weekdays;
            refresh_bucket(&mut new_job)?;
            store.save_job(&new_job).await?;

            println!("✅ Saved scrum '{group}/{job}' ({team})");
            println!("   Start:   {start} {zone}{}", if weekdays { " (weekdays)" } else { "" });
            println!("   Bucket:  {:02}:00 UTC", new_job.utc_hour_bucket);
            println!("   Channel: {}", new_job.channel);
            if let Some(at) = next_occurrence(Utc::now(), &start, &zone, weekdays)? {
                println!("   Next:    {}", at.to_rfc3339());
            }
            Ok(())
        }
        Commands::ListJobs { group, json } => {
            let store = open_store(&config)?;
            let jobs = store.list_jobs(&group).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
                return Ok(());
            }
            if jobs.is_empty() {
                println!("No scrum jobs in group '{group}'.");
            }
            for job in &jobs {
                println!(
                    "{} {:<16} {:<20} {} {:<24} bucket {:02} {}",
                    if job.active { "🟢" } else { "⚪" },
                    job.job_id,
                    job.team_name,
                    job.local_start_time,
                    job.time_zone_id,
                    job.utc_hour_bucket,
                    job.channel
                );
            }
            Ok(())
        }
        Commands::Deactivate { group, job } => {
            let store = open_store(&config)?;
            let mut existing = store
                .get_job(&group, &job)
                .await?
                .with_context(|| format!("no scrum job '{group}/{job}'"))?;
            existing.active = false;
            existing.updated_at = Utc::now();
            store.save_job(&existing).await?;
            println!("⚪ Deactivated '{group}/{job}'. A running timer stops before its next start.");
            Ok(())
        }
        Commands::DeleteJob { group, job } => {
            let store = open_store(&config)?;
            if store.delete_job(&group, &job).await? {
                println!("🗑️ Deleted '{group}/{job}'");
            } else {
                println!("⚠️ No scrum job '{group}/{job}'");
            }
            Ok(())
        }
        Commands::DispatchNow { group, job } => {
            let store = open_store(&config)?;
            let pipeline = build_pipeline(&config, store, Arc::new(SystemClock));
            match pipeline.run(&group, &job).await? {
                DispatchOutcome::Skipped => println!("⚠️ '{group}/{job}' is missing or inactive"),
                DispatchOutcome::Started {
                    run_id,
                    message_id,
                    closed,
                } => {
                    println!("✅ Started run {run_id} (closed {closed} earlier run(s))");
                    match message_id {
                        Some(id) => println!("   Message: {id}"),
                        None => println!("   ⚠️ Start message was not delivered"),
                    }
                }
            }
            Ok(())
        }
        Commands::Next {
            start,
            zone,
            weekdays,
            count,
        } => {
            let tz = resolve_zone(&zone)?;
            let mut after = Utc::now();
            for _ in 0..count {
                let Some(at) = next_occurrence(after, &start, &zone, weekdays)? else {
                    break;
                };
                let local = at.with_timezone(&tz);
                println!("{}  ({})", at.to_rfc3339(), local.format("%a %Y-%m-%d %H:%M %Z"));
                after = at;
            }
            Ok(())
        }
        Commands::Bucket { start, zone } => {
            let bucket = compute_utc_hour_bucket(&start, &zone)?;
            println!("{start} {zone} → bucket {bucket:02}");
            println!("   Due-hour candidates: {:?}", candidate_buckets(bucket));
            let sweeps: Vec<u8> = (0..24u8).filter(|h| sweep_buckets(*h).contains(&bucket)).collect();
            println!("   Queried by sweeps at UTC hours: {sweeps:?}");
            Ok(())
        }
        Commands::Respond {
            run,
            member,
            yesterday,
            today,
            blockers,
        } => {
            let store = open_store(&config)?;
            let pipeline = build_pipeline(&config, store, Arc::new(SystemClock));
            let response = MemberResponse {
                member,
                yesterday,
                today,
                blockers,
                submitted_at: Utc::now(),
            };
            let record = pipeline.submit_response(&run, response).await?;
            println!(
                "✅ {}/{} responded on run {}",
                record.responses.len(),
                record.members.len(),
                record.run_id
            );
            Ok(())
        }
        Commands::EndRun { run } => {
            let store = open_store(&config)?;
            let pipeline = build_pipeline(&config, store, Arc::new(SystemClock));
            if pipeline.close_run(&run).await? {
                println!("✅ Closed run {run}");
            } else {
                println!("Run {run} was already closed");
            }
            Ok(())
        }
        Commands::ArchiveNow => {
            let store = open_store(&config)?;
            let archival = ArchivalScheduler::from_config(&config.archival, store, Arc::new(SystemClock))?;
            let removed = archival.archive_once().await?;
            println!("🗄️ Removed {removed} run(s)");
            Ok(())
        }
    }
}

fn init_config(path: Option<&str>, force: bool) -> Result<()> {
    let target = path.map(expand_path).unwrap_or_else(ScrumbotConfig::default_path);
    if target.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", target.display());
    }
    ScrumbotConfig::default().save_to(&target)?;
    println!("✅ Wrote {}", target.display());
    Ok(())
}

async fn run(config: ScrumbotConfig) -> Result<()> {
    println!("📋 Scrumbot v{}", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn JobStore> = open_store(&config)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let pipeline = build_pipeline(&config, store.clone(), clock.clone());
    let scheduler = OccurrenceScheduler::new(pipeline, store.clone(), clock.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    let sweep = SweepLoop::new(store.clone(), scheduler.clone(), clock.clone(), config.sweep.clone());
    tasks.push(tokio::spawn(sweep.run(shutdown_rx.clone())));

    if config.archival.enabled {
        let archival = ArchivalScheduler::from_config(&config.archival, store.clone(), clock.clone())?;
        tasks.push(tokio::spawn(archival.run(shutdown_rx.clone())));
    } else {
        tracing::info!("🗄️ Archival disabled");
    }

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            tracing::warn!("⚠️ Background task ended abnormally: {e}");
        }
    }
    scheduler.shutdown().await;
    tracing::info!("👋 Scrumbot stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("❌ Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("❌ Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("🛑 Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("🛑 Received SIGTERM, shutting down..."),
    }
}
