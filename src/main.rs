//! Prospector - autonomous outreach engine
//!
//! Operator CLI over the engine: initialise a project, run the engine,
//! trigger single cycles, and inspect phase, leads, windows and health.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

use prospector::lead::Business;
use prospector::providers::Issue;
use prospector::window;
use prospector::{
    Engine, EngineConfig, EngineError, GrowthStrategy, LeadStatus, LeadStore, PhaseController,
    Providers, TickOutcome,
};

#[derive(Parser)]
#[command(name = "prospector")]
#[command(version)]
#[command(about = "Autonomous outreach engine with phase-driven targeting", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text", env = "PROSPECTOR_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the state directory with default config and starter strategy
    Init {
        /// Overwrite existing config and strategy
        #[arg(short, long)]
        force: bool,

        /// Sender address written into the config
        #[arg(long)]
        sender: Option<String>,
    },

    /// Run the engine
    Run {
        /// Stop after this many minutes (overrides the configured mode)
        #[arg(long, value_name = "N")]
        duration_mins: Option<u64>,
    },

    /// Run one discovery cycle for the current phase
    Discover {
        #[arg(long)]
        json: bool,
    },

    /// Run one outreach tick
    Tick {
        /// Tick time (RFC 3339, or local "YYYY-MM-DD HH:MM")
        #[arg(long)]
        at: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Run a health check, or probe the persisted snapshot
    Health {
        /// Only check that the persisted snapshot is fresh
        #[arg(long)]
        probe: bool,

        #[arg(long)]
        json: bool,
    },

    /// Show phase, leads, email and health summary
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Inspect or advance the growth strategy
    Strategy {
        #[command(subcommand)]
        action: StrategyAction,
    },

    /// Check the send window and best send time
    Window {
        /// Local time to check (defaults to now)
        #[arg(long)]
        at: Option<String>,

        /// Industry for the send-time recommendation
        #[arg(long)]
        industry: Option<String>,
    },

    /// Manage leads
    Leads {
        #[command(subcommand)]
        action: LeadsAction,
    },

    /// Classify an inbound issue and escalate if needed
    Escalate {
        #[arg(long)]
        subject: String,

        #[arg(long)]
        body: String,

        /// Sender of the issue
        #[arg(long)]
        from: Option<String>,
    },
}

#[derive(Subcommand)]
enum StrategyAction {
    /// Print the active strategy
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Recompute the phase from the customer count
    Advance,
}

#[derive(Subcommand)]
enum LeadsAction {
    /// List leads
    List {
        /// Only leads with this status
        #[arg(long)]
        status: Option<LeadStatus>,

        #[arg(short, long, default_value = "50")]
        limit: usize,

        #[arg(long)]
        json: bool,
    },
    /// Record a status change from outside the pipeline
    Mark {
        dedup_key: String,
        status: LeadStatus,
    },
    /// Insert businesses from a JSON array file
    Import { file: PathBuf },
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let filter = if verbose {
        "prospector=debug,info"
    } else {
        "prospector=info,warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let project_path = cli.project.canonicalize().unwrap_or(cli.project.clone());
    if !project_path.exists() {
        eprintln!(
            "{} Project directory does not exist: {}",
            "Error:".red().bold(),
            project_path.display()
        );
        return ExitCode::from(1);
    }

    match execute(cli.command, &project_path).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            let code = e
                .downcast_ref::<EngineError>()
                .map_or(1, EngineError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn load_config(project: &Path) -> anyhow::Result<EngineConfig> {
    let mut config = EngineConfig::load(project)?;
    config.apply_env();

    let report = config.validate();
    for warning in &report.warnings {
        eprintln!("{} {}", "Warning:".yellow().bold(), warning);
    }
    if !report.is_valid() {
        return Err(EngineError::config(report.summary()).into());
    }
    Ok(config)
}

fn open_engine(project: &Path, config: EngineConfig) -> anyhow::Result<std::sync::Arc<Engine>> {
    let providers = Providers::offline(&config, project);
    Ok(Engine::open(project, config, providers)?)
}

/// RFC 3339, or a naive local time on the configured clock.
fn parse_at(value: &str, offset: FixedOffset) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Ok(t.with_timezone(&Utc));
    }
    let local = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M"))
        .with_context(|| format!("Invalid time '{}'", value))?;
    offset
        .from_local_datetime(&local)
        .single()
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("Ambiguous local time '{}'", value))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn execute(command: Commands, project: &Path) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Init { force, sender } => {
            let state_dir = EngineConfig::state_dir(project);
            std::fs::create_dir_all(&state_dir)
                .with_context(|| format!("Failed to create {}", state_dir.display()))?;

            let config_path = EngineConfig::config_path(project);
            if config_path.exists() && !force {
                println!("{} {} exists (use --force to overwrite)", "Skip:".yellow(), config_path.display());
            } else {
                let mut config = EngineConfig::default();
                config.outreach.sender_address = sender;
                std::fs::write(&config_path, config.to_toml()?)?;
                println!("{} Wrote {}", "OK".green().bold(), config_path.display());
            }

            let strategy_path = EngineConfig::strategy_path(project);
            if strategy_path.exists() && !force {
                println!("{} {} exists (use --force to overwrite)", "Skip:".yellow(), strategy_path.display());
            } else {
                let mut controller = PhaseController::load(&strategy_path, Default::default());
                controller.replace(GrowthStrategy::standard())?;
                println!("{} Wrote {}", "OK".green().bold(), strategy_path.display());
            }

            let businesses = EngineConfig::default().businesses_path(project);
            if !businesses.exists() {
                std::fs::write(&businesses, "[]\n")?;
                println!("{} Wrote {}", "OK".green().bold(), businesses.display());
            }
            LeadStore::open(&EngineConfig::leads_db_path(project))?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Run { duration_mins } => {
            let config = load_config(project)?;
            let duration = duration_mins
                .map(|m| Duration::from_secs(m * 60))
                .or_else(|| config.run_duration());
            let engine = open_engine(project, config)?;

            match duration {
                Some(d) => println!("{} Running for {} minutes", "Engine:".cyan().bold(), d.as_secs() / 60),
                None => println!("{} Running until interrupted", "Engine:".cyan().bold()),
            }
            let report = engine.run(duration).await?;
            println!("\n{} Final report", "Engine:".cyan().bold());
            println!("{}", "─".repeat(40));
            print!("{}", report);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Discover { json } => {
            let config = load_config(project)?;
            let engine = open_engine(project, config)?;
            let now = Utc::now();
            engine.check_phase(now).await?;
            let report = engine.discover(now).await?;

            if json {
                print_json(&report)?;
            } else {
                println!(
                    "{} {} searches, {} found, {} new, {} duplicate",
                    "Discovery:".cyan().bold(),
                    report.searches,
                    report.found,
                    report.new_leads,
                    report.duplicates
                );
                for failure in &report.failures {
                    println!("   {} {}", "failed".red(), failure);
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Tick { at, json } => {
            let config = load_config(project)?;
            let now = match at {
                Some(ref at) => parse_at(at, config.utc_offset())?,
                None => Utc::now(),
            };
            let engine = open_engine(project, config)?;
            engine.preflight().await?;
            let report = engine.outreach_tick(now).await?;

            if json {
                print_json(&report)?;
            } else {
                let outcome = match report.outcome {
                    TickOutcome::Drained => "drained".green(),
                    TickOutcome::Aborted { .. } => "aborted".red(),
                    ref other => format!("{:?}", other).yellow(),
                };
                println!(
                    "{} {} ({} attempted, {} sent, {} failed)",
                    "Tick:".cyan().bold(),
                    outcome,
                    report.attempted,
                    report.sent,
                    report.failures.len()
                );
                for failure in &report.failures {
                    println!("   {} {} at {}: {}", "failed".red(), failure.name, failure.step, failure.error);
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Health { probe, json } => {
            let config = load_config(project)?;
            let max_age = config.health.snapshot_max_age();
            let engine = open_engine(project, config)?;

            if probe {
                let report = engine.report(Utc::now()).await?;
                if report.live {
                    println!("{} health snapshot is fresh", "OK".green().bold());
                    return Ok(ExitCode::SUCCESS);
                }
                println!("{} health snapshot older than {}s or missing", "Stale:".red().bold(), max_age.num_seconds());
                return Ok(ExitCode::from(1));
            }

            let Some(snapshot) = engine.health_check(Utc::now()).await? else {
                return Ok(ExitCode::SUCCESS);
            };
            if json {
                print_json(&snapshot)?;
            } else if snapshot.is_healthy() {
                println!("{} {} uncontacted leads", "Healthy:".green().bold(), snapshot.uncontacted);
            } else {
                for alert in &snapshot.alerts {
                    println!("{} {}", "Alert:".red().bold(), alert);
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Status { json } => {
            let config = load_config(project)?;
            let engine = open_engine(project, config)?;
            let report = engine.report(Utc::now()).await?;

            if json {
                print_json(&report)?;
            } else {
                println!("\n{} Engine Status", "Prospector:".cyan().bold());
                println!("{}", "─".repeat(40));
                print!("{}", report);
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Strategy { action } => {
            let config = load_config(project)?;
            match action {
                StrategyAction::Show { json } => {
                    let controller = PhaseController::load(EngineConfig::strategy_path(project), config.phases.regression);
                    let strategy = controller.strategy();
                    if json {
                        print_json(strategy)?;
                        return Ok(ExitCode::SUCCESS);
                    }
                    println!("\n{} {}", "Strategy:".cyan().bold(), controller.source());
                    println!("{}", "─".repeat(40));
                    for phase in &strategy.phases {
                        let marker = if phase.phase == strategy.current_phase { "*" } else { " " };
                        println!(
                            " {} {} - {} cities, {} industries, cap {}",
                            marker,
                            phase,
                            phase.settings.target_cities.len(),
                            phase.settings.target_industries.len(),
                            phase
                                .settings
                                .daily_email_cap
                                .unwrap_or(config.outreach.daily_email_cap)
                        );
                    }
                    for t in &strategy.transitions {
                        println!("   {} -> {} at {} customers ({})", t.from, t.to, t.customer_count, t.timestamp);
                    }
                }
                StrategyAction::Advance => {
                    let engine = open_engine(project, config)?;
                    match engine.check_phase(Utc::now()).await? {
                        Some(t) => println!("{} phase {} -> {}", "Advanced:".green().bold(), t.from, t.to),
                        None => println!("{} {}", "Unchanged:".blue(), engine.active_phase().await),
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Window { at, industry } => {
            let config = load_config(project)?;
            let offset = config.utc_offset();
            let now = match at {
                Some(ref at) => parse_at(at, offset)?,
                None => Utc::now(),
            };
            let local = now.with_timezone(&offset).naive_local();
            let controller = PhaseController::load(EngineConfig::strategy_path(project), config.phases.regression);
            let phase = controller.active_phase();

            let industries = if config.discovery.industry_overrides.is_empty() {
                phase.settings.target_industries.clone()
            } else {
                config.discovery.industry_overrides.clone()
            };
            let verdict = window::check_window(local, &phase.settings.send_window, &industries);
            let label = if verdict.is_open() { "Open:".green().bold() } else { "Closed:".yellow().bold() };
            println!("{} {} at {} ({})", label, verdict, local, phase);

            let industry = industry
                .or_else(|| industries.first().cloned())
                .unwrap_or_else(|| "default".to_string());
            match window::compute_optimal_send_time(&industry, local, &phase.settings.send_window) {
                Some(rec) => println!(
                    "{} {} {:02}:00 for {} (expected open rate {:.1}%)",
                    "Best:".cyan().bold(),
                    rec.at.date(),
                    rec.hour,
                    industry,
                    rec.expected_open_rate * 100.0
                ),
                None => println!("{} no send hour in the next 7 days", "Best:".cyan().bold()),
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Leads { action } => {
            let store = LeadStore::open(&EngineConfig::leads_db_path(project))?;
            let now = Utc::now();
            match action {
                LeadsAction::List { status, limit, json } => {
                    let leads = store.list(status, limit)?;
                    if json {
                        print_json(&leads)?;
                        return Ok(ExitCode::SUCCESS);
                    }
                    for lead in &leads {
                        println!(
                            "{:<10} {:<32} {:<14} {:<20} {}",
                            lead.status.to_string(),
                            lead.name,
                            lead.industry,
                            lead.location(),
                            lead.dedup_key.get(..12).unwrap_or(lead.dedup_key.as_str()).dimmed()
                        );
                    }
                    let counts = store.counts()?;
                    println!(
                        "{} {} total ({} new, {} contacted, {} responded, {} converted)",
                        "Leads:".cyan().bold(),
                        counts.total(),
                        counts.new,
                        counts.contacted,
                        counts.responded,
                        counts.converted
                    );
                }
                LeadsAction::Mark { dedup_key, status } => {
                    let key = resolve_key(&store, &dedup_key)?;
                    let changed = match status {
                        LeadStatus::New => {
                            return Err(anyhow::anyhow!("leads never move back to new"));
                        }
                        LeadStatus::Contacted => store.mark_contacted(&key, now)?,
                        LeadStatus::Responded => store.mark_responded(&key, now)?,
                        LeadStatus::Converted => store.mark_converted(&key, now)?,
                    };
                    if changed {
                        println!("{} {} -> {}", "OK".green().bold(), key, status);
                    } else {
                        println!("{} {} already past {}", "Unchanged:".blue(), key, status);
                    }
                }
                LeadsAction::Import { file } => {
                    let content = std::fs::read_to_string(&file)
                        .with_context(|| format!("Failed to read {}", file.display()))?;
                    let businesses: Vec<Business> = serde_json::from_str(&content)
                        .with_context(|| format!("{} is not a JSON array of businesses", file.display()))?;
                    let mut new = 0;
                    for business in &businesses {
                        if store.insert(business, now)?.is_new {
                            new += 1;
                        }
                    }
                    println!(
                        "{} {} imported, {} new, {} merged",
                        "OK".green().bold(),
                        businesses.len(),
                        new,
                        businesses.len() - new
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Escalate { subject, body, from } => {
            let config = load_config(project)?;
            let engine = open_engine(project, config)?;
            let now = Utc::now();
            let mut issue = Issue::new(subject, body, now);
            issue.from = from;

            let record = engine.handle_issue(&issue, now).await?;
            match record.escalation_reason {
                Some(ref reason) => println!("{} {}", "Escalated:".red().bold(), reason),
                None => println!("{} severity {}", "Resolved locally:".green().bold(), record.severity),
            }
            if let prospector::Decision::AutoResolve { reply: Some(ref reply) } = record.decision {
                println!("   {}", reply);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Accept a full dedup key or an unambiguous prefix.
fn resolve_key(store: &LeadStore, key: &str) -> anyhow::Result<String> {
    if store.get(key)?.is_some() {
        return Ok(key.to_string());
    }
    let matches = store.filter(|lead| lead.dedup_key.starts_with(key))?;
    match matches.as_slice() {
        [lead] => Ok(lead.dedup_key.clone()),
        [] => Err(EngineError::LeadNotFound {
            dedup_key: key.to_string(),
        }
        .into()),
        _ => Err(anyhow::anyhow!("'{}' matches {} leads", key, matches.len())),
    }
}
