use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use questline_engine::{Coach, MemoryStore, Scheduler, TickHooks, TickReport};
use questline_health::{normalize_payload, RawHealthPayload};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

mod auth;
mod authoring;
mod config;
mod llm;
mod logging;
mod state;

use authoring::LlmAuthoring;
use state::StateLock;

type CliCoach = Coach<MemoryStore, LlmAuthoring>;

#[derive(Parser, Debug)]
#[command(
    name = "questline",
    version,
    long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("QUESTLINE_BUILD_SHA"), ")"),
    about = "Goal-driven daily quests with XP, streaks and weekly reviews"
)]
struct Cli {
    /// User to act as (default: $QUESTLINE_USER, else "me")
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default ~/.questline/config.toml
    InitConfig,

    /// Store LLM credentials
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },

    /// Score a goal and, if it passes, build its plan (replaces any active goal)
    SetGoal {
        goal: String,

        /// Timeline in days (7-730, default 90)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Abandon the active goal
    AbandonGoal,

    /// Ask for a new plan version for the active goal
    RegeneratePlan,

    /// Show goal, phase, today's quests and progress
    Status {
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Generate quests for a day (no-op if the day already has quests)
    Generate {
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Replace today's open quests
    Regenerate {
        #[arg(long)]
        reason: Option<String>,
    },

    /// Complete a quest, optionally recording the achieved value
    Complete {
        quest_id: String,
        #[arg(long)]
        value: Option<f64>,
    },

    /// Record manual progress on a quest
    Progress { quest_id: String, value: f64 },

    /// Skip a quest
    Skip { quest_id: String },

    /// Report progress toward a milestone (0-100)
    Milestone { index: usize, percentage: f64 },

    /// Ingest a tracker payload from a file
    IngestHealth {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = HealthFormat::Webhook)]
        format: HealthFormat,
    },

    /// Close the goal clock and expire overdue quests
    Sweep,

    /// Run the weekly review for the week before --as-of
    Review {
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },

    /// Run the daily generation batch for every user
    RunGeneration {
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },

    /// Run the weekly review batch for every user
    RunReview {
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },

    /// Run the scheduler until Ctrl-C
    Daemon,
}

#[derive(Subcommand, Debug)]
enum AuthCommand {
    /// Paste an Anthropic API key (stored in ~/.questline/auth.json)
    PasteAnthropicToken,

    /// Paste an OpenAI API key (stored in ~/.questline/auth.json)
    PasteOpenaiApiKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum HealthFormat {
    Webhook,
    Csv,
}

impl Command {
    fn needs_llm(&self) -> bool {
        matches!(
            self,
            Command::SetGoal { .. }
                | Command::RegeneratePlan
                | Command::Generate { .. }
                | Command::Regenerate { .. }
                | Command::RunGeneration { .. }
                | Command::Daemon
        )
    }
}

fn resolve_user(flag: Option<String>) -> String {
    flag.or_else(|| std::env::var("QUESTLINE_USER").ok())
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "me".to_string())
}

fn emit<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("serialize output")?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();
    let cli = Cli::parse();
    let user = resolve_user(cli.user);

    match cli.command {
        Command::InitConfig => return config::init_config(),
        Command::Auth { command } => {
            return match command {
                AuthCommand::PasteAnthropicToken => auth::anthropic_paste_token(),
                AuthCommand::PasteOpenaiApiKey => auth::openai_paste_api_key(),
            };
        }
        _ => {}
    }

    let cfg = config::load_config()?;
    let llm = if cli.command.needs_llm() {
        Some(llm::resolve_config(&cfg.llm)?)
    } else {
        llm::resolve_config(&cfg.llm).ok()
    };

    // The daemon locks per tick instead.
    let lock = match cli.command {
        Command::Daemon => None,
        _ => Some(StateLock::acquire(&state::ensure_questline_home()?, state::LOCK_WAIT).await?),
    };

    let store = Arc::new(state::load_store()?);
    let coach = Arc::new(Coach::new(
        store.clone(),
        Arc::new(LlmAuthoring::new(llm)),
        cfg.engine_config()?,
    ));

    let result = run(cli.command, &coach, &cfg, &user).await;
    if let Some(lock) = lock {
        // Persist whatever committed before a failure.
        state::save_store(&store)?;
        drop(lock);
    }
    result
}

/// Each tick takes the state lock, reloads what other commands saved and
/// writes back before letting go.
struct DaemonHooks {
    store: Arc<MemoryStore>,
    home: PathBuf,
    held: Option<StateLock>,
}

impl TickHooks for DaemonHooks {
    fn before_tick(&mut self) -> bool {
        let lock = match StateLock::try_acquire(&self.home) {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                debug!("state busy, tick skipped");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "could not lock state, tick skipped");
                return false;
            }
        };
        if let Err(e) = state::reload_store(&self.store) {
            warn!(error = %e, "could not reload state, tick skipped");
            return false;
        }
        self.held = Some(lock);
        true
    }

    fn after_tick(&mut self, report: &TickReport) {
        if report.started_any() {
            match state::save_store(&self.store) {
                Ok(()) => info!(
                    generation_errors = report.generation.as_ref().map_or(0, |r| r.errors.len()),
                    review_errors = report.review.as_ref().map_or(0, |r| r.errors.len()),
                    "tick saved"
                ),
                Err(e) => warn!(error = %e, "could not save state after tick"),
            }
        }
        drop(self.held.take());
    }
}

async fn run(command: Command, coach: &Arc<CliCoach>, cfg: &config::Config, user: &str) -> Result<()> {
    let now = Utc::now();
    let today = coach.today(now);

    match command {
        Command::InitConfig | Command::Auth { .. } => {}

        Command::SetGoal { goal, days } => {
            let setup = coach.set_goal(user, &goal, days, now).await?;
            info!(user_id = user, goal_id = %setup.goal.id, "goal set");
            emit(&setup)?;
        }

        Command::AbandonGoal => emit(&coach.abandon_goal(user).await?)?,

        Command::RegeneratePlan => emit(&coach.regenerate_plan(user, now).await?)?,

        Command::Status { date } => emit(&coach.daily_status(user, date.unwrap_or(today))?)?,

        Command::Generate { date } => {
            emit(&coach.generate_daily_quests(user, date.unwrap_or(today)).await?)?;
        }

        Command::Regenerate { reason } => {
            emit(&coach.regenerate_quests(user, reason.as_deref(), now).await?)?;
        }

        Command::Complete { quest_id, value } => {
            emit(&coach.complete_quest(user, &quest_id, value, now).await?)?;
        }

        Command::Progress { quest_id, value } => {
            emit(&coach.update_quest_progress(user, &quest_id, value, now).await?)?;
        }

        Command::Skip { quest_id } => emit(&coach.skip_quest(user, &quest_id).await?)?,

        Command::Milestone { index, percentage } => {
            emit(&coach.update_milestone_progress(user, index, percentage, now).await?)?;
        }

        Command::IngestHealth { file, format } => {
            let text = std::fs::read_to_string(&file).with_context(|| format!("read {}", file.display()))?;
            let raw = match format {
                HealthFormat::Webhook => RawHealthPayload::Webhook(text),
                HealthFormat::Csv => RawHealthPayload::Csv {
                    user_id: user.to_string(),
                    text,
                },
            };
            let patches = normalize_payload(&raw).with_context(|| format!("parse {}", file.display()))?;
            if patches.is_empty() {
                bail!("no health records in {}", file.display());
            }
            let mut outcomes = Vec::with_capacity(patches.len());
            for patch in patches {
                outcomes.push(coach.ingest_patch(patch, now).await?);
            }
            emit(&outcomes)?;
        }

        Command::Sweep => {
            let goal = coach.sweep_goal(user, today).await?;
            let expiry = coach.expire_overdue(user, today).await?;
            emit(&serde_json::json!({ "goal": goal, "expiry": expiry }))?;
        }

        Command::Review { as_of } => match coach.weekly_review(user, as_of.unwrap_or(today), now).await? {
            Some(review) => emit(&review)?,
            None => println!("No quests last week; nothing to review."),
        },

        Command::RunGeneration { as_of } => {
            let scheduler = Scheduler::new(coach.clone(), cfg.scheduler_config()?)?;
            emit(&scheduler.run_scheduled_generation(as_of.unwrap_or(today)).await)?;
        }

        Command::RunReview { as_of } => {
            let scheduler = Scheduler::new(coach.clone(), cfg.scheduler_config()?)?;
            emit(&scheduler.run_scheduled_weekly_review(as_of.unwrap_or(today), now).await)?;
        }

        Command::Daemon => {
            let mut scheduler = Scheduler::new(coach.clone(), cfg.scheduler_config()?)?;
            let mut hooks = DaemonHooks {
                store: coach.store().clone(),
                home: state::ensure_questline_home()?,
                held: None,
            };
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "ctrl-c handler failed; stopping");
                }
            };
            scheduler.run(shutdown, &mut hooks).await;
        }
    }
    Ok(())
}
