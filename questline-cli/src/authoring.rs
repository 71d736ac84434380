//! LLM-backed goal analysis, plan drafting and quest drafting.
//!
//! Every prompt asks for a single JSON document. Replies are parsed
//! leniently (fenced or bare JSON) and then validated by the engine.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use questline_core::{GoalAnalysis, MasterGoal, PlanDraft, QuestDraft, UserContext};
use questline_engine::Authoring;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::llm::{chat_complete, ChatTurn, LlmConfig};

const SYSTEM: &str = "You are a personal development coach inside a habit-tracking RPG. \
Reply with one JSON document and nothing else.";

pub struct LlmAuthoring {
    client: reqwest::Client,
    /// None for commands that never reach the collaborator.
    config: Option<LlmConfig>,
}

impl LlmAuthoring {
    pub fn new(config: Option<LlmConfig>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn ask<T: DeserializeOwned>(&self, what: &str, prompt: String) -> Result<T> {
        let config = self
            .config
            .as_ref()
            .context("no LLM credentials; run: questline auth paste-anthropic-token")?;
        let reply = chat_complete(&self.client, config, SYSTEM, &[ChatTurn::user(prompt)]).await?;
        debug!(what, chars = reply.len(), "collaborator replied");
        let json = extract_json(&reply).with_context(|| format!("{what}: no JSON in reply"))?;
        serde_json::from_str(json).with_context(|| format!("{what}: reply did not match the expected shape"))
    }
}

/// Pull the JSON document out of a model reply: a ```json fence if present,
/// else the outermost object or array.
pub fn extract_json(reply: &str) -> Result<&str> {
    let fence = Regex::new(r"(?s)```(?:json)?\s*(.*?)```")?;
    if let Some(inner) = fence.captures(reply).and_then(|c| c.get(1)) {
        let inner = inner.as_str().trim();
        if !inner.is_empty() {
            return Ok(inner);
        }
    }

    let start = reply.find(['{', '[']);
    let end = reply.rfind(['}', ']']);
    match (start, end) {
        (Some(s), Some(e)) if e > s => Ok(&reply[s..=e]),
        _ => bail!("reply has no JSON object or array"),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QuestReply {
    List(Vec<QuestDraft>),
    Wrapped { quests: Vec<QuestDraft> },
}

fn context_block(context: &UserContext) -> Result<String> {
    serde_json::to_string_pretty(context).context("serialize user context")
}

fn analysis_prompt(goal_text: &str, timeline_days: Option<u32>) -> String {
    let timeline = timeline_days
        .map(|d| format!("The user wants to reach it in {d} days."))
        .unwrap_or_else(|| "The user gave no timeline.".to_string());
    format!(
        "Score this goal on five SMART criteria, each an integer from 1 to 10.\n\
         Goal: {goal_text:?}\n{timeline}\n\n\
         Return:\n\
         {{\"scores\": {{\"clarity\": n, \"measurability\": n, \"achievability\": n, \"relevance\": n, \"timebound\": n}},\n\
          \"suggestions\": [\"...\"],\n\
          \"refined_goal\": \"clearer wording or null\",\n\
          \"suggested_timeline_days\": n or null}}"
    )
}

fn plan_prompt(goal: &MasterGoal, context: &UserContext) -> Result<String> {
    Ok(format!(
        "Design a {days}-day plan for this goal: {text:?} (starting {start}).\n\
         Phases are numbered from 1, cover days 1 to {days} with no gaps or overlaps, \
         and each has a name, a focus and a few habits. Add milestones on plan days \
         with a bonus_xp reward and an optional unlock.\n\n\
         User context:\n{ctx}\n\n\
         Return:\n\
         {{\"phases\": [{{\"number\": 1, \"name\": \"...\", \"focus\": \"...\", \"start_day\": 1, \"end_day\": n, \"habits\": [\"...\"]}}],\n\
          \"daily_habits\": [\"...\"],\n\
          \"success_metrics\": [\"...\"],\n\
          \"milestones\": [{{\"title\": \"...\", \"target_day\": n, \"criteria\": [\"...\"], \"reward\": {{\"bonus_xp\": n, \"unlock\": null}}}}]}}",
        days = goal.timeline_days,
        text = goal.goal_text,
        start = goal.start_date,
        ctx = context_block(context)?,
    ))
}

fn quests_prompt(context: &UserContext, reason: Option<&str>) -> Result<String> {
    let reason = reason
        .map(|r| format!("The user asked for different quests: {r:?}. Do not repeat today's set.\n"))
        .unwrap_or_default();
    Ok(format!(
        "Write 3 daily quests for {date} that advance the user's current phase.\n{reason}\
         Vary quest types against recent_quest_types and scale difficulty to recent_performance.\n\
         metric_key is one of steps, active_calories, distance_km, floors, sleep_hours, \
         workout_minutes, workouts, or any free-form key for manual tracking.\n\
         difficulty is easy, medium, hard or extreme. stat_bonus is strength, endurance, \
         intelligence, discipline, vitality or null.\n\n\
         User context:\n{ctx}\n\n\
         Return:\n\
         [{{\"title\": \"...\", \"description\": \"...\", \"difficulty\": \"medium\", \"target_value\": n, \
         \"metric_key\": \"...\", \"xp_reward\": null, \"stat_bonus\": null}}]",
        date = context.date,
        ctx = context_block(context)?,
    ))
}

#[async_trait]
impl Authoring for LlmAuthoring {
    async fn analyze_goal(&self, goal_text: &str, timeline_days: Option<u32>) -> Result<GoalAnalysis> {
        self.ask("goal analysis", analysis_prompt(goal_text, timeline_days)).await
    }

    async fn generate_plan(&self, goal: &MasterGoal, context: &UserContext) -> Result<PlanDraft> {
        self.ask("plan", plan_prompt(goal, context)?).await
    }

    async fn generate_quests(&self, context: &UserContext, reason: Option<&str>) -> Result<Vec<QuestDraft>> {
        let reply: QuestReply = self.ask("quests", quests_prompt(context, reason)?).await?;
        Ok(match reply {
            QuestReply::List(quests) | QuestReply::Wrapped { quests } => quests,
        })
    }
}
