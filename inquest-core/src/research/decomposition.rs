//! Query decomposition into an ordered research plan.
//!
//! A planner model proposes sub-tasks as JSON; [`sanitize_plan`] turns
//! whatever came back into a plan the rest of the pipeline can rely on:
//! between one and [`MAX_SUB_TASKS`] sub-tasks, each with a non-empty
//! question and a filesystem-safe id.

use crate::brain::LlmProvider;
use crate::config::MAX_SUB_TASKS;
use crate::error::LlmError;
use crate::types::CompletionRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Fewer usable sub-tasks than this degrades the plan to the bare query.
const MIN_USABLE_SUB_TASKS: usize = 2;

/// How evidence for a sub-task should be looked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    Definitional,
    CurrentState,
    Stakeholders,
    Mechanism,
    Impact,
    History,
    FutureTrends,
    Applications,
    General,
}

impl RetrievalStrategy {
    /// Infer a strategy from free-text research instructions, falling back
    /// to the question when the instructions name none.
    pub fn infer(instructions: &str, question: &str) -> Self {
        match Self::from_text(instructions) {
            RetrievalStrategy::General => Self::from_text(question),
            strategy => strategy,
        }
    }

    fn from_text(text: &str) -> Self {
        let text = text.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

        if has(&["definition", "define", "what is", "what are", "overview", "fundamental"]) {
            RetrievalStrategy::Definitional
        } else if has(&["application", "use case", "used for", "deployment", "adoption"]) {
            RetrievalStrategy::Applications
        } else if has(&["history", "historical", "origin", "evolution", "timeline"]) {
            RetrievalStrategy::History
        } else if has(&["future", "trend", "outlook", "forecast", "roadmap", "prediction"]) {
            RetrievalStrategy::FutureTrends
        } else if has(&["stakeholder", "companies", "organizations", "key players", "who "]) {
            RetrievalStrategy::Stakeholders
        } else if has(&["mechanism", "how does", "how do", "works", "technical", "architecture"]) {
            RetrievalStrategy::Mechanism
        } else if has(&["impact", "effect", "consequence", "implication", "benefit", "risk"]) {
            RetrievalStrategy::Impact
        } else if has(&["current", "recent", "latest", "state of", "today", "progress"]) {
            RetrievalStrategy::CurrentState
        } else {
            RetrievalStrategy::General
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RetrievalStrategy::Definitional => "definition",
            RetrievalStrategy::CurrentState => "current state",
            RetrievalStrategy::Stakeholders => "stakeholders",
            RetrievalStrategy::Mechanism => "mechanism",
            RetrievalStrategy::Impact => "impact",
            RetrievalStrategy::History => "history",
            RetrievalStrategy::FutureTrends => "future trends",
            RetrievalStrategy::Applications => "applications",
            RetrievalStrategy::General => "general",
        }
    }
}

/// One decomposed research question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    /// Unique within a run; also used as a file name in the run archive.
    pub id: String,
    /// Self-contained question to research.
    pub question: String,
    /// Research instructions naming where and how to look.
    pub instructions: String,
    pub strategy: RetrievalStrategy,
}

impl SubTask {
    pub fn new(
        id: impl Into<String>,
        question: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        let question = question.into();
        let instructions = instructions.into();
        let strategy = RetrievalStrategy::infer(&instructions, &question);
        Self {
            id: id.into(),
            question,
            instructions,
            strategy,
        }
    }

    /// The single sub-task used when planning degrades.
    pub fn fallback(query: &str) -> Self {
        Self {
            id: "T1".to_string(),
            question: query.trim().to_string(),
            instructions: "Research the question directly using general web sources.".to_string(),
            strategy: RetrievalStrategy::General,
        }
    }
}

/// A sanitized plan plus the reason it degraded, if it did.
#[derive(Debug, Clone)]
pub struct Plan {
    pub sub_tasks: Vec<SubTask>,
    pub degraded: Option<String>,
}

/// Turns one query into candidate sub-tasks.
///
/// Implementations may return any number of candidates, including none;
/// the controller runs them through [`sanitize_plan`].
#[async_trait]
pub trait Decomposer: Send + Sync {
    async fn decompose(&self, query: &str) -> Result<Vec<SubTask>, LlmError>;
}

fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 32
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Enforce plan bounds: drop unusable candidates, fall back to the bare
/// query below two usable items, truncate to [`MAX_SUB_TASKS`], and
/// re-number ids when any is missing, unsafe or duplicated.
pub fn sanitize_plan(query: &str, candidates: Vec<SubTask>) -> Plan {
    let mut usable: Vec<SubTask> = candidates
        .into_iter()
        .filter(|t| !t.question.trim().is_empty())
        .map(|mut t| {
            t.question = t.question.trim().to_string();
            t.instructions = t.instructions.trim().to_string();
            t
        })
        .collect();

    if usable.len() < MIN_USABLE_SUB_TASKS {
        return Plan {
            sub_tasks: vec![SubTask::fallback(query)],
            degraded: Some(format!(
                "planner produced {} usable sub-task(s); researching the query directly",
                usable.len()
            )),
        };
    }

    if usable.len() > MAX_SUB_TASKS {
        debug!(
            proposed = usable.len(),
            kept = MAX_SUB_TASKS,
            "Truncating plan"
        );
        usable.truncate(MAX_SUB_TASKS);
    }

    let mut seen = HashSet::new();
    let ids_ok = usable
        .iter()
        .all(|t| is_safe_id(&t.id) && seen.insert(t.id.clone()));
    if !ids_ok {
        for (i, task) in usable.iter_mut().enumerate() {
            task.id = format!("T{}", i + 1);
        }
    }

    Plan {
        sub_tasks: usable,
        degraded: None,
    }
}

const PLANNER_SYSTEM_PROMPT: &str = "You are an expert research planner. Break the user's \
research query into 3 to 6 focused sub-questions that together answer it. Order them along \
conceptual dimensions, choosing only those that fit the query: definition, current state, \
key stakeholders, technical mechanism, impact, history, future trends, applications. \
Each question must be self-contained and answerable from web sources. For each one, write \
short instructions naming the retrieval strategy (which kinds of sources to look for and \
what to extract). Respond with JSON only, in the form \
{\"tasks\":[{\"id\":\"T1\",\"question\":\"...\",\"instructions\":\"...\"}]}";

/// Planner backed by a language model.
pub struct LlmDecomposer {
    provider: Arc<dyn LlmProvider>,
    temperature: f32,
    max_tokens: usize,
    timeout: Duration,
}

impl LlmDecomposer {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        temperature: f32,
        max_tokens: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            temperature,
            max_tokens,
            timeout,
        }
    }
}

#[async_trait]
impl Decomposer for LlmDecomposer {
    async fn decompose(&self, query: &str) -> Result<Vec<SubTask>, LlmError> {
        let request = CompletionRequest::prompt(
            PLANNER_SYSTEM_PROMPT,
            format!("Research query: {}", query.trim()),
        )
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens)
        .with_timeout(self.timeout)
        .json();

        let response = self.provider.complete(request).await?;
        match parse_plan(&response.text) {
            Some(tasks) => Ok(tasks),
            None => {
                warn!(
                    response_len = response.text.len(),
                    "Planner response is not a task list"
                );
                Ok(Vec::new())
            }
        }
    }
}

/// Locate the outermost JSON value in a model response that may wrap it in
/// prose or a code fence.
pub(crate) fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close))
            && start < end
            && let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end])
        {
            return Some(value);
        }
    }
    None
}

fn field_as_string(obj: &Value, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Parse `{"tasks":[...]}` (or a bare array) into sub-task candidates.
pub fn parse_plan(text: &str) -> Option<Vec<SubTask>> {
    let value = extract_json(text)?;
    let tasks = match &value {
        Value::Array(items) => items,
        Value::Object(map) => map
            .get("tasks")
            .or_else(|| map.get("sub_tasks"))
            .and_then(|t| t.as_array())?,
        _ => return None,
    };

    Some(
        tasks
            .iter()
            .filter(|t| t.is_object())
            .map(|t| {
                SubTask::new(
                    field_as_string(t, "id"),
                    field_as_string(t, "question"),
                    field_as_string(t, "instructions"),
                )
            })
            .collect(),
    )
}
