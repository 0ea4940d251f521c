//! Agent profiles and deterministic goal routing.
//!
//! Agents are a fixed, version-controlled set built at process start; they
//! are never created at runtime. Routing is a trigger-vocabulary classifier,
//! not a learned model, so decisions are reproducible and testable.

use serde::Serialize;
use thiserror::Error;

/// Capability tag an agent (and the providers backing it) can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Code,
    Analysis,
    General,
}

impl Capability {
    /// Tag string used to select providers from the pool.
    pub fn tag(&self) -> &'static str {
        match self {
            Capability::Code => "code",
            Capability::Analysis => "analysis",
            Capability::General => "general",
        }
    }
}

/// A named capability/persona profile used to shape provider prompts.
#[derive(Debug, Clone, Serialize)]
pub struct Agent {
    /// Stable identifier (e.g. "code_developer").
    pub id: String,
    /// What kind of goals this agent handles.
    pub capability: Capability,
    /// Provider capability tag this agent prefers.
    pub provider_tag: String,
    /// System-prompt template; `{goal}` is not interpolated here, the prompt
    /// is sent as the system message and the goal as the user message.
    pub system_prompt: String,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("no agents configured")]
    EmptyAgentSet,

    #[error("default agent '{0}' is not in the configured set")]
    UnknownDefault(String),
}

/// The fixed agent roster plus routing.
#[derive(Debug, Clone)]
pub struct AgentSet {
    agents: Vec<Agent>,
    default_id: String,
}

impl AgentSet {
    /// Build a set from explicit agents. Fails fatally (at process start, not
    /// per request) if the set is empty or the default is unknown.
    pub fn new(agents: Vec<Agent>, default_id: impl Into<String>) -> Result<Self, AgentError> {
        if agents.is_empty() {
            return Err(AgentError::EmptyAgentSet);
        }
        let default_id = default_id.into();
        if !agents.iter().any(|a| a.id == default_id) {
            return Err(AgentError::UnknownDefault(default_id));
        }
        Ok(Self { agents, default_id })
    }

    /// The builtin roster: one agent per capability, mirroring the personas
    /// the service shipped with.
    pub fn builtin() -> Self {
        let agents = vec![
            Agent {
                id: "code_developer".to_string(),
                capability: Capability::Code,
                provider_tag: "code".to_string(),
                system_prompt: "You are an expert software developer working on a live code base. \
                    Given a goal, respond with a single JSON object: \
                    {\"explanation\": str, \"commit_message\": str, \
                    \"files\": [{\"path\": str, \"content\": str}]}. \
                    Paths are relative to the repository root. Respond with JSON only."
                    .to_string(),
            },
            Agent {
                id: "data_analyst".to_string(),
                capability: Capability::Analysis,
                provider_tag: "analysis".to_string(),
                system_prompt: "You are a data analyst improving reports and metrics code. \
                    Given a goal, respond with a single JSON object: \
                    {\"explanation\": str, \"commit_message\": str, \
                    \"files\": [{\"path\": str, \"content\": str}]}. \
                    Respond with JSON only."
                    .to_string(),
            },
            Agent {
                id: "general_assistant".to_string(),
                capability: Capability::General,
                provider_tag: "general".to_string(),
                system_prompt: "You are a capable assistant maintaining a project tree. \
                    Given a goal, respond with a single JSON object: \
                    {\"explanation\": str, \"commit_message\": str, \
                    \"files\": [{\"path\": str, \"content\": str}]}. \
                    Respond with JSON only."
                    .to_string(),
            },
        ];
        // The builtin roster is never empty, so this cannot fail.
        Self {
            agents,
            default_id: "general_assistant".to_string(),
        }
    }

    /// Look up an agent by id.
    pub fn get(&self, id: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// The designated fallback agent.
    pub fn default_agent(&self) -> &Agent {
        // Invariant from the constructor: default_id is always present.
        self.agents
            .iter()
            .find(|a| a.id == self.default_id)
            .unwrap_or(&self.agents[0])
    }

    /// All configured agents, in order.
    pub fn all(&self) -> &[Agent] {
        &self.agents
    }

    /// Route a goal to an agent: classify, then pick the first configured
    /// agent with a matching capability, falling back to the default.
    pub fn route(&self, goal_text: &str) -> &Agent {
        let capability = classify(goal_text);
        self.agents
            .iter()
            .find(|a| a.capability == capability)
            .unwrap_or_else(|| self.default_agent())
    }
}

/// Trigger vocabulary for code-flavored goals.
const CODE_TRIGGERS: &[&str] = &[
    "implement",
    "bug",
    "fix",
    "refactor",
    "code",
    "function",
    "compile",
    "test",
    "api",
    "endpoint",
    "module",
];

/// Trigger vocabulary for analysis-flavored goals.
const ANALYSIS_TRIGGERS: &[&str] = &[
    "metric", "report", "analyze", "analyse", "analysis", "statistic", "dashboard", "chart",
];

/// Classify a goal by trigger heuristics. Code wins over analysis when both
/// vocabularies match, since code goals frequently mention reports too.
pub fn classify(goal_text: &str) -> Capability {
    let lowered = goal_text.to_lowercase();
    if CODE_TRIGGERS.iter().any(|t| lowered.contains(t)) {
        Capability::Code
    } else if ANALYSIS_TRIGGERS.iter().any(|t| lowered.contains(t)) {
        Capability::Analysis
    } else {
        Capability::General
    }
}
