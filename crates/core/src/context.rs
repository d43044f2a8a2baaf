use crate::prompt::{self, PersonalityPolicy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of trailing history messages sent with each prompt.
pub const DEFAULT_HISTORY_WINDOW: usize = 8;

const NO_CODE: &str = "No code written yet";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single entry of the interview log. Fields are read-only once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationMessage {
    role: Role,
    content: String,
    timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Problem metadata that stays fixed for the whole interview.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticProblemContext {
    pub title: String,
    pub description: String,
    pub topics: String,
    pub hints: String,
    pub test_cases: String,
}

/// Everything visible on the problem page at one instant. Missing fields are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageSnapshot {
    pub title: String,
    pub description: String,
    pub code: String,
    pub last_input: String,
    pub runtime_error: String,
    pub runtime_exception: String,
    pub topics: String,
    pub hints: String,
    pub test_cases: String,
}

impl PageSnapshot {
    pub fn problem(&self) -> StaticProblemContext {
        StaticProblemContext {
            title: self.title.clone(),
            description: self.description.clone(),
            topics: self.topics.clone(),
            hints: self.hints.clone(),
            test_cases: self.test_cases.clone(),
        }
    }
}

/// Mutable page state captured when a turn starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnContext {
    pub current_code: String,
    pub last_executed_input: String,
    pub runtime_error: String,
    pub runtime_exception: String,
}

impl TurnContext {
    pub fn from_snapshot(snapshot: &PageSnapshot) -> Self {
        Self {
            current_code: number_lines(&snapshot.code),
            last_executed_input: snapshot.last_input.trim().to_string(),
            runtime_error: snapshot.runtime_error.trim().to_string(),
            runtime_exception: snapshot.runtime_exception.trim().to_string(),
        }
    }
}

/// Prefixes each line with a right-aligned line number so the model can cite lines.
pub fn number_lines(code: &str) -> String {
    if code.trim().is_empty() {
        return NO_CODE.to_string();
    }
    code.lines()
        .enumerate()
        .map(|(i, line)| format!("{:>2}: {}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fully assembled request for the conversational model.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system_prompt: String,
    pub full_user_message: String,
    /// Tail of the history, oldest first.
    pub history: Vec<ConversationMessage>,
}

/// Owns the interview log and the static problem context.
#[derive(Debug)]
pub struct ConversationContext {
    problem: Option<StaticProblemContext>,
    history: Vec<ConversationMessage>,
    window: usize,
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_WINDOW)
    }
}

impl ConversationContext {
    pub fn new(window: usize) -> Self {
        Self {
            problem: None,
            history: Vec::new(),
            window,
        }
    }

    /// Replaces the problem and drops every earlier turn.
    pub fn set_static_context(&mut self, problem: StaticProblemContext) {
        tracing::info!(
            "Static context set to '{}', clearing {} history messages",
            problem.title,
            self.history.len()
        );
        self.problem = Some(problem);
        self.history.clear();
    }

    /// Re-reads the problem without losing history when it is still the same one.
    /// Returns true when the title changed and history was cleared.
    pub fn refresh_static_context(&mut self, problem: StaticProblemContext) -> bool {
        let same_problem = self
            .problem
            .as_ref()
            .is_some_and(|current| current.title == problem.title);
        if same_problem {
            self.problem = Some(problem);
            false
        } else {
            self.set_static_context(problem);
            true
        }
    }

    pub fn static_context(&self) -> Option<&StaticProblemContext> {
        self.problem.as_ref()
    }

    pub fn build_prompt(
        &self,
        utterance: &str,
        turn: &TurnContext,
        policy: &PersonalityPolicy,
    ) -> Prompt {
        let system_prompt = prompt::system_prompt(policy, self.problem.as_ref());
        let full_user_message = format!(
            "{}\n\nUser said: \"{}\"",
            context_message(turn),
            utterance.trim()
        );
        let start = self.history.len().saturating_sub(self.window);

        Prompt {
            system_prompt,
            full_user_message,
            history: self.history[start..].to_vec(),
        }
    }

    /// Appends the user utterance followed by the assistant reply.
    pub fn record_turn(&mut self, utterance: &str, reply: &str) {
        self.history
            .push(ConversationMessage::new(Role::User, utterance.trim()));
        self.history.push(ConversationMessage::new(Role::Assistant, reply));
    }

    pub fn history(&self) -> &[ConversationMessage] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

fn context_message(turn: &TurnContext) -> String {
    let code = if turn.current_code.trim().is_empty() {
        NO_CODE
    } else {
        turn.current_code.as_str()
    };
    let mut message = format!("CURRENT CONTEXT:\n- Current Code:\n{code}");

    if !turn.last_executed_input.is_empty() {
        message.push_str(&format!("\n- Last Input: {}", turn.last_executed_input));
    }
    if !turn.runtime_error.is_empty() {
        message.push_str(&format!("\n- Runtime Error: {}", turn.runtime_error));
    }
    if !turn.runtime_exception.is_empty() {
        message.push_str(&format!("\n- Exception: {}", turn.runtime_exception));
    }
    message
}
