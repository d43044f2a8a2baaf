//! System prompt templates.
//!
//! The template is a pure function of the personality policy (mode, output channel and
//! revelation level) plus the static problem context. Keeping every phrasing rule here
//! means the formatting contract the UI depends on is tested in one place.

use crate::context::StaticProblemContext;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Interviewer,
    Sage,
}

/// Where the reply ends up: spoken aloud or rendered as markdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputChannel {
    #[default]
    Voice,
    Text,
}

/// How much of the solution the model is allowed to give away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Revelation {
    None,
    #[default]
    Hints,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PersonalityPolicy {
    pub mode: Mode,
    pub revelation: Revelation,
    pub channel: OutputChannel,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParsePolicyError {
    kind: &'static str,
    value: String,
}

impl FromStr for Mode {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "interviewer" => Ok(Mode::Interviewer),
            "sage" => Ok(Mode::Sage),
            other => Err(ParsePolicyError {
                kind: "mode",
                value: other.to_string(),
            }),
        }
    }
}

impl FromStr for OutputChannel {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "voice" => Ok(OutputChannel::Voice),
            "text" => Ok(OutputChannel::Text),
            other => Err(ParsePolicyError {
                kind: "output channel",
                value: other.to_string(),
            }),
        }
    }
}

impl FromStr for Revelation {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(Revelation::None),
            "hints" => Ok(Revelation::Hints),
            "full" => Ok(Revelation::Full),
            other => Err(ParsePolicyError {
                kind: "revelation level",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for OutputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputChannel::Voice => write!(f, "voice"),
            OutputChannel::Text => write!(f, "text"),
        }
    }
}

/// Builds the system prompt for one turn.
pub fn system_prompt(policy: &PersonalityPolicy, problem: Option<&StaticProblemContext>) -> String {
    let mut sections = vec![persona(policy.mode).to_string()];

    if let Some(problem) = problem {
        sections.push(problem_block(problem));
        sections.push(guidelines(policy.mode).to_string());
    }
    sections.push(revelation_rules(policy.revelation).to_string());
    sections.push(length_rule(policy.mode, policy.channel).to_string());
    sections.push(formatting_rules(policy.channel).to_string());

    sections.join("\n\n")
}

fn persona(mode: Mode) -> &'static str {
    match mode {
        Mode::Interviewer => {
            "You are a mock coding interviewer helping someone practice technical interviews. \
             Act as a friendly but professional interviewer."
        }
        Mode::Sage => {
            "You are a calm, experienced mentor helping someone practice coding interviews. \
             You teach through guiding questions and patient explanations, never through judgement."
        }
    }
}

fn problem_block(problem: &StaticProblemContext) -> String {
    format!(
        "PROBLEM CONTEXT (Static - doesn't change during interview):\n\
         - Problem: {}\n\
         - Description: {}\n\
         - Topics/Tags: {}\n\
         - Test Cases: {}\n\
         - Hints: {}",
        problem.title,
        problem.description,
        or_placeholder(&problem.topics, "None specified"),
        or_placeholder(&problem.test_cases, "None provided"),
        or_placeholder(&problem.hints, "No hints available"),
    )
}

fn or_placeholder<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
    if value.trim().is_empty() {
        placeholder
    } else {
        value
    }
}

fn guidelines(mode: Mode) -> &'static str {
    match mode {
        Mode::Interviewer => {
            "INTERVIEW GUIDELINES:\n\
             - Ask follow-up questions about their approach\n\
             - Help them think through edge cases and provide constructive feedback\n\
             - You can see their current code and any execution results/errors in the user messages\n\
             - The topics/tags give you insight into what algorithms or data structures are relevant\n\
             - If there are runtime errors or exceptions, help them debug and understand what went wrong\n\
             - Keep responses conversational and encouraging\n\
             - Focus on the problem-solving process, not just the final answer"
        }
        Mode::Sage => {
            "MENTORING GUIDELINES:\n\
             - Start from what they already understand and build on it\n\
             - Explain the idea behind a technique before naming it\n\
             - You can see their current code and any execution results/errors in the user messages\n\
             - When they hit an error, help them read it and reason about the cause\n\
             - Connect the problem to the relevant topics/tags when it helps them see the pattern\n\
             - Celebrate progress and keep the tone unhurried"
        }
    }
}

fn revelation_rules(revelation: Revelation) -> &'static str {
    match revelation {
        Revelation::None => {
            "SOLUTION POLICY:\n\
             - Never reveal the solution, the optimal algorithm, or code for it, even if asked directly\n\
             - Answer requests for the answer with a guiding question instead"
        }
        Revelation::Hints => {
            "SOLUTION POLICY:\n\
             - Do not give away the full solution\n\
             - If they are stuck, offer one small hint at a time\n\
             - If hints are available, reference them subtly without being too direct"
        }
        Revelation::Full => {
            "SOLUTION POLICY:\n\
             - If they ask for the solution, you may walk through it step by step\n\
             - Explain the reasoning before showing how it is implemented"
        }
    }
}

fn length_rule(mode: Mode, channel: OutputChannel) -> &'static str {
    match (mode, channel) {
        (Mode::Interviewer, OutputChannel::Voice) => "Respond in 1-2 sentences.",
        (Mode::Interviewer, OutputChannel::Text) => "Keep responses to one short paragraph.",
        (Mode::Sage, OutputChannel::Voice) => "Respond in 2-3 sentences.",
        (Mode::Sage, OutputChannel::Text) => "Keep responses under two short paragraphs.",
    }
}

fn formatting_rules(channel: OutputChannel) -> &'static str {
    match channel {
        OutputChannel::Voice => {
            "IMPORTANT OUTPUT FORMATTING:\n\
             - Never use code blocks, backticks, or any markdown formatting\n\
             - Never use special characters like brackets, parentheses, curly braces, or symbols in your responses\n\
             - Write everything as plain text as if you were speaking it aloud\n\
             - Instead of \"String[]\" say \"string array\"\n\
             - Instead of \"nums[i]\" say \"nums at index i\"\n\
             - Instead of \"O(n)\" say \"linear time complexity\"\n\
             - Instead of \"HashMap<>\" say \"hash map\"\n\
             - Speak naturally as if in a real interview conversation"
        }
        OutputChannel::Text => {
            "IMPORTANT OUTPUT FORMATTING:\n\
             - Put any code in fenced code blocks tagged with its language, for example ```python\n\
             - Never leave a code block untagged\n\
             - Use inline backticks for identifiers and expressions such as `nums[i]`\n\
             - Keep other markdown light: short paragraphs and at most one brief list"
        }
    }
}
