//! Page sources: where problem text, code and run output come from.

use interview_core::{PageSnapshot, PageSnapshotSource};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Reads the page from files on every snapshot, so edits show up on the next turn.
///
/// * problem: JSON with `title`, `description`, `topics`, `hints`, `testCases`.
/// * code: the candidate's source file, read verbatim.
/// * run output: JSON with `lastInput`, `runtimeError`, `runtimeException`.
#[derive(Debug, Clone, Default)]
pub struct FilePageSource {
    problem: Option<PathBuf>,
    code: Option<PathBuf>,
    run_output: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RunOutput {
    last_input: String,
    runtime_error: String,
    runtime_exception: String,
}

impl FilePageSource {
    pub fn new(problem: Option<PathBuf>, code: Option<PathBuf>, run_output: Option<PathBuf>) -> Self {
        Self {
            problem,
            code,
            run_output,
        }
    }
}

impl PageSnapshotSource for FilePageSource {
    fn snapshot(&self) -> PageSnapshot {
        let mut snapshot = self
            .problem
            .as_deref()
            .and_then(read_json::<PageSnapshot>)
            .unwrap_or_default();

        snapshot.code = self
            .code
            .as_deref()
            .and_then(read_text)
            .unwrap_or_default();

        let run = self
            .run_output
            .as_deref()
            .and_then(read_json::<RunOutput>)
            .unwrap_or_default();
        snapshot.last_input = run.last_input;
        snapshot.runtime_error = run.runtime_error;
        snapshot.runtime_exception = run.runtime_exception;
        snapshot
    }
}

fn read_text(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::warn!("Cannot read {}: {e}", path.display());
            None
        }
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
    let text = read_text(path)?;
    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring malformed {}: {e}", path.display());
            None
        }
    }
}

/// A page pushed in from outside, e.g. by a browser overlay over a WebSocket.
#[derive(Debug, Clone, Default)]
pub struct SharedPageSource {
    current: Arc<RwLock<PageSnapshot>>,
}

impl SharedPageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, snapshot: PageSnapshot) {
        match self.current.write() {
            Ok(mut current) => *current = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }
}

impl PageSnapshotSource for SharedPageSource {
    fn snapshot(&self) -> PageSnapshot {
        match self.current.read() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
