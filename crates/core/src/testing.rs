//! Stateful fakes shared by the unit tests.

use crate::audio::{CaptureDevice, MicrophoneHandle};
use crate::context::{PageSnapshot, Prompt};
use crate::error::{InterviewError, ModelError};
use crate::services::{ChatModel, PageSnapshotSource};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Microphone backend that counts open tracks so tests can check for leaks.
pub struct FakeMicrophone {
    samples: Vec<f32>,
    sample_rate: u32,
    failure: Option<InterviewError>,
    open_tracks: Arc<AtomicUsize>,
    stop_calls: Arc<AtomicUsize>,
    opens: AtomicUsize,
}

impl FakeMicrophone {
    pub fn with_samples(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            failure: None,
            open_tracks: Arc::new(AtomicUsize::new(0)),
            stop_calls: Arc::new(AtomicUsize::new(0)),
            opens: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: InterviewError) -> Self {
        Self {
            failure: Some(error),
            ..Self::with_samples(Vec::new(), 16_000)
        }
    }

    pub fn open_tracks(&self) -> usize {
        self.open_tracks.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureDevice for FakeMicrophone {
    async fn open(&self) -> Result<Box<dyn MicrophoneHandle>, InterviewError> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.open_tracks.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeHandle {
            samples: self.samples.clone(),
            sample_rate: self.sample_rate,
            active: true,
            open_tracks: self.open_tracks.clone(),
            stop_calls: self.stop_calls.clone(),
        }))
    }
}

struct FakeHandle {
    samples: Vec<f32>,
    sample_rate: u32,
    active: bool,
    open_tracks: Arc<AtomicUsize>,
    stop_calls: Arc<AtomicUsize>,
}

impl MicrophoneHandle for FakeHandle {
    fn drain(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.samples)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn active_tracks(&self) -> usize {
        usize::from(self.active)
    }

    fn stop_tracks(&mut self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if std::mem::take(&mut self.active) {
            self.open_tracks.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// One scripted model call.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(Vec<String>),
    Fail(ModelError),
    /// Streams the fragments, then the connection breaks.
    Interrupt(Vec<String>),
    /// Streams the fragments, then never sends another byte.
    Stall(Vec<String>),
}

/// Model that replays scripted replies, one per call, split into fragments.
pub struct ScriptedModel {
    steps: Mutex<VecDeque<Step>>,
    prompts: Mutex<Vec<Prompt>>,
    ready_gate: Option<Arc<Notify>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<Vec<&str>, ModelError>>) -> Self {
        let steps = replies
            .into_iter()
            .map(|r| match r {
                Ok(parts) => Step::Reply(parts.into_iter().map(str::to_string).collect()),
                Err(e) => Step::Fail(e),
            })
            .collect();
        Self::from_steps(steps)
    }

    pub fn from_steps(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            prompts: Mutex::new(Vec::new()),
            ready_gate: None,
        }
    }

    /// `check_ready` blocks until the gate is notified.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.ready_gate = Some(gate);
        self
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }

    fn next_step(&self, prompt: &Prompt) -> Step {
        self.prompts.lock().unwrap().push(prompt.clone());
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Step::Fail(ModelError::Malformed("no scripted reply".to_string())))
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn check_ready(&self) -> Result<(), ModelError> {
        if let Some(gate) = &self.ready_gate {
            gate.notified().await;
        }
        Ok(())
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String, ModelError> {
        match self.next_step(prompt) {
            Step::Reply(parts) => Ok(parts.concat()),
            Step::Fail(e) => Err(e),
            Step::Interrupt(_) => Err(ModelError::Transport("connection reset".to_string())),
            Step::Stall(_) => std::future::pending().await,
        }
    }

    async fn stream_complete(
        &self,
        prompt: &Prompt,
        on_fragment: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, ModelError> {
        match self.next_step(prompt) {
            Step::Fail(e) => Err(e),
            Step::Reply(parts) => {
                emit(&parts, on_fragment);
                Ok(parts.concat())
            }
            Step::Interrupt(parts) => {
                emit(&parts, on_fragment);
                Err(ModelError::Interrupted {
                    partial: parts.concat(),
                    message: "connection reset".to_string(),
                })
            }
            Step::Stall(parts) => {
                emit(&parts, on_fragment);
                std::future::pending().await
            }
        }
    }
}

fn emit(parts: &[String], on_fragment: &mut (dyn for<'a> FnMut(&'a str) + Send)) {
    for part in parts {
        on_fragment(part);
    }
}

/// Page whose content the test can change between turns.
#[derive(Default)]
pub struct FakePage {
    snapshot: Mutex<PageSnapshot>,
}

impl FakePage {
    pub fn new(snapshot: PageSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
        }
    }

    pub fn set_code(&self, code: &str) {
        self.snapshot.lock().unwrap().code = code.to_string();
    }
}

impl PageSnapshotSource for FakePage {
    fn snapshot(&self) -> PageSnapshot {
        self.snapshot.lock().unwrap().clone()
    }
}
