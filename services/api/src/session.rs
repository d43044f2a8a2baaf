//! One interview per WebSocket connection.
//!
//! The socket feeds page snapshots and commands into a dedicated orchestrator and
//! receives its UI events. Closing the socket shuts the orchestrator down, which releases
//! the microphone.

use crate::config::Config;
use crate::protocol::{self, Action};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use interview_core::{LineKind, Orchestrator, OrchestratorHandle, Settings, UiEvent};
use interviewer_service::page::SharedPageSource;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

struct Session {
    handle: OrchestratorHandle,
    page: SharedPageSource,
    settings: Settings,
    ui: mpsc::UnboundedSender<UiEvent>,
}

impl Session {
    fn on_text(&mut self, text: &str) {
        let message = match protocol::decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring malformed client message: {e}");
                self.report(format!("Invalid message: {e}"));
                return;
            }
        };
        match message.into_action(&mut self.settings, Instant::now()) {
            Ok(Action::Send(command)) => {
                self.handle.send(command);
            }
            Ok(Action::UpdatePage(snapshot)) => self.page.update(snapshot),
            Err(e) => self.report(format!("Invalid settings: {e}")),
        }
    }

    fn report(&self, text: String) {
        let _ = self.ui.send(UiEvent::Line {
            kind: LineKind::Error,
            text,
        });
    }
}

pub async fn run(socket: WebSocket, config: Arc<Config>) {
    info!("WebSocket connection established");

    let page = SharedPageSource::new();
    let collaborators = interviewer_service::collaborators(&config.service, Arc::new(page.clone()));
    let settings = config.service.settings();
    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();
    let (orchestrator, handle) = Orchestrator::new(
        collaborators,
        settings.clone(),
        config.service.orchestrator_options(),
        ui_tx.clone(),
    );
    let orchestrator_task = tokio::spawn(orchestrator.run());

    let (mut sender, mut receiver) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(event) = ui_rx.recv().await {
            let text = match protocol::encode(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Cannot encode UI event: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                // Client disconnected.
                break;
            }
        }
    });

    let mut session = Session {
        handle,
        page,
        settings,
        ui: ui_tx,
    };
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => session.on_text(text.as_str()),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                info!("WebSocket error: {}", e);
                break;
            }
        }
    }

    // Tear down before the writer so the orchestrator releases the microphone first.
    session.handle.shutdown();
    drop(session);
    match orchestrator_task.await {
        Ok(orchestrator) => drop(orchestrator),
        Err(e) => warn!("Orchestrator task failed: {e}"),
    }
    if writer.await.is_err() {
        warn!("WebSocket writer task failed");
    }
    info!("WebSocket connection closed");
}
