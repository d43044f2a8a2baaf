pub mod audio_io;
pub mod config;
pub mod openai;
pub mod page;

use crate::audio_io::{CpalMicrophone, CpalSpeaker};
use crate::config::Config;
use crate::openai::OpenAiClient;
use interview_core::{Collaborators, PageSnapshotSource};
use std::sync::Arc;

/// Wires the OpenAI client and the local audio devices around a page source.
pub fn collaborators(config: &Config, page: Arc<dyn PageSnapshotSource>) -> Collaborators {
    let openai = Arc::new(OpenAiClient::from_config(config));
    Collaborators {
        page,
        microphone: Arc::new(CpalMicrophone::new(config.input_device.clone())),
        transcriber: openai.clone(),
        model: openai.clone(),
        synthesizer: openai,
        player: Arc::new(CpalSpeaker::new(config.output_device.clone())),
    }
}
