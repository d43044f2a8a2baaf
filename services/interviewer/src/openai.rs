//! HTTP client for the OpenAI endpoints the interviewer uses: chat completions (streamed
//! or not), audio transcriptions and text-to-speech.

use async_trait::async_trait;
use interview_core::stream::decode_stream;
use interview_core::{
    AudioClip, ChatModel, InterviewError, ModelError, Prompt, Role, SpeechSynthesizer,
    Transcriber,
};
use interview_native_utils::audio::{
    SPEECH_PCM16_SAMPLE_RATE, TRANSCRIPTION_SAMPLE_RATE, decode_pcm16_le, encode_wav, resample,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{
    Config, DEFAULT_CHAT_MODEL, DEFAULT_SPEECH_MODEL, DEFAULT_SPEECH_VOICE,
    DEFAULT_TRANSCRIPTION_MODEL,
};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Replies are spoken, so they are kept short.
const MAX_REPLY_TOKENS: u32 = 150;
const TEMPERATURE: f32 = 0.7;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct LlmResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'static str,
}

#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: SecretString,
    base_url: String,
    chat_model: String,
    transcription_model: String,
    speech_model: String,
    speech_voice: String,
    request_timeout: Duration,
}

impl OpenAiClient {
    pub fn new(api_key: SecretString, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            speech_model: DEFAULT_SPEECH_MODEL.to_string(),
            speech_voice: DEFAULT_SPEECH_VOICE.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            chat_model: config.chat_model.clone(),
            transcription_model: config.transcription_model.clone(),
            speech_model: config.speech_model.clone(),
            speech_voice: config.speech_voice.clone(),
            request_timeout: config.request_timeout,
            ..Self::new(config.openai_api_key.clone(), config.openai_base_url.clone())
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(self.url(path))
            .bearer_auth(self.api_key.expose_secret())
    }

    fn chat_request<'a>(&'a self, prompt: &'a Prompt, stream: bool) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(prompt.history.len() + 2);
        messages.push(ChatMessage {
            role: "system",
            content: &prompt.system_prompt,
        });
        messages.extend(prompt.history.iter().map(|m| ChatMessage {
            role: match m.role() {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: m.content(),
        }));
        messages.push(ChatMessage {
            role: "user",
            content: &prompt.full_user_message,
        });
        ChatRequest {
            model: &self.chat_model,
            messages,
            max_tokens: MAX_REPLY_TOKENS,
            temperature: TEMPERATURE,
            stream,
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn check_ready(&self) -> Result<(), ModelError> {
        let response = self
            .client
            .get(self.url(&format!("models/{}", self.chat_model)))
            .bearer_auth(self.api_key.expose_secret())
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await?;
        tracing::info!("Model {} is reachable", self.chat_model);
        Ok(())
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String, ModelError> {
        let response = self
            .post("chat/completions")
            .timeout(self.request_timeout)
            .json(&self.chat_request(prompt, false))
            .send()
            .await
            .map_err(transport_error)?;
        let body = check_status(response)
            .await?
            .json::<LlmResponse>()
            .await
            .map_err(|e| ModelError::Malformed(e.to_string()))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::Malformed("response has no choices".to_string()))?;
        Ok(choice.message.content.unwrap_or_default())
    }

    async fn stream_complete(
        &self,
        prompt: &Prompt,
        on_fragment: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, ModelError> {
        // Streamed replies have no whole-request timeout.
        let response = self
            .post("chat/completions")
            .json(&self.chat_request(prompt, true))
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;
        decode_stream(response.bytes_stream(), on_fragment).await
    }
}

#[async_trait]
impl Transcriber for OpenAiClient {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, InterviewError> {
        let samples = resample(&clip.samples, clip.sample_rate, TRANSCRIPTION_SAMPLE_RATE)
            .map_err(|e| InterviewError::Transcription(e.to_string()))?;
        let wav = encode_wav(&samples, TRANSCRIPTION_SAMPLE_RATE)
            .map_err(|e| InterviewError::Transcription(e.to_string()))?;
        tracing::debug!("Uploading {} bytes of audio for transcription", wav.len());

        let file = Part::bytes(wav)
            .file_name("recording.wav")
            .mime_str("audio/wav")
            .map_err(|e| InterviewError::Transcription(e.to_string()))?;
        let form = Form::new()
            .text("model", self.transcription_model.clone())
            .part("file", file);

        let response = self
            .post("audio/transcriptions")
            .timeout(self.request_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| InterviewError::Transcription(transport_error(e).to_string()))?;
        let response = check_status(response)
            .await
            .map_err(|e| InterviewError::Transcription(e.to_string()))?;
        let body = response
            .json::<TranscriptionResponse>()
            .await
            .map_err(|e| InterviewError::Transcription(e.to_string()))?;
        Ok(body.text)
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiClient {
    async fn synthesize(&self, text: &str) -> Result<AudioClip, InterviewError> {
        let request = SpeechRequest {
            model: &self.speech_model,
            voice: &self.speech_voice,
            input: text,
            response_format: "pcm",
        };
        let response = self
            .post("audio/speech")
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| InterviewError::Synthesis(transport_error(e).to_string()))?;
        let response = check_status(response)
            .await
            .map_err(|e| InterviewError::Synthesis(e.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| InterviewError::Synthesis(e.to_string()))?;

        let samples = decode_pcm16_le(&bytes);
        if samples.is_empty() {
            return Err(InterviewError::Synthesis("no audio returned".to_string()));
        }
        Ok(AudioClip::new(samples, SPEECH_PCM16_SAMPLE_RATE))
    }
}

fn transport_error(e: reqwest::Error) -> ModelError {
    if e.is_timeout() {
        ModelError::Timeout
    } else {
        ModelError::Transport(e.to_string())
    }
}

/// Passes successful responses through and maps the rest onto [`ModelError`].
async fn check_status(response: Response) -> Result<Response, ModelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = extract_error_message(&body);
    tracing::warn!("OpenAI request failed with {status}: {message}");
    if status == StatusCode::TOO_MANY_REQUESTS {
        Err(ModelError::RateLimited(message))
    } else {
        Err(ModelError::Status {
            status: status.as_u16(),
            body: message,
        })
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}
