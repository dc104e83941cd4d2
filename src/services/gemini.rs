use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{RewriteService, ServiceError, SpeechService, TitleService};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_SPEECH_MODEL: &str = "gemini-2.5-flash-preview-tts";
const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Finish reasons that mean the candidate was withheld by policy.
const POLICY_FINISH_REASONS: &[&str] = &["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII"];

const REWRITE_SAFETY_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}

impl GenerateResponse {
    fn block_reason(&self) -> Option<&str> {
        self.prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
    }

    fn policy_finish_reason(&self) -> Option<&str> {
        self.candidates
            .first()
            .and_then(|c| c.finish_reason.as_deref())
            .filter(|reason| POLICY_FINISH_REASONS.contains(reason))
    }

    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .into_iter()
            .flat_map(|content| content.parts.iter())
    }

    fn audio(self) -> Result<String, ServiceError> {
        if let Some(reason) = self.block_reason().or(self.policy_finish_reason()) {
            log::warn!("Speech request blocked by content policy: {reason}");
            return Err(ServiceError::ProhibitedContent {
                reason: reason.to_string(),
            });
        }
        self.parts()
            .find_map(|part| part.inline_data.as_ref())
            .map(|inline| inline.data.clone())
            .filter(|data| !data.is_empty())
            .ok_or(ServiceError::MissingAudio)
    }

    fn text(self) -> Result<String, ServiceError> {
        let text: String = self.parts().filter_map(|p| p.text.as_deref()).collect();
        let text = text.trim();
        if text.is_empty() {
            return Err(ServiceError::MissingText);
        }
        Ok(text.to_string())
    }
}

/// Blocking client for the hosted Gemini models.
///
/// Implements speech generation, rewriting and title generation against the
/// `generateContent` endpoint.
pub struct GeminiClient {
    http: Client,
    api_key: String,
    base_url: String,
    speech_model: String,
    text_model: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ServiceError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ServiceError::Request(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            speech_model: DEFAULT_SPEECH_MODEL.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
        })
    }

    /// Read the key from `GEMINI_API_KEY`, then `API_KEY`.
    pub fn from_env() -> Result<Self, ServiceError> {
        let key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("API_KEY"))
            .map_err(|_| {
                ServiceError::Request("GEMINI_API_KEY (or API_KEY) is not set".to_string())
            })?;
        Self::new(key)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_speech_model(mut self, model: impl Into<String>) -> Self {
        self.speech_model = model.into();
        self
    }

    pub fn with_text_model(mut self, model: impl Into<String>) -> Self {
        self.text_model = model.into();
        self
    }

    fn generate(&self, model: &str, body: &Value) -> Result<GenerateResponse, ServiceError> {
        let url = format!("{}/models/{model}:generateContent", self.base_url);
        log::debug!("POST {url}");

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .map_err(|e| ServiceError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(ServiceError::Request(format!("HTTP {status}: {detail}")));
        }

        response
            .json::<GenerateResponse>()
            .map_err(|e| ServiceError::Response(e.to_string()))
    }
}

impl SpeechService for GeminiClient {
    fn generate_speech(
        &self,
        text: &str,
        temperature: f32,
        voice: &str,
    ) -> Result<String, ServiceError> {
        let body = json!({
            "contents": [{ "parts": [{ "text": text }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "temperature": temperature,
                "speechConfig": {
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
                }
            }
        });
        self.generate(&self.speech_model, &body)?.audio()
    }
}

impl RewriteService for GeminiClient {
    fn rewrite(&self, text: &str) -> Result<String, ServiceError> {
        let safety: Vec<Value> = REWRITE_SAFETY_CATEGORIES
            .iter()
            .map(|category| json!({ "category": category, "threshold": "BLOCK_MEDIUM_AND_ABOVE" }))
            .collect();
        let body = json!({
            "contents": [{ "parts": [{ "text": rewrite_prompt(text) }] }],
            "safetySettings": safety,
        });

        let response = self.generate(&self.text_model, &body)?;
        if let Some(reason) = response.block_reason().or(response.policy_finish_reason()) {
            return Err(ServiceError::RewriteBlocked {
                reason: reason.to_string(),
            });
        }
        response.text()
    }
}

impl TitleService for GeminiClient {
    fn generate_title(&self, text: &str) -> Result<String, ServiceError> {
        let body = json!({
            "contents": [{ "parts": [{ "text": title_prompt(text) }] }],
        });
        self.generate(&self.text_model, &body)?.text()
    }
}

fn rewrite_prompt(text: &str) -> String {
    format!(
        "Revise the story below so it is suitable for a general audience and passes a strict \
         safety policy: remove harassment, hate speech, sexually explicit material and \
         dangerous acts. Keep the plot and voice. Mask common profanity so it stays readable \
         (\"shit\" -> \"s**t\", \"asshole\" -> \"a-hole\"). Reply with the revised story only.\n\n\
         Story:\n---\n{text}\n---"
    )
}

fn title_prompt(text: &str) -> String {
    format!(
        "Write a 4-6 word filename for the story below. Lowercase letters, digits and hyphens \
         only, hyphens between words, no extension. Example: my-sisters-wedding-drama\n\n\
         Story:\n---\n{text}\n---\n\nFilename:"
    )
}
