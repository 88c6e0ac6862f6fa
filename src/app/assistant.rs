//! Gemini `generateContent` client for mind maps and diagnostics.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::error::{AiError, ErrorReport};
use super::types::MindMap;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MIND_MAP_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_ANALYSIS_MODEL: &str = "gemini-2.5-pro";

pub const VISUAL_MARKUP_MAX_CHARS: usize = 12_000;
const MIND_MAP_MIN_ITEMS: usize = 3;
const MIND_MAP_MAX_ITEMS: usize = 5;
const ERROR_BODY_MAX_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub mind_map_model: String,
    pub analysis_model: String,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<RequestContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: Value,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn text(&self) -> Option<String> {
        let parts = &self.candidates.first()?.content.as_ref()?.parts;
        let text = parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");
        if text.trim().is_empty() { None } else { Some(text) }
    }
}

#[derive(Debug, Clone)]
pub struct Assistant {
    http: reqwest::Client,
    config: AssistantConfig,
}

impl Assistant {
    pub fn new(config: AssistantConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    /// Related concepts for `topic`. Every failure is reported as
    /// [`AiError::Generation`].
    pub async fn generate_mind_map(&self, topic: &str) -> Result<MindMap, AiError> {
        let config = GenerationConfig {
            response_mime_type: "application/json",
            response_schema: mind_map_schema(),
        };
        let result = self
            .generate(&self.config.mind_map_model, mind_map_prompt(topic), Some(config))
            .await
            .and_then(|text| parse_mind_map(&text));
        match result {
            Ok(map) => {
                info!(topic, "mind map generated");
                Ok(map)
            }
            Err(err) => {
                warn!(topic, error = %err, "mind map generation failed");
                Err(err.into_generation())
            }
        }
    }

    pub async fn analyze_error(&self, report: &ErrorReport) -> Result<String, AiError> {
        self.generate(&self.config.analysis_model, error_analysis_prompt(report), None)
            .await
    }

    pub async fn analyze_visual_issue(
        &self,
        title: &str,
        raw_html: &str,
        description: &str,
    ) -> Result<String, AiError> {
        self.generate(
            &self.config.analysis_model,
            visual_issue_prompt(title, raw_html, description),
            None,
        )
        .await
    }

    async fn generate(
        &self,
        model: &str,
        prompt: String,
        generation_config: Option<GenerationConfig>,
    ) -> Result<String, AiError> {
        let key = self.config.api_key.as_deref().ok_or(AiError::NotConfigured)?;
        let url = format!(
            "{}/v1beta/models/{model}:generateContent",
            self.config.base_url
        );
        let request = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config,
        };
        debug!(model, "sending generateContent request");

        let response = self
            .http
            .post(&url)
            .query(&[("key", key)])
            .json(&request)
            .send()
            .await
            .map_err(|err| AiError::Request(err.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Status {
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_MAX_CHARS).collect(),
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|err| AiError::Request(err.without_url().to_string()))?;
        parsed.text().ok_or(AiError::EmptyResponse)
    }
}

pub fn mind_map_schema() -> Value {
    let category = |description: &str| {
        json!({
            "type": "ARRAY",
            "description": description,
            "items": { "type": "STRING" }
        })
    };
    json!({
        "type": "OBJECT",
        "properties": {
            "foundational": category(
                "3-5 core concepts or prerequisites to understand the main topic."
            ),
            "deeperDive": category(
                "3-5 sub-topics or specific areas within the main topic for more in-depth exploration."
            ),
            "relatedBranches": category(
                "3-5 related but distinct topics or fields that connect to the main topic."
            ),
        },
        "required": ["foundational", "deeperDive", "relatedBranches"]
    })
}

pub fn mind_map_prompt(topic: &str) -> String {
    format!(
        "Generate a conceptual mind map for the Grokipedia topic: \"{}\". \
         Structure the output as a JSON object with three categories: \
         \"foundational\" (core concepts to understand the topic), \
         \"deeperDive\" (sub-topics for in-depth exploration) and \
         \"relatedBranches\" (connected fields or topics). \
         Provide 3-5 items for each category. The items should be concise \
         and suitable for further searches on Grokipedia.",
        topic.trim()
    )
}

/// Parses and validates a mind-map response body.
pub fn parse_mind_map(text: &str) -> Result<MindMap, AiError> {
    let body = strip_code_fence(text);
    let raw: MindMap = serde_json::from_str(body)
        .map_err(|err| AiError::Generation(format!("malformed mind map: {err}")))?;

    Ok(MindMap {
        foundational: clean_category("foundational", raw.foundational)?,
        deeper_dive: clean_category("deeperDive", raw.deeper_dive)?,
        related_branches: clean_category("relatedBranches", raw.related_branches)?,
    })
}

fn clean_category(name: &str, items: Vec<String>) -> Result<Vec<String>, AiError> {
    let items = items
        .into_iter()
        .map(|item| item.trim().to_string())
        .collect::<Vec<_>>();
    if items.iter().any(String::is_empty) {
        return Err(AiError::Generation(format!("{name} contains an empty item")));
    }
    let mut seen = HashSet::new();
    if !items.iter().all(|item| seen.insert(item.to_lowercase())) {
        return Err(AiError::Generation(format!("{name} repeats an item")));
    }
    if !(MIND_MAP_MIN_ITEMS..=MIND_MAP_MAX_ITEMS).contains(&items.len()) {
        return Err(AiError::Generation(format!(
            "{name} has {} items, expected {MIND_MAP_MIN_ITEMS}-{MIND_MAP_MAX_ITEMS}",
            items.len()
        )));
    }
    Ok(items)
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

pub fn error_analysis_prompt(report: &ErrorReport) -> String {
    let na = |value: &Option<String>| value.as_deref().unwrap_or("N/A").to_string();
    format!(
        "Analyze the following error report from grokreader, a terminal reader-mode \
         client for grokipedia.com that scrapes its MediaWiki markup through a CORS proxy.\n\
         Provide a concise, technical explanation of the likely root cause and suggest \
         a potential solution or debugging steps. Format the response in Markdown.\n\n\
         **Error Details:**\n\
         - Message: {}\n\
         - Raw error: {}\n\
         - Target URL: {}\n\
         - Scraping stage: {}\n\
         - Failed selector: {}\n\
         - Timestamp: {}\n\
         - Environment: {}\n\n\
         **Component Stack:**\n```\n{}\n```\n",
        report.message,
        na(&report.raw_error),
        na(&report.target_url),
        na(&report.scraping_stage),
        na(&report.failed_selector),
        report.timestamp,
        report.environment,
        na(&report.component_stack),
    )
}

pub fn visual_issue_prompt(title: &str, raw_html: &str, description: &str) -> String {
    let markup = raw_html
        .chars()
        .take(VISUAL_MARKUP_MAX_CHARS)
        .collect::<String>();
    format!(
        "A reader of the Grokipedia article \"{title}\" reports a rendering problem \
         in a reader-mode view of the article.\n\n\
         **User description:**\n{}\n\n\
         **Article markup (first {VISUAL_MARKUP_MAX_CHARS} characters):**\n```html\n{markup}\n```\n\n\
         Identify the markup construct most likely responsible and suggest how the \
         reader should transform it. Format the response in Markdown.",
        description.trim()
    )
}
