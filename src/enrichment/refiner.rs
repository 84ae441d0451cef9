//! Description/tag refiners
//!
//! A refiner takes the raw description of the chosen candidate and produces a
//! stream of progress updates ending in a rewritten description plus inferred
//! tags. [`LlmRefiner`] talks to an OpenAI-compatible chat completions
//! endpoint; [`PassthroughRefiner`] is used when no model is configured.

use anyhow::{Context, Result, anyhow, bail};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::Stream;
use futures::stream::BoxStream;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub type RefineStream = BoxStream<'static, Result<RefineUpdate>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefineRequest {
    pub title: String,
    pub author: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefineUpdate {
    /// Intermediate progress
    Step {
        action: String,
        reasoning: Option<String>,
    },
    /// Final result; a `None` description means "keep the original"
    Finished {
        description: Option<String>,
        tags: Vec<String>,
    },
}

#[async_trait]
pub trait DescriptionRefiner: Send + Sync {
    fn name(&self) -> &str;

    /// Start refining; errors inside the stream fail the current book only
    async fn refine(&self, request: RefineRequest) -> Result<RefineStream>;
}

/// Keeps the provider description and infers nothing
#[derive(Debug, Clone, Default)]
pub struct PassthroughRefiner;

#[async_trait]
impl DescriptionRefiner for PassthroughRefiner {
    fn name(&self) -> &str {
        "passthrough"
    }

    async fn refine(&self, _request: RefineRequest) -> Result<RefineStream> {
        Ok(Box::pin(futures::stream::iter([Ok(RefineUpdate::Finished {
            description: None,
            tags: Vec::new(),
        })])))
    }
}

/// One stage of the language-model pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceStep {
    DescriptionClean,
    TagInference,
    /// Per-namespace inference, e.g. `tag_inference_genre`
    TagInferenceField(String),
}

impl InferenceStep {
    /// Resolve a configured step name. Field steps must name one of
    /// `namespaces` (case and underscores are ignored).
    pub fn parse(name: &str, namespaces: &[String]) -> Option<Self> {
        match name {
            "description_clean" => Some(Self::DescriptionClean),
            "tag_inference" => Some(Self::TagInference),
            other => {
                let suffix = other.strip_prefix("tag_inference_")?;
                let key = suffix.replace('_', "").to_lowercase();
                namespaces
                    .iter()
                    .find(|ns| ns.replace('_', "").to_lowercase() == key)
                    .map(|ns| Self::TagInferenceField(ns.clone()))
            }
        }
    }

    pub fn action(&self) -> String {
        match self {
            Self::DescriptionClean => "description_clean".to_string(),
            Self::TagInference => "tag_inference".to_string(),
            Self::TagInferenceField(field) => format!("tag_inference_{}", field.to_lowercase()),
        }
    }

    fn prompt_name(&self) -> String {
        self.action()
    }
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Directory holding `<prompt>.txt` system prompts
    pub prompt_dir: Option<PathBuf>,
    pub inference_order: Vec<InferenceStep>,
    /// Namespaces whose values are numbers in [0, 1]
    pub range_namespaces: Vec<String>,
}

impl LlmSettings {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().to_string(),
            model: model.into().trim().to_string(),
            timeout: Duration::from_secs(5),
            max_tokens: 512,
            temperature: 0.0,
            prompt_dir: None,
            inference_order: vec![InferenceStep::DescriptionClean, InferenceStep::TagInference],
            range_namespaces: vec!["Romance".to_string()],
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.model.is_empty()
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

/// Content and optional reasoning of one chat completion
#[derive(Debug, Clone, PartialEq)]
pub struct ChatAnswer {
    pub content: String,
    pub reasoning: Option<String>,
}

#[derive(Clone)]
pub struct LlmRefiner {
    client: Client,
    settings: Arc<LlmSettings>,
}

impl LlmRefiner {
    pub fn new(settings: LlmSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("Failed to build LLM HTTP client")?;
        Ok(Self {
            client,
            settings: Arc::new(settings),
        })
    }

    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    fn require_config(&self) -> Result<()> {
        if !self.settings.is_configured() {
            bail!("LLM_BASE_URL or LLM_MODEL not configured.");
        }
        Ok(())
    }

    async fn load_system_prompt(&self, name: &str) -> String {
        if let Some(dir) = &self.settings.prompt_dir {
            let path = dir.join(format!("{}.txt", name));
            match tokio::fs::read_to_string(&path).await {
                Ok(content) if !content.trim().is_empty() => return content.trim().to_string(),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to read prompt {}: {}", path.display(), e),
            }
        }
        default_prompt(name)
    }

    async fn chat(&self, prompt_name: &str, user_content: String, empty_detail: &str) -> Result<ChatAnswer> {
        let mut messages = Vec::with_capacity(2);
        messages.push(ChatMessage {
            role: "system",
            content: self.load_system_prompt(prompt_name).await,
        });
        messages.push(ChatMessage {
            role: "user",
            content: user_content,
        });

        let body = ChatCompletionRequest {
            model: &self.settings.model,
            messages,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };
        let url = format!("{}/v1/chat/completions", self.settings.base_url.trim_end_matches('/'));

        tracing::debug!("LLM request: prompt={} model={}", prompt_name, self.settings.model);

        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        if !response.status().is_success() {
            bail!("LLM request failed with status {}.", response.status());
        }

        let body: Value = response.json().await.map_err(request_error)?;
        if !body.is_object() {
            bail!("LLM response malformed.");
        }
        extract_answer(&body, empty_detail)
    }

    async fn clean_description(&self, request: &RefineRequest, description: &str) -> Result<ChatAnswer> {
        let title = non_blank(&request.title, "Unknown title");
        let author = non_blank(&request.author, "Unknown author");
        let description = non_blank(description, "No description provided");
        let user_content = format!("{} | author: {} | description: {}", title, author, description);
        self.chat("description_clean", user_content, "LLM returned empty description.")
            .await
    }

    async fn infer_tags(&self, description: &str) -> Result<(Vec<String>, Option<String>)> {
        let answer = self
            .chat(
                "tag_inference",
                non_blank(description, "No description provided").to_string(),
                "LLM returned empty tag JSON.",
            )
            .await?;
        let parsed = parse_json_object(&answer.content)?;
        let tags = parse_tag_mapping(&parsed, &self.settings.range_namespaces)?;
        Ok((tags, answer.reasoning))
    }

    async fn infer_field(&self, step: &InferenceStep, field: &str, description: &str) -> Result<(Vec<String>, Option<String>)> {
        let answer = self
            .chat(
                &step.prompt_name(),
                non_blank(description, "No description provided").to_string(),
                "LLM returned empty tag value.",
            )
            .await?;
        let value = field_value(&answer.content, field);
        let values = coerce_tag_values(field, &value, &self.settings.range_namespaces)?;
        Ok((values, answer.reasoning))
    }

    fn refine_stream(self, request: RefineRequest) -> impl Stream<Item = Result<RefineUpdate>> + Send + 'static {
        try_stream! {
            let raw = request.description.clone();
            let mut cleaned = raw.clone();
            let mut tags: Vec<String> = Vec::new();
            let mut mapping: Vec<(String, Vec<String>)> = Vec::new();

            for step in self.settings.inference_order.iter() {
                match step {
                    InferenceStep::DescriptionClean => {
                        let answer = self.clean_description(&request, &cleaned).await?;
                        cleaned = answer.content;
                        yield RefineUpdate::Step { action: step.action(), reasoning: answer.reasoning };
                    }
                    InferenceStep::TagInference => {
                        let (inferred, reasoning) = self.infer_tags(&raw).await?;
                        tags = inferred;
                        yield RefineUpdate::Step { action: step.action(), reasoning };
                    }
                    InferenceStep::TagInferenceField(field) => {
                        let (values, reasoning) = self.infer_field(step, field, &raw).await?;
                        match mapping.iter_mut().find(|(key, _)| key == field) {
                            Some(entry) => entry.1 = values,
                            None => mapping.push((field.clone(), values)),
                        }
                        tags = build_tags_from_mapping(&mapping);
                        yield RefineUpdate::Step { action: step.action(), reasoning };
                    }
                }
            }

            let description = Some(cleaned).filter(|d| !d.trim().is_empty() && *d != raw);
            yield RefineUpdate::Finished { description, tags };
        }
    }
}

#[async_trait]
impl DescriptionRefiner for LlmRefiner {
    fn name(&self) -> &str {
        "llm"
    }

    async fn refine(&self, request: RefineRequest) -> Result<RefineStream> {
        self.require_config()?;
        Ok(Box::pin(self.clone().refine_stream(request)))
    }
}

/// LLM refiner when a server and model are configured, passthrough otherwise
pub fn build_refiner(settings: LlmSettings) -> Result<Arc<dyn DescriptionRefiner>> {
    if !settings.is_configured() {
        tracing::warn!("LLM_BASE_URL or LLM_MODEL not set, descriptions will not be rewritten");
        return Ok(Arc::new(PassthroughRefiner));
    }
    tracing::info!("Using LLM refiner: {} at {}", settings.model, settings.base_url);
    Ok(Arc::new(LlmRefiner::new(settings)?))
}

fn request_error(err: reqwest::Error) -> anyhow::Error {
    if err.is_timeout() {
        anyhow!("LLM request timed out.")
    } else if err.is_decode() {
        anyhow!("LLM response malformed.")
    } else {
        anyhow!("LLM request failed.")
    }
}

fn non_blank<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() { fallback } else { trimmed }
}

fn default_prompt(name: &str) -> String {
    match name {
        "description_clean" => "Rewrite the audiobook description you are given as one to three plain \
            sentences. Drop marketing copy, review quotes, narrator credits and series boilerplate. \
            Reply with the description only."
            .to_string(),
        "tag_inference" => "Classify the audiobook described by the user. Reply with one JSON object \
            whose keys are tag namespaces (Genre, Reader, Romance, Setting, Commitment) and whose \
            values are strings or lists of strings. Romance is a number between 0 and 1."
            .to_string(),
        other => {
            let field = other.strip_prefix("tag_inference_").unwrap_or(other);
            format!(
                "Classify the audiobook described by the user for the '{}' namespace. \
                 Reply with a JSON object of the form {{\"{}\": value}}.",
                field, field
            )
        }
    }
}

/// First element of `choices`
pub fn extract_choice(body: &Value) -> Result<&Value> {
    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| anyhow!("LLM response missing choices."))?;
    if !choice.is_object() {
        bail!("LLM response malformed.");
    }
    Ok(choice)
}

fn choice_content(choice: &Value) -> Option<&Value> {
    if let Some(content) = choice.get("content") {
        return Some(content);
    }
    choice.get("message").and_then(|message| message.get("content"))
}

fn reasoning_text(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// Reasoning text from whichever field the server put it in
pub fn extract_reasoning(choice: &Value) -> Option<String> {
    reasoning_text(choice.get("reasoning"))
        .or_else(|| reasoning_text(choice.get("message").and_then(|m| m.get("reasoning"))))
        .or_else(|| match choice.get("content") {
            Some(Value::Object(content)) => reasoning_text(content.get("reasoning")),
            Some(Value::Array(items)) => items.iter().find_map(|item| reasoning_text(item.get("reasoning"))),
            _ => None,
        })
}

pub fn extract_answer(body: &Value, empty_detail: &str) -> Result<ChatAnswer> {
    let choice = extract_choice(body)?;
    let content = choice_content(choice)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("LLM response content invalid."))?
        .trim();
    if content.is_empty() {
        bail!("{}", empty_detail);
    }
    Ok(ChatAnswer {
        content: content.to_string(),
        reasoning: extract_reasoning(choice),
    })
}

/// Parse model output as a JSON object, tolerating a surrounding code fence
pub fn parse_json_object(content: &str) -> Result<Map<String, Value>> {
    let trimmed = strip_code_fence(content);
    let parsed: Value = serde_json::from_str(trimmed).map_err(|_| anyhow!("LLM tag JSON invalid."))?;
    match parsed {
        Value::Object(map) => Ok(map),
        _ => bail!("LLM tag JSON must be an object."),
    }
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            rest.strip_suffix("```").unwrap_or(rest).trim()
        }
        None => trimmed,
    }
}

fn is_range_namespace(field: &str, range_namespaces: &[String]) -> bool {
    range_namespaces.iter().any(|ns| ns.eq_ignore_ascii_case(field.trim()))
}

/// Coerce one scalar answer to its tag value text
pub fn coerce_tag_value(field: &str, value: &Value, range_namespaces: &[String]) -> Result<String> {
    if is_range_namespace(field, range_namespaces) {
        let number = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|n| n.is_finite())
        .ok_or_else(|| anyhow!("LLM value for {} must be a number.", field))?;
        return Ok(number.clamp(0.0, 1.0).to_string());
    }

    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => bail!("LLM value for {} is empty.", field),
    }
}

/// Lists expand to one value per non-blank item
pub fn coerce_tag_values(field: &str, value: &Value, range_namespaces: &[String]) -> Result<Vec<String>> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter(|item| !matches!(item, Value::Null) && item.as_str().is_none_or(|s| !s.trim().is_empty()))
            .map(|item| coerce_tag_value(field, item, range_namespaces))
            .collect(),
        scalar => Ok(vec![coerce_tag_value(field, scalar, range_namespaces)?]),
    }
}

/// `{"Genre": ["Epic", "Adventure"], "Mode": "mystery"}` ->
/// `Genre:Epic`, `Genre:Adventure`, `Mode:mystery`
pub fn parse_tag_mapping(parsed: &Map<String, Value>, range_namespaces: &[String]) -> Result<Vec<String>> {
    let mut tags = Vec::new();
    for (key, value) in parsed {
        let key = key.trim();
        if key.is_empty() || key.eq_ignore_ascii_case("reasoning") {
            continue;
        }
        for value in coerce_tag_values(key, value, range_namespaces)? {
            tags.push(format!("{}:{}", key, value));
        }
    }
    Ok(tags)
}

fn field_value(content: &str, field: &str) -> Value {
    match serde_json::from_str::<Value>(strip_code_fence(content)) {
        Ok(Value::Object(map)) => {
            if let Some((_, value)) = map.iter().find(|(key, _)| key.trim().eq_ignore_ascii_case(field)) {
                return value.clone();
            }
            let mut values = map.into_iter().filter(|(key, _)| !key.eq_ignore_ascii_case("reasoning"));
            match (values.next(), values.next()) {
                (Some((_, value)), None) => value,
                _ => Value::Null,
            }
        }
        Ok(value) => value,
        Err(_) => Value::String(content.trim().to_string()),
    }
}

fn build_tags_from_mapping(mapping: &[(String, Vec<String>)]) -> Vec<String> {
    mapping
        .iter()
        .flat_map(|(key, values)| values.iter().map(move |value| format!("{}:{}", key, value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    fn romance() -> Vec<String> {
        vec!["Romance".to_string()]
    }

    #[test]
    fn test_parse_tag_mapping_skips_reasoning() {
        let parsed = parse_json_object(r#"{"Mode": "mystery", "reasoning": "ignore me", "Setting": "historical"}"#).unwrap();
        let mut tags = parse_tag_mapping(&parsed, &romance()).unwrap();
        tags.sort();
        assert_eq!(tags, vec!["Mode:mystery", "Setting:historical"]);
    }

    #[test]
    fn test_parse_tag_mapping_list_values() {
        let parsed = parse_json_object(r#"{"Genre": ["Epic", "Adventure", " "]}"#).unwrap();
        let mut tags = parse_tag_mapping(&parsed, &romance()).unwrap();
        tags.sort();
        assert_eq!(tags, vec!["Genre:Adventure", "Genre:Epic"]);
    }

    #[test]
    fn test_parse_json_object() {
        let parsed = parse_json_object("```json\n{\"Mode\":\"mystery\"}\n```").unwrap();
        assert_eq!(parsed.get("Mode"), Some(&json!("mystery")));
        assert!(parse_json_object("not json").is_err());
        assert!(parse_json_object("[1, 2]").is_err());
    }

    #[test]
    fn test_coerce_range_values() {
        assert_eq!(coerce_tag_value("Romance", &json!("0.7"), &romance()).unwrap(), "0.7");
        assert_eq!(coerce_tag_value("romance", &json!(2.5), &romance()).unwrap(), "1");
        assert!(coerce_tag_value("Romance", &json!("lots"), &romance()).is_err());
    }

    #[test]
    fn test_coerce_empty_string_is_error() {
        assert!(coerce_tag_value("Mode", &json!(" "), &romance()).is_err());
        assert!(coerce_tag_value("Mode", &Value::Null, &romance()).is_err());
    }

    #[test]
    fn test_extract_reasoning_locations() {
        assert_eq!(
            extract_reasoning(&json!({"message": {"reasoning": "Because it fits."}})).as_deref(),
            Some("Because it fits.")
        );
        assert_eq!(
            extract_reasoning(&json!({"content": [{"reasoning": "Step one."}, {"reasoning": "Step two."}]})).as_deref(),
            Some("Step one.")
        );
        assert_eq!(extract_reasoning(&json!({"reasoning": "  "})), None);
    }

    #[test]
    fn test_extract_answer() {
        let body = json!({"choices": [{"message": {"content": "  A tidy description. "}}]});
        let answer = extract_answer(&body, "empty").unwrap();
        assert_eq!(answer.content, "A tidy description.");
        assert_eq!(answer.reasoning, None);

        let empty = json!({"choices": [{"message": {"content": "   "}}]});
        assert_eq!(extract_answer(&empty, "LLM returned empty description.").unwrap_err().to_string(), "LLM returned empty description.");
        assert!(extract_answer(&json!({"choices": []}), "empty").is_err());
    }

    #[test]
    fn test_inference_step_parse() {
        let namespaces = vec!["Genre".to_string(), "Reader".to_string()];
        assert_eq!(InferenceStep::parse("description_clean", &namespaces), Some(InferenceStep::DescriptionClean));
        assert_eq!(
            InferenceStep::parse("tag_inference_genre", &namespaces),
            Some(InferenceStep::TagInferenceField("Genre".to_string()))
        );
        assert_eq!(InferenceStep::parse("tag_inference_mood", &namespaces), None);
        assert_eq!(InferenceStep::parse("summarize", &namespaces), None);
    }

    #[test]
    fn test_field_value_shapes() {
        assert_eq!(field_value(r#"{"genre": ["Fantasy"]}"#, "Genre"), json!(["Fantasy"]));
        assert_eq!(field_value(r#"{"value": "Fantasy"}"#, "Genre"), json!("Fantasy"));
        assert_eq!(field_value("Fantasy", "Genre"), json!("Fantasy"));
    }

    #[tokio::test]
    async fn test_unconfigured_llm_refiner_fails() {
        let refiner = LlmRefiner::new(LlmSettings::new("", "")).unwrap();
        let request = RefineRequest {
            title: "Dune".to_string(),
            author: "Frank Herbert".to_string(),
            description: "Desert planet.".to_string(),
        };
        let err = refiner.refine(request).await.err().unwrap();
        assert_eq!(err.to_string(), "LLM_BASE_URL or LLM_MODEL not configured.");
    }

    #[tokio::test]
    async fn test_passthrough_keeps_description() {
        let request = RefineRequest {
            title: String::new(),
            author: String::new(),
            description: "Original".to_string(),
        };
        let updates: Vec<_> = PassthroughRefiner.refine(request).await.unwrap().collect().await;
        assert_eq!(updates.len(), 1);
        assert!(matches!(
            updates[0].as_ref().unwrap(),
            RefineUpdate::Finished { description: None, tags } if tags.is_empty()
        ));
    }
}
