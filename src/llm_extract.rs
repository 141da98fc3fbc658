// src/llm_extract.rs

use crate::config::{LlmBackend, LlmSection};
use crate::heuristics::ParsedBill;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// The prompt template that instructs the model to extract structured bill data.
const SYSTEM_PROMPT: &str = r#"You are a utility bill data extraction assistant.
Given raw OCR text from an electricity bill, extract structured data and return ONLY valid JSON.

The JSON must match this schema exactly:
{
  "accountNumber": "string or null",
  "accountName": "string or null",
  "billingPeriod": {"from": "string", "to": "string"} or null,
  "dueDate": "string or null",
  "totalAmount": number or null,
  "consumption": {"current": number, "previous": number, "kwh": number} or null,
  "meterReading": {"current": number, "previous": number} or null,
  "charges": {
    "generation": number,
    "transmission": number,
    "distribution": number,
    "systemLoss": number,
    "subsidies": number,
    "taxes": number,
    "universalCharges": number,
    "fitAll": number
  } or null,
  "confidence": number between 0 and 1
}

Notes:
- The text comes from OCR and may be noisy or garbled. Do your best to reconstruct the data.
- In "charges", include only the categories actually printed on the bill.
- Keep dates exactly as they appear in the text.
- Use null for fields you cannot determine.
- Return ONLY the JSON object, no markdown fences, no commentary."#;

/// Longest prompt we send; OCR dumps past this are truncated to stay
/// within context limits.
const MAX_PROMPT_CHARS: usize = 12_000;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Resolved endpoint configuration ready to make API calls.
struct ResolvedEndpoint {
    base_url: String,
    model: String,
    api_key: String,
}

/// Resolve the LLM config section into a concrete endpoint.
fn resolve_endpoint(llm: &LlmSection) -> Result<ResolvedEndpoint, Box<dyn std::error::Error>> {
    match llm.backend {
        LlmBackend::Ollama => {
            info!(
                url = %llm.ollama.base_url,
                model = %llm.ollama.model,
                "Using Ollama (local) backend"
            );
            Ok(ResolvedEndpoint {
                base_url: llm.ollama.base_url.clone(),
                model: llm.ollama.model.clone(),
                api_key: "ollama".to_string(), // required by API but ignored
            })
        }
        LlmBackend::Remote => {
            let api_key = std::env::var("LLM_API_KEY")
                .map_err(|_| "LLM_API_KEY env var required for remote backend")?;
            info!(
                url = %llm.remote.base_url,
                model = %llm.remote.model,
                "Using remote API backend"
            );
            Ok(ResolvedEndpoint {
                base_url: llm.remote.base_url.clone(),
                model: llm.remote.model.clone(),
                api_key,
            })
        }
        LlmBackend::Patterns => {
            Err("Patterns backend selected — LLM extraction not needed".into())
        }
    }
}

/// Check if the Ollama server is reachable.
async fn check_ollama_health(client: &Client, base_url: &str) -> bool {
    // Ollama's health endpoint is at the root (not under /v1)
    let health_url = base_url.trim_end_matches("/v1").trim_end_matches("/v1/");

    match client
        .get(health_url)
        .timeout(Duration::from_secs(3))
        .send()
        .await
    {
        Ok(resp) => {
            if resp.status().is_success() {
                info!("Ollama server is reachable");
                true
            } else {
                warn!(status = %resp.status(), "Ollama server returned non-OK status");
                false
            }
        }
        Err(e) => {
            warn!(error = %e, "Ollama server not reachable");
            false
        }
    }
}

/// Send raw bill text to an LLM and parse the structured record.
async fn extract_bill_with_llm(
    client: &Client,
    endpoint: &ResolvedEndpoint,
    raw_text: &str,
    timeout: Duration,
) -> Result<ParsedBill, Box<dyn std::error::Error>> {
    let text = truncate_chars(raw_text, MAX_PROMPT_CHARS);

    let request = ChatRequest {
        model: endpoint.model.clone(),
        messages: vec![
            ChatMessage {
                role: "system".to_string(),
                content: SYSTEM_PROMPT.to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: format!("Extract bill data from the following OCR text:\n\n{text}"),
            },
        ],
        temperature: 0.0,
    };

    let url = format!("{}/chat/completions", endpoint.base_url);

    let response = client
        .post(&url)
        .header("Authorization", format!("Bearer {}", endpoint.api_key))
        .timeout(timeout)
        .json(&request)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(format!("LLM API error {status}: {body}").into());
    }

    let chat_response: ChatResponse = response.json().await?;
    let content = chat_response
        .choices
        .first()
        .map(|c| c.message.content.as_str())
        .ok_or("Empty response from LLM")?;

    // Strip markdown fences if the model added them despite instructions
    let json_str = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    // Some models (especially with /think mode) may prepend reasoning text.
    // Find the first '{' and last '}' to extract just the JSON object.
    let json_str = extract_json_object(json_str)?;

    let bill: ParsedBill = serde_json::from_str(json_str)
        .map_err(|e| format!("Failed to parse LLM response as ParsedBill: {e}\nRaw: {json_str}"))?;

    Ok(bill)
}

/// Extract the outermost JSON object from a string that may contain
/// surrounding text (e.g. thinking tokens from qwen3).
fn extract_json_object(s: &str) -> Result<&str, Box<dyn std::error::Error>> {
    let start = s.find('{').ok_or("No '{' found in LLM response")?;
    let end = s.rfind('}').ok_or("No '}' found in LLM response")?;
    if end <= start {
        return Err("Malformed JSON in LLM response".into());
    }
    Ok(&s[start..=end])
}

/// Cut at a character boundary — OCR text carries multi-byte currency signs.
fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Run tier-1 extraction on a single bill text. Any error here means
/// "tier 1 unavailable" to the caller, never a failed parse.
pub async fn run_llm_extraction(
    client: &Client,
    llm: &LlmSection,
    raw_text: &str,
) -> Result<ParsedBill, Box<dyn std::error::Error>> {
    let endpoint = resolve_endpoint(llm)?;

    // Health check for local backends
    if llm.backend == LlmBackend::Ollama
        && !check_ollama_health(client, &endpoint.base_url).await
    {
        return Err(format!(
            "Ollama is not running at {}. Start it with: ollama serve",
            endpoint.base_url
        )
        .into());
    }

    let bill =
        extract_bill_with_llm(client, &endpoint, raw_text, Duration::from_secs(llm.timeout_secs))
            .await?;

    let (filled, total) = bill.coverage();
    info!(
        filled,
        total,
        account = ?bill.account_number,
        total_amount = ?bill.total_amount,
        kwh = ?bill.consumption.as_ref().map(|c| c.kwh),
        "LLM extraction result"
    );
    Ok(bill)
}
