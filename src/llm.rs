use crate::error::AppError;
use crate::matcher;
use crate::openai_types::{OpenAIBatchResponse, OpenAIMessage, OpenAIPayload, ResponseFormat};
use crate::types::AppState;

use serde::{Deserialize, Deserializer};
use tracing::{error, warn};

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";

const SLOT_SYSTEM_PROMPT: &str = "Eres un planificador. Devuelve SOLO un JSON válido con: \
{\"intent\":\"chitchat|search_property|send_whatsapp|send_email|help\",\
\"reference\":str|null,\"city\":str|null,\"address\":str|null,\"budget\":number|null,\
\"confirm\":bool|null,\"name\":str|null,\"phone\":str|null,\"email\":str|null,\
\"language\":str|null,\"message\":str|null}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Chitchat,
    SearchProperty,
    SendWhatsapp,
    SendEmail,
    Help,
    /// Anything outside the prompt's vocabulary; treated as chitchat.
    Other,
}

impl Default for Intent {
    fn default() -> Self {
        Intent::Chitchat
    }
}

impl<'de> Deserialize<'de> for Intent {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        Ok(match raw.as_str() {
            "chitchat" => Intent::Chitchat,
            "search_property" => Intent::SearchProperty,
            "send_whatsapp" => Intent::SendWhatsapp,
            "send_email" => Intent::SendEmail,
            "help" => Intent::Help,
            _ => Intent::Other,
        })
    }
}

/// Structured slots extracted from one utterance.  Every field defaults, so
/// a partially-shaped model reply still yields a usable plan.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SlotPlan {
    pub intent: Intent,
    pub reference: Option<String>,
    pub city: Option<String>,
    pub address: Option<String>,
    #[serde(deserialize_with = "de_budget")]
    pub budget: Option<f64>,
    pub confirm: Option<bool>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub language: Option<String>,
    pub message: Option<String>,
}

// Models render budgets as 300000, "300000" or "300.000 €" on different days.
fn de_budget<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Text(String),
    }
    Ok(match Option::<Raw>::deserialize(d)? {
        None => None,
        Some(Raw::Num(n)) => Some(n),
        Some(Raw::Text(s)) => matcher::parse_money(&s),
    })
}

async fn completion(
    state: &AppState,
    messages: Vec<OpenAIMessage>,
    temperature: f32,
    json: bool,
) -> Result<String, AppError> {
    let key = state.config.openai_key()?;
    let payload = OpenAIPayload {
        model: state.config.openai_model.clone(),
        messages,
        temperature: Some(temperature),
        response_format: if json {
            Some(ResponseFormat::json_object())
        } else {
            None
        },
    };
    let resp = state
        .http_client
        .post(OPENAI_URL)
        .header(reqwest::header::AUTHORIZATION, format!("Bearer {key}"))
        .json(&payload)
        .send()
        .await
        .map_err(|e| {
            error!(error=%e, "failed to send request to OpenAI");
            AppError::upstream("openai", e)
        })?;
    let resp = resp
        .error_for_status()
        .map_err(|e| AppError::upstream("openai", e))?;
    let resp = resp.json::<OpenAIBatchResponse>().await.map_err(|e| {
        error!(error=%e, "failed to deserialize OpenAI response");
        AppError::upstream("openai", e)
    })?;
    Ok(resp
        .choices
        .first()
        .map(|c| c.message.content.trim().to_string())
        .unwrap_or_default())
}

/// Free-form completion over the given messages.
pub async fn chat(
    state: &AppState,
    messages: Vec<OpenAIMessage>,
    temperature: f32,
) -> Result<String, AppError> {
    completion(state, messages, temperature, false).await
}

/// Slot extraction for one utterance.  Infallible by contract: transport
/// errors, non-JSON output and wrong shapes all collapse into the fallback
/// plan, so the dialogue never crashes on an unreliable upstream.
pub async fn extract_slots(state: &AppState, utterance: &str) -> SlotPlan {
    let messages = vec![
        OpenAIMessage::system(SLOT_SYSTEM_PROMPT),
        OpenAIMessage::user(utterance),
    ];
    match completion(state, messages, 0.1, true).await {
        Ok(raw) => parse_slot_json(utterance, &raw),
        Err(e) => {
            warn!(error=%e, "slot extraction call failed");
            fallback_plan(utterance)
        }
    }
}

/// Validate the model output against the slot schema; unusable output maps
/// to the fallback plan.  Pure, so the fallback policy is testable without
/// the upstream.
pub fn parse_slot_json(utterance: &str, raw: &str) -> SlotPlan {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    match serde_json::from_str::<SlotPlan>(cleaned) {
        Ok(plan) => plan,
        Err(e) => {
            warn!(error=%e, raw=%raw, "slot extraction returned unusable JSON");
            fallback_plan(utterance)
        }
    }
}

pub fn fallback_plan(utterance: &str) -> SlotPlan {
    SlotPlan {
        intent: Intent::Chitchat,
        message: Some(utterance.to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_plan_parses() {
        let plan = parse_slot_json(
            "x",
            r#"{"intent":"search_property","city":"Tarragona","budget":300000}"#,
        );
        assert_eq!(plan.intent, Intent::SearchProperty);
        assert_eq!(plan.city.as_deref(), Some("Tarragona"));
        assert_eq!(plan.budget, Some(300000.0));
    }

    #[test]
    fn budget_accepts_string_renderings() {
        let plan = parse_slot_json("x", r#"{"intent":"search_property","budget":"300.000 €"}"#);
        assert_eq!(plan.budget, Some(300000.0));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let plan = parse_slot_json("x", r#"{"intent":"send_whatsapp","phone":"+34600111222"}"#);
        assert_eq!(plan.intent, Intent::SendWhatsapp);
        assert_eq!(plan.phone.as_deref(), Some("+34600111222"));
        assert!(plan.city.is_none());
        assert!(plan.confirm.is_none());
    }

    #[test]
    fn garbage_collapses_to_fallback() {
        let plan = parse_slot_json("quiero un piso", "I think the user wants a flat");
        assert_eq!(plan.intent, Intent::Chitchat);
        assert_eq!(plan.message.as_deref(), Some("quiero un piso"));
        assert!(plan.budget.is_none());
    }

    #[test]
    fn fenced_json_is_unwrapped() {
        let plan = parse_slot_json("x", "```json\n{\"intent\":\"help\"}\n```");
        assert_eq!(plan.intent, Intent::Help);
    }

    #[test]
    fn unknown_intent_is_tolerated() {
        let plan = parse_slot_json("x", r#"{"intent":"book_flight"}"#);
        assert_eq!(plan.intent, Intent::Other);
    }
}
