use crate::error::AppError;
use crate::twilio_types::{PlayAction, ResponseAction, SayAction};
use crate::types::AppState;

use tracing::{debug, warn};

const ELEVEN_MODEL_ID: &str = "eleven_multilingual_v2";

/// One ElevenLabs synthesis attempt: text in, MP3 bytes out.  No retry.
pub async fn synthesize(state: &AppState, text: &str) -> Result<Vec<u8>, AppError> {
    let key = state.config.eleven_key()?;
    let url = format!(
        "https://api.elevenlabs.io/v1/text-to-speech/{}",
        state.config.eleven_voice_id
    );
    let payload = serde_json::json!({
        "text": text,
        "model_id": ELEVEN_MODEL_ID,
        "voice_settings": { "stability": 0.5, "similarity_boost": 0.75 },
    });
    let resp = state
        .http_client
        .post(url)
        .header("xi-api-key", key)
        .header(reqwest::header::ACCEPT, "audio/mpeg")
        .json(&payload)
        .send()
        .await
        .map_err(|e| AppError::upstream("elevenlabs", e))?;
    let resp = resp
        .error_for_status()
        .map_err(|e| AppError::upstream("elevenlabs", e))?;
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| AppError::upstream("elevenlabs", e))?;
    debug!(bytes = bytes.len(), "synthesized tts clip");
    Ok(bytes.to_vec())
}

/// Text in, TwiML action out.  On success the clip is cached and served back
/// to Twilio as a Play URL; any failure (missing credential included) falls
/// back to Twilio's own voice.
pub async fn speak(state: &AppState, host: &str, text: &str) -> ResponseAction {
    match synthesize(state, text).await {
        Ok(bytes) if !bytes.is_empty() => {
            let id = state.audio.insert(bytes);
            ResponseAction::Play(PlayAction {
                url: format!("https://{host}/audio/{id}.mp3"),
                ..Default::default()
            })
        }
        Ok(_) => say_es(text),
        Err(e) => {
            warn!(error=%e, "tts unavailable, falling back to provider voice");
            say_es(text)
        }
    }
}

pub fn say_es(text: &str) -> ResponseAction {
    ResponseAction::Say(SayAction {
        text: text.to_string(),
        language: Some("es-ES".to_string()),
        ..Default::default()
    })
}
