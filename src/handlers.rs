use crate::catalog;
use crate::dialogue;
use crate::error::AppError;
use crate::notifier;
use crate::tts;
use crate::twilio_types::{
    wrap_twiml, GatherAction, GatherPayload, HangupAction, MessageAction, MessageWebhookPayload,
    PauseAction, RedirectAction, Response, ResponseAction, VoiceWebhookPayload,
};
use crate::types::AppState;

use axum::{
    extract::{Host, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, trace};
use uuid::Uuid;

fn twiml_response(response: Response) -> (StatusCode, HeaderMap, String) {
    let twiml = wrap_twiml(xmlserde::xml_serialize(response));
    trace!(twiml = %twiml, "twiml response");
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, "application/xml".parse().unwrap());
    (StatusCode::OK, headers, twiml)
}

fn gather_action() -> GatherAction {
    GatherAction {
        input: Some("speech dtmf".to_string()),
        action: Some("/gather".to_string()),
        timeout: Some(6),
        num_digits: Some(1),
        speech_timeout: Some("auto".to_string()),
        language: Some("es-ES".to_string()),
        ..Default::default()
    }
}

/// First webhook of a call: greeting, then listen.
pub async fn voice_inbound(
    Host(host): Host,
    State(app_state): State<Arc<AppState>>,
    body: String,
) -> impl IntoResponse {
    trace!(body = %body, "voice webhook body");
    match serde_urlencoded::from_str::<VoiceWebhookPayload>(&body) {
        Ok(payload) => info!(call = %payload.call_sid, from = %payload.from, "inbound call"),
        Err(e) => error!(error=%e, "failed to deserialize voice payload"),
    }
    let greeting = format!(
        "Bienvenido a {}. Después del tono, cuéntame qué necesitas. \
         También puedes pulsar uno para recibir por WhatsApp la ficha de una propiedad.",
        app_state.config.brand_name
    );
    let prompt = tts::speak(&app_state, &host, &greeting).await;
    let response = Response {
        actions: vec![
            prompt,
            ResponseAction::Gather(gather_action()),
            ResponseAction::Pause(PauseAction { length: Some(1) }),
            ResponseAction::Redirect(RedirectAction {
                url: "/voice".to_string(),
                method: None,
            }),
        ],
    };
    twiml_response(response)
}

/// Gather callback: DTMF shortcut or one dialogue turn, then listen again.
/// An internal error never drops the call; it becomes an apology plus a
/// re-prompt.
pub async fn gather_handler(
    Host(host): Host,
    State(app_state): State<Arc<AppState>>,
    body: String,
) -> impl IntoResponse {
    trace!(body = %body, "gather webhook body");
    let payload = match serde_urlencoded::from_str::<GatherPayload>(&body) {
        Ok(payload) => payload,
        Err(e) => {
            error!(error=%e, "failed to deserialize gather payload");
            let apology = AppError::BadPayload("gather").apology();
            let action = tts::speak(&app_state, &host, apology).await;
            return twiml_response(Response {
                actions: vec![action, ResponseAction::Gather(gather_action())],
            });
        }
    };

    // "1" sends the property card by WhatsApp and ends the call.
    if payload.digits.as_deref() == Some("1") {
        let message =
            "Perfecto. Te enviaremos un WhatsApp con la ficha de la propiedad destacada.";
        let action = tts::speak(&app_state, &host, message).await;
        let state = app_state.clone();
        let call_sid = payload.call_sid.clone();
        let caller = payload.from.clone();
        tokio::spawn(async move {
            if let Err(e) = send_featured_card(&state, &call_sid, &caller).await {
                error!(error=%e, "failed to send featured property card");
            }
        });
        return twiml_response(Response {
            actions: vec![action, ResponseAction::Hangup(HangupAction::default())],
        });
    }

    let speech = payload.speech_result.as_deref().unwrap_or("").trim();
    if speech.is_empty() {
        let action = tts::speak(&app_state, &host, "No te he escuchado bien. ¿Puedes repetirlo?")
            .await;
        return twiml_response(Response {
            actions: vec![action, ResponseAction::Gather(gather_action())],
        });
    }

    let reply =
        match dialogue::handle_turn(&app_state, &payload.call_sid, &payload.from, speech).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(error=%e, call = %payload.call_sid, "dialogue turn failed");
                e.apology().to_string()
            }
        };
    let action = tts::speak(&app_state, &host, &reply).await;
    twiml_response(Response {
        actions: vec![action, ResponseAction::Gather(gather_action())],
    })
}

/// The card goes to the session's current item when one is selected,
/// otherwise to the first catalog entry.
async fn send_featured_card(
    state: &Arc<AppState>,
    call_sid: &str,
    caller: &str,
) -> Result<(), AppError> {
    let current = {
        let handle = state.sessions.entry(call_sid);
        let session = handle.lock().await;
        session.current_item
    };
    let items = catalog::fetch_items(state).await?;
    let item = match current.and_then(|id| items.iter().find(|i| i.id == id)) {
        Some(item) => item,
        None => items.first().ok_or(AppError::NotFound("catalog item"))?,
    };
    let sid = notifier::send_property_card(state, caller, item).await?;
    info!(sid = %sid, item = item.id, "featured property card sent");
    Ok(())
}

/// Inbound WhatsApp message: one dialogue turn keyed by the sender address.
pub async fn whatsapp_inbound(
    State(app_state): State<Arc<AppState>>,
    body: String,
) -> impl IntoResponse {
    trace!(body = %body, "whatsapp webhook body");
    let payload = match serde_urlencoded::from_str::<MessageWebhookPayload>(&body) {
        Ok(payload) => payload,
        Err(e) => {
            error!(error=%e, "failed to deserialize message payload");
            return (
                StatusCode::BAD_REQUEST,
                HeaderMap::new(),
                "Bad request".to_string(),
            );
        }
    };
    info!(from = %payload.from, "whatsapp inbound");
    let text = payload.body.as_deref().unwrap_or("").trim().to_string();
    let caller = payload
        .from
        .strip_prefix("whatsapp:")
        .unwrap_or(&payload.from)
        .to_string();
    let reply = match dialogue::handle_turn(&app_state, &payload.from, &caller, &text).await {
        Ok(reply) => reply,
        Err(e) => {
            error!(error=%e, from = %payload.from, "whatsapp turn failed");
            e.apology().to_string()
        }
    };
    twiml_response(Response {
        actions: vec![ResponseAction::Message(MessageAction { body: reply })],
    })
}

/// Cached audio clips for Twilio's Play verb.  Unknown ids are a 404, never
/// a server error.
pub async fn audio_handler(
    Path(file): Path<String>,
    State(app_state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let id = file.strip_suffix(".mp3").unwrap_or(&file);
    let id = match Uuid::parse_str(id) {
        Ok(id) => id,
        Err(_) => return (StatusCode::NOT_FOUND, HeaderMap::new(), Vec::new()),
    };
    match app_state.audio.get(&id) {
        Some(bytes) => {
            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, "audio/mpeg".parse().unwrap());
            (StatusCode::OK, headers, bytes)
        }
        None => (StatusCode::NOT_FOUND, HeaderMap::new(), Vec::new()),
    }
}

pub async fn healthz() -> impl IntoResponse {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Json(serde_json::json!({ "ok": true, "ts": ts }))
}

// Operator-only endpoints, gated by the X-Auth shared secret.  With no
// OPS_TOKEN configured they stay closed.

fn ops_authorized(app_state: &AppState, headers: &HeaderMap) -> bool {
    match app_state.config.ops_token.as_deref() {
        Some(token) => {
            headers
                .get("x-auth")
                .and_then(|v| v.to_str().ok())
                .map_or(false, |got| got == token)
        }
        None => false,
    }
}

#[derive(Deserialize)]
pub struct OpsWhatsappRequest {
    pub to: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
}

pub async fn ops_send_whatsapp(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, Json<serde_json::Value>) {
    if !ops_authorized(&app_state, &headers) {
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "error": "forbidden" })),
        );
    }
    let req = match serde_json::from_str::<OpsWhatsappRequest>(&body) {
        Ok(req) => req,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
        }
    };
    let result = if let Some(media_url) = req.media_url.as_deref() {
        notifier::send_whatsapp_media(&app_state, &req.to, media_url).await
    } else {
        notifier::send_whatsapp(&app_state, &req.to, req.body.as_deref().unwrap_or("")).await
    };
    match result {
        Ok(sid) => (StatusCode::OK, Json(serde_json::json!({ "sid": sid }))),
        Err(e) => {
            error!(error=%e, "ops whatsapp send failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
        }
    }
}

#[derive(Deserialize)]
pub struct OpsEmailRequest {
    pub to: String,
    pub subject: String,
    pub html: String,
}

pub async fn ops_send_email(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, Json<serde_json::Value>) {
    if !ops_authorized(&app_state, &headers) {
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "error": "forbidden" })),
        );
    }
    let req = match serde_json::from_str::<OpsEmailRequest>(&body) {
        Ok(req) => req,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
        }
    };
    match notifier::send_email(&app_state, &req.to, &req.subject, &req.html).await {
        Ok(receipt) => (
            StatusCode::OK,
            Json(serde_json::json!({ "ok": receipt.ok, "status": receipt.status })),
        ),
        Err(e) => {
            error!(error=%e, "ops email send failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
        }
    }
}
