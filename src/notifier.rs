use crate::catalog::{self, CatalogItem};
use crate::config::MailMode;
use crate::error::AppError;
use crate::session::ContactDraft;
use crate::types::AppState;

use serde::Deserialize;
use std::collections::HashMap;
use tracing::{error, info, warn};

#[derive(Deserialize, Debug)]
struct MessageResponse {
    sid: String,
}

#[derive(Debug)]
pub struct MailReceipt {
    pub ok: bool,
    pub status: u16,
}

async fn twilio_message(
    state: &AppState,
    to: &str,
    body: Option<&str>,
    media_url: Option<&str>,
) -> Result<String, AppError> {
    let (account_sid, auth_token) = state.config.twilio_auth()?;
    let from = state.config.twilio_from()?;
    let url = format!("https://api.twilio.com/2010-04-01/Accounts/{account_sid}/Messages.json");
    let mut form: HashMap<&str, String> = HashMap::new();
    form.insert("To", format!("whatsapp:{to}"));
    form.insert("From", format!("whatsapp:{from}"));
    if let Some(service_sid) = &state.config.messaging_service_sid {
        form.insert("MessagingServiceSid", service_sid.clone());
    }
    if let Some(body) = body {
        form.insert("Body", body.to_string());
    }
    if let Some(media_url) = media_url {
        form.insert("MediaUrl", media_url.to_string());
    }
    let resp = state
        .http_client
        .post(url)
        .basic_auth(account_sid, Some(auth_token))
        .form(&form)
        .send()
        .await
        .map_err(|e| {
            error!(error=%e, "failed to send message request to twilio");
            AppError::upstream("twilio", e)
        })?;
    let resp = resp
        .error_for_status()
        .map_err(|e| AppError::upstream("twilio", e))?;
    let msg = resp
        .json::<MessageResponse>()
        .await
        .map_err(|e| AppError::upstream("twilio", e))?;
    Ok(msg.sid)
}

/// Plain WhatsApp text to an E.164 number; returns the message SID.
pub async fn send_whatsapp(state: &AppState, to: &str, body: &str) -> Result<String, AppError> {
    twilio_message(state, to, Some(body), None).await
}

pub async fn send_whatsapp_media(
    state: &AppState,
    to: &str,
    media_url: &str,
) -> Result<String, AppError> {
    twilio_message(state, to, None, Some(media_url)).await
}

/// Property card over WhatsApp: one text summary plus up to three photo
/// messages.  Photo failures are logged, never surfaced; the text send is
/// the only leg that can fail the call.
pub async fn send_property_card(
    state: &AppState,
    to: &str,
    item: &CatalogItem,
) -> Result<String, AppError> {
    let summary = catalog::property_summary(item, &state.config.columns);
    let sid = send_whatsapp(state, to, &summary).await?;
    match catalog::photo_urls(state, item).await {
        Ok(urls) => {
            for url in urls {
                if let Err(e) = send_whatsapp_media(state, to, &url).await {
                    warn!(error=%e, item = item.id, "failed to send photo message");
                }
            }
        }
        Err(e) => warn!(error=%e, item = item.id, "failed to resolve photo urls"),
    }
    Ok(sid)
}

/// Email through the operator's mail relay.  A non-2xx from the relay is a
/// delivery verdict, not a transport failure, so it comes back as
/// `MailReceipt { ok: false }` rather than an error.
pub async fn send_email(
    state: &AppState,
    to: &str,
    subject: &str,
    html: &str,
) -> Result<MailReceipt, AppError> {
    let url = state.config.mail_url()?;
    let mail = &state.config.mail;
    let mut payload: HashMap<&str, &str> = HashMap::new();
    payload.insert(mail.to_field.as_str(), to);
    payload.insert(mail.subject_field.as_str(), subject);
    payload.insert(mail.html_field.as_str(), html);
    payload.insert(mail.from_field.as_str(), &mail.from_email);
    payload.insert(mail.name_field.as_str(), &mail.from_name);

    let mut req = state.http_client.post(url);
    if let Some(token) = &mail.token {
        req = req.header(reqwest::header::AUTHORIZATION, format!("Bearer {token}"));
    }
    for (name, value) in &mail.extra_headers {
        req = req.header(name.as_str(), value.as_str());
    }
    let req = match mail.mode {
        MailMode::Form => req.form(&payload),
        MailMode::Json => req.json(&payload),
    };
    let resp = req.send().await.map_err(|e| {
        error!(error=%e, "failed to reach mail api");
        AppError::upstream("mail", e)
    })?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        warn!(status = %status, body = %body, "mail api rejected the send");
    }
    Ok(MailReceipt {
        ok: status.is_success(),
        status: status.as_u16(),
    })
}

/// Booking follow-through: create the sub-record, WhatsApp the property
/// card, email the confirmation.  The legs are independent; a failed one is
/// logged and the rest still run.
pub async fn confirm_booking(
    state: &AppState,
    item: &CatalogItem,
    contact: &ContactDraft,
    visit_day: &str,
) {
    match catalog::create_booking(state, item.id, contact, visit_day).await {
        Ok(subitem) => info!(subitem = %subitem, item = item.id, "booking sub-record created"),
        Err(e) => error!(error=%e, item = item.id, "failed to create booking sub-record"),
    }
    if let Some(phone) = &contact.phone {
        if let Err(e) = send_property_card(state, phone, item).await {
            error!(error=%e, "failed to send booking confirmation whatsapp");
        }
    }
    if let Some(email) = &contact.email {
        let subject = format!("[{}] Confirmación de visita", state.config.brand_name);
        let html = format!(
            "<p>Visita confirmada para <b>{}</b> el {}.</p>",
            item.name, visit_day
        );
        match send_email(state, email, &subject, &html).await {
            Ok(receipt) if !receipt.ok => {
                warn!(status = receipt.status, "confirmation email rejected")
            }
            Ok(_) => {}
            Err(e) => error!(error=%e, "failed to send confirmation email"),
        }
    }
}
