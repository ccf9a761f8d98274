//! Per-conversation dialogue state machine.
//!
//! One call to [`handle_turn`] per inbound webhook.  The session lock is
//! held for the whole turn, so two webhooks for the same call id run one
//! after the other.

use crate::catalog::{self, CatalogItem};
use crate::error::AppError;
use crate::llm::{self, Intent, SlotPlan};
use crate::matcher::{self, MatchOutcome};
use crate::openai_types::OpenAIMessage;
use crate::session::{CallSession, Step};
use crate::types::AppState;

use tracing::{debug, warn};

const DEFAULT_VISIT_DAY: &str = "sábado a las 11:00";

/// Run one dialogue turn and return the assistant's reply text.
pub async fn handle_turn(
    state: &AppState,
    session_key: &str,
    caller: &str,
    utterance: &str,
) -> Result<String, AppError> {
    let handle = state.sessions.entry(session_key);
    let mut session = handle.lock().await;
    session.touch();
    session.push_user(utterance);
    debug!(key = %session_key, step = ?session.step, utterance = %utterance, "dialogue turn");

    let reply = run_step(state, &mut session, caller, utterance).await?;
    session.push_assistant(&reply);
    Ok(reply)
}

async fn run_step(
    state: &AppState,
    session: &mut CallSession,
    caller: &str,
    utterance: &str,
) -> Result<String, AppError> {
    // Fast path: an utterance carrying a 5-9 digit run goes straight to the
    // reference lookup, no LLM round-trip.
    if matches!(session.step, Step::Idle | Step::NeedDetail)
        && matcher::extract_reference(utterance).is_some()
    {
        let items = catalog::fetch_items(state).await?;
        if let MatchOutcome::Match(item) = matcher::find_match(
            utterance,
            None,
            &items,
            &state.config.columns,
            state.config.match_threshold,
        ) {
            return Ok(present_item(state, session, item));
        }
        // unknown reference: let slot extraction have a go at the rest
    }

    let slots = llm::extract_slots(state, utterance).await;
    if let Some(language) = &slots.language {
        session.language = language.clone();
    }

    match session.step {
        Step::Idle => idle_turn(state, session, utterance, slots).await,
        Step::NeedDetail => detail_turn(state, session, utterance, slots).await,
        Step::OfferDay => offer_day_turn(state, session, utterance, slots).await,
        Step::AwaitBookConfirm => confirm_turn(session, utterance, slots),
        Step::CollectContact => contact_turn(state, session, caller, slots).await,
    }
}

/// Select an item and move to the visit-day offer.
fn present_item(state: &AppState, session: &mut CallSession, item: &CatalogItem) -> String {
    session.current_item = Some(item.id);
    session.step = Step::OfferDay;
    session.contact = Default::default();
    let summary = catalog::property_summary(item, &state.config.columns).replace('\n', ". ");
    format!("He encontrado lo siguiente: {summary}. ¿Quieres que te proponga un día de visita?")
}

async fn idle_turn(
    state: &AppState,
    session: &mut CallSession,
    utterance: &str,
    slots: SlotPlan,
) -> Result<String, AppError> {
    let wants_search = slots.intent == Intent::SearchProperty
        || slots.reference.is_some()
        || slots.city.is_some()
        || slots.address.is_some()
        || slots.budget.is_some();
    if wants_search {
        return search_and_reply(state, session, utterance, &slots).await;
    }

    match slots.intent {
        Intent::SendWhatsapp => match slots.phone.as_deref() {
            Some(dest) => {
                let text = slots
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("Hola, te escribe {}.", state.config.brand_name));
                let sid = crate::notifier::send_whatsapp(state, dest, &text).await?;
                debug!(sid = %sid, "ops whatsapp sent from dialogue");
                Ok(format!("He enviado el WhatsApp a {dest}."))
            }
            None => Ok(
                "No he detectado el número. Dime: enviar whatsapp a más tres cuatro, el número, y el mensaje."
                    .to_string(),
            ),
        },
        Intent::SendEmail => match slots.email.as_deref() {
            Some(email) => {
                let text = slots.message.clone().unwrap_or_else(|| "Hola,".to_string());
                let subject = format!("[{}] Información solicitada", state.config.brand_name);
                let receipt =
                    crate::notifier::send_email(state, email, &subject, &format!("<p>{text}</p>"))
                        .await?;
                if receipt.ok {
                    Ok(format!("He enviado el correo a {email}."))
                } else {
                    Ok(format!("No he podido enviar el correo a {email}."))
                }
            }
            None => Ok("No he detectado el correo. Dime: email a, la dirección, y el mensaje."
                .to_string()),
        },
        _ => chitchat(state, session).await,
    }
}

async fn search_and_reply(
    state: &AppState,
    session: &mut CallSession,
    utterance: &str,
    slots: &SlotPlan,
) -> Result<String, AppError> {
    let items = catalog::fetch_items(state).await?;
    let text = search_text(utterance, slots);
    match matcher::find_match(
        &text,
        slots.city.as_deref(),
        &items,
        &state.config.columns,
        state.config.match_threshold,
    ) {
        MatchOutcome::Match(item) => Ok(present_item(state, session, item)),
        MatchOutcome::Ambiguous { city, count } => {
            session.step = Step::NeedDetail;
            Ok(format!(
                "Tengo {count} propiedades en {city}. ¿Me das la calle o tu presupuesto aproximado?"
            ))
        }
        MatchOutcome::NoMatch => Ok(
            "No he encontrado ninguna propiedad que encaje. ¿Me das la referencia o la zona?"
                .to_string(),
        ),
    }
}

/// Matcher input: the raw transcript enriched with slots the model pulled
/// out of it.  A spoken reference or street often survives only in its slot,
/// not verbatim in the transcript.  The city slot is deliberately excluded
/// from the text (it is a hint, not a score source).
fn search_text(utterance: &str, slots: &SlotPlan) -> String {
    let mut text = utterance.to_string();
    for extra in [&slots.reference, &slots.address] {
        if let Some(extra) = extra {
            text.push(' ');
            text.push_str(extra);
        }
    }
    if let Some(budget) = slots.budget {
        text.push_str(&format!(" {}", budget as i64));
    }
    text
}

async fn detail_turn(
    state: &AppState,
    session: &mut CallSession,
    utterance: &str,
    slots: SlotPlan,
) -> Result<String, AppError> {
    let items = catalog::fetch_items(state).await?;
    let text = search_text(utterance, &slots);
    match matcher::find_match(
        &text,
        slots.city.as_deref(),
        &items,
        &state.config.columns,
        state.config.match_threshold,
    ) {
        MatchOutcome::Match(item) => Ok(present_item(state, session, item)),
        _ => Ok(
            "Sigo sin dar con ella. ¿Me dices la calle exacta o la referencia de la propiedad?"
                .to_string(),
        ),
    }
}

async fn offer_day_turn(
    state: &AppState,
    session: &mut CallSession,
    utterance: &str,
    slots: SlotPlan,
) -> Result<String, AppError> {
    if is_negative(utterance, &slots) {
        session.reset_item();
        return Ok("De acuerdo. ¿Te ayudo con otra propiedad?".to_string());
    }
    if is_positive(utterance, &slots) {
        let item = current_item(state, session).await?;
        let day = visit_day(&item, &state.config.columns.visit_day);
        session.step = Step::AwaitBookConfirm;
        return Ok(format!(
            "La próxima visita disponible es el {day}. ¿Te reservo la plaza?"
        ));
    }
    Ok("¿Quieres que te proponga un día de visita para esta propiedad?".to_string())
}

fn confirm_turn(
    session: &mut CallSession,
    utterance: &str,
    slots: SlotPlan,
) -> Result<String, AppError> {
    if is_negative(utterance, &slots) {
        session.reset_item();
        return Ok("Sin problema, queda anulado. ¿Puedo ayudarte con otra cosa?".to_string());
    }
    if is_positive(utterance, &slots) {
        session.step = Step::CollectContact;
        return Ok(
            "Estupendo. ¿Me dices tu nombre y un teléfono o correo para confirmarte la visita?"
                .to_string(),
        );
    }
    Ok("¿Confirmo la reserva de la visita? Dime sí o no.".to_string())
}

async fn contact_turn(
    state: &AppState,
    session: &mut CallSession,
    caller: &str,
    slots: SlotPlan,
) -> Result<String, AppError> {
    if let Some(name) = slots.name {
        session.contact.name = Some(name);
    }
    if let Some(phone) = slots.phone {
        session.contact.phone = Some(phone);
    }
    if let Some(email) = slots.email {
        session.contact.email = Some(email);
    }
    // A voice caller already gave us a number by calling.
    if session.contact.phone.is_none() && caller.starts_with('+') {
        session.contact.phone = Some(caller.to_string());
    }
    if !session.contact.reachable() {
        return Ok(
            "Necesito al menos un teléfono o un correo para confirmar la visita.".to_string(),
        );
    }

    let item = current_item(state, session).await?;
    let day = visit_day(&item, &state.config.columns.visit_day);
    let contact = session.contact.clone();
    let greeting = contact
        .name
        .as_deref()
        .map(|n| format!(", {n}"))
        .unwrap_or_default();
    crate::notifier::confirm_booking(state, &item, &contact, &day).await;
    session.reset_item();
    Ok(format!(
        "Perfecto{greeting}. Queda reservada la visita a {} el {day}. Te envío la confirmación ahora mismo.",
        item.name
    ))
}

/// The slot extractor updates the session language each turn; chat replies
/// follow it.
fn chat_system_prompt(brand: &str, language: &str) -> String {
    format!(
        "Eres asistente telefónico de {brand}. Sé conciso y útil. \
         Responde en el idioma del cliente (código: {language})."
    )
}

async fn chitchat(state: &AppState, session: &CallSession) -> Result<String, AppError> {
    let mut messages = vec![OpenAIMessage::system(chat_system_prompt(
        &state.config.brand_name,
        &session.language,
    ))];
    messages.extend(session.history.iter().cloned());
    match llm::chat(state, messages, 0.2).await {
        Ok(text) if !text.is_empty() => Ok(text),
        Ok(_) => Ok("De acuerdo, lo gestiono ahora mismo.".to_string()),
        Err(e @ AppError::MissingConfig(_)) => {
            // No LLM credential degrades the chat path, never the process.
            warn!(error=%e, "chat completion unavailable");
            Ok(
                "Ahora mismo no puedo responder a eso, pero puedo buscarte una propiedad por referencia o zona."
                    .to_string(),
            )
        }
        Err(e) => Err(e),
    }
}

/// Re-fetch the session's current item; a vanished item resets the session.
async fn current_item(
    state: &AppState,
    session: &mut CallSession,
) -> Result<CatalogItem, AppError> {
    let id = match session.current_item {
        Some(id) => id,
        None => {
            session.reset_item();
            return Err(AppError::NotFound("active item"));
        }
    };
    let items = catalog::fetch_items(state).await?;
    match items.into_iter().find(|item| item.id == id) {
        Some(item) => Ok(item),
        None => {
            session.reset_item();
            Err(AppError::NotFound("catalog item"))
        }
    }
}

fn visit_day(item: &CatalogItem, visit_day_column: &str) -> String {
    let day = item.text(visit_day_column);
    if day.is_empty() {
        DEFAULT_VISIT_DAY.to_string()
    } else {
        day.to_string()
    }
}

// Keyword checks run after the confirm slot: the slot wins when present,
// keywords cover the fallback plan.

fn is_positive(utterance: &str, slots: &SlotPlan) -> bool {
    if let Some(confirm) = slots.confirm {
        return confirm;
    }
    contains_keyword(utterance, &["si", "vale", "claro", "perfecto", "venga"])
}

fn is_negative(utterance: &str, slots: &SlotPlan) -> bool {
    if let Some(confirm) = slots.confirm {
        return !confirm;
    }
    contains_keyword(utterance, &["no", "nada", "dejalo"])
}

/// Transcripts keep punctuation ("No, gracias"), so tokens are stripped of
/// non-alphanumeric edges before comparing.
fn contains_keyword(utterance: &str, keywords: &[&str]) -> bool {
    let text = matcher::normalize(utterance);
    text.split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
        .any(|token| keywords.contains(&token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn plan() -> SlotPlan {
        SlotPlan::default()
    }

    #[test]
    fn confirm_slot_outranks_keywords() {
        let mut slots = plan();
        slots.confirm = Some(false);
        // utterance sounds positive, slot says otherwise
        assert!(!is_positive("vale", &slots));
        assert!(is_negative("vale", &slots));
    }

    #[test]
    fn keywords_cover_the_fallback_plan() {
        assert!(is_positive("Sí, claro", &plan()));
        assert!(is_positive("vale perfecto", &plan()));
        assert!(is_positive("¡Sí!", &plan()));
        assert!(is_negative("no, gracias", &plan()));
        assert!(!is_positive("quiero pensarlo", &plan()));
        assert!(!is_negative("quiero pensarlo", &plan()));
    }

    #[test]
    fn punctuated_decline_is_recognized() {
        assert!(is_negative("No, gracias.", &plan()));
        assert!(is_negative("Nada, déjalo.", &plan()));
        assert!(!is_positive("No, gracias.", &plan()));
    }

    #[test]
    fn search_text_carries_slots_but_not_city() {
        let mut slots = plan();
        slots.reference = Some("597444".to_string());
        slots.address = Some("Rambla Nova 10".to_string());
        slots.city = Some("Tarragona".to_string());
        slots.budget = Some(300000.0);
        let text = search_text("la del anuncio", &slots);
        assert!(text.contains("597444"));
        assert!(text.contains("Rambla Nova 10"));
        assert!(text.contains("300000"));
        assert!(!text.contains("Tarragona"));
    }

    #[test]
    fn chat_prompt_follows_detected_language() {
        let prompt = chat_system_prompt("Inmobiliaria GCA", "en");
        assert!(prompt.contains("Inmobiliaria GCA"));
        assert!(prompt.contains("código: en"));
        assert!(chat_system_prompt("X", "es").contains("código: es"));
    }

    #[tokio::test]
    async fn confirm_step_transitions_on_yes_and_no() {
        let store = crate::session::SessionStore::new(std::time::Duration::from_secs(60));
        let handle = store.entry("CA1");
        let mut session = handle.lock().await;
        session.step = Step::AwaitBookConfirm;
        session.current_item = Some(5);

        confirm_turn(&mut session, "sí, resérvame", plan()).unwrap();
        assert_eq!(session.step, Step::CollectContact);
        assert_eq!(session.current_item, Some(5));

        session.step = Step::AwaitBookConfirm;
        confirm_turn(&mut session, "No, gracias.", plan()).unwrap();
        assert_eq!(session.step, Step::Idle);
        assert!(session.current_item.is_none());
    }

    #[test]
    fn visit_day_falls_back_when_column_empty() {
        let item = CatalogItem {
            id: 1,
            name: "Piso".to_string(),
            columns: HashMap::new(),
            raw_values: HashMap::new(),
        };
        assert_eq!(visit_day(&item, "visita"), DEFAULT_VISIT_DAY);
        let item = CatalogItem {
            id: 1,
            name: "Piso".to_string(),
            columns: HashMap::from([("visita".to_string(), "jueves 18:00".to_string())]),
            raw_values: HashMap::new(),
        };
        assert_eq!(visit_day(&item, "visita"), "jueves 18:00");
    }
}
