pub fn wrap_twiml(twiml: String) -> String {
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>{twiml}")
}

mod twiml {
    use xmlserde_derives::XmlSerialize;

    #[derive(PartialEq, Eq, XmlSerialize)]
    #[xmlserde(root = b"Response")]
    pub struct Response {
        #[xmlserde(ty = "untag")]
        pub actions: Vec<ResponseAction>,
    }

    #[derive(PartialEq, Eq, XmlSerialize)]
    pub enum ResponseAction {
        #[xmlserde(name = b"Say")]
        Say(SayAction),
        #[xmlserde(name = b"Play")]
        Play(PlayAction),
        #[xmlserde(name = b"Gather")]
        Gather(GatherAction),
        #[xmlserde(name = b"Redirect")]
        Redirect(RedirectAction),
        #[xmlserde(name = b"Pause")]
        Pause(PauseAction),
        #[xmlserde(name = b"Hangup")]
        Hangup(HangupAction),
        #[xmlserde(name = b"Message")]
        Message(MessageAction),
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct SayAction {
        #[xmlserde(ty = "text")]
        pub text: String,
        #[xmlserde(name = b"voice", ty = "attr")]
        pub voice: Option<String>,
        #[xmlserde(name = b"loop", ty = "attr")]
        pub lp: Option<u16>,
        #[xmlserde(name = b"language", ty = "attr")]
        pub language: Option<String>,
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct PlayAction {
        #[xmlserde(ty = "text")]
        pub url: String,
        #[xmlserde(name = b"loop", ty = "attr")]
        pub lp: Option<u16>,
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct GatherAction {
        #[xmlserde(name = b"input", ty = "attr")]
        pub input: Option<String>,
        #[xmlserde(name = b"action", ty = "attr")]
        pub action: Option<String>,
        #[xmlserde(name = b"method", ty = "attr")]
        pub method: Option<String>,
        #[xmlserde(name = b"timeout", ty = "attr")]
        pub timeout: Option<u16>,
        #[xmlserde(name = b"numDigits", ty = "attr")]
        pub num_digits: Option<u16>,
        #[xmlserde(name = b"speechTimeout", ty = "attr")]
        pub speech_timeout: Option<String>,
        #[xmlserde(name = b"language", ty = "attr")]
        pub language: Option<String>,
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct RedirectAction {
        #[xmlserde(ty = "text")]
        pub url: String,
        #[xmlserde(name = b"method", ty = "attr")]
        pub method: Option<String>,
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct PauseAction {
        #[xmlserde(name = b"length", ty = "attr")]
        pub length: Option<u16>,
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct HangupAction {
        #[xmlserde(ty = "text")]
        pub text: String,
    }

    /// Reply body for the messaging webhook's MessagingResponse document.
    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct MessageAction {
        #[xmlserde(ty = "text")]
        pub body: String,
    }
}
pub use twiml::*;

mod webhook {
    use serde::Deserialize;

    /// Form-encoded POST Twilio sends when a call first hits the voice URL.
    #[allow(dead_code)]
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "PascalCase")]
    pub struct VoiceWebhookPayload {
        pub call_sid: String,
        pub from: String,
        pub to: String,
        #[serde(default)]
        pub call_status: Option<String>,
        #[serde(default)]
        pub from_city: Option<String>,
        #[serde(default)]
        pub from_country: Option<String>,
    }

    /// Callback for the Gather verb: either recognized speech, DTMF digits,
    /// or both fields absent when the gather timed out.
    #[allow(dead_code)]
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "PascalCase")]
    pub struct GatherPayload {
        pub call_sid: String,
        pub from: String,
        #[serde(default)]
        pub digits: Option<String>,
        #[serde(default)]
        pub speech_result: Option<String>,
        #[serde(default)]
        pub confidence: Option<String>,
    }

    /// Inbound WhatsApp/SMS webhook.  `from` carries a channel prefix for
    /// WhatsApp traffic (`whatsapp:+34...`).
    #[allow(dead_code)]
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "PascalCase")]
    pub struct MessageWebhookPayload {
        #[serde(default)]
        pub message_sid: Option<String>,
        pub from: String,
        #[serde(default)]
        pub body: Option<String>,
        #[serde(default)]
        pub profile_name: Option<String>,
    }
}
pub use webhook::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_twiml_has_play_gather_and_redirect() {
        let response = Response {
            actions: vec![
                ResponseAction::Play(PlayAction {
                    url: "https://example.com/audio/abc.mp3".to_string(),
                    ..Default::default()
                }),
                ResponseAction::Gather(GatherAction {
                    input: Some("speech dtmf".to_string()),
                    action: Some("/gather".to_string()),
                    timeout: Some(6),
                    num_digits: Some(1),
                    speech_timeout: Some("auto".to_string()),
                    language: Some("es-ES".to_string()),
                    ..Default::default()
                }),
                ResponseAction::Pause(PauseAction { length: Some(1) }),
                ResponseAction::Redirect(RedirectAction {
                    url: "/voice".to_string(),
                    method: None,
                }),
            ],
        };
        let twiml = wrap_twiml(xmlserde::xml_serialize(response));
        assert!(twiml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response>"));
        assert!(twiml.contains("https://example.com/audio/abc.mp3"));
        assert!(twiml.contains("action=\"/gather\""));
        assert!(twiml.contains("numDigits=\"1\""));
        assert!(twiml.contains("language=\"es-ES\""));
        assert!(twiml.contains("<Redirect>/voice</Redirect>"));
    }

    #[test]
    fn say_carries_language_attribute() {
        let response = Response {
            actions: vec![ResponseAction::Say(SayAction {
                text: "Hola".to_string(),
                language: Some("es-ES".to_string()),
                ..Default::default()
            })],
        };
        let twiml = xmlserde::xml_serialize(response);
        assert!(twiml.contains("language=\"es-ES\""));
        assert!(twiml.contains("Hola"));
    }

    #[test]
    fn messaging_response_wraps_body() {
        let response = Response {
            actions: vec![ResponseAction::Message(MessageAction {
                body: "Enviado".to_string(),
            })],
        };
        let twiml = xmlserde::xml_serialize(response);
        assert!(twiml.contains("<Message>Enviado</Message>"));
    }

    #[test]
    fn gather_payload_deserializes_from_form_body() {
        let body = "CallSid=CA123&From=%2B34600111222&SpeechResult=hola%20busco%20piso&Confidence=0.91&AccountSid=AC9";
        let payload = serde_urlencoded::from_str::<GatherPayload>(body).unwrap();
        assert_eq!(payload.call_sid, "CA123");
        assert_eq!(payload.from, "+34600111222");
        assert_eq!(payload.speech_result.as_deref(), Some("hola busco piso"));
        assert!(payload.digits.is_none());
    }

    #[test]
    fn whatsapp_payload_keeps_channel_prefix() {
        let body = "MessageSid=SM1&From=whatsapp%3A%2B34600111222&Body=hola";
        let payload = serde_urlencoded::from_str::<MessageWebhookPayload>(body).unwrap();
        assert_eq!(payload.from, "whatsapp:+34600111222");
        assert_eq!(payload.body.as_deref(), Some("hola"));
    }
}
