use crate::error::AppError;

use std::env;
use tracing::warn;

/// Column ids on the Monday board holding the property catalog.  Boards in
/// the wild disagree on naming, so every id is overridable from the
/// environment instead of shipping one binary per board layout.
#[derive(Clone, Debug)]
pub struct CatalogColumns {
    pub reference: String,
    pub price: String,
    pub address: String,
    pub locality: String,
    pub area: String,
    pub photos: String,
    pub visit_day: String,
    pub booking_phone: String,
    pub booking_email: String,
    pub booking_day: String,
}

impl Default for CatalogColumns {
    fn default() -> Self {
        Self {
            reference: "nolon".to_string(),
            price: "precio".to_string(),
            address: "direccion".to_string(),
            locality: "localidad".to_string(),
            area: "metros".to_string(),
            photos: "fotos".to_string(),
            visit_day: "visita".to_string(),
            booking_phone: "telefono".to_string(),
            booking_email: "email".to_string(),
            booking_day: "fecha".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MailMode {
    Json,
    Form,
}

/// Settings for the generic mail-sending HTTP API.  Field names are
/// configurable because the upstream contract is whatever the operator's
/// mail relay expects.
#[derive(Clone, Debug)]
pub struct MailConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    pub mode: MailMode,
    pub from_email: String,
    pub from_name: String,
    pub to_field: String,
    pub subject_field: String,
    pub html_field: String,
    pub from_field: String,
    pub name_field: String,
    pub extra_headers: Vec<(String, String)>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_phone_e164: Option<String>,
    pub messaging_service_sid: Option<String>,
    pub eleven_api_key: Option<String>,
    pub eleven_voice_id: String,
    pub monday_api_key: Option<String>,
    pub monday_api_url: String,
    pub monday_board_id: u64,
    pub mail: MailConfig,
    pub brand_name: String,
    pub ops_token: Option<String>,
    pub port: u16,
    pub columns: CatalogColumns,
    /// Minimum fuzzy score for the matcher to commit to an item.
    pub match_threshold: f64,
    pub session_ttl_secs: u64,
    pub audio_ttl_secs: u64,
    pub audio_capacity: usize,
}

impl Config {
    pub fn from_env() -> Self {
        let mail = MailConfig {
            url: env_opt("MAIL_API_URL"),
            token: env_opt("MAIL_API_TOKEN"),
            mode: match env_or("MAIL_API_MODE", "json").to_lowercase().as_str() {
                "form" => MailMode::Form,
                _ => MailMode::Json,
            },
            from_email: env_or("MAIL_FROM_EMAIL", "no-reply@agencia.example"),
            from_name: env_or("MAIL_FROM_NAME", "Inmobiliaria"),
            to_field: env_or("MAIL_API_TO_FIELD", "to"),
            subject_field: env_or("MAIL_API_SUBJ_FIELD", "subject"),
            html_field: env_or("MAIL_API_HTML_FIELD", "html"),
            from_field: env_or("MAIL_API_FROM_FIELD", "from"),
            name_field: env_or("MAIL_API_NAME_FIELD", "from_name"),
            extra_headers: parse_extra_headers(&env_or("MAIL_API_EXTRA_HEADERS", "")),
        };
        let columns = CatalogColumns {
            reference: env_or("CATALOG_REFERENCE_COLUMN", "nolon"),
            price: env_or("CATALOG_PRICE_COLUMN", "precio"),
            address: env_or("CATALOG_ADDRESS_COLUMN", "direccion"),
            locality: env_or("CATALOG_LOCALITY_COLUMN", "localidad"),
            area: env_or("CATALOG_AREA_COLUMN", "metros"),
            photos: env_or("CATALOG_PHOTOS_COLUMN", "fotos"),
            visit_day: env_or("CATALOG_VISIT_DAY_COLUMN", "visita"),
            booking_phone: env_or("BOOKING_PHONE_COLUMN", "telefono"),
            booking_email: env_or("BOOKING_EMAIL_COLUMN", "email"),
            booking_day: env_or("BOOKING_DAY_COLUMN", "fecha"),
        };

        Self {
            openai_api_key: env_opt("OPENAI_API_KEY"),
            openai_model: env_or("OPENAI_MODEL", "gpt-4o-mini"),
            twilio_account_sid: env_opt("TWILIO_ACCOUNT_SID"),
            twilio_auth_token: env_opt("TWILIO_AUTH_TOKEN"),
            twilio_phone_e164: env_opt("TWILIO_PHONE_E164"),
            messaging_service_sid: env_opt("MESSAGING_SERVICE_SID"),
            eleven_api_key: env_opt("ELEVEN_API_KEY"),
            eleven_voice_id: env_or("ELEVEN_VOICE_ID", "21m00Tcm4TlvDq8ikWAM"),
            monday_api_key: env_opt("MONDAY_API_KEY"),
            monday_api_url: env_or("MONDAY_API_URL", "https://api.monday.com/v2"),
            monday_board_id: env_parse("MONDAY_BOARD_ID", 0),
            mail,
            brand_name: env_or("BRAND_NAME", "Inmobiliaria"),
            ops_token: env_opt("OPS_TOKEN"),
            port: env_parse("PORT", 3000),
            columns,
            match_threshold: env_parse("MATCH_THRESHOLD", 2.0),
            session_ttl_secs: env_parse("SESSION_TTL_SECS", 1800),
            audio_ttl_secs: env_parse("AUDIO_TTL_SECS", 900),
            audio_capacity: env_parse("AUDIO_CAPACITY", 256),
        }
    }

    // Secrets may legitimately be absent: the accessor turns absence into a
    // typed error at the point of use, which handlers degrade to an apology.

    pub fn openai_key(&self) -> Result<&str, AppError> {
        self.openai_api_key
            .as_deref()
            .ok_or(AppError::MissingConfig("OPENAI_API_KEY"))
    }

    pub fn twilio_auth(&self) -> Result<(&str, &str), AppError> {
        let sid = self
            .twilio_account_sid
            .as_deref()
            .ok_or(AppError::MissingConfig("TWILIO_ACCOUNT_SID"))?;
        let token = self
            .twilio_auth_token
            .as_deref()
            .ok_or(AppError::MissingConfig("TWILIO_AUTH_TOKEN"))?;
        Ok((sid, token))
    }

    pub fn twilio_from(&self) -> Result<&str, AppError> {
        self.twilio_phone_e164
            .as_deref()
            .ok_or(AppError::MissingConfig("TWILIO_PHONE_E164"))
    }

    pub fn eleven_key(&self) -> Result<&str, AppError> {
        self.eleven_api_key
            .as_deref()
            .ok_or(AppError::MissingConfig("ELEVEN_API_KEY"))
    }

    pub fn monday_key(&self) -> Result<&str, AppError> {
        self.monday_api_key
            .as_deref()
            .ok_or(AppError::MissingConfig("MONDAY_API_KEY"))
    }

    pub fn mail_url(&self) -> Result<&str, AppError> {
        self.mail
            .url
            .as_deref()
            .ok_or(AppError::MissingConfig("MAIL_API_URL"))
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or(default),
        Err(_) => default,
    }
}

/// MAIL_API_EXTRA_HEADERS carries a JSON object, e.g. `{"X-Tenant":"gca"}`.
/// Anything unparseable is dropped with a warning rather than failing boot.
fn parse_extra_headers(raw: &str) -> Vec<(String, String)> {
    if raw.is_empty() {
        return vec![];
    }
    match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(raw) {
        Ok(map) => map
            .into_iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
            .collect(),
        Err(e) => {
            warn!(error=%e, "ignoring unparseable MAIL_API_EXTRA_HEADERS");
            vec![]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_headers_parse_string_values_only() {
        let headers = parse_extra_headers(r#"{"X-Tenant":"gca","X-Num":7}"#);
        assert_eq!(headers, vec![("X-Tenant".to_string(), "gca".to_string())]);
    }

    #[test]
    fn extra_headers_tolerate_garbage() {
        assert!(parse_extra_headers("not json").is_empty());
        assert!(parse_extra_headers("").is_empty());
    }
}
