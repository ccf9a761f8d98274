/// Failure kinds for a single webhook turn.
///
/// Nothing here ever reaches the caller as a structured error: the medium is
/// a live phone call or a chat thread, so handlers map the kind to a spoken
/// apology via [`AppError::apology`] and keep the conversation going.
#[derive(Debug)]
pub enum AppError {
    /// A credential or setting was absent at the point of use.
    MissingConfig(&'static str),
    /// A remote dependency failed: transport error, non-2xx, GraphQL errors.
    Upstream {
        service: &'static str,
        detail: String,
    },
    /// An inbound webhook body did not deserialize.
    BadPayload(&'static str),
    /// A referenced entity (catalog item, audio clip) does not exist.
    NotFound(&'static str),
}

impl AppError {
    pub fn upstream(service: &'static str, e: impl std::fmt::Display) -> Self {
        Self::Upstream {
            service,
            detail: e.to_string(),
        }
    }

    /// User-facing Spanish apology per failure kind.
    pub fn apology(&self) -> &'static str {
        match self {
            AppError::MissingConfig(_) => {
                "Ahora mismo no puedo atender esa gestión. Probemos de nuevo en un momento."
            }
            AppError::Upstream { .. } => {
                "Ha ocurrido un error procesando tu petición. ¿Puedes repetirlo?"
            }
            AppError::BadPayload(_) => "No te he entendido bien. ¿Puedes repetirlo?",
            AppError::NotFound(_) => {
                "No he encontrado lo que buscas. ¿Me das la referencia o la zona?"
            }
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AppError::MissingConfig(key) => write!(f, "{key} not configured"),
            AppError::Upstream { service, detail } => write!(f, "{service} error: {detail}"),
            AppError::BadPayload(what) => write!(f, "bad payload: {what}"),
            AppError::NotFound(what) => write!(f, "not found: {what}"),
        }
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_maps_to_an_apology() {
        let kinds = [
            AppError::MissingConfig("OPENAI_API_KEY"),
            AppError::upstream("monday", "boom"),
            AppError::BadPayload("gather"),
            AppError::NotFound("catalog item"),
        ];
        for kind in kinds {
            assert!(!kind.apology().is_empty());
        }
    }
}
