use crate::config::CatalogColumns;
use crate::consts::{CATALOG_MAX_ITEMS, MAX_PHOTO_MESSAGES};
use crate::error::AppError;
use crate::monday_types::{
    AssetsData, BoardsData, CreateSubitemData, GraphqlRequest, GraphqlResponse, NextPageData,
    RawItem,
};
use crate::session::ContactDraft;
use crate::types::AppState;

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Local view of a Monday board row: display text per column id, plus the
/// raw column JSON for the columns that need it (file attachments).
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogItem {
    pub id: u64,
    pub name: String,
    pub columns: HashMap<String, String>,
    pub raw_values: HashMap<String, String>,
}

impl CatalogItem {
    pub fn text(&self, column: &str) -> &str {
        self.columns.get(column).map(String::as_str).unwrap_or("")
    }

    fn from_raw(raw: RawItem) -> Option<Self> {
        let id = match raw.id.parse() {
            Ok(id) => id,
            Err(_) => {
                warn!(id=%raw.id, "skipping catalog item with non-numeric id");
                return None;
            }
        };
        let mut columns = HashMap::new();
        let mut raw_values = HashMap::new();
        for cv in raw.column_values {
            if let Some(value) = cv.value {
                raw_values.insert(cv.id.clone(), value);
            }
            columns.insert(cv.id, cv.text.unwrap_or_default());
        }
        Some(Self {
            id,
            name: raw.name,
            columns,
            raw_values,
        })
    }
}

const FIRST_PAGE_QUERY: &str = "\
query ($board: [ID!], $limit: Int!) {
  boards (ids: $board) {
    items_page (limit: $limit) {
      cursor
      items { id name column_values { id text value } }
    }
  }
}";

const NEXT_PAGE_QUERY: &str = "\
query ($cursor: String!, $limit: Int!) {
  next_items_page (cursor: $cursor, limit: $limit) {
    cursor
    items { id name column_values { id text value } }
  }
}";

const ASSETS_QUERY: &str = "\
query ($ids: [ID!]!) {
  assets (ids: $ids) { id public_url }
}";

const CREATE_SUBITEM_MUTATION: &str = "\
mutation ($parent: ID!, $name: String!, $values: JSON) {
  create_subitem (parent_item_id: $parent, item_name: $name, column_values: $values) { id }
}";

async fn query<T: DeserializeOwned>(
    state: &AppState,
    query: &str,
    variables: serde_json::Value,
) -> Result<T, AppError> {
    let key = state.config.monday_key()?;
    let resp = state
        .http_client
        .post(&state.config.monday_api_url)
        .header(reqwest::header::AUTHORIZATION, key)
        .json(&GraphqlRequest { query, variables })
        .send()
        .await
        .map_err(|e| AppError::upstream("monday", e))?;
    let envelope = resp
        .json::<GraphqlResponse<T>>()
        .await
        .map_err(|e| AppError::upstream("monday", e))?;
    if let Some(err) = envelope.errors.first() {
        return Err(AppError::Upstream {
            service: "monday",
            detail: err.message.clone(),
        });
    }
    envelope.data.ok_or(AppError::Upstream {
        service: "monday",
        detail: "response carried no data".to_string(),
    })
}

/// Pull the catalog board, following the pagination cursor up to
/// [`CATALOG_MAX_ITEMS`] rows.  An empty board yields an empty vec.
pub async fn fetch_items(state: &AppState) -> Result<Vec<CatalogItem>, AppError> {
    let board_id = state.config.monday_board_id;
    if board_id == 0 {
        return Err(AppError::MissingConfig("MONDAY_BOARD_ID"));
    }
    let limit = crate::consts::CATALOG_PAGE_SIZE;
    let first: BoardsData = query(
        state,
        FIRST_PAGE_QUERY,
        serde_json::json!({ "board": [board_id.to_string()], "limit": limit }),
    )
    .await?;
    let mut page = match first.boards.into_iter().next() {
        Some(board) => board.items_page,
        None => return Ok(vec![]),
    };

    let mut items: Vec<CatalogItem> = vec![];
    loop {
        items.extend(page.items.into_iter().filter_map(CatalogItem::from_raw));
        let cursor = match page.cursor {
            Some(c) if items.len() < CATALOG_MAX_ITEMS => c,
            _ => break,
        };
        let next: NextPageData = query(
            state,
            NEXT_PAGE_QUERY,
            serde_json::json!({ "cursor": cursor, "limit": limit }),
        )
        .await?;
        page = next.next_items_page;
    }
    items.truncate(CATALOG_MAX_ITEMS);
    debug!(count = items.len(), "fetched catalog items");
    Ok(items)
}

/// Asset ids referenced by a file column's raw value, e.g.
/// `{"files":[{"assetId":123,...}]}`.  Ids arrive as numbers or strings
/// depending on API version.
pub fn asset_ids_from_value(raw: &str) -> Vec<String> {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => return vec![],
    };
    let files = match value.get("files").and_then(|f| f.as_array()) {
        Some(files) => files,
        None => return vec![],
    };
    files
        .iter()
        .filter_map(|f| f.get("assetId"))
        .filter_map(|id| match id {
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::String(s) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

/// Resolve the item's photo attachments to downloadable URLs, capped at
/// [`MAX_PHOTO_MESSAGES`].
pub async fn photo_urls(state: &AppState, item: &CatalogItem) -> Result<Vec<String>, AppError> {
    let raw = match item.raw_values.get(&state.config.columns.photos) {
        Some(raw) => raw,
        None => return Ok(vec![]),
    };
    let ids = asset_ids_from_value(raw);
    if ids.is_empty() {
        return Ok(vec![]);
    }
    let data: AssetsData = query(state, ASSETS_QUERY, serde_json::json!({ "ids": ids })).await?;
    Ok(data
        .assets
        .into_iter()
        .filter_map(|a| a.public_url)
        .take(MAX_PHOTO_MESSAGES)
        .collect())
}

/// Create the booking sub-record under a catalog item.  Write-only: nothing
/// about the subitem is kept locally beyond the returned id.
pub async fn create_booking(
    state: &AppState,
    item_id: u64,
    contact: &ContactDraft,
    visit_day: &str,
) -> Result<String, AppError> {
    let cols = &state.config.columns;
    let mut values = serde_json::Map::new();
    if let Some(phone) = &contact.phone {
        values.insert(cols.booking_phone.clone(), serde_json::json!(phone));
    }
    if let Some(email) = &contact.email {
        values.insert(cols.booking_email.clone(), serde_json::json!(email));
    }
    values.insert(cols.booking_day.clone(), serde_json::json!(visit_day));
    let item_name = match &contact.name {
        Some(name) => format!("Visita - {name}"),
        None => format!(
            "Visita - {}",
            contact.phone.as_deref().or(contact.email.as_deref()).unwrap_or("sin contacto")
        ),
    };
    // Monday expects column_values as a JSON-encoded string
    let values = serde_json::Value::Object(values).to_string();
    let data: CreateSubitemData = query(
        state,
        CREATE_SUBITEM_MUTATION,
        serde_json::json!({
            "parent": item_id.to_string(),
            "name": item_name,
            "values": values,
        }),
    )
    .await?;
    Ok(data.create_subitem.id)
}

/// One-line-per-field card for a property, used both spoken and in WhatsApp
/// messages.
pub fn property_summary(item: &CatalogItem, cols: &CatalogColumns) -> String {
    fn or_dash(s: &str) -> &str {
        if s.is_empty() {
            "—"
        } else {
            s
        }
    }
    format!(
        "{}\nDirección: {}\nPrecio: {}\nSuperficie: {} m²\nReferencia: {}",
        item.name,
        or_dash(item.text(&cols.address)),
        or_dash(item.text(&cols.price)),
        or_dash(item.text(&cols.area)),
        or_dash(item.text(&cols.reference)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_item_converts_with_columns() {
        let raw: RawItem = serde_json::from_str(
            r#"{
                "id": "987",
                "name": "Ático Rambla",
                "column_values": [
                    {"id": "precio", "text": "310.000 €", "value": null},
                    {"id": "fotos", "text": "2 files", "value": "{\"files\":[{\"assetId\":11},{\"assetId\":\"22\"}]}"}
                ]
            }"#,
        )
        .unwrap();
        let item = CatalogItem::from_raw(raw).unwrap();
        assert_eq!(item.id, 987);
        assert_eq!(item.text("precio"), "310.000 €");
        assert_eq!(item.text("missing"), "");
        assert_eq!(
            asset_ids_from_value(item.raw_values.get("fotos").unwrap()),
            vec!["11".to_string(), "22".to_string()]
        );
    }

    #[test]
    fn non_numeric_item_ids_are_skipped() {
        let raw: RawItem =
            serde_json::from_str(r#"{"id": "abc", "name": "x", "column_values": []}"#).unwrap();
        assert!(CatalogItem::from_raw(raw).is_none());
    }

    #[test]
    fn asset_ids_tolerate_malformed_values() {
        assert!(asset_ids_from_value("not json").is_empty());
        assert!(asset_ids_from_value("{}").is_empty());
        assert!(asset_ids_from_value(r#"{"files":[{"name":"a.jpg"}]}"#).is_empty());
    }

    #[test]
    fn summary_dashes_out_missing_fields() {
        let item = CatalogItem {
            id: 1,
            name: "Piso Centro".to_string(),
            columns: HashMap::from([("precio".to_string(), "250.000 €".to_string())]),
            raw_values: HashMap::new(),
        };
        let summary = property_summary(&item, &CatalogColumns::default());
        assert!(summary.contains("Piso Centro"));
        assert!(summary.contains("Precio: 250.000 €"));
        assert!(summary.contains("Dirección: —"));
    }

    #[test]
    fn graphql_errors_deserialize() {
        let envelope: GraphqlResponse<BoardsData> = serde_json::from_str(
            r#"{"errors":[{"message":"rate limited"}]}"#,
        )
        .unwrap();
        assert!(envelope.data.is_none());
        assert_eq!(envelope.errors[0].message, "rate limited");
    }
}
