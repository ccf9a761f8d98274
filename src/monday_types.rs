use serde::{Deserialize, Serialize};

#[derive(Serialize)]
pub struct GraphqlRequest<'a> {
    pub query: &'a str,
    pub variables: serde_json::Value,
}

#[derive(Deserialize, Debug)]
pub struct GraphqlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphqlError>,
}

#[derive(Deserialize, Debug)]
pub struct GraphqlError {
    pub message: String,
}

#[derive(Deserialize, Debug)]
pub struct BoardsData {
    pub boards: Vec<Board>,
}

#[derive(Deserialize, Debug)]
pub struct Board {
    pub items_page: ItemsPage,
}

#[derive(Deserialize, Debug)]
pub struct NextPageData {
    pub next_items_page: ItemsPage,
}

#[derive(Deserialize, Debug)]
pub struct ItemsPage {
    pub cursor: Option<String>,
    pub items: Vec<RawItem>,
}

#[derive(Deserialize, Debug)]
pub struct RawItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub column_values: Vec<ColumnValue>,
}

/// `text` is Monday's display rendering of a column; `value` is the raw
/// column JSON (needed to dig asset ids out of file columns).
#[derive(Deserialize, Debug)]
pub struct ColumnValue {
    pub id: String,
    pub text: Option<String>,
    pub value: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct AssetsData {
    pub assets: Vec<Asset>,
}

#[allow(dead_code)]
#[derive(Deserialize, Debug)]
pub struct Asset {
    pub id: String,
    pub public_url: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct CreateSubitemData {
    pub create_subitem: CreatedItem,
}

#[derive(Deserialize, Debug)]
pub struct CreatedItem {
    pub id: String,
}
