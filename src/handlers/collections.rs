use axum::{Json, extract::Path, response::IntoResponse};
use serde_json::{Map, Value, json};

use crate::collections::{self, COLLECTIONS};
use crate::error::DownloadError;

pub async fn collections_handler() -> impl IntoResponse {
    let collections: Vec<_> = COLLECTIONS.iter().map(|c| c.summary()).collect();
    Json(json!({ "collections": collections }))
}

pub async fn collection_assets_handler(Path(collection_id): Path<String>) -> Result<Json<Value>, DownloadError> {
    let collection = collections::find(&collection_id)
        .ok_or_else(|| DownloadError::AssetNotFound(format!("collection '{}' not found", collection_id)))?;

    let assets: Map<String, Value> = collection
        .assets
        .iter()
        .map(|(key, description)| (key.to_string(), Value::from(*description)))
        .collect();

    Ok(Json(json!({
        "collection_id": collection.id,
        "name": collection.name,
        "assets": assets,
    })))
}
