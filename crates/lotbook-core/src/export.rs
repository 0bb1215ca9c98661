//! Marketplace export of a sale's lots.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{IndexKey, Lot, Photo};
use crate::services::LocalStore;
use crate::{Error, Result};

/// Export output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

/// One exported row. Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportLot {
    pub lot_number: String,
    pub title: String,
    pub description: Option<String>,
    pub estimate_low: Option<f64>,
    pub estimate_high: Option<f64>,
    pub starting_bid: Option<f64>,
    pub primary_photo: Option<String>,
}

/// Convert a lot and its primary photo path into an export row.
#[must_use]
pub fn lot_to_export_item(lot: &Lot, primary_photo: Option<&str>) -> ExportLot {
    ExportLot {
        lot_number: lot.lot_number.clone(),
        title: lot.title.clone(),
        description: lot.description.clone(),
        estimate_low: lot.estimate_low,
        estimate_high: lot.estimate_high,
        starting_bid: lot.starting_bid,
        primary_photo: primary_photo.map(ToString::to_string),
    }
}

fn export_items(lots: &[Lot], photos: &[Photo]) -> Vec<ExportLot> {
    let primaries: HashMap<&str, &str> = photos
        .iter()
        .filter(|photo| photo.is_primary)
        .map(|photo| (photo.lot_id.as_str(), photo.file_path.as_str()))
        .collect();

    let mut sorted: Vec<&Lot> = lots.iter().collect();
    sorted.sort_by_key(|lot| lot.sort_key());
    sorted
        .into_iter()
        .map(|lot| lot_to_export_item(lot, primaries.get(lot.id.as_str()).copied()))
        .collect()
}

/// Render lots as CSV ordered by lot number.
pub fn render_lots_csv(lots: &[Lot], photos: &[Photo]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for item in export_items(lots, photos) {
        writer.serialize(item)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|error| Error::Io(error.into_error()))?;
    String::from_utf8(bytes).map_err(|error| Error::InvalidInput(error.to_string()))
}

/// Render lots as pretty-printed JSON ordered by lot number.
pub fn render_lots_json(lots: &[Lot], photos: &[Photo]) -> Result<String> {
    Ok(serde_json::to_string_pretty(&export_items(lots, photos))?)
}

/// Export every lot of a sale from the local store.
pub async fn export_sale(store: &LocalStore, sale_id: &str, format: ExportFormat) -> Result<String> {
    let lots: Vec<Lot> = store.get_all_by_index(IndexKey::SaleId, sale_id).await?;
    let mut photos = Vec::new();
    for lot in &lots {
        let lot_photos: Vec<Photo> = store
            .get_all_by_index(IndexKey::LotId, lot.id.as_str())
            .await?;
        photos.extend(lot_photos.into_iter().filter(|photo| photo.is_primary));
    }

    match format {
        ExportFormat::Csv => render_lots_csv(&lots, &photos),
        ExportFormat::Json => render_lots_json(&lots, &photos),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn lot(id: &str, number: &str, title: &str) -> Lot {
        serde_json::from_value(json!({
            "id": id,
            "sale_id": "s1",
            "lot_number": number,
            "title": title,
            "estimate_low": 100.0,
            "estimate_high": 150.0,
        }))
        .unwrap()
    }

    #[test]
    fn csv_orders_lots_and_includes_primary_photo() {
        let lots = vec![lot("a", "10", "Mirror"), lot("b", "2", "Desk, oak")];
        let mut photo = Photo::new_local("b", "lots/b/front.jpg");
        photo.is_primary = true;

        let csv = render_lots_csv(&lots, &[photo]).unwrap();
        assert_eq!(
            csv,
            "lot_number,title,description,estimate_low,estimate_high,starting_bid,primary_photo\n\
             2,\"Desk, oak\",,100.0,150.0,,lots/b/front.jpg\n\
             10,Mirror,,100.0,150.0,,\n"
        );
    }

    #[test]
    fn json_export_is_pretty_printed() {
        let json = render_lots_json(&[lot("a", "1", "Vase")], &[]).unwrap();
        assert!(json.contains("\n  {"));
        assert!(json.contains("\"primary_photo\": null"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn export_sale_reads_local_store() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store
            .upsert_many(&[lot("a", "1", "Vase"), lot("b", "2", "Lamp")])
            .await
            .unwrap();

        let csv = export_sale(&store, "s1", ExportFormat::Csv).await.unwrap();
        assert_eq!(csv.lines().count(), 3);
        assert_eq!(ExportFormat::Csv.extension(), "csv");
    }
}
