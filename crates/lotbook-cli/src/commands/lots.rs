use std::path::Path;

use crate::commands::common::{
    format_lot_lines, list_sale_lots, lot_to_list_item, open_store, LotListItem,
};
use crate::error::CliError;

pub async fn run_lots(sale_id: &str, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let entries = list_sale_lots(&store, sale_id).await?;

    if as_json {
        let json_items = entries
            .iter()
            .map(|(lot, photos)| lot_to_list_item(lot, photos))
            .collect::<Vec<LotListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No lots cached for sale {sale_id}. Run `lotbook sync pull` first.");
        return Ok(());
    }

    for line in format_lot_lines(&entries) {
        println!("{line}");
    }
    Ok(())
}
