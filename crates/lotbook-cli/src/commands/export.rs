use std::path::Path;

use lotbook_core::export::{self, ExportFormat as CoreExportFormat};

use crate::cli::ExportFormat;
use crate::commands::common::open_store;
use crate::error::CliError;

impl From<ExportFormat> for CoreExportFormat {
    fn from(format: ExportFormat) -> Self {
        match format {
            ExportFormat::Csv => Self::Csv,
            ExportFormat::Json => Self::Json,
        }
    }
}

pub async fn run_export(
    sale_id: &str,
    format: ExportFormat,
    output_path: Option<&Path>,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let rendered = export::export_sale(&store, sale_id, format.into()).await?;

    if let Some(path) = output_path {
        std::fs::write(path, rendered)?;
        println!("{}", path.display());
    } else {
        print!("{rendered}");
    }

    Ok(())
}
