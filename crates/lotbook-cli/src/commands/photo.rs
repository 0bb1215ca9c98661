use std::path::Path;
use std::sync::Arc;

use lotbook_core::{
    ConnectivityMonitor, HttpRemote, MemoryRemote, PhotoReference, PhotoResolver, RemoteBackend,
    SyncSettings,
};
use serde::Serialize;

use crate::commands::common::{load_remote_config, open_store};
use crate::error::CliError;

#[derive(Debug, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
enum PhotoItem {
    Local { bytes: usize },
    Remote { url: String, expires_at: String },
    Unavailable,
}

impl From<Option<PhotoReference>> for PhotoItem {
    fn from(reference: Option<PhotoReference>) -> Self {
        match reference {
            Some(PhotoReference::Local(bytes)) => Self::Local { bytes: bytes.len() },
            Some(PhotoReference::Remote { url, expires_at }) => Self::Remote {
                url,
                expires_at: expires_at.to_rfc3339(),
            },
            None => Self::Unavailable,
        }
    }
}

pub async fn run_photo(
    photo_id: &str,
    as_json: bool,
    db_path: &Path,
    config_path: Option<&Path>,
) -> Result<(), CliError> {
    let store = open_store(db_path).await?;

    // Without a remote only the local blob store can answer.
    let (remote, connectivity): (Arc<dyn RemoteBackend>, _) = match load_remote_config(config_path)? {
        Some(config) => {
            let connectivity = ConnectivityMonitor::new(true);
            let remote = HttpRemote::new(config)?.with_connectivity(connectivity.clone());
            (Arc::new(remote), connectivity)
        }
        None => (Arc::new(MemoryRemote::new()), ConnectivityMonitor::new(false)),
    };

    let resolver = PhotoResolver::new(store, remote, connectivity, &SyncSettings::default());
    let item = PhotoItem::from(resolver.display_reference(photo_id).await?);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&item)?);
        return Ok(());
    }

    match item {
        PhotoItem::Local { bytes } => println!("local ({bytes} bytes)"),
        PhotoItem::Remote { url, expires_at } => println!("{url}\nexpires {expires_at}"),
        PhotoItem::Unavailable => println!("Photo {photo_id} is not available right now"),
    }
    Ok(())
}
