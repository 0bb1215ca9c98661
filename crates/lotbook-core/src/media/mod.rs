//! Photo access: local blobs first, then cached or freshly signed remote references.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};

use crate::config::SyncSettings;
use crate::connectivity::ConnectivityMonitor;
use crate::models::{Entity, Photo};
use crate::remote::RemoteBackend;
use crate::services::LocalStore;
use crate::{Error, Result};

/// Where a photo can be displayed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoReference {
    /// Bytes already in the local blob store
    Local(Arc<[u8]>),
    /// Time-limited remote URL
    Remote {
        url: String,
        expires_at: DateTime<Utc>,
    },
}

impl PhotoReference {
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

#[derive(Debug, Clone)]
struct CachedReference {
    url: String,
    expires_at: DateTime<Utc>,
    cached_until: DateTime<Utc>,
}

type SharedLookup = Shared<BoxFuture<'static, Option<PhotoReference>>>;

struct ResolverInner {
    store: LocalStore,
    remote: Arc<dyn RemoteBackend>,
    connectivity: ConnectivityMonitor,
    signed_ttl: Duration,
    cache_ttl: Duration,
    cache: Mutex<HashMap<String, CachedReference>>,
    in_flight: Mutex<HashMap<String, SharedLookup>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Resolves a photo id to something displayable.
///
/// Lookup order: local blob, cached remote reference, freshly signed remote
/// reference. Concurrent lookups for the same photo share one remote request.
#[derive(Clone)]
pub struct PhotoResolver {
    inner: Arc<ResolverInner>,
}

impl PhotoResolver {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteBackend>,
        connectivity: ConnectivityMonitor,
        settings: &SyncSettings,
    ) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                store,
                remote,
                connectivity,
                signed_ttl: settings.signed_reference_ttl,
                cache_ttl: settings.reference_cache_ttl,
                cache: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Resolve `photo_id`, or `None` when it cannot be displayed right now.
    ///
    /// Remote failures are logged and yield `None`; only local store failures
    /// are returned as errors.
    pub async fn display_reference(&self, photo_id: &str) -> Result<Option<PhotoReference>> {
        if let Some(bytes) = self.inner.store.get_blob(photo_id).await? {
            return Ok(Some(PhotoReference::Local(bytes.into())));
        }

        if let Some(reference) = self.cached(photo_id) {
            return Ok(Some(reference));
        }

        let Some(photo) = self.inner.store.get::<Photo>(photo_id).await? else {
            tracing::debug!(photo_id, "Photo metadata not in local store");
            return Ok(None);
        };

        if !self.inner.connectivity.is_online() {
            return Ok(None);
        }

        let lookup = {
            let mut in_flight = lock(&self.inner.in_flight);
            if let Some(existing) = in_flight.get(photo_id) {
                existing.clone()
            } else {
                let inner = Arc::clone(&self.inner);
                let id = photo_id.to_string();
                let lookup = async move {
                    let result = inner.request_reference(&photo).await;
                    lock(&inner.in_flight).remove(&id);
                    result
                }
                .boxed()
                .shared();
                in_flight.insert(photo_id.to_string(), lookup.clone());
                lookup
            }
        };

        Ok(lookup.await)
    }

    /// Drop the cached reference for one photo.
    pub fn invalidate(&self, photo_id: &str) {
        lock(&self.inner.cache).remove(photo_id);
    }

    pub fn clear_cache(&self) {
        lock(&self.inner.cache).clear();
    }

    /// Upload a locally captured photo: blob first, then metadata.
    pub async fn upload_photo(&self, photo: &Photo) -> Result<Photo> {
        upload_photo(&self.inner.store, self.inner.remote.as_ref(), photo).await
    }

    fn cached(&self, photo_id: &str) -> Option<PhotoReference> {
        let mut cache = lock(&self.inner.cache);
        let entry = cache.get(photo_id)?;
        if entry.cached_until > Utc::now() {
            return Some(PhotoReference::Remote {
                url: entry.url.clone(),
                expires_at: entry.expires_at,
            });
        }
        cache.remove(photo_id);
        None
    }
}

impl ResolverInner {
    async fn request_reference(self: &Arc<Self>, photo: &Photo) -> Option<PhotoReference> {
        let reference = match self
            .remote
            .blob_reference(&photo.file_path, self.signed_ttl.as_secs())
            .await
        {
            Ok(reference) => reference,
            Err(error) => {
                tracing::warn!(photo_id = %photo.id, %error, "Failed to sign photo reference");
                return None;
            }
        };

        let cached_until = (Utc::now() + to_chrono(self.cache_ttl)).min(reference.expires_at);
        lock(&self.cache).insert(
            photo.id.clone(),
            CachedReference {
                url: reference.url.clone(),
                expires_at: reference.expires_at,
                cached_until,
            },
        );

        self.spawn_background_download(photo.clone());

        Some(PhotoReference::Remote {
            url: reference.url,
            expires_at: reference.expires_at,
        })
    }

    fn spawn_background_download(self: &Arc<Self>, photo: Photo) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(error) = inner.download_into_store(&photo).await {
                tracing::debug!(photo_id = %photo.id, %error, "Background photo download failed");
            }
        });
    }

    async fn download_into_store(&self, photo: &Photo) -> Result<()> {
        let bytes = self.remote.download_blob(&photo.file_path).await?;
        self.store.put_blob(&photo.id, &bytes).await?;
        self.store.mark_photo_synced(&photo.id).await?;
        Ok(())
    }
}

/// Upload a photo's blob, then its metadata, then mark it synced locally.
pub(crate) async fn upload_photo(
    store: &LocalStore,
    remote: &dyn RemoteBackend,
    photo: &Photo,
) -> Result<Photo> {
    let bytes = store
        .get_blob(&photo.id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("blob for photo {}", photo.id)))?;
    remote.upload_blob(&photo.file_path, bytes).await?;
    remote.upsert_entity(Photo::TABLE, &photo.to_remote()?).await?;
    store.mark_photo_synced(&photo.id).await?;

    let mut uploaded = photo.clone();
    uploaded.synced = true;
    Ok(uploaded)
}
