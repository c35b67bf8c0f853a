//! Per-article image loading with a disk tier and a network tier.
//!
//! Each article gets an [`ArticleAssets`] entry holding one slot per
//! [`ImageKind`]. A slot moves `Empty -> Pending -> Resolved`, optionally via
//! `DiskHit` when a cached copy was found on disk before the network answered.
//! `Unresolved` means neither tier produced an image; nothing retries it until
//! the next [`ArticleAssets::ensure_loaded`] call.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::article::{Article, ImageKind};
use crate::remote::{AssetError, DiskCache, ImageClient, ImageData, ObjectStorage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetState {
    Empty,
    Pending,
    /// Disk copy published while the network request is still running
    DiskHit(ImageData),
    Resolved(ImageData),
    Unresolved,
}

impl AssetState {
    pub fn image(&self) -> Option<&ImageData> {
        match self {
            AssetState::DiskHit(image) | AssetState::Resolved(image) => Some(image),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AssetState::Empty => "empty",
            AssetState::Pending => "pending",
            AssetState::DiskHit(_) => "disk_hit",
            AssetState::Resolved(_) => "resolved",
            AssetState::Unresolved => "unresolved",
        }
    }

    fn is_claimable(&self) -> bool {
        matches!(self, AssetState::Empty | AssetState::Unresolved)
    }

    /// No load is running for this slot.
    pub fn is_settled(&self) -> bool {
        !matches!(self, AssetState::Pending | AssetState::DiskHit(_))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AssetOptions {
    /// Stop after a disk hit instead of also asking the network
    pub skip_network_on_disk_hit: bool,
    /// Persist network downloads to the disk cache
    pub write_back: bool,
}

/// Collaborators shared by every asset entry.
pub struct AssetLoader {
    storage: Arc<dyn ObjectStorage>,
    http: Arc<dyn ImageClient>,
    disk: DiskCache,
    options: AssetOptions,
}

impl AssetLoader {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        http: Arc<dyn ImageClient>,
        disk: DiskCache,
        options: AssetOptions,
    ) -> Self {
        Self {
            storage,
            http,
            disk,
            options,
        }
    }

    async fn read_disk(&self, key: &str) -> Option<ImageData> {
        match self.disk.read(key).await {
            Ok(Some(bytes)) => match ImageData::decode(bytes) {
                Ok(image) => Some(image),
                Err(e) => {
                    debug!(key = key, error = %e, "Ignoring undecodable disk cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                debug!(key = key, error = %e, "Disk cache read failed");
                None
            }
        }
    }

    async fn download(&self, path: &str) -> Result<ImageData, AssetError> {
        let url = self.storage.resolve_download_url(path).await?;
        let bytes = self.http.get(&url).await?;
        ImageData::decode(bytes)
    }
}

/// Image state for one article.
pub struct ArticleAssets {
    id: String,
    category: String,
    hero: watch::Sender<AssetState>,
    body: watch::Sender<AssetState>,
    loader: Arc<AssetLoader>,
}

impl ArticleAssets {
    pub fn new(id: &str, category: &str, loader: Arc<AssetLoader>) -> Self {
        Self {
            id: id.to_string(),
            category: category.to_string(),
            hero: watch::Sender::new(AssetState::Empty),
            body: watch::Sender::new(AssetState::Empty),
            loader,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    fn slot(&self, kind: ImageKind) -> &watch::Sender<AssetState> {
        match kind {
            ImageKind::Hero => &self.hero,
            ImageKind::Body => &self.body,
        }
    }

    pub fn cache_key(&self, kind: ImageKind) -> String {
        format!("{}-{}", self.id, kind)
    }

    pub fn storage_path(&self, kind: ImageKind) -> String {
        format!("{}/{}/{}.jpg", self.category, self.id, kind)
    }

    pub fn state(&self, kind: ImageKind) -> AssetState {
        self.slot(kind).borrow().clone()
    }

    pub fn image(&self, kind: ImageKind) -> Option<ImageData> {
        self.slot(kind).borrow().image().cloned()
    }

    pub fn subscribe(&self, kind: ImageKind) -> watch::Receiver<AssetState> {
        self.slot(kind).subscribe()
    }

    /// Marks the slot pending if nothing is loaded or loading yet.
    fn claim(&self, kind: ImageKind) -> bool {
        self.slot(kind).send_if_modified(|state| {
            if state.is_claimable() {
                *state = AssetState::Pending;
                true
            } else {
                false
            }
        })
    }

    /// Start a background load of `kind` if the slot is free. The task only
    /// holds a weak reference, so dropping the entry discards its result.
    pub fn spawn_load(self: &Arc<Self>, kind: ImageKind) -> Option<JoinHandle<()>> {
        if !self.claim(kind) {
            return None;
        }
        Some(tokio::spawn(load(Arc::downgrade(self), kind)))
    }

    /// Load `kind` into memory unless it is already there, then wait for the
    /// slot to settle. The load runs in its own task, so a cancelled caller
    /// never leaves the slot stuck in `Pending`.
    pub async fn ensure_loaded(self: &Arc<Self>, kind: ImageKind) {
        let mut rx = self.subscribe(kind);
        if let Some(handle) = self.spawn_load(kind) {
            if let Err(e) = handle.await {
                warn!(id = %self.id, kind = %kind, error = %e, "Image load task failed");
                self.slot(kind).send_modify(settle_failed);
            }
            return;
        }
        let _ = rx.wait_for(AssetState::is_settled).await;
    }

    /// Start loading both images in the background.
    pub fn fetch_assets(self: &Arc<Self>) {
        for kind in ImageKind::ALL {
            self.spawn_load(kind);
        }
    }

    /// Write the in-memory image for `kind` to the disk cache.
    pub async fn save_to_disk(&self, kind: ImageKind) -> std::io::Result<bool> {
        let Some(image) = self.image(kind) else {
            return Ok(false);
        };
        self.loader
            .disk
            .write(&self.cache_key(kind), image.bytes())
            .await?;
        Ok(true)
    }
}

/// A failed load keeps a disk copy if one was published.
fn settle_failed(state: &mut AssetState) {
    *state = match std::mem::replace(state, AssetState::Unresolved) {
        AssetState::DiskHit(image) | AssetState::Resolved(image) => AssetState::Resolved(image),
        _ => AssetState::Unresolved,
    }
}

fn publish(entry: &Weak<ArticleAssets>, kind: ImageKind, update: impl FnOnce(&mut AssetState)) {
    match entry.upgrade() {
        Some(entry) => entry.slot(kind).send_modify(update),
        None => debug!(kind = %kind, "Asset entry dropped before load finished"),
    }
}

async fn load(entry: Weak<ArticleAssets>, kind: ImageKind) {
    let Some((loader, cache_key, path)) = entry.upgrade().map(|e| {
        (
            Arc::clone(&e.loader),
            e.cache_key(kind),
            e.storage_path(kind),
        )
    }) else {
        return;
    };

    if let Some(image) = loader.read_disk(&cache_key).await {
        debug!(key = %cache_key, "Disk cache hit");
        if loader.options.skip_network_on_disk_hit {
            publish(&entry, kind, |state| *state = AssetState::Resolved(image));
            return;
        }
        publish(&entry, kind, |state| *state = AssetState::DiskHit(image));
    }

    match loader.download(&path).await {
        Ok(image) => {
            if loader.options.write_back {
                if let Err(e) = loader.disk.write(&cache_key, image.bytes()).await {
                    debug!(key = %cache_key, error = %e, "Disk cache write failed");
                }
            }
            publish(&entry, kind, |state| *state = AssetState::Resolved(image));
        }
        Err(e) => {
            debug!(path = %path, error = %e, "Image download failed");
            publish(&entry, kind, settle_failed);
        }
    }
}

/// Asset entries keyed by article id.
pub struct AssetRegistry {
    entries: RwLock<HashMap<String, Arc<ArticleAssets>>>,
    loader: Arc<AssetLoader>,
}

impl AssetRegistry {
    pub fn new(loader: Arc<AssetLoader>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            loader,
        }
    }

    /// Upsert an entry. An existing entry for the same id and category is
    /// kept along with whatever it has loaded; a category change replaces it.
    pub async fn register(&self, id: &str, category: &str) -> Arc<ArticleAssets> {
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(id) {
            if existing.category == category {
                return Arc::clone(existing);
            }
            info!(id = id, category = category, "Article moved category, resetting assets");
        }
        let entry = Arc::new(ArticleAssets::new(id, category, Arc::clone(&self.loader)));
        entries.insert(id.to_string(), Arc::clone(&entry));
        entry
    }

    pub async fn register_all(&self, articles: &[Article]) {
        for article in articles {
            self.register(&article.id, &article.category).await;
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<ArticleAssets>> {
        self.entries.read().await.get(id).cloned()
    }

    pub async fn assets_for(&self, article: &Article) -> Option<Arc<ArticleAssets>> {
        self.get(&article.id).await
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
