//! In-process render host that keeps textures as plain pixel buffers.
//!
//! Useful for headless previews and for exercising the pipeline without a
//! GPU: every material mutation and texture disposal is observable.
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use anyhow::anyhow;
use futures::future::BoxFuture;
use screen_config::CreationStrategy;
use tokio::sync::{Notify, Semaphore, watch};
use tracing::{debug, warn};

use crate::error::HostError;
use crate::host::RenderHost;
use crate::material::{SceneNode, ScreenMaterial};
use crate::texture::TextureSource;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct TextureRecord {
    id: u64,
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
    strategy: CreationStrategy,
    disposed: AtomicBool,
}

/// Handle to a texture owned by a [`MemoryHost`].
#[derive(Debug, Clone)]
pub struct MemoryTexture {
    record: Arc<TextureRecord>,
}

impl MemoryTexture {
    pub fn id(&self) -> u64 {
        self.record.id
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.record.width, self.record.height)
    }

    pub fn pixels(&self) -> &Arc<[u8]> {
        &self.record.pixels
    }

    /// Strategy whose source produced this texture.
    pub fn strategy(&self) -> CreationStrategy {
        self.record.strategy
    }

    pub fn is_disposed(&self) -> bool {
        self.record.disposed.load(Ordering::SeqCst)
    }
}

impl PartialEq for MemoryTexture {
    fn eq(&self, other: &Self) -> bool {
        self.record.id == other.record.id
    }
}

impl Eq for MemoryTexture {}

/// Observable slot values of a [`MemoryMaterial`].
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialState {
    pub base_color_texture: Option<MemoryTexture>,
    pub base_color_factor: [f32; 4],
    pub emissive_texture: Option<MemoryTexture>,
    pub emissive_factor: [f32; 3],
    /// Number of setter calls so far.
    pub mutations: u64,
}

impl Default for MaterialState {
    fn default() -> Self {
        Self {
            base_color_texture: None,
            base_color_factor: [1.0, 1.0, 1.0, 1.0],
            emissive_texture: None,
            emissive_factor: [0.0, 0.0, 0.0],
            mutations: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryMaterial {
    name: Arc<str>,
    state: Arc<Mutex<MaterialState>>,
}

impl MemoryMaterial {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            state: Arc::default(),
        }
    }

    pub fn state(&self) -> MaterialState {
        lock(&self.state).clone()
    }

    /// Whether both handles refer to the same material.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    fn mutate(&self, f: impl FnOnce(&mut MaterialState)) {
        let mut state = lock(&self.state);
        f(&mut state);
        state.mutations += 1;
    }
}

impl ScreenMaterial for MemoryMaterial {
    type Texture = MemoryTexture;

    fn name(&self) -> &str {
        &self.name
    }

    fn set_base_color_texture(&self, texture: Option<&MemoryTexture>) {
        self.mutate(|s| s.base_color_texture = texture.cloned());
    }

    fn set_base_color_factor(&self, rgba: [f32; 4]) {
        self.mutate(|s| s.base_color_factor = rgba);
    }

    fn set_emissive_texture(&self, texture: Option<&MemoryTexture>) {
        self.mutate(|s| s.emissive_texture = texture.cloned());
    }

    fn set_emissive_factor(&self, rgb: [f32; 3]) {
        self.mutate(|s| s.emissive_factor = rgb);
    }
}

/// Counters kept by a [`MemoryHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryHostStats {
    pub created: u64,
    pub disposed: u64,
    /// Dispose calls for textures that were already disposed.
    pub double_disposed: u64,
}

impl MemoryHostStats {
    pub fn live(&self) -> u64 {
        self.created.saturating_sub(self.disposed)
    }
}

/// Holds texture creations until released; see [`MemoryHost::hold_creations`].
#[derive(Debug, Clone)]
pub struct CreationGate {
    entered: Arc<Notify>,
    permits: Arc<Semaphore>,
}

impl CreationGate {
    fn new() -> Self {
        Self {
            entered: Arc::new(Notify::new()),
            permits: Arc::new(Semaphore::new(0)),
        }
    }

    /// Resolves once a creation is waiting at the gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let `creations` waiting (or future) creations through.
    pub fn release(&self, creations: usize) {
        self.permits.add_permits(creations);
    }

    fn open(&self) {
        self.permits.close();
    }

    async fn pass(&self) {
        self.entered.notify_one();
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }
}

#[derive(Debug, Default)]
struct CreationPolicy {
    rejected: HashSet<CreationStrategy>,
    successes_left: Option<u64>,
}

pub struct MemoryHost {
    scene: RwLock<Option<Arc<SceneNode<MemoryMaterial>>>>,
    ready: watch::Sender<bool>,
    policy: Mutex<CreationPolicy>,
    gate: Mutex<Option<CreationGate>>,
    next_id: AtomicU64,
    created: AtomicU64,
    disposed: AtomicU64,
    double_disposed: AtomicU64,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    /// A ready host with no scene loaded.
    pub fn new() -> Self {
        let (ready, _) = watch::channel(true);
        Self {
            scene: RwLock::new(None),
            ready,
            policy: Mutex::default(),
            gate: Mutex::new(None),
            next_id: AtomicU64::new(1),
            created: AtomicU64::new(0),
            disposed: AtomicU64::new(0),
            double_disposed: AtomicU64::new(0),
        }
    }

    pub fn with_scene(scene: SceneNode<MemoryMaterial>) -> Self {
        let host = Self::new();
        host.load_scene(scene);
        host
    }

    pub fn load_scene(&self, scene: SceneNode<MemoryMaterial>) {
        *self.scene.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(scene));
    }

    pub fn unload_scene(&self) {
        *self.scene.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.send_replace(ready);
    }

    /// Refuse every future creation that uses `strategy`.
    pub fn reject_strategy(&self, strategy: CreationStrategy) {
        lock(&self.policy).rejected.insert(strategy);
    }

    pub fn accept_all_strategies(&self) {
        let mut policy = lock(&self.policy);
        policy.rejected.clear();
        policy.successes_left = None;
    }

    /// Allow `successes` more creations, then reject everything.
    pub fn fail_after(&self, successes: u64) {
        lock(&self.policy).successes_left = Some(successes);
    }

    /// Make subsequent creations wait at a gate controlled by the caller.
    pub fn hold_creations(&self) -> CreationGate {
        let gate = CreationGate::new();
        if let Some(previous) = lock(&self.gate).replace(gate.clone()) {
            previous.open();
        }
        gate
    }

    /// Remove the gate and let anything waiting at it through.
    pub fn open_creations(&self) {
        if let Some(gate) = lock(&self.gate).take() {
            gate.open();
        }
    }

    pub fn stats(&self) -> MemoryHostStats {
        MemoryHostStats {
            created: self.created.load(Ordering::SeqCst),
            disposed: self.disposed.load(Ordering::SeqCst),
            double_disposed: self.double_disposed.load(Ordering::SeqCst),
        }
    }

    fn admit(&self, strategy: CreationStrategy) -> Result<(), HostError> {
        let mut policy = lock(&self.policy);
        if policy.rejected.contains(&strategy) {
            return Err(HostError::Rejected(anyhow!(
                "{} uploads are disabled",
                strategy.as_str()
            )));
        }
        match policy.successes_left.as_mut() {
            Some(0) => Err(HostError::Rejected(anyhow!("texture memory exhausted"))),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl RenderHost for MemoryHost {
    type Texture = MemoryTexture;
    type Material = MemoryMaterial;
    type Scene = Arc<SceneNode<MemoryMaterial>>;

    fn resolve_scene_root(&self) -> Option<Self::Scene> {
        self.scene
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    fn ready(&self) -> BoxFuture<'_, ()> {
        let mut rx = self.ready.subscribe();
        Box::pin(async move {
            let _ = rx.wait_for(|ready| *ready).await;
        })
    }

    fn create_texture(
        &self,
        source: TextureSource,
    ) -> BoxFuture<'_, Result<MemoryTexture, HostError>> {
        Box::pin(async move {
            let gate = lock(&self.gate).clone();
            if let Some(gate) = gate {
                gate.pass().await;
            }
            tokio::task::yield_now().await;

            if !self.is_ready() {
                return Err(HostError::NotReady);
            }
            let strategy = source.strategy();
            self.admit(strategy)?;
            let (width, height, pixels) = source.into_rgba8().map_err(HostError::Rejected)?;
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.created.fetch_add(1, Ordering::SeqCst);
            debug!(id, width, height, strategy = strategy.as_str(), "memory texture created");
            Ok(MemoryTexture {
                record: Arc::new(TextureRecord {
                    id,
                    width,
                    height,
                    pixels,
                    strategy,
                    disposed: AtomicBool::new(false),
                }),
            })
        })
    }

    fn dispose_texture(&self, texture: MemoryTexture) {
        if texture.record.disposed.swap(true, Ordering::SeqCst) {
            warn!(id = texture.id(), "texture disposed twice");
            self.double_disposed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn rgba_source(width: u32, height: u32) -> TextureSource {
        TextureSource::Rgba8 {
            width,
            height,
            pixels: vec![7u8; (width * height * 4) as usize].into(),
        }
    }

    #[tokio::test]
    async fn creates_and_disposes_textures() {
        let host = MemoryHost::new();
        let texture = host.create_texture(rgba_source(2, 3)).await.unwrap();
        assert_eq!(texture.dimensions(), (2, 3));
        assert_eq!(texture.strategy(), CreationStrategy::RawPixels);
        assert_eq!(host.stats().live(), 1);

        host.dispose_texture(texture.clone());
        assert!(texture.is_disposed());
        host.dispose_texture(texture);
        let stats = host.stats();
        assert_eq!((stats.created, stats.disposed, stats.double_disposed), (1, 1, 1));
    }

    #[tokio::test]
    async fn rejected_strategy_and_budget() {
        let host = MemoryHost::new();
        host.reject_strategy(CreationStrategy::RawPixels);
        let err = host.create_texture(rgba_source(1, 1)).await.unwrap_err();
        assert!(matches!(err, HostError::Rejected(_)));

        host.accept_all_strategies();
        host.fail_after(1);
        assert!(host.create_texture(rgba_source(1, 1)).await.is_ok());
        assert!(host.create_texture(rgba_source(1, 1)).await.is_err());
    }

    #[tokio::test]
    async fn not_ready_host_refuses_creation() {
        let host = MemoryHost::new();
        host.set_ready(false);
        let err = host.create_texture(rgba_source(1, 1)).await.unwrap_err();
        assert!(matches!(err, HostError::NotReady));
    }

    #[tokio::test]
    async fn ready_future_resolves_on_signal() {
        let host = MemoryHost::new();
        host.set_ready(false);
        let pending = tokio::time::timeout(Duration::from_millis(20), host.ready()).await;
        assert!(pending.is_err());

        let (_, ()) = tokio::join!(host.ready(), async { host.set_ready(true) });
        assert!(host.is_ready());
    }

    #[tokio::test]
    async fn gate_holds_creation_until_released() {
        let host = Arc::new(MemoryHost::new());
        let gate = host.hold_creations();
        let task = tokio::spawn({
            let host = Arc::clone(&host);
            async move { host.create_texture(rgba_source(1, 1)).await.map(|t| t.id()) }
        });
        gate.entered().await;
        assert_eq!(host.stats().created, 0);
        gate.release(1);
        assert!(task.await.unwrap().is_ok());
        assert_eq!(host.stats().created, 1);
    }

    #[test]
    fn material_setters_are_counted() {
        let material = MemoryMaterial::new("Screen");
        let alias = material.clone();
        alias.set_emissive_factor([1.0, 1.0, 1.0]);
        alias.set_base_color_factor([0.5, 0.5, 0.5, 1.0]);
        let state = material.state();
        assert_eq!(state.mutations, 2);
        assert_eq!(state.emissive_factor, [1.0, 1.0, 1.0]);
        assert!(material.same_as(&alias));
        assert!(!material.same_as(&MemoryMaterial::new("Screen")));
    }

    #[test]
    fn resolves_loaded_scene() {
        let host = MemoryHost::new();
        assert!(host.resolve_scene_root().is_none());
        host.load_scene(SceneNode::new("phone").with_material(MemoryMaterial::new("Screen")));
        assert_eq!(host.resolve_scene_root().unwrap().name, "phone");
        host.unload_scene();
        assert!(host.resolve_scene_root().is_none());
    }
}
