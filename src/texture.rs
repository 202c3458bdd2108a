//! Realizing the working surface as host textures and tracking the live pair.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, anyhow};
use screen_config::{Brightness, CreationStrategy};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{BackendRejection, HostError, ScreenError, StrategyFailure};
use crate::host::RenderHost;
use crate::material::ScreenMaterial;
use crate::processing::compositor::SurfaceSnapshot;

const FULL_BASE_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 1.0];
const FULL_EMISSIVE: [f32; 3] = [1.0, 1.0, 1.0];
const NO_EMISSIVE: [f32; 3] = [0.0, 0.0, 0.0];

/// Surface content in the form a creation strategy hands to the host.
#[derive(Debug, Clone)]
pub enum TextureSource {
    Rgba8 {
        width: u32,
        height: u32,
        pixels: Arc<[u8]>,
    },
    Png {
        width: u32,
        height: u32,
        bytes: Arc<[u8]>,
    },
}

impl TextureSource {
    pub fn from_snapshot(
        strategy: CreationStrategy,
        snapshot: &SurfaceSnapshot,
    ) -> anyhow::Result<Self> {
        let (width, height) = (snapshot.width(), snapshot.height());
        Ok(match strategy {
            CreationStrategy::RawPixels => Self::Rgba8 {
                width,
                height,
                pixels: Arc::clone(snapshot.pixels()),
            },
            CreationStrategy::EncodedPng => Self::Png {
                width,
                height,
                bytes: snapshot
                    .encode_png()
                    .context("failed to encode surface as PNG")?
                    .into(),
            },
        })
    }

    pub fn strategy(&self) -> CreationStrategy {
        match self {
            Self::Rgba8 { .. } => CreationStrategy::RawPixels,
            Self::Png { .. } => CreationStrategy::EncodedPng,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Rgba8 { width, height, .. } | Self::Png { width, height, .. } => {
                (*width, *height)
            }
        }
    }

    /// Raw RGBA8 pixels, decoding the PNG form if needed.
    pub fn into_rgba8(self) -> anyhow::Result<(u32, u32, Arc<[u8]>)> {
        match self {
            Self::Rgba8 {
                width,
                height,
                pixels,
            } => {
                anyhow::ensure!(
                    pixels.len() == width as usize * height as usize * 4,
                    "pixel buffer length {} does not match {width}x{height}",
                    pixels.len()
                );
                Ok((width, height, pixels))
            }
            Self::Png {
                width,
                height,
                bytes,
            } => {
                let img = image::load_from_memory_with_format(&bytes, image::ImageFormat::Png)
                    .context("failed to decode PNG texture source")?
                    .to_rgba8();
                if img.dimensions() != (width, height) {
                    return Err(anyhow!(
                        "PNG texture source is {}x{}, expected {width}x{height}",
                        img.width(),
                        img.height()
                    ));
                }
                Ok((width, height, img.into_raw().into()))
            }
        }
    }
}

/// Base-color texture plus the optional emissive copy.
#[derive(Debug, Clone)]
pub struct BoundTexturePair<T> {
    pub base: T,
    pub emissive: Option<T>,
}

impl<T> BoundTexturePair<T> {
    fn into_textures(self) -> impl Iterator<Item = T> {
        std::iter::once(self.base).chain(self.emissive)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleStats {
    pub pairs_bound: u64,
    pub pairs_released: u64,
    pub textures_created: u64,
    pub textures_disposed: u64,
    pub live: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    Bound { strategy: CreationStrategy },
    /// A newer request took over; anything this bind created was disposed.
    Superseded,
}

struct LifecycleState<T> {
    bound: Option<BoundTexturePair<T>>,
    stats: LifecycleStats,
}

/// Owns the textures bound to the screen material for one manager instance.
///
/// The state lock is never held across an `.await`; concurrent binds are
/// arbitrated by the caller's `is_current` check.
pub struct TextureLifecycle<H: RenderHost> {
    host: Arc<H>,
    strategies: Vec<CreationStrategy>,
    ready_timeout: Duration,
    state: Mutex<LifecycleState<H::Texture>>,
}

impl<H: RenderHost> TextureLifecycle<H> {
    pub fn new(host: Arc<H>, strategies: Vec<CreationStrategy>, ready_timeout: Duration) -> Self {
        Self {
            host,
            strategies,
            ready_timeout,
            state: Mutex::new(LifecycleState {
                bound: None,
                stats: LifecycleStats::default(),
            }),
        }
    }

    pub fn stats(&self) -> LifecycleStats {
        self.lock().stats
    }

    pub fn is_bound(&self) -> bool {
        self.lock().bound.is_some()
    }

    /// Create textures for `snapshot` and bind them to `material`.
    ///
    /// Readiness is checked first, so a host that is not ready leaves the
    /// material untouched. Past that point the previous pair is detached and
    /// disposed before any new texture is requested, whether or not creation
    /// then succeeds.
    pub async fn bind(
        &self,
        material: &H::Material,
        snapshot: &SurfaceSnapshot,
        brightness: Brightness,
        is_current: impl Fn() -> bool,
    ) -> Result<BindOutcome, ScreenError> {
        let waited = self.wait_until_ready().await?;
        if !is_current() {
            return Ok(BindOutcome::Superseded);
        }

        self.release(material);

        let (pair, strategy) = self.create_pair(snapshot, brightness, waited).await?;

        let mut state = self.lock();
        if !is_current() {
            drop(state);
            debug!("discarding textures from superseded bind");
            self.dispose_pair(pair);
            return Ok(BindOutcome::Superseded);
        }
        assert!(
            state.bound.is_none(),
            "previous texture pair must be disposed before binding a new one"
        );
        material.set_base_color_factor(FULL_BASE_COLOR);
        material.set_base_color_texture(Some(&pair.base));
        match &pair.emissive {
            Some(emissive) => {
                material.set_emissive_texture(Some(emissive));
                material.set_emissive_factor(FULL_EMISSIVE);
            }
            None => {
                material.set_emissive_texture(None);
                material.set_emissive_factor(NO_EMISSIVE);
            }
        }
        state.bound = Some(pair);
        state.stats.pairs_bound += 1;
        state.stats.live = true;
        Ok(BindOutcome::Bound { strategy })
    }

    /// Detach both slots, zero the emissive factor and dispose the live pair.
    /// Returns `false` (and touches nothing) when no pair is bound.
    pub fn unbind(&self, material: &H::Material) -> bool {
        let Some(pair) = self.take_bound() else {
            return false;
        };
        material.set_base_color_texture(None);
        material.set_emissive_texture(None);
        material.set_emissive_factor(NO_EMISSIVE);
        self.dispose_pair(pair);
        true
    }

    fn release(&self, material: &H::Material) {
        if let Some(pair) = self.take_bound() {
            material.set_base_color_texture(None);
            material.set_emissive_texture(None);
            self.dispose_pair(pair);
        }
    }

    fn take_bound(&self) -> Option<BoundTexturePair<H::Texture>> {
        let mut state = self.lock();
        let pair = state.bound.take()?;
        state.stats.pairs_released += 1;
        state.stats.live = false;
        Some(pair)
    }

    async fn wait_until_ready(&self) -> Result<Duration, ScreenError> {
        if self.host.is_ready() {
            return Ok(Duration::ZERO);
        }
        let started = Instant::now();
        if !self.ready_timeout.is_zero() {
            debug!(timeout = ?self.ready_timeout, "waiting for render host");
            let _ = tokio::time::timeout(self.ready_timeout, self.host.ready()).await;
        }
        let waited = started.elapsed();
        if self.host.is_ready() {
            Ok(waited)
        } else {
            warn!(?waited, "render host not ready");
            Err(ScreenError::HostNotReady { waited })
        }
    }

    async fn create_pair(
        &self,
        snapshot: &SurfaceSnapshot,
        brightness: Brightness,
        waited: Duration,
    ) -> Result<(BoundTexturePair<H::Texture>, CreationStrategy), ScreenError> {
        let (base, strategy) = self.create_with_fallback(snapshot, waited).await?;
        let emissive = if brightness.is_lit() {
            match self.create_with_fallback(snapshot, waited).await {
                Ok((emissive, _)) => Some(emissive),
                Err(err) => {
                    self.dispose(base);
                    return Err(err);
                }
            }
        } else {
            None
        };
        Ok((BoundTexturePair { base, emissive }, strategy))
    }

    async fn create_with_fallback(
        &self,
        snapshot: &SurfaceSnapshot,
        waited: Duration,
    ) -> Result<(H::Texture, CreationStrategy), ScreenError> {
        let mut failures = Vec::new();
        for &strategy in &self.strategies {
            let source = match TextureSource::from_snapshot(strategy, snapshot) {
                Ok(source) => source,
                Err(cause) => {
                    warn!(
                        strategy = strategy.as_str(),
                        "texture source preparation failed: {cause:#}"
                    );
                    failures.push(StrategyFailure { strategy, cause });
                    continue;
                }
            };
            match self.host.create_texture(source).await {
                Ok(texture) => {
                    self.lock().stats.textures_created += 1;
                    debug!(strategy = strategy.as_str(), "texture created");
                    return Ok((texture, strategy));
                }
                Err(HostError::NotReady) => {
                    warn!(strategy = strategy.as_str(), "render host became unavailable");
                    return Err(ScreenError::HostNotReady { waited });
                }
                Err(HostError::Rejected(cause)) => {
                    warn!(strategy = strategy.as_str(), "texture creation rejected: {cause:#}");
                    failures.push(StrategyFailure { strategy, cause });
                }
            }
        }
        Err(BackendRejection::new(failures).into())
    }

    fn dispose_pair(&self, pair: BoundTexturePair<H::Texture>) {
        for texture in pair.into_textures() {
            self.dispose(texture);
        }
    }

    fn dispose(&self, texture: H::Texture) {
        self.host.dispose_texture(texture);
        self.lock().stats.textures_disposed += 1;
    }

    fn lock(&self) -> MutexGuard<'_, LifecycleState<H::Texture>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<H: RenderHost> Drop for TextureLifecycle<H> {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(pair) = state.bound.take() {
            debug!("disposing bound textures on drop");
            for texture in pair.into_textures() {
                self.host.dispose_texture(texture);
            }
        }
    }
}
