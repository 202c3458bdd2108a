//! Apply/clear orchestration for one screen material.
//!
//! Requests are numbered; whenever a newer apply, reapply or clear has started
//! by the time an older request resumes, the older one stops and reports
//! [`ApplyOutcome::Superseded`], disposing anything it created on the way.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use screen_config::{Brightness, CreationStrategy, FlipState, ScreenConfig};
use tracing::{debug, info, warn};

use crate::decode::{ImageSource, decode_image_async};
use crate::error::ScreenError;
use crate::host::RenderHost;
use crate::material::find_by_name;
use crate::processing::compositor::{SurfaceSnapshot, WorkingSurface};
use crate::processing::layout::CoverPlacement;
use crate::texture::{BindOutcome, LifecycleStats, TextureLifecycle};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-call orientation and brightness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplyOptions {
    pub flip: FlipState,
    pub brightness: Brightness,
}

impl ApplyOptions {
    /// The configured defaults.
    pub fn from_config(config: &ScreenConfig) -> Self {
        Self {
            flip: config.orientation_correction,
            brightness: config.brightness,
        }
    }

    pub fn with_flip(self, flip: FlipState) -> Self {
        Self { flip, ..self }
    }

    pub fn with_brightness(self, brightness: Brightness) -> Self {
        Self { brightness, ..self }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApplyReport {
    pub request: u64,
    pub source_size: (u32, u32),
    pub placement: CoverPlacement,
    pub flip: FlipState,
    pub brightness: Brightness,
    /// Strategy that produced the base-color texture.
    pub strategy: CreationStrategy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied(ApplyReport),
    /// A newer request started before this one finished.
    Superseded { request: u64 },
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    pub fn report(&self) -> Option<&ApplyReport> {
        match self {
            Self::Applied(report) => Some(report),
            Self::Superseded { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    Cleared,
    /// No target material in the scene; nothing was touched.
    MaterialAbsent,
}

/// Owns the working surface and the bound texture pair for one viewer.
pub struct ScreenTextureManager<H: RenderHost> {
    host: Arc<H>,
    config: ScreenConfig,
    surface: Mutex<WorkingSurface>,
    lifecycle: TextureLifecycle<H>,
    sequence: AtomicU64,
    last_source: Mutex<Option<Arc<[u8]>>>,
}

impl<H: RenderHost> ScreenTextureManager<H> {
    pub fn new(host: Arc<H>, config: ScreenConfig) -> Result<Self> {
        let config = config.validated()?;
        let lifecycle = TextureLifecycle::new(
            Arc::clone(&host),
            config.texture_strategies.clone(),
            config.host_ready_timeout,
        );
        Ok(Self {
            surface: Mutex::new(WorkingSurface::new(config.surface, config.resample_filter)),
            host,
            config,
            lifecycle,
            sequence: AtomicU64::new(0),
            last_source: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ScreenConfig {
        &self.config
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn default_options(&self) -> ApplyOptions {
        ApplyOptions::from_config(&self.config)
    }

    pub fn stats(&self) -> LifecycleStats {
        self.lifecycle.stats()
    }

    pub fn surface_snapshot(&self) -> SurfaceSnapshot {
        lock(&self.surface).snapshot()
    }

    /// Whether a source is retained for [`Self::reapply`].
    pub fn has_source(&self) -> bool {
        lock(&self.last_source).is_some()
    }

    /// Decode `bytes`, composite them onto the surface and bind the result to
    /// the screen material.
    ///
    /// On error the material keeps whatever it showed before, except that a
    /// backend rejection happens after the previous pair was released.
    pub async fn apply_image(
        &self,
        bytes: impl Into<Arc<[u8]>>,
        options: ApplyOptions,
    ) -> Result<ApplyOutcome, ScreenError> {
        let material = self.resolve_material()?;
        let bytes = bytes.into();
        let request = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(request, len = bytes.len(), "apply requested");

        let image = decode_image_async(Arc::clone(&bytes)).await.inspect_err(|err| {
            warn!(request, "decode failed: {err}");
        })?;
        if !self.is_current(request) {
            warn!(request, "superseded after decode");
            return Ok(ApplyOutcome::Superseded { request });
        }

        let source_size = (image.width(), image.height());
        let composited = self.composite_if_current(request, &image, options.flip, bytes)?;
        drop(image);
        let Some((placement, snapshot)) = composited else {
            warn!(request, "superseded before compositing");
            return Ok(ApplyOutcome::Superseded { request });
        };

        let outcome = self
            .lifecycle
            .bind(&material, &snapshot, options.brightness, || {
                self.is_current(request)
            })
            .await?;
        match outcome {
            BindOutcome::Bound { strategy } => {
                info!(
                    request,
                    width = source_size.0,
                    height = source_size.1,
                    scale = placement.scale,
                    strategy = strategy.as_str(),
                    lit = options.brightness.is_lit(),
                    "screen image applied"
                );
                Ok(ApplyOutcome::Applied(ApplyReport {
                    request,
                    source_size,
                    placement,
                    flip: options.flip,
                    brightness: options.brightness,
                    strategy,
                }))
            }
            BindOutcome::Superseded => {
                warn!(request, "superseded during bind");
                Ok(ApplyOutcome::Superseded { request })
            }
        }
    }

    /// Re-run the last submitted source with new options.
    /// Returns `Ok(None)` when nothing has been submitted since the last clear.
    pub async fn reapply(
        &self,
        options: ApplyOptions,
    ) -> Result<Option<ApplyOutcome>, ScreenError> {
        let Some(bytes) = lock(&self.last_source).clone() else {
            debug!("reapply with no retained source");
            return Ok(None);
        };
        self.apply_image(bytes, options).await.map(Some)
    }

    /// Detach and dispose the bound textures and blank the surface.
    ///
    /// Cancels any in-flight apply. Does nothing when the material is absent.
    pub fn clear(&self) -> ClearOutcome {
        let Some(material) = self.find_material() else {
            debug!(material = %self.config.material_name, "clear skipped, material absent");
            return ClearOutcome::MaterialAbsent;
        };
        let request = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let unbound = self.lifecycle.unbind(&material);
        lock(&self.surface).clear();
        *lock(&self.last_source) = None;
        info!(request, unbound, "screen cleared");
        ClearOutcome::Cleared
    }

    /// Composite under the surface lock and retain `bytes` for reapply, but
    /// only if `request` is still the newest. Returns `None` otherwise.
    fn composite_if_current(
        &self,
        request: u64,
        image: &ImageSource,
        flip: FlipState,
        bytes: Arc<[u8]>,
    ) -> Result<Option<(CoverPlacement, SurfaceSnapshot)>, ScreenError> {
        let mut surface = lock(&self.surface);
        if !self.is_current(request) {
            return Ok(None);
        }
        let placement = surface.composite_cover(image, flip)?;
        *lock(&self.last_source) = Some(bytes);
        Ok(Some((placement, surface.snapshot())))
    }

    fn is_current(&self, request: u64) -> bool {
        self.sequence.load(Ordering::SeqCst) == request
    }

    fn find_material(&self) -> Option<H::Material> {
        let scene = self.host.resolve_scene_root()?;
        find_by_name(&scene, &self.config.material_name)
    }

    fn resolve_material(&self) -> Result<H::Material, ScreenError> {
        self.find_material().ok_or_else(|| {
            warn!(material = %self.config.material_name, "material not found");
            ScreenError::MaterialNotFound {
                name: self.config.material_name.clone(),
            }
        })
    }
}

impl<H: RenderHost> Drop for ScreenTextureManager<H> {
    fn drop(&mut self) {
        if self.lifecycle.is_bound() {
            if let Some(material) = self.find_material() {
                self.lifecycle.unbind(&material);
            }
        }
    }
}
