//! Render host backed by a `wgpu` device.
//!
//! The embedding renderer attaches its device once the GPU is up and loads the
//! phone scene once the model is parsed; the host is ready when both are
//! present. Materials record the bound textures and bump a revision counter so
//! the renderer knows when to rebuild its bind groups.
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anyhow::{Context, Result, anyhow};
use futures::future::BoxFuture;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::HostError;
use crate::host::RenderHost;
use crate::material::{SceneNode, ScreenMaterial};
use crate::texture::TextureSource;

#[derive(Debug, Clone)]
struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

/// A texture uploaded to the GPU together with its default view.
#[derive(Debug, Clone)]
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl GpuTexture {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.texture.width(), self.texture.height())
    }
}

#[derive(Debug, Clone)]
pub struct GpuMaterialSlots {
    pub base_color_texture: Option<GpuTexture>,
    pub base_color_factor: [f32; 4],
    pub emissive_texture: Option<GpuTexture>,
    pub emissive_factor: [f32; 3],
    /// Incremented on every slot change.
    pub revision: u64,
}

impl Default for GpuMaterialSlots {
    fn default() -> Self {
        Self {
            base_color_texture: None,
            base_color_factor: [1.0, 1.0, 1.0, 1.0],
            emissive_texture: None,
            emissive_factor: [0.0, 0.0, 0.0],
            revision: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GpuMaterial {
    name: Arc<str>,
    slots: Arc<Mutex<GpuMaterialSlots>>,
}

impl GpuMaterial {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            slots: Arc::default(),
        }
    }

    pub fn slots(&self) -> GpuMaterialSlots {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut GpuMaterialSlots)) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut slots);
        slots.revision += 1;
    }
}

impl ScreenMaterial for GpuMaterial {
    type Texture = GpuTexture;

    fn name(&self) -> &str {
        &self.name
    }

    fn set_base_color_texture(&self, texture: Option<&GpuTexture>) {
        self.update(|s| s.base_color_texture = texture.cloned());
    }

    fn set_base_color_factor(&self, rgba: [f32; 4]) {
        self.update(|s| s.base_color_factor = rgba);
    }

    fn set_emissive_texture(&self, texture: Option<&GpuTexture>) {
        self.update(|s| s.emissive_texture = texture.cloned());
    }

    fn set_emissive_factor(&self, rgb: [f32; 3]) {
        self.update(|s| s.emissive_factor = rgb);
    }
}

pub struct WgpuHost {
    gpu: RwLock<Option<GpuContext>>,
    scene: RwLock<Option<Arc<SceneNode<GpuMaterial>>>>,
    ready: watch::Sender<bool>,
}

impl Default for WgpuHost {
    fn default() -> Self {
        Self::new()
    }
}

impl WgpuHost {
    /// A host with neither a device nor a scene; not ready.
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            gpu: RwLock::new(None),
            scene: RwLock::new(None),
            ready,
        }
    }

    /// Acquire an adapter and device without a presentation surface.
    pub async fn headless() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::LowPower,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .context("request wgpu adapter")?;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("mockup-screen-device"),
                ..Default::default()
            })
            .await
            .context("request wgpu device")?;
        let host = Self::new();
        host.attach_gpu(device, queue);
        Ok(host)
    }

    pub fn headless_blocking() -> Result<Self> {
        pollster::block_on(Self::headless())
    }

    pub fn attach_gpu(&self, device: wgpu::Device, queue: wgpu::Queue) {
        *self.gpu.write().unwrap_or_else(PoisonError::into_inner) =
            Some(GpuContext { device, queue });
        info!("gpu attached to screen host");
        self.refresh_ready();
    }

    pub fn detach_gpu(&self) {
        *self.gpu.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.refresh_ready();
    }

    pub fn load_scene(&self, scene: SceneNode<GpuMaterial>) {
        *self.scene.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(scene));
        self.refresh_ready();
    }

    pub fn unload_scene(&self) {
        *self.scene.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.refresh_ready();
    }

    fn context(&self) -> Option<GpuContext> {
        self.gpu
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn refresh_ready(&self) {
        let ready = self.context().is_some() && self.resolve_scene_root().is_some();
        self.ready.send_replace(ready);
    }
}

fn upload_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    pixels: &[u8],
    w: u32,
    h: u32,
) -> GpuTexture {
    let size = wgpu::Extent3d {
        width: w,
        height: h,
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("screen"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8UnormSrgb,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        texture.as_image_copy(),
        pixels,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * w),
            rows_per_image: Some(h),
        },
        size,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTexture { texture, view }
}

impl RenderHost for WgpuHost {
    type Texture = GpuTexture;
    type Material = GpuMaterial;
    type Scene = Arc<SceneNode<GpuMaterial>>;

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
    ) -> BoxFuture<'_, Result<GpuTexture, HostError>> {
        Box::pin(async move {
            let Some(GpuContext { device, queue }) = self.context() else {
                return Err(HostError::NotReady);
            };
            let (width, height, pixels) = source.into_rgba8().map_err(HostError::Rejected)?;
            let limit = device.limits().max_texture_dimension_2d;
            if width > limit || height > limit {
                return Err(HostError::Rejected(anyhow!(
                    "{width}x{height} exceeds the device texture limit of {limit}"
                )));
            }

            device.push_error_scope(wgpu::ErrorFilter::Validation);
            device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
            let texture = upload_texture(&device, &queue, &pixels, width, height);
            let out_of_memory = device.pop_error_scope().await;
            let invalid = device.pop_error_scope().await;
            if let Some(err) = out_of_memory.or(invalid) {
                texture.texture.destroy();
                return Err(HostError::Rejected(anyhow!("{err}")));
            }
            debug!(width, height, "gpu texture uploaded");
            Ok(texture)
        })
    }

    fn dispose_texture(&self, texture: GpuTexture) {
        texture.texture.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn host_without_gpu_is_not_ready() {
        let host = WgpuHost::new();
        assert!(!host.is_ready());
        host.load_scene(SceneNode::new("phone").with_material(GpuMaterial::new("Screen")));
        // scene alone is not enough
        assert!(!host.is_ready());
        assert!(
            tokio::time::timeout(Duration::from_millis(20), host.ready())
                .await
                .is_err()
        );
        let err = host
            .create_texture(TextureSource::Rgba8 {
                width: 1,
                height: 1,
                pixels: vec![0u8; 4].into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::NotReady));
    }

    async fn headless_or_skip() -> Option<WgpuHost> {
        match WgpuHost::headless().await {
            Ok(host) => Some(host),
            Err(err) => {
                eprintln!("skipping: no wgpu adapter available ({err:#})");
                None
            }
        }
    }

    #[tokio::test]
    async fn uploads_and_disposes_on_headless_device() {
        let Some(host) = headless_or_skip().await else {
            return;
        };
        // device alone is not enough
        assert!(!host.is_ready());
        host.load_scene(SceneNode::new("phone").with_material(GpuMaterial::new("Screen")));
        assert!(host.is_ready());

        let texture = host
            .create_texture(TextureSource::Rgba8 {
                width: 3,
                height: 5,
                pixels: vec![200u8; 3 * 5 * 4].into(),
            })
            .await
            .unwrap();
        assert_eq!(texture.dimensions(), (3, 5));
        assert_eq!(
            texture.texture.format(),
            wgpu::TextureFormat::Rgba8UnormSrgb
        );
        host.dispose_texture(texture);

        let mut png = std::io::Cursor::new(Vec::new());
        image::RgbaImage::from_pixel(2, 4, image::Rgba([1, 2, 3, 255]))
            .write_to(&mut png, image::ImageFormat::Png)
            .unwrap();
        let texture = host
            .create_texture(TextureSource::Png {
                width: 2,
                height: 4,
                bytes: png.into_inner().into(),
            })
            .await
            .unwrap();
        assert_eq!(texture.dimensions(), (2, 4));
        host.dispose_texture(texture);
    }

    #[tokio::test]
    async fn invalid_uploads_are_rejected_not_fatal() {
        let Some(host) = headless_or_skip().await else {
            return;
        };
        host.load_scene(SceneNode::new("phone"));

        let limit = host
            .context()
            .map(|ctx| ctx.device.limits().max_texture_dimension_2d)
            .unwrap();
        let err = host
            .create_texture(TextureSource::Rgba8 {
                width: limit + 1,
                height: 1,
                pixels: vec![0u8; (limit as usize + 1) * 4].into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::Rejected(_)));

        // zero-sized textures fail device validation and surface via the error scope
        let err = host
            .create_texture(TextureSource::Rgba8 {
                width: 0,
                height: 0,
                pixels: Vec::new().into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::Rejected(_)));
    }

    #[test]
    fn material_slot_changes_bump_revision() {
        let material = GpuMaterial::new("Screen");
        assert_eq!(material.slots().revision, 0);
        material.set_base_color_texture(None);
        material.set_emissive_factor([0.0, 0.0, 0.0]);
        let slots = material.slots();
        assert_eq!(slots.revision, 2);
        assert!(slots.base_color_texture.is_none());
        assert_eq!(slots.base_color_factor, [1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn scene_round_trips() {
        let host = WgpuHost::new();
        host.load_scene(SceneNode::new("phone"));
        assert_eq!(host.resolve_scene_root().unwrap().name, "phone");
        host.unload_scene();
        assert!(host.resolve_scene_root().is_none());
    }
}
