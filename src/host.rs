//! The seam between the screen pipeline and whatever renders the phone.
pub mod gpu;
pub mod memory;

use futures::future::BoxFuture;

use crate::error::HostError;
use crate::material::{SceneGraph, ScreenMaterial};
use crate::texture::TextureSource;

/// A rendering context that owns a scene and can realize textures.
///
/// Texture handles are owned by the pipeline once created and must be handed
/// back through [`RenderHost::dispose_texture`] exactly once.
pub trait RenderHost: Send + Sync {
    type Texture: Clone + Send + Sync + 'static;
    type Material: ScreenMaterial<Texture = Self::Texture> + 'static;
    type Scene: SceneGraph<Material = Self::Material>;

    /// Root of the currently loaded scene, if any.
    fn resolve_scene_root(&self) -> Option<Self::Scene>;

    fn is_ready(&self) -> bool;

    /// Resolves once the host reports ready. May never resolve.
    fn ready(&self) -> BoxFuture<'_, ()>;

    fn create_texture(
        &self,
        source: TextureSource,
    ) -> BoxFuture<'_, Result<Self::Texture, HostError>>;

    fn dispose_texture(&self, texture: Self::Texture);
}
