//! Locating the screen material inside a host's scene.
//!
//! Hosts expose their scene as an ordered sequence of candidate materials;
//! the resolver does not care whether that sequence comes from a tree walk or
//! a flat list.
use std::sync::Arc;

/// The narrow mutation surface the pipeline needs on a host material.
///
/// Handles are cheap clones referring to host-owned state, hence `&self`.
pub trait ScreenMaterial: Clone + Send + Sync {
    type Texture;

    fn name(&self) -> &str;
    fn set_base_color_texture(&self, texture: Option<&Self::Texture>);
    fn set_base_color_factor(&self, rgba: [f32; 4]);
    fn set_emissive_texture(&self, texture: Option<&Self::Texture>);
    fn set_emissive_factor(&self, rgb: [f32; 3]);
}

/// A scene whose materials can be enumerated in a stable order.
pub trait SceneGraph {
    type Material: ScreenMaterial;

    fn materials(&self) -> impl Iterator<Item = &Self::Material>;
}

/// First material named exactly `name` in traversal order.
pub fn find_by_name<G: SceneGraph>(scene: &G, name: &str) -> Option<G::Material> {
    scene.materials().find(|m| m.name() == name).cloned()
}

impl<M: ScreenMaterial> SceneGraph for Vec<M> {
    type Material = M;

    fn materials(&self) -> impl Iterator<Item = &M> {
        self.iter()
    }
}

impl<G: SceneGraph> SceneGraph for Arc<G> {
    type Material = G::Material;

    fn materials(&self) -> impl Iterator<Item = &G::Material> {
        (**self).materials()
    }
}

/// Materials attached to one drawable node.
#[derive(Debug, Clone)]
pub enum MaterialSlot<M> {
    None,
    Single(M),
    Multi(Vec<M>),
}

impl<M> MaterialSlot<M> {
    pub fn as_slice(&self) -> &[M] {
        match self {
            Self::None => &[],
            Self::Single(material) => std::slice::from_ref(material),
            Self::Multi(materials) => materials,
        }
    }
}

impl<M> Default for MaterialSlot<M> {
    fn default() -> Self {
        Self::None
    }
}

/// A node in a host scene tree.
#[derive(Debug, Clone)]
pub struct SceneNode<M> {
    pub name: String,
    pub materials: MaterialSlot<M>,
    pub children: Vec<SceneNode<M>>,
}

impl<M> SceneNode<M> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            materials: MaterialSlot::None,
            children: Vec::new(),
        }
    }

    pub fn with_material(mut self, material: M) -> Self {
        self.materials = MaterialSlot::Single(material);
        self
    }

    pub fn with_materials(mut self, materials: Vec<M>) -> Self {
        self.materials = MaterialSlot::Multi(materials);
        self
    }

    pub fn with_child(mut self, child: SceneNode<M>) -> Self {
        self.children.push(child);
        self
    }

    /// Depth-first, pre-order walk; children visit in insertion order.
    pub fn walk(&self) -> Walk<'_, M> {
        Walk { stack: vec![self] }
    }
}

impl<M: ScreenMaterial> SceneGraph for SceneNode<M> {
    type Material = M;

    fn materials(&self) -> impl Iterator<Item = &M> {
        self.walk().flat_map(|node| node.materials.as_slice())
    }
}

pub struct Walk<'a, M> {
    stack: Vec<&'a SceneNode<M>>,
}

impl<'a, M> Iterator for Walk<'a, M> {
    type Item = &'a SceneNode<M>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}
