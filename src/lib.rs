pub mod config;
pub mod decode;
pub mod error;
pub mod host;
pub mod logging;
pub mod material;
pub mod processing {
    pub mod compositor;
    pub mod layout;
}
pub mod screen;
pub mod texture;

pub use error::ScreenError;
pub use screen::{ApplyOptions, ApplyOutcome, ApplyReport, ClearOutcome, ScreenTextureManager};
