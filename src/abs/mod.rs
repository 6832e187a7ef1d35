//! This module contains the core components for the rendering sample,
//! including application setup, shader management, mesh handling and
//! textures.

pub mod app;
pub mod backend;
pub mod mesh;
pub mod shader;
pub mod texture;

pub use app::*;
pub use mesh::*;
pub use shader::*;
pub use texture::*;
