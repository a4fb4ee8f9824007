//! Progressive GPU compute renderer.
//!
//! The crate owns the full GPU resource lifecycle: device and queue setup,
//! buffer/image allocation with manual memory-type selection, the compute
//! pipeline and its fixed descriptor bindings, per-pass submission with a
//! single frame in flight, and the synchronized readback used to export the
//! accumulated image.
//!
//! The ray tracing itself runs as an opaque SPIR-V compute program; this
//! crate only supplies its inputs and orders its execution.

pub mod renderer;
pub mod scene;
pub mod settings;
pub mod vulkan;

pub use renderer::{samples_for_pass, PassInfo, Renderer};
pub use scene::{demo_scene, Material, MaterialKind, Scene, Sphere, TextureKind};
pub use settings::RenderSettings;
