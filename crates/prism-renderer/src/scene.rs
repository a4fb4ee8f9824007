//! GPU scene description.
//!
//! The structs here are the binary contract with the compute shader's scene
//! uniform block (std140 layout): field order, padding and array strides are
//! fixed, and covered by the layout tests at the bottom of this file. The
//! scene is written into GPU memory once at renderer construction and never
//! touched again from the host.

use bytemuck::{Pod, Zeroable};

/// Maximum number of spheres in a scene.
pub const MAX_SPHERES: usize = 500;

/// Maximum number of materials in a scene.
pub const MAX_MATERIALS: usize = 500;

/// Material shading model, mirrored by the shader as an integer tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MaterialKind {
    Diffuse = 0,
    Metal = 1,
    Refractive = 2,
}

/// How a material samples its color pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TextureKind {
    /// Always the first color.
    Solid = 0,
    /// Alternate between both colors on a world-space grid.
    Checkered = 1,
}

/// One sphere primitive (std140 array stride 32).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Sphere {
    pub center: [f32; 3],
    pub radius: f32,
    /// Index into the scene's material array.
    pub material_index: u32,
    pub _pad: [u32; 3],
}

impl Sphere {
    pub fn new(center: [f32; 3], radius: f32, material_index: u32) -> Self {
        Self {
            center,
            radius,
            material_index,
            _pad: [0; 3],
        }
    }
}

/// One material record (std140 array stride 64).
///
/// `attribute` carries the fuzz radius for metals and the refraction index
/// for refractive materials; it is ignored for diffuse surfaces.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Material {
    pub kind: u32,
    pub texture: u32,
    pub _pad0: [u32; 2],
    /// Color pair; the second entry is only sampled for checkered textures.
    /// Each color is a vec3 padded to 16 bytes.
    pub colors: [[f32; 4]; 2],
    pub attribute: f32,
    pub _pad1: [f32; 3],
}

impl Material {
    fn new(kind: MaterialKind, color: [f32; 3], attribute: f32) -> Self {
        Self {
            kind: kind as u32,
            texture: TextureKind::Solid as u32,
            _pad0: [0; 2],
            colors: [[color[0], color[1], color[2], 0.0], [0.0; 4]],
            attribute,
            _pad1: [0.0; 3],
        }
    }

    pub fn diffuse(color: [f32; 3]) -> Self {
        Self::new(MaterialKind::Diffuse, color, 0.0)
    }

    pub fn metal(color: [f32; 3], fuzz: f32) -> Self {
        Self::new(MaterialKind::Metal, color, fuzz)
    }

    pub fn refractive(refraction_index: f32) -> Self {
        Self::new(MaterialKind::Refractive, [1.0, 1.0, 1.0], refraction_index)
    }

    /// Turn the material into a checkered one with `other` as second color.
    pub fn checkered(mut self, other: [f32; 3]) -> Self {
        self.texture = TextureKind::Checkered as u32;
        self.colors[1] = [other[0], other[1], other[2], 0.0];
        self
    }
}

/// Fixed-capacity scene uniform block.
///
/// `sphere_count` prefixes the arrays; entries past the count are never read
/// by the shader.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct Scene {
    pub sphere_count: u32,
    pub _pad: [u32; 3],
    pub spheres: [Sphere; MAX_SPHERES],
    pub materials: [Material; MAX_MATERIALS],
}

impl Scene {
    pub fn empty() -> Self {
        Zeroable::zeroed()
    }
}

/// Demo scene: a large ground sphere and three unit spheres with diffuse,
/// metal and glass materials.
pub fn demo_scene() -> Scene {
    let mut scene = Scene::empty();

    scene.materials[0] = Material::diffuse([0.5, 0.5, 0.5]);
    scene.materials[1] = Material::diffuse([0.4, 0.2, 0.1]);
    scene.materials[2] = Material::metal([0.7, 0.6, 0.5], 0.0);
    scene.materials[3] = Material::refractive(1.5);

    scene.spheres[0] = Sphere::new([0.0, -1000.0, 1.0], 1000.0, 0);
    scene.spheres[1] = Sphere::new([-4.0, 1.0, 0.0], 1.0, 1);
    scene.spheres[2] = Sphere::new([4.0, 1.0, 0.0], 1.0, 2);
    scene.spheres[3] = Sphere::new([0.0, 1.0, 0.0], 1.0, 3);
    scene.sphere_count = 4;

    scene
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    // ============================================================
    // std140 layout contract
    // ============================================================

    #[test]
    fn test_sphere_layout() {
        assert_eq!(size_of::<Sphere>(), 32);
        assert_eq!(offset_of!(Sphere, center), 0);
        assert_eq!(offset_of!(Sphere, radius), 12);
        assert_eq!(offset_of!(Sphere, material_index), 16);
    }

    #[test]
    fn test_material_layout() {
        assert_eq!(size_of::<Material>(), 64);
        assert_eq!(offset_of!(Material, kind), 0);
        assert_eq!(offset_of!(Material, texture), 4);
        assert_eq!(offset_of!(Material, colors), 16);
        assert_eq!(offset_of!(Material, attribute), 48);
    }

    #[test]
    fn test_scene_layout() {
        assert_eq!(offset_of!(Scene, spheres), 16);
        assert_eq!(
            offset_of!(Scene, materials),
            16 + MAX_SPHERES * size_of::<Sphere>()
        );
        assert_eq!(
            size_of::<Scene>(),
            16 + MAX_SPHERES * size_of::<Sphere>() + MAX_MATERIALS * size_of::<Material>()
        );
    }

    // ============================================================
    // Material constructors
    // ============================================================

    #[test]
    fn test_material_diffuse() {
        let material = Material::diffuse([0.5, 0.5, 0.5]);
        assert_eq!(material.kind, MaterialKind::Diffuse as u32);
        assert_eq!(material.texture, TextureKind::Solid as u32);
        assert_eq!(material.colors[0], [0.5, 0.5, 0.5, 0.0]);
        assert_eq!(material.attribute, 0.0);
    }

    #[test]
    fn test_material_metal_carries_fuzz() {
        let material = Material::metal([0.7, 0.6, 0.5], 0.2);
        assert_eq!(material.kind, MaterialKind::Metal as u32);
        assert_eq!(material.attribute, 0.2);
    }

    #[test]
    fn test_material_refractive_carries_index() {
        let material = Material::refractive(1.5);
        assert_eq!(material.kind, MaterialKind::Refractive as u32);
        assert_eq!(material.attribute, 1.5);
    }

    #[test]
    fn test_material_checkered_sets_second_color() {
        let material = Material::diffuse([0.1, 0.2, 0.3]).checkered([0.9, 0.9, 0.9]);
        assert_eq!(material.texture, TextureKind::Checkered as u32);
        assert_eq!(material.colors[0], [0.1, 0.2, 0.3, 0.0]);
        assert_eq!(material.colors[1], [0.9, 0.9, 0.9, 0.0]);
    }

    // ============================================================
    // demo_scene
    // ============================================================

    #[test]
    fn test_demo_scene_counts() {
        let scene = demo_scene();
        assert_eq!(scene.sphere_count, 4);
    }

    #[test]
    fn test_demo_scene_material_indices_in_range() {
        let scene = demo_scene();
        for sphere in &scene.spheres[..scene.sphere_count as usize] {
            assert!((sphere.material_index as usize) < MAX_MATERIALS);
        }
    }

    #[test]
    fn test_empty_scene_is_zeroed() {
        let scene = Scene::empty();
        assert_eq!(scene.sphere_count, 0);
        assert_eq!(scene.spheres[0].radius, 0.0);
    }
}
