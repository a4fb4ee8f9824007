//! Render settings.

use std::path::PathBuf;

/// Fixed configuration for one renderer instance.
///
/// The group sizes must match the `local_size_x` / `local_size_y` declared by
/// the compute shader; the dispatch in `vulkan::commands` is derived from
/// them. Nothing here changes after construction.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// Presentable image width in pixels.
    pub window_width: u32,
    /// Presentable image height in pixels.
    pub window_height: u32,
    /// Path to the compiled SPIR-V compute shader.
    pub shader_path: PathBuf,
    /// Compute work-group width declared by the shader.
    pub group_size_x: u32,
    /// Compute work-group height declared by the shader.
    pub group_size_y: u32,
    /// Number of accumulation passes to run.
    pub total_passes: u32,
    /// Total per-pixel sample budget across all passes.
    pub total_samples: u32,
    /// Output file for the exported image.
    pub output_path: PathBuf,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            window_width: 1200,
            window_height: 675,
            shader_path: PathBuf::from("shader.comp.spv"),
            group_size_x: 16,
            group_size_y: 16,
            total_passes: 200,
            total_samples: 2000,
            output_path: PathBuf::from("render.png"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================================
    // RenderSettings::default
    // ============================================================

    #[test]
    fn test_default_extent() {
        let settings = RenderSettings::default();
        assert_eq!(settings.window_width, 1200);
        assert_eq!(settings.window_height, 675);
    }

    #[test]
    fn test_default_group_size_matches_shader() {
        let settings = RenderSettings::default();
        assert_eq!(settings.group_size_x, 16);
        assert_eq!(settings.group_size_y, 16);
    }

    #[test]
    fn test_default_pass_budget() {
        let settings = RenderSettings::default();
        assert!(settings.total_passes > 0);
        assert!(settings.total_samples >= settings.total_passes);
    }

    #[test]
    fn test_default_paths() {
        let settings = RenderSettings::default();
        assert_eq!(settings.shader_path, PathBuf::from("shader.comp.spv"));
        assert_eq!(settings.output_path, PathBuf::from("render.png"));
    }
}
