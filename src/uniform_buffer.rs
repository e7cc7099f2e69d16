//! # Uniform Blocks
//!
//! CPU-side mirrors of the two uniform blocks declared in the shader:
//!
//! - [`FrameUniforms`]: written once per frame and bound at binding 0 with a fixed offset. Holds
//!   the camera (projection and view matrices) and the elapsed time.
//! - [`ObjectUniforms`]: one record per drawn instance, bound at binding 1 through a dynamic
//!   offset. Holds the model matrix and a tint.
//!
//! ## Memory Layout
//!
//! Both structs are `#[repr(C)]` and derive `bytemuck::Pod` / `bytemuck::Zeroable`, so they can be
//! handed to the queue with `bytemuck::bytes_of`. Their sizes match the WGSL struct sizes, which
//! are rounded up to the 16-byte alignment of `mat4x4f`:
//!
//! | Block            | Fields                              | Size  |
//! |------------------|-------------------------------------|-------|
//! | `FrameUniforms`  | `mat4x4f`, `mat4x4f`, `f32`, padding | 144   |
//! | `ObjectUniforms` | `mat4x4f`, `vec4f`                  | 80    |
//!
//! The space between two `ObjectUniforms` records in the GPU buffer is larger than 80 bytes; see
//! [`UniformLayout`](crate::allocator::UniformLayout).

use nalgebra_glm as glm;

/// Per-frame constant block.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniforms {
    pub projection: glm::Mat4,
    pub view: glm::Mat4,
    /// Seconds since the renderer started.
    pub time: f32,
    pub _padding: [f32; 3],
}

impl Default for FrameUniforms {
    fn default() -> Self {
        Self {
            projection: glm::identity(),
            view: glm::identity(),
            time: 0.0,
            _padding: [0.0; 3],
        }
    }
}

impl FrameUniforms {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

/// Per-draw dynamic block.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ObjectUniforms {
    pub model: glm::Mat4,
    pub color: glm::Vec4,
}

impl Default for ObjectUniforms {
    fn default() -> Self {
        Self {
            model: glm::identity(),
            color: glm::vec4(1.0, 1.0, 1.0, 1.0),
        }
    }
}

impl ObjectUniforms {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_sizes_match_wgsl() {
        assert_eq!(FrameUniforms::SIZE, 144);
        assert_eq!(ObjectUniforms::SIZE, 80);
    }

    #[test]
    fn test_time_follows_matrices() {
        let uniforms = FrameUniforms {
            time: 2.5,
            ..Default::default()
        };
        let bytes = bytemuck::bytes_of(&uniforms);
        assert_eq!(&bytes[128..132], &2.5f32.to_ne_bytes());
    }
}
