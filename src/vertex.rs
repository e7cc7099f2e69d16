//! # Vertex Layout
//!
//! The `Vertex` struct describes one mesh vertex as the vertex stage reads it: a position and a
//! color, both three 32-bit floats, for a stride of 24 bytes.
//!
//! | Location | Field      | Format      | Offset |
//! |----------|------------|-------------|--------|
//! | 0        | `position` | `Float32x3` | 0      |
//! | 1        | `color`    | `Float32x3` | 12     |
//!
//! The module also carries the built-in pyramid: a square base and an apex, five vertices and
//! six triangles (two for the base, four for the sides).

use crate::backend::VertexBufferLayout;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

impl Vertex {
    pub const fn new(position: [f32; 3], color: [f32; 3]) -> Self {
        Self { position, color }
    }

    pub fn vertex_attributes() -> Vec<wgpu::VertexAttribute> {
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3].to_vec()
    }

    /// Layout of a vertex buffer made of tightly packed `Vertex` values.
    pub fn layout() -> VertexBufferLayout {
        VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: Self::vertex_attributes(),
        }
    }
}

pub const PYRAMID_VERTICES: [Vertex; 5] = [
    // Base
    Vertex::new([-0.5, -0.5, -0.3], [1.0, 1.0, 1.0]),
    Vertex::new([0.5, -0.5, -0.3], [1.0, 1.0, 1.0]),
    Vertex::new([0.5, 0.5, -0.3], [1.0, 1.0, 1.0]),
    Vertex::new([-0.5, 0.5, -0.3], [1.0, 1.0, 1.0]),
    // Apex
    Vertex::new([0.0, 0.0, 0.5], [0.5, 0.5, 0.5]),
];

pub const PYRAMID_INDICES: [u16; 18] = [
    // Base
    0, 2, 1, //
    0, 3, 2, //
    // Sides
    0, 1, 4, //
    1, 2, 4, //
    2, 3, 4, //
    3, 0, 4, //
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_matches_struct() {
        let layout = Vertex::layout();
        assert_eq!(layout.array_stride, 24);
        assert_eq!(layout.attributes.len(), 2);
        assert_eq!(layout.attributes[1].offset, 12);
        assert_eq!(layout.attributes[1].shader_location, 1);
    }

    #[test]
    fn test_pyramid_indices_in_range() {
        assert!(PYRAMID_INDICES
            .iter()
            .all(|&index| (index as usize) < PYRAMID_VERTICES.len()));
    }
}
