//! Transform helpers over `nalgebra-glm`.
//!
//! Matrices are `glm::Mat4` everywhere on the CPU side. Uniform blocks store them as they are,
//! since `nalgebra` keeps its storage column-major like WGSL; [`to_gpu_matrix`] exposes the same
//! 16 floats for code that wants the raw array.

use nalgebra_glm as glm;

/// Vertical field of view of the camera, in radians.
pub const FIELD_OF_VIEW: f32 = std::f32::consts::FRAC_PI_4;
pub const Z_NEAR: f32 = 0.01;
pub const Z_FAR: f32 = 100.0;

/// Flattens `matrix` column by column, the order WGSL expects for `mat4x4f`.
///
/// Equivalent to transposing a row-major matrix and reading it row by row.
pub fn to_gpu_matrix(matrix: &glm::Mat4) -> [f32; 16] {
    let mut flat = [0.0; 16];
    flat.copy_from_slice(matrix.as_slice());
    flat
}

pub fn translation(offset: &glm::Vec3) -> glm::Mat4 {
    glm::translation(offset)
}

/// `outer * inner`: applies `inner` first.
pub fn compose(outer: &glm::Mat4, inner: &glm::Mat4) -> glm::Mat4 {
    outer * inner
}

/// Right-handed perspective projection with a `[0, 1]` depth range.
pub fn projection(width: u32, height: u32) -> glm::Mat4 {
    let aspect = width as f32 / height.max(1) as f32;
    glm::perspective_rh_zo(aspect, FIELD_OF_VIEW, Z_NEAR, Z_FAR)
}

/// Camera looking down at the origin from the front and slightly above.
pub fn view() -> glm::Mat4 {
    glm::look_at_rh(
        &glm::vec3(0.0, -2.5, 1.5),
        &glm::vec3(0.0, 0.0, 0.0),
        &glm::vec3(0.0, 0.0, 1.0),
    )
}

/// Model matrix of an instance placed at `offset`, spun around its vertical axis by `angle`.
pub fn model(offset: &glm::Vec3, angle: f32) -> glm::Mat4 {
    compose(
        &translation(offset),
        &glm::rotation(angle, &glm::vec3(0.0, 0.0, 1.0)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_matrix_is_column_major() {
        let matrix = translation(&glm::vec3(1.0, 2.0, 3.0));
        let flat = to_gpu_matrix(&matrix);
        assert_eq!(&flat[12..16], &[1.0, 2.0, 3.0, 1.0]);
        assert_eq!(flat[3], 0.0);
    }

    #[test]
    fn test_model_without_rotation_is_translation() {
        let offset = glm::vec3(-0.5, -0.5, -0.25);
        assert_eq!(model(&offset, 0.0), translation(&offset));
    }

    #[test]
    fn test_compose_inverse_is_identity() {
        let matrix = model(&glm::vec3(0.5, 0.5, -0.25), 0.7);
        let inverse = glm::inverse(&matrix);
        let identity: glm::Mat4 = glm::identity();
        assert!((compose(&matrix, &inverse) - identity).norm() < 1e-5);
    }
}
