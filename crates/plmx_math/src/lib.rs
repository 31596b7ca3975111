// Re-export glam for convenience
pub use glam::*;

// PLMX math types
mod aabb;
pub mod transform;

pub use aabb::Aabb;
pub use transform::{TransformComposer, UpAxis};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dmat4_row_major_layout() {
        // glam stores columns, so a row-major source array lands transposed
        let m = DMat4::from_cols_array(&[
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            4.0, 5.0, 6.0, 1.0,
        ]);
        assert_eq!(m.w_axis, DVec4::new(4.0, 5.0, 6.0, 1.0));
    }
}
