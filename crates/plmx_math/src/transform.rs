// Transform composition for PLMXML placements
//
// Source matrices arrive as 16 row-major floats in the row-vector convention
// (translation in elements 12..14). Loading that array column-major yields the
// equivalent column-vector DMat4, which is what everything downstream uses.

use glam::{DMat3, DMat4, DVec3};
use serde::{Deserialize, Serialize};

/// Per-element tolerance used by identity detection.
pub const IDENTITY_EPSILON: f64 = 1e-9;

/// Build a matrix from 16 row-major source values.
pub fn from_row_major(values: &[f64; 16]) -> DMat4 {
    DMat4::from_cols_array(values)
}

/// Chain transforms given parent-first, exactly as they nest in the source document.
pub fn chain(transforms: &[DMat4]) -> DMat4 {
    transforms
        .iter()
        .fold(DMat4::IDENTITY, |acc, local| compose(&acc, local))
}

/// Place `local` under `parent`.
pub fn compose(parent: &DMat4, local: &DMat4) -> DMat4 {
    *parent * *local
}

/// Extension trait for DMat4 with the display helpers the converter logs with.
pub trait DMat4Ext {
    /// Back to the 16 row-major source values.
    fn to_row_major(&self) -> [f64; 16];

    /// True if every element is within [`IDENTITY_EPSILON`] of the identity.
    ///
    /// For display only; never branch conversion logic on this.
    fn is_identity(&self) -> bool;

    /// `Identity`, or the row-major values with three decimals.
    fn describe(&self) -> String;
}

impl DMat4Ext for DMat4 {
    fn to_row_major(&self) -> [f64; 16] {
        self.to_cols_array()
    }

    fn is_identity(&self) -> bool {
        self.to_cols_array()
            .iter()
            .zip(DMat4::IDENTITY.to_cols_array().iter())
            .all(|(a, b)| (a - b).abs() <= IDENTITY_EPSILON)
    }

    fn describe(&self) -> String {
        if self.is_identity() {
            return "Identity".to_string();
        }
        let values: Vec<String> = self
            .to_row_major()
            .iter()
            .map(|v| format!("{v:.3}"))
            .collect();
        format!("[{}]", values.join(" "))
    }
}

/// Up axis of the target scene. PLMXML geometry is authored Z-up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpAxis {
    /// Swap Z-up source data into a Y-up target.
    #[default]
    Y,
    /// Keep the source axes.
    Z,
}

impl UpAxis {
    /// Rotation taking source axes to target axes.
    pub fn remap(self) -> DMat3 {
        match self {
            // (x, y, z) -> (x, z, -y)
            UpAxis::Y => DMat3::from_cols(
                DVec3::X,
                DVec3::new(0.0, 0.0, -1.0),
                DVec3::new(0.0, 1.0, 0.0),
            ),
            UpAxis::Z => DMat3::IDENTITY,
        }
    }
}

/// Converts source transforms into target-convention transforms.
///
/// The axis remap acts on the rotation block as `P·R·Pᵀ` and carries the
/// translation along with `P·t`; only the translation is multiplied by the
/// unit factor.
#[derive(Clone, Copy, Debug)]
pub struct TransformComposer {
    unit_scale: f64,
    remap: DMat3,
}

impl Default for TransformComposer {
    fn default() -> Self {
        Self::new(1.0, UpAxis::Z)
    }
}

impl TransformComposer {
    pub fn new(unit_scale: f64, up_axis: UpAxis) -> Self {
        Self {
            unit_scale,
            remap: up_axis.remap(),
        }
    }

    pub fn unit_scale(&self) -> f64 {
        self.unit_scale
    }

    /// Convert a single source-space transform.
    pub fn convert(&self, source: &DMat4) -> DMat4 {
        let rotation = self.remap * DMat3::from_mat4(*source) * self.remap.transpose();
        let translation = self.remap * source.w_axis.truncate() * self.unit_scale;

        DMat4::from_cols(
            rotation.x_axis.extend(0.0),
            rotation.y_axis.extend(0.0),
            rotation.z_axis.extend(0.0),
            translation.extend(1.0),
        )
    }

    /// Chain source transforms parent-first, then convert the result.
    pub fn convert_chain(&self, transforms: &[DMat4]) -> DMat4 {
        self.convert(&chain(transforms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    fn approx_eq(a: &DMat4, b: &DMat4) -> bool {
        a.to_cols_array()
            .iter()
            .zip(b.to_cols_array().iter())
            .all(|(x, y)| (x - y).abs() < 1e-9)
    }

    fn sample(angle: f64, offset: DVec3) -> DMat4 {
        DMat4::from_rotation_translation(
            glam::DQuat::from_rotation_z(angle) * glam::DQuat::from_rotation_x(angle * 0.5),
            offset,
        )
    }

    #[test]
    fn test_identity_composition() {
        let m = sample(0.7, DVec3::new(1.0, -2.0, 3.5));

        assert!(approx_eq(&compose(&DMat4::IDENTITY, &m), &m));
        assert!(approx_eq(&compose(&m, &DMat4::IDENTITY), &m));
    }

    #[test]
    fn test_chain_is_associative() {
        let a = sample(0.3, DVec3::new(1.0, 0.0, 0.0));
        let b = sample(-1.1, DVec3::new(0.0, 2.0, 0.5));
        let c = sample(2.4, DVec3::new(-3.0, 0.25, 9.0));

        let left = compose(&compose(&a, &b), &c);
        let right = compose(&a, &compose(&b, &c));

        assert!(approx_eq(&left, &right));
        assert!(approx_eq(&chain(&[a, b, c]), &left));
    }

    #[test]
    fn test_row_major_translation() {
        let m = from_row_major(&[
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.5, 0.25, 2.0, 1.0,
        ]);

        let p = m.transform_point3(DVec3::ZERO);
        assert!((p - DVec3::new(0.5, 0.25, 2.0)).length() < 1e-12);
        assert_eq!(m.to_row_major()[12], 0.5);
    }

    #[test]
    fn test_unit_scale_only_touches_translation() {
        let composer = TransformComposer::new(100.0, UpAxis::Z);
        let source = DMat4::from_scale_rotation_translation(
            DVec3::splat(2.0),
            glam::DQuat::from_rotation_z(0.5),
            DVec3::new(0.01, 0.02, 0.03),
        );

        let converted = composer.convert(&source);

        assert!((converted.w_axis.truncate() - DVec3::new(1.0, 2.0, 3.0)).length() < 1e-9);
        assert!((converted.x_axis - source.x_axis).length() < 1e-12);
        assert!((converted.y_axis - source.y_axis).length() < 1e-12);
    }

    #[test]
    fn test_z_up_to_y_up_remap() {
        let composer = TransformComposer::new(1.0, UpAxis::Y);
        let source = DMat4::from_translation(DVec3::new(0.0, 0.0, 5.0));

        let converted = composer.convert(&source);
        let up = converted.transform_point3(DVec3::ZERO);
        assert!((up - DVec3::new(0.0, 5.0, 0.0)).length() < 1e-12);

        // A rotation about source Z becomes a rotation about target Y.
        let spin = composer.convert(&DMat4::from_rotation_z(0.8));
        assert!(approx_eq(&spin, &DMat4::from_rotation_y(0.8)));
    }

    #[test]
    fn test_chain_converts_like_its_parts() {
        let composer = TransformComposer::new(100.0, UpAxis::Y);
        let parent = sample(0.4, DVec3::new(0.5, -1.0, 2.0));
        let local = sample(-1.3, DVec3::new(0.0, 0.25, 0.1));

        let whole = composer.convert_chain(&[parent, local]);
        let parts = compose(&composer.convert(&parent), &composer.convert(&local));

        assert!(approx_eq(&whole, &parts));
    }

    #[test]
    fn test_remap_preserves_identity() {
        let composer = TransformComposer::new(1000.0, UpAxis::Y);
        assert!(composer.convert(&DMat4::IDENTITY).is_identity());
    }

    #[test]
    fn test_identity_detection_tolerance() {
        let mut values = DMat4::IDENTITY.to_row_major();
        values[5] += 5e-10;
        assert!(from_row_major(&values).is_identity());

        values[5] += 1e-8;
        assert!(!from_row_major(&values).is_identity());
    }

    #[test]
    fn test_describe() {
        assert_eq!(DMat4::IDENTITY.describe(), "Identity");

        let m = DMat4::from_translation(DVec3::new(1.0, 2.0, 3.0));
        assert_eq!(
            m.describe(),
            "[1.000 0.000 0.000 0.000 0.000 1.000 0.000 0.000 0.000 0.000 1.000 0.000 1.000 2.000 3.000 1.000]"
        );
    }
}
