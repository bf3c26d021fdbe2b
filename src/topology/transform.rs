//! Geometric frame transforms between coupled patch halves.
//!
//! A cyclic or processor patch pairing may relate its two halves by a pure
//! translation or by a rotation; payloads carrying geometric state apply
//! the transform when values cross the pairing.

/// Rigid transform: rotation tensor plus translation offset.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Transform {
    /// Row-major rotation tensor.
    pub rot: [[f64; 3]; 3],
    pub offset: [f64; 3],
}

const IDENTITY: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    pub const fn identity() -> Self {
        Self {
            rot: IDENTITY,
            offset: [0.0; 3],
        }
    }

    pub const fn translation(offset: [f64; 3]) -> Self {
        Self {
            rot: IDENTITY,
            offset,
        }
    }

    pub const fn rotation(rot: [[f64; 3]; 3]) -> Self {
        Self {
            rot,
            offset: [0.0; 3],
        }
    }

    /// Rotation about the z axis by `angle` radians.
    pub fn rotation_z(angle: f64) -> Self {
        let (s, c) = angle.sin_cos();
        Self::rotation([[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]])
    }

    /// True when the rotational part differs from identity.
    pub fn is_rotational(&self) -> bool {
        const EPS: f64 = 1e-12;
        for i in 0..3 {
            for j in 0..3 {
                if (self.rot[i][j] - IDENTITY[i][j]).abs() > EPS {
                    return true;
                }
            }
        }
        false
    }

    /// Rotate a direction (no offset).
    pub fn apply_vector(&self, v: [f64; 3]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for i in 0..3 {
            out[i] = self.rot[i][0] * v[0] + self.rot[i][1] * v[1] + self.rot[i][2] * v[2];
        }
        out
    }

    /// Rotate and translate a position.
    pub fn apply_point(&self, p: [f64; 3]) -> [f64; 3] {
        let r = self.apply_vector(p);
        [r[0] + self.offset[0], r[1] + self.offset[1], r[2] + self.offset[2]]
    }

    /// The transform mapping the other way: `R^T`, `-R^T t`.
    pub fn inverse(&self) -> Transform {
        let mut rt = [[0.0; 3]; 3];
        for i in 0..3 {
            for j in 0..3 {
                rt[i][j] = self.rot[j][i];
            }
        }
        let mut off = [0.0; 3];
        for i in 0..3 {
            off[i] = -(rt[i][0] * self.offset[0] + rt[i][1] * self.offset[1] + rt[i][2] * self.offset[2]);
        }
        Transform { rot: rt, offset: off }
    }
}
