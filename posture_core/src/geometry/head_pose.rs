//! Head-pose Euler angles.
//!
//! Preferred path: the detector's 4x4 face transform, orthonormalised and
//! decomposed into intrinsic pitch/yaw/roll. Fallback: a 6-point PnP solve
//! against a virtual pinhole camera using Horn's quaternion method with a
//! fixed-step power iteration, so the result is deterministic across
//! platforms.

use nalgebra::{Matrix3, Matrix4, Quaternion, UnitQuaternion, Vector3, Vector4};

use crate::types::{FaceLandmarks, MetricSource};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EulerAngles {
    pub pitch_deg: f32,
    pub yaw_deg: f32,
    pub roll_deg: f32,
    pub source: MetricSource,
}

/// Yaw closer than this (radians) to +-pi/2 is gimbal lock; the frame is
/// rejected rather than reporting unstable pitch/roll.
const GIMBAL_EPS: f64 = 1e-3;

const POWER_ITERATIONS: usize = 32;

/// Face-mesh indices of the 6-point facial model.
const NOSE_TIP: usize = 1;
const CHIN: usize = 152;
const LEFT_EYE_OUTER: usize = 33;
const RIGHT_EYE_OUTER: usize = 263;
const LEFT_MOUTH: usize = 61;
const RIGHT_MOUTH: usize = 291;

/// 6-point facial model in millimetres, axes aligned with image coordinates
/// (x right, y down, z away from the camera).
const MODEL_POINTS: [[f64; 3]; 6] = [
    [0.0, 0.0, 0.0],        // nose tip
    [0.0, 330.0, 65.0],     // chin
    [-225.0, -170.0, 135.0], // left eye outer corner
    [225.0, -170.0, 135.0], // right eye outer corner
    [-150.0, 150.0, 125.0], // left mouth corner
    [150.0, 150.0, 125.0],  // right mouth corner
];

/// Prefer the face transform; fall back to PnP when it is absent or singular.
pub fn estimate_head_pose(
    face: &FaceLandmarks,
    image_width: f32,
    image_height: f32,
    horizontal_fov_deg: f32,
) -> Option<EulerAngles> {
    if let Some(matrix) = &face.transformation_matrix
        && let Some(angles) = euler_from_transform(matrix)
    {
        return Some(angles);
    }
    solve_pnp(face, image_width, image_height, horizontal_fov_deg)
}

/// Decompose a 4x4 column-major face transform into Euler angles.
pub fn euler_from_transform(matrix: &[f32]) -> Option<EulerAngles> {
    if matrix.len() != 16 || matrix.iter().any(|v| !v.is_finite()) {
        return None;
    }
    // Column-major: element (row r, col c) lives at c*4 + r.
    let col = |c: usize| {
        Vector3::new(
            f64::from(matrix[c * 4]),
            f64::from(matrix[c * 4 + 1]),
            f64::from(matrix[c * 4 + 2]),
        )
    };
    let rotation = orthonormalise(col(0), col(1))?;
    euler_from_rotation(&rotation, MetricSource::FaceTransform)
}

/// Gram-Schmidt on the first two columns; the third is their cross product,
/// flipped if needed so the determinant stays +1.
fn orthonormalise(c0: Vector3<f64>, c1: Vector3<f64>) -> Option<Matrix3<f64>> {
    let n0 = c0.norm();
    if n0 < 1e-9 {
        return None;
    }
    let e0 = c0 / n0;
    let c1_ortho = c1 - e0 * e0.dot(&c1);
    let n1 = c1_ortho.norm();
    if n1 < 1e-9 {
        return None;
    }
    let e1 = c1_ortho / n1;
    let mut e2 = e0.cross(&e1);
    let rotation = Matrix3::from_columns(&[e0, e1, e2]);
    if rotation.determinant() < 0.0 {
        e2 = -e2;
    }
    Some(Matrix3::from_columns(&[e0, e1, e2]))
}

fn euler_from_rotation(r: &Matrix3<f64>, source: MetricSource) -> Option<EulerAngles> {
    let sin_yaw = (-r[(2, 0)]).clamp(-1.0, 1.0);
    let yaw = sin_yaw.asin();
    if (std::f64::consts::FRAC_PI_2 - yaw.abs()) < GIMBAL_EPS {
        return None;
    }
    let pitch = r[(2, 1)].atan2(r[(2, 2)]);
    let roll = r[(1, 0)].atan2(r[(0, 0)]);
    let angles = EulerAngles {
        pitch_deg: pitch.to_degrees() as f32,
        yaw_deg: yaw.to_degrees() as f32,
        roll_deg: roll.to_degrees() as f32,
        source,
    };
    let finite = angles.pitch_deg.is_finite()
        && angles.yaw_deg.is_finite()
        && angles.roll_deg.is_finite();
    finite.then_some(angles)
}

/// 6-point PnP against a virtual pinhole camera.
///
/// The rotation is recovered with Horn's closed-form absolute-orientation
/// method: cross-covariance of the centred model points against the centred
/// normalised view directions, then the dominant eigenvector of the 4x4
/// quaternion matrix via a 32-step power iteration.
pub fn solve_pnp(
    face: &FaceLandmarks,
    image_width: f32,
    image_height: f32,
    horizontal_fov_deg: f32,
) -> Option<EulerAngles> {
    let width = f64::from(if image_width > 0.0 { image_width } else { 640.0 });
    let height = f64::from(if image_height > 0.0 { image_height } else { 480.0 });
    let fov = f64::from(horizontal_fov_deg).clamp(35.0, 110.0).to_radians();
    let focal = width / (2.0 * (fov / 2.0).tan());
    let cx = width / 2.0;
    let cy = height / 2.0;

    let indices = [
        NOSE_TIP,
        CHIN,
        LEFT_EYE_OUTER,
        RIGHT_EYE_OUTER,
        LEFT_MOUTH,
        RIGHT_MOUTH,
    ];
    let mut directions = [Vector3::zeros(); 6];
    for (slot, &idx) in directions.iter_mut().zip(indices.iter()) {
        let lm = face.landmarks.get(idx)?;
        if !lm.x.is_finite() || !lm.y.is_finite() {
            return None;
        }
        let u = f64::from(lm.x) * width;
        let v = f64::from(lm.y) * height;
        let dir = Vector3::new((u - cx) / focal, (v - cy) / focal, 1.0);
        let norm = dir.norm();
        if norm < 1e-9 {
            return None;
        }
        *slot = dir / norm;
    }

    let model: Vec<Vector3<f64>> = MODEL_POINTS
        .iter()
        .map(|p| Vector3::new(p[0], p[1], p[2]))
        .collect();
    let model_centroid: Vector3<f64> = model.iter().sum::<Vector3<f64>>() / 6.0;
    let dir_centroid: Vector3<f64> = directions.iter().sum::<Vector3<f64>>() / 6.0;

    // Cross-covariance of the centred sets.
    let mut s = Matrix3::<f64>::zeros();
    for (a, b) in model.iter().zip(directions.iter()) {
        s += (a - model_centroid) * (b - dir_centroid).transpose();
    }

    let n = horn_matrix(&s);
    let q = dominant_eigenvector(&n)?;
    let quat = UnitQuaternion::from_quaternion(Quaternion::new(q[0], q[1], q[2], q[3]));
    let rotation: Matrix3<f64> = *quat.to_rotation_matrix().matrix();
    euler_from_rotation(&rotation, MetricSource::SolvePnp)
}

/// Horn's symmetric 4x4 matrix whose dominant eigenvector is the optimal
/// rotation quaternion.
fn horn_matrix(s: &Matrix3<f64>) -> Matrix4<f64> {
    let (sxx, sxy, sxz) = (s[(0, 0)], s[(0, 1)], s[(0, 2)]);
    let (syx, syy, syz) = (s[(1, 0)], s[(1, 1)], s[(1, 2)]);
    let (szx, szy, szz) = (s[(2, 0)], s[(2, 1)], s[(2, 2)]);
    Matrix4::new(
        sxx + syy + szz,
        syz - szy,
        szx - sxz,
        sxy - syx,
        syz - szy,
        sxx - syy - szz,
        sxy + syx,
        szx + sxz,
        szx - sxz,
        sxy + syx,
        -sxx + syy - szz,
        syz + szy,
        sxy - syx,
        szx + sxz,
        syz + szy,
        -sxx - syy + szz,
    )
}

/// Fixed-step power iteration. A Gershgorin shift keeps the most-positive
/// eigenvalue dominant in magnitude so the iteration converges to it.
fn dominant_eigenvector(n: &Matrix4<f64>) -> Option<Vector4<f64>> {
    let mut shift = 0.0f64;
    for r in 0..4 {
        let row_sum: f64 = (0..4).map(|c| n[(r, c)].abs()).sum();
        shift = shift.max(row_sum);
    }
    let shifted = n + Matrix4::identity() * shift;

    let mut v = Vector4::new(0.5, 0.5, 0.5, 0.5);
    for _ in 0..POWER_ITERATIONS {
        let next = shifted * v;
        let norm = next.norm();
        if !norm.is_finite() || norm < 1e-12 {
            return None;
        }
        v = next / norm;
    }
    Some(v)
}
