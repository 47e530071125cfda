//! Geometry kernels: pure functions from landmark payloads to scalar
//! posture metrics. Every kernel returns `None` on singular or non-finite
//! input; downstream stages treat a missing value as gated.

mod dpr;
mod ehd;
mod head_pose;

pub use dpr::{DprSample, compute_dpr, face_size};
pub use ehd::{EhdSample, compute_ehd, pose_metric_confidence};
pub use head_pose::{EulerAngles, estimate_head_pose, euler_from_transform, solve_pnp};
