//! Workload Patcher
//!
//! Renders parameterized patches for storage workloads, applies them to
//! deployments and polls rollout status until the rollout converges or the
//! attempt budget runs out.

pub mod error;
pub mod image;
pub mod patcher;
pub mod rollout;
pub mod template;
pub mod templates;

pub use error::PatchError;
pub use image::{base_image, container, first_container_name, has_container};
pub use patcher::{DeploymentPatcher, RolloutPolicy};
pub use rollout::{RolloutStatus, rollout_status};
pub use template::{render, version_lt};
pub use templates::TemplateParams;
