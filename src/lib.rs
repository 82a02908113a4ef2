//! Character-copying drawing task.
//!
//! Two front ends share the canvas model:
//! - [`task::DrawTask`]: a fixed list of target images, permuted, preloaded
//!   and shown one canvas per trial;
//! - [`session::NetworkSession`]: stimuli fetched from an experiment server
//!   node by node, drawings posted back.

pub mod logger;

pub mod api;
pub mod base;
pub mod canvas;
pub mod config;
pub mod perm;
pub mod preload;
pub mod session;
pub mod stimulus;
pub mod targets;
pub mod task;
