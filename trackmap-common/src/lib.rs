//! Shared types for the trackmap tools: pixel-space contours, the
//! arc-length indexed track centerline and its corners.

mod types;

pub use types::*;
