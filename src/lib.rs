// SPDX-License-Identifier: GPL-3.0-only

//! RGBD Viewer - real-time debug front-end for RGBD mesh tracking
//!
//! A depth camera delivers color and depth frames on its own thread; the
//! render loop submits the newest one to a mesh tracker and draws the
//! tracker's intermediate products (vertex and normal maps, histograms,
//! segmentations, plane projections, quadtree meshes) in one of several
//! display modes.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`frame`]: Frame types, the latest-wins frame slot and the intake listener
//! - [`backends`]: Depth camera device abstraction and synthetic devices
//! - [`tracker`]: Mesh tracker interface and the reference depth tracker
//! - [`gpu`]: GPU backend seam and the grouped GPU resource set
//! - [`render`]: Display modes and their render procedures
//! - [`input`]: Key bindings and mouse camera control
//! - [`viewer`]: The fixed-tick render loop
//! - [`terminal`]: Terminal presentation surface
//! - [`config`]: User configuration handling
//!
//! # Example
//!
//! ```ignore
//! // Usually run via the binary:
//! // rgbd-viewer --device synthetic-room --mode quadtree
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod frame;
pub mod gpu;
pub mod input;
pub mod render;
pub mod shaders;
pub mod terminal;
pub mod tracker;
pub mod viewer;

// Re-export commonly used types
pub use config::Config;
pub use errors::{ViewerError, ViewerResult};
pub use frame::{FrameSlot, RgbdFrame, Resolution, Timestamp};
pub use render::{DisplayMode, DisplayState};
pub use viewer::{MeshViewer, TickReport, ViewerSettings};
