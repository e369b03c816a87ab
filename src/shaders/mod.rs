// SPDX-License-Identifier: GPL-3.0-only
//! WGSL sources for the render programs
//!
//! Quad programs share `vs_main` in [`QUAD_SHADER`]; mesh programs share
//! `vs_main` in [`MESH_SHADER`]. The fragment entry point of each program
//! is given by [`ProgramKind::fragment_entry`].

use crate::gpu::ProgramKind;

/// Image-space quad programs
pub const QUAD_SHADER: &str = include_str!("quad.wgsl");

/// Quadtree mesh programs
pub const MESH_SHADER: &str = include_str!("mesh.wgsl");

/// Vertex entry point shared by every program
pub const VERTEX_ENTRY: &str = "vs_main";

/// WGSL module containing `kind`
pub fn source_for(kind: ProgramKind) -> &'static str {
    if kind.is_mesh() { MESH_SHADER } else { QUAD_SHADER }
}
