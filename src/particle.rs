//! GPU-resident particle and audio layouts.
//!
//! Both structs are `#[repr(C)]` + [`Pod`] so they can be uploaded with
//! `bytemuck::cast_slice` and mirror the WGSL structs below byte for byte
//! (vec3 slots are 16-byte aligned in WGSL storage buffers).

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// State of one boid, also used as the element type of the reduction buffer.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct BoidState {
    pub position: Vec3,
    _pad0: f32,
    pub forward: Vec3,
    _pad1: f32,
    pub color: Vec3,
    _pad2: f32,
    /// Ring layouts store degrees in `x` and radians in `y`.
    pub angle: Vec3,
    pub size: f32,
    pub original_position: Vec3,
    pub radius: f32,
}

impl BoidState {
    /// Byte stride of one element in a structured buffer.
    pub const STRIDE: usize = std::mem::size_of::<BoidState>();

    /// WGSL struct definition matching this layout.
    pub const WGSL_STRUCT: &'static str = r#"struct BoidState {
    position: vec3<f32>,
    forward: vec3<f32>,
    color: vec3<f32>,
    angle: vec3<f32>,
    size: f32,
    original_position: vec3<f32>,
    radius: f32,
};"#;

    /// A boid at `position` heading along `forward`.
    pub fn new(position: Vec3, forward: Vec3, size: f32) -> Self {
        Self {
            position,
            forward,
            size,
            ..Self::default()
        }
    }
}

/// One frequency bin of the captured spectrum.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct AudioState {
    pub amplitude: f32,
    pub frequency_bucket: i32,
}

impl AudioState {
    pub const STRIDE: usize = std::mem::size_of::<AudioState>();

    pub const WGSL_STRUCT: &'static str = r#"struct AudioState {
    amplitude: f32,
    frequency_bucket: i32,
};"#;
}

/// Smallest power of two `>= n`.
///
/// `ceil_pow2(0)` is 1, matching `u32::next_power_of_two`.
#[inline]
pub fn ceil_pow2(n: u32) -> u32 {
    n.next_power_of_two()
}
