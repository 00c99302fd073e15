//! Named uniforms passed to compute kernels.
//!
//! Every kernel parameter is addressed by its wire name (see [`names`]),
//! exactly as the existing kernels declare it. The CPU backend reads
//! values by name; the wgpu backend packs a [`UniformSet`] into a uniform
//! buffer whose WGSL struct is generated from the same ordered list.
//!
//! # Example
//!
//! ```ignore
//! let mut set = UniformSet::new();
//! set.set(names::DELTA_TIME, 0.016f32);
//! set.set(names::TARGET_POSITION, Vec3::ZERO);
//! set.set(names::IS_TAPPED, false);
//! ```

use glam::Vec3;
use std::collections::HashMap;

/// Wire names of every scalar/vector uniform.
pub mod names {
    pub const DELTA_TIME: &str = "deltaTime";
    pub const NUM_PARTICLES: &str = "numParticles";
    pub const FFT_RESOLUTION: &str = "fftResolution";
    pub const SEPARATION_WEIGHT: &str = "separationWeight";
    pub const ALIGNMENT_WEIGHT: &str = "alignmentWeight";
    pub const TARGET_WEIGHT: &str = "targetWeight";
    pub const MOVE_SPEED: &str = "moveSpeed";
    pub const TARGET_POSITION: &str = "targetPosition";
    pub const TAP_POSITION: &str = "tapPosition";
    pub const IS_TAPPED: &str = "isTapped";
    /// Reduce kernel only: 0-based index of the current pass.
    pub const PASS_INDEX: &str = "passIndex";
}

/// Supported uniform value types.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    F32(f32),
    I32(i32),
    U32(u32),
    /// Stored as `u32` on the GPU (WGSL forbids `bool` in uniform buffers).
    Bool(bool),
    Vec3(Vec3),
}

/// Type tag of a [`UniformValue`], used to declare kernel layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniformKind {
    F32,
    I32,
    U32,
    Bool,
    Vec3,
}

impl UniformKind {
    /// WGSL type name for this kind.
    pub fn wgsl_type(self) -> &'static str {
        match self {
            UniformKind::F32 => "f32",
            UniformKind::I32 => "i32",
            UniformKind::U32 | UniformKind::Bool => "u32",
            UniformKind::Vec3 => "vec3<f32>",
        }
    }

    /// Zero value of this kind.
    pub fn zero(self) -> UniformValue {
        match self {
            UniformKind::F32 => UniformValue::F32(0.0),
            UniformKind::I32 => UniformValue::I32(0),
            UniformKind::U32 => UniformValue::U32(0),
            UniformKind::Bool => UniformValue::Bool(false),
            UniformKind::Vec3 => UniformValue::Vec3(Vec3::ZERO),
        }
    }

    fn alignment(self) -> usize {
        match self {
            UniformKind::Vec3 => 16,
            _ => 4,
        }
    }
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformValue::F32(_) => UniformKind::F32,
            UniformValue::I32(_) => UniformKind::I32,
            UniformValue::U32(_) => UniformKind::U32,
            UniformValue::Bool(_) => UniformKind::Bool,
            UniformValue::Vec3(_) => UniformKind::Vec3,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            UniformValue::F32(v) => Some(v),
            _ => None,
        }
    }

    /// Integer view of `U32`, `I32` (if non-negative) and `Bool`.
    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            UniformValue::U32(v) => Some(v),
            UniformValue::I32(v) => u32::try_from(v).ok(),
            UniformValue::Bool(v) => Some(v as u32),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            UniformValue::Bool(v) => Some(v),
            UniformValue::U32(v) => Some(v != 0),
            _ => None,
        }
    }

    pub fn as_vec3(&self) -> Option<Vec3> {
        match *self {
            UniformValue::Vec3(v) => Some(v),
            _ => None,
        }
    }

    /// Write this value to a byte buffer.
    pub fn write_bytes(&self, buf: &mut Vec<u8>) {
        match self {
            UniformValue::F32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            UniformValue::I32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            UniformValue::U32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            UniformValue::Bool(v) => buf.extend_from_slice(&(*v as u32).to_le_bytes()),
            UniformValue::Vec3(v) => {
                buf.extend_from_slice(&v.x.to_le_bytes());
                buf.extend_from_slice(&v.y.to_le_bytes());
                buf.extend_from_slice(&v.z.to_le_bytes());
                // No padding here - a following scalar may sit in the vec3's trailing bytes
            }
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::F32(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::I32(v)
    }
}

impl From<u32> for UniformValue {
    fn from(v: u32) -> Self {
        UniformValue::U32(v)
    }
}

impl From<bool> for UniformValue {
    fn from(v: bool) -> Self {
        UniformValue::Bool(v)
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        UniformValue::Vec3(v)
    }
}

/// Ordered collection of named uniform values.
#[derive(Clone, Debug, Default)]
pub struct UniformSet {
    /// Ordered list of (name, value) pairs.
    /// Order matters for WGSL struct layout.
    values: Vec<(String, UniformValue)>,
    /// Quick lookup by name.
    indices: HashMap<String, usize>,
}

impl UniformSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding the zero value of every `(name, kind)` in `layout`,
    /// in layout order.
    pub fn from_layout(layout: &[(&str, UniformKind)]) -> Self {
        let mut set = Self::new();
        for &(name, kind) in layout {
            set.set(name, kind.zero());
        }
        set
    }

    /// Add or update a uniform value.
    pub fn set<V: Into<UniformValue>>(&mut self, name: &str, value: V) {
        let value = value.into();
        if let Some(&idx) = self.indices.get(name) {
            self.values[idx].1 = value;
        } else {
            let idx = self.values.len();
            self.values.push((name.to_string(), value));
            self.indices.insert(name.to_string(), idx);
        }
    }

    pub fn get(&self, name: &str) -> Option<&UniformValue> {
        self.indices.get(name).map(|&idx| &self.values[idx].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &UniformValue)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Generate the body of a WGSL `struct` for this set.
    pub(crate) fn to_wgsl_fields(&self) -> String {
        self.values
            .iter()
            .map(|(name, value)| format!("    {}: {},", name, value.kind().wgsl_type()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Serialize all values to bytes for GPU upload, padded to 16 bytes.
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for (_, value) in &self.values {
            let align = value.kind().alignment();
            while buf.len() % align != 0 {
                buf.push(0);
            }
            value.write_bytes(&mut buf);
        }
        while buf.len() % 16 != 0 {
            buf.push(0);
        }
        buf
    }
}
