//! Compute backend binding surface.
//!
//! A backend owns structured buffers and two kernels ([`Kernel::Reduce`],
//! [`Kernel::Steer`]). Per pass the host binds buffers and uniforms by
//! their wire names and then dispatches a number of work-groups; nothing
//! else crosses the seam. [`CpuBackend`] runs the reference kernels on the
//! host, `gpu::WgpuBackend` runs their WGSL translation.
//!
//! Buffers are handed out as [`BufferHandle`]s whose `Drop` releases the
//! backend allocation, so a handle can never outlive its owner.

mod cpu;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use bytemuck::Pod;
use tracing::{debug, warn};

use crate::error::{FlockError, Result};
use crate::uniforms::{names, UniformKind, UniformValue};

pub use cpu::{CpuBackend, DispatchRecord};

/// Wire names of the buffer bindings.
pub mod bindings {
    pub const PARTICLE_BUFFER: &str = "particleBuffer";
    pub const REDUCTION_BUFFER: &str = "reductionBuffer";
    pub const AUDIO_BUFFER: &str = "audioBuffer";
}

/// Thread-group X size of the steering kernel on the bundled backends.
pub const STEER_GROUP_SIZE: u32 = 64;

/// Backend shared between the flock and the buffer handles it owns.
pub type SharedBackend = Rc<RefCell<dyn ComputeBackend>>;

/// The two compute kernels every backend provides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kernel {
    /// One block reduction pass.
    Reduce,
    /// Per-boid steering update.
    Steer,
}

const REDUCE_UNIFORMS: &[(&str, UniformKind)] = &[
    (names::NUM_PARTICLES, UniformKind::U32),
    (names::PASS_INDEX, UniformKind::U32),
];

const STEER_UNIFORMS: &[(&str, UniformKind)] = &[
    (names::TARGET_POSITION, UniformKind::Vec3),
    (names::DELTA_TIME, UniformKind::F32),
    (names::TAP_POSITION, UniformKind::Vec3),
    (names::IS_TAPPED, UniformKind::Bool),
    (names::NUM_PARTICLES, UniformKind::U32),
    (names::FFT_RESOLUTION, UniformKind::U32),
    (names::SEPARATION_WEIGHT, UniformKind::F32),
    (names::ALIGNMENT_WEIGHT, UniformKind::F32),
    (names::TARGET_WEIGHT, UniformKind::F32),
    (names::MOVE_SPEED, UniformKind::F32),
];

impl Kernel {
    pub fn name(self) -> &'static str {
        match self {
            Kernel::Reduce => "reduce",
            Kernel::Steer => "steer",
        }
    }

    /// Buffer bindings the kernel requires before dispatch.
    pub fn bindings(self) -> &'static [&'static str] {
        match self {
            Kernel::Reduce => &[bindings::PARTICLE_BUFFER, bindings::REDUCTION_BUFFER],
            Kernel::Steer => &[
                bindings::PARTICLE_BUFFER,
                bindings::REDUCTION_BUFFER,
                bindings::AUDIO_BUFFER,
            ],
        }
    }

    /// Declared uniforms, in uniform-buffer order.
    pub fn uniform_layout(self) -> &'static [(&'static str, UniformKind)] {
        match self {
            Kernel::Reduce => REDUCE_UNIFORMS,
            Kernel::Steer => STEER_UNIFORMS,
        }
    }

    /// Check that `name` is one of this kernel's bindings.
    pub(crate) fn check_binding(self, name: &str) -> Result<()> {
        if self.bindings().contains(&name) {
            Ok(())
        } else {
            Err(FlockError::lifecycle(format!(
                "kernel '{}' has no buffer binding named '{}'",
                self.name(),
                name
            )))
        }
    }

    /// Check that `value` matches the declared kind of uniform `name`.
    pub(crate) fn check_uniform(self, name: &str, value: &UniformValue) -> Result<()> {
        match self.uniform_layout().iter().find(|(n, _)| *n == name) {
            Some((_, kind)) if *kind == value.kind() => Ok(()),
            Some((_, kind)) => Err(FlockError::lifecycle(format!(
                "uniform '{}' of kernel '{}' expects {:?}, got {:?}",
                name,
                self.name(),
                kind,
                value.kind()
            ))),
            None => Err(FlockError::lifecycle(format!(
                "kernel '{}' has no uniform named '{}'",
                self.name(),
                name
            ))),
        }
    }
}

/// Opaque id of a backend buffer allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub(crate) u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Host-side view of a compute backend.
pub trait ComputeBackend {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Allocate a zeroed structured buffer of `len` elements of `stride` bytes.
    fn create_buffer(&mut self, label: &str, stride: usize, len: usize) -> Result<BufferId>;

    /// Free a buffer. Releasing an unknown id is a no-op.
    fn release_buffer(&mut self, id: BufferId);

    /// Overwrite the start of a buffer with `data`.
    fn write_buffer(&mut self, id: BufferId, data: &[u8]) -> Result<()>;

    /// Copy a whole buffer back to the host.
    fn read_buffer(&mut self, id: BufferId) -> Result<Vec<u8>>;

    /// Number of buffers currently allocated.
    fn live_buffers(&self) -> usize;

    /// Work-group dimensions of `kernel`.
    fn thread_group_size(&self, kernel: Kernel) -> [u32; 3];

    /// Bind `id` to the named buffer slot of `kernel`.
    fn set_buffer(&mut self, kernel: Kernel, name: &str, id: BufferId) -> Result<()>;

    /// Set a named uniform of `kernel`.
    fn set_uniform(&mut self, kernel: Kernel, name: &str, value: UniformValue) -> Result<()>;

    /// Run `kernel` over `groups` work-groups with the current bindings.
    fn dispatch(&mut self, kernel: Kernel, groups: [u32; 3]) -> Result<()>;
}

/// Exclusive owner of one backend buffer.
///
/// Dropping the handle releases the allocation, whatever path the owner
/// exits through.
pub struct BufferHandle {
    id: BufferId,
    label: String,
    stride: usize,
    len: usize,
    backend: SharedBackend,
}

impl BufferHandle {
    /// Allocate a zeroed buffer of `len` elements.
    pub fn allocate(backend: &SharedBackend, label: &str, stride: usize, len: usize) -> Result<Self> {
        if len == 0 || stride == 0 {
            return Err(FlockError::invalid_argument(format!(
                "buffer '{}' needs a non-zero length and stride",
                label
            )));
        }
        let id = backend.borrow_mut().create_buffer(label, stride, len)?;
        debug!(buffer = %id, label, len, stride, "allocated buffer");
        Ok(Self {
            id,
            label: label.to_string(),
            stride,
            len,
            backend: Rc::clone(backend),
        })
    }

    /// Allocate a buffer sized to `data` and upload it.
    pub fn from_slice<T: Pod>(backend: &SharedBackend, label: &str, data: &[T]) -> Result<Self> {
        let handle = Self::allocate(backend, label, std::mem::size_of::<T>(), data.len())?;
        handle.upload(data)?;
        Ok(handle)
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Overwrite the buffer contents with `data`.
    pub fn upload<T: Pod>(&self, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() > self.len * self.stride {
            return Err(FlockError::invalid_argument(format!(
                "{} bytes do not fit buffer '{}' ({} x {} bytes)",
                bytes.len(),
                self.label,
                self.len,
                self.stride
            )));
        }
        self.backend.borrow_mut().write_buffer(self.id, bytes)
    }

    /// Read the whole buffer back as `T`s.
    pub fn read<T: Pod>(&self) -> Result<Vec<T>> {
        let bytes = self.backend.borrow_mut().read_buffer(self.id)?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }
}

impl fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferHandle")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("len", &self.len)
            .finish()
    }
}

impl Drop for BufferHandle {
    fn drop(&mut self) {
        match self.backend.try_borrow_mut() {
            Ok(mut backend) => {
                backend.release_buffer(self.id);
                debug!(buffer = %self.id, label = %self.label, "released buffer");
            }
            Err(_) => warn!(
                buffer = %self.id,
                label = %self.label,
                "backend busy while dropping buffer; allocation leaked"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::BoidState;
    use glam::Vec3;

    fn shared_cpu() -> (Rc<RefCell<CpuBackend>>, SharedBackend) {
        let cpu = Rc::new(RefCell::new(CpuBackend::new(32)));
        let shared: SharedBackend = cpu.clone();
        (cpu, shared)
    }

    #[test]
    fn test_handle_releases_on_drop() {
        let (cpu, shared) = shared_cpu();
        {
            let _a = BufferHandle::allocate(&shared, "a", 4, 8).unwrap();
            let _b = BufferHandle::allocate(&shared, "b", 4, 8).unwrap();
            assert_eq!(cpu.borrow().live_buffers(), 2);
        }
        assert_eq!(cpu.borrow().live_buffers(), 0);
    }

    #[test]
    fn test_handle_releases_on_error_path() {
        let (cpu, shared) = shared_cpu();
        let attempt = || -> Result<()> {
            let _held = BufferHandle::allocate(&shared, "held", 4, 4)?;
            BufferHandle::allocate(&shared, "bad", 4, 0)?;
            Ok(())
        };
        assert!(matches!(attempt(), Err(FlockError::InvalidArgument(_))));
        assert_eq!(cpu.borrow().live_buffers(), 0);
    }

    #[test]
    fn test_upload_and_read_back() {
        let (_cpu, shared) = shared_cpu();
        let boids = vec![BoidState::new(Vec3::ONE, Vec3::Z, 0.05); 4];
        let handle = BufferHandle::from_slice(&shared, "boids", &boids).unwrap();
        assert_eq!(handle.len(), 4);
        assert_eq!(handle.read::<BoidState>().unwrap(), boids);
    }

    #[test]
    fn test_upload_rejects_oversized_data() {
        let (_cpu, shared) = shared_cpu();
        let handle = BufferHandle::allocate(&shared, "small", 4, 2).unwrap();
        assert!(handle.upload(&[1u32, 2, 3]).is_err());
    }

    #[test]
    fn test_kernel_checks_names() {
        assert!(Kernel::Steer.check_binding(bindings::AUDIO_BUFFER).is_ok());
        assert!(Kernel::Reduce.check_binding(bindings::AUDIO_BUFFER).is_err());
        assert!(Kernel::Steer
            .check_uniform(names::IS_TAPPED, &UniformValue::Bool(true))
            .is_ok());
        assert!(Kernel::Steer
            .check_uniform(names::IS_TAPPED, &UniformValue::F32(1.0))
            .is_err());
        assert!(Kernel::Steer
            .check_uniform("tapPos", &UniformValue::Vec3(Vec3::ZERO))
            .is_err());
    }
}
