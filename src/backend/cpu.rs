//! CPU reference backend.
//!
//! Executes dispatches group by group on the host with the functions in
//! [`crate::kernels`], and records every dispatch so callers can inspect the
//! exact pass sequence, bindings and uniforms.

use std::collections::HashMap;

use tracing::trace;

use super::{BufferId, ComputeBackend, Kernel, STEER_GROUP_SIZE};
use crate::backend::bindings;
use crate::error::{FlockError, Result};
use crate::kernels::{self, SteerParams};
use crate::particle::{AudioState, BoidState};
use crate::uniforms::{names, UniformSet, UniformValue};

struct CpuBuffer {
    label: String,
    stride: usize,
    bytes: Vec<u8>,
}

/// One recorded dispatch.
#[derive(Clone, Debug)]
pub struct DispatchRecord {
    pub kernel: Kernel,
    pub groups: [u32; 3],
    /// `(binding name, buffer)` pairs in the kernel's binding order.
    pub bindings: Vec<(&'static str, BufferId)>,
    pub uniforms: UniformSet,
}

impl DispatchRecord {
    /// Buffer bound to `name` at dispatch time.
    pub fn binding(&self, name: &str) -> Option<BufferId> {
        self.bindings.iter().find(|(n, _)| *n == name).map(|(_, id)| *id)
    }
}

#[derive(Default)]
struct KernelState {
    bindings: HashMap<&'static str, BufferId>,
    uniforms: UniformSet,
}

/// Host-memory backend running the reference kernels.
pub struct CpuBackend {
    buffers: HashMap<BufferId, CpuBuffer>,
    next_id: u64,
    reduce: KernelState,
    steer: KernelState,
    reduce_group_size: u32,
    log: Vec<DispatchRecord>,
}

impl CpuBackend {
    /// Create a backend whose reduce kernel works on blocks of `block_size`.
    pub fn new(block_size: u32) -> Self {
        Self {
            buffers: HashMap::new(),
            next_id: 1,
            reduce: KernelState {
                uniforms: UniformSet::from_layout(Kernel::Reduce.uniform_layout()),
                ..KernelState::default()
            },
            steer: KernelState {
                uniforms: UniformSet::from_layout(Kernel::Steer.uniform_layout()),
                ..KernelState::default()
            },
            reduce_group_size: block_size.max(1),
            log: Vec::new(),
        }
    }

    /// Every dispatch since creation (or the last [`clear_log`](Self::clear_log)).
    pub fn dispatch_log(&self) -> &[DispatchRecord] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    /// Label a live buffer was created with.
    pub fn buffer_label(&self, id: BufferId) -> Option<&str> {
        self.buffers.get(&id).map(|b| b.label.as_str())
    }

    fn state(&self, kernel: Kernel) -> &KernelState {
        match kernel {
            Kernel::Reduce => &self.reduce,
            Kernel::Steer => &self.steer,
        }
    }

    fn state_mut(&mut self, kernel: Kernel) -> &mut KernelState {
        match kernel {
            Kernel::Reduce => &mut self.reduce,
            Kernel::Steer => &mut self.steer,
        }
    }

    fn bound(&self, kernel: Kernel, name: &str) -> Result<BufferId> {
        let id = self.state(kernel).bindings.get(name).copied().ok_or_else(|| {
            FlockError::lifecycle(format!(
                "kernel '{}' dispatched without '{}' bound",
                kernel.name(),
                name
            ))
        })?;
        if self.buffers.contains_key(&id) {
            Ok(id)
        } else {
            Err(FlockError::lifecycle(format!(
                "buffer {} bound to '{}' was released",
                id, name
            )))
        }
    }

    fn load<T: bytemuck::Pod>(&self, id: BufferId) -> Vec<T> {
        self.buffers
            .get(&id)
            .map(|b| bytemuck::pod_collect_to_vec(&b.bytes))
            .unwrap_or_default()
    }

    fn store<T: bytemuck::Pod>(&mut self, id: BufferId, data: &[T]) {
        if let Some(buffer) = self.buffers.get_mut(&id) {
            let bytes: &[u8] = bytemuck::cast_slice(data);
            let n = bytes.len().min(buffer.bytes.len());
            buffer.bytes[..n].copy_from_slice(&bytes[..n]);
        }
    }

    fn run_reduce(&mut self, groups: u32) -> Result<()> {
        let src = self.bound(Kernel::Reduce, bindings::PARTICLE_BUFFER)?;
        let dst = self.bound(Kernel::Reduce, bindings::REDUCTION_BUFFER)?;
        let uniforms = &self.reduce.uniforms;
        let num = uniforms
            .get(names::NUM_PARTICLES)
            .and_then(|v| v.as_u32())
            .unwrap_or(0) as usize;
        let pass_index = uniforms
            .get(names::PASS_INDEX)
            .and_then(|v| v.as_u32())
            .unwrap_or(0);

        // Reading the whole source first keeps in-place passes (src == dst) well defined.
        let input: Vec<BoidState> = self.load(src);
        let mut output: Vec<BoidState> = self.load(dst);
        let block = self.reduce_group_size as usize;
        let num = num.min(input.len());

        for g in 0..groups as usize {
            let start = g * block;
            if start >= num || g >= output.len() {
                break;
            }
            let end = (start + block).min(num);
            output[g] = kernels::reduce_block(&input[start..end], pass_index);
        }

        self.store(dst, &output);
        Ok(())
    }

    fn run_steer(&mut self, groups: u32) -> Result<()> {
        let particles_id = self.bound(Kernel::Steer, bindings::PARTICLE_BUFFER)?;
        let reduction_id = self.bound(Kernel::Steer, bindings::REDUCTION_BUFFER)?;
        let audio_id = self.bound(Kernel::Steer, bindings::AUDIO_BUFFER)?;
        let params = SteerParams::from_uniforms(&self.steer.uniforms)?;

        let mut particles: Vec<BoidState> = self.load(particles_id);
        let reduction: Vec<BoidState> = self.load(reduction_id);
        let audio: Vec<AudioState> = self.load(audio_id);

        let summary = kernels::flock_summary(&reduction, &particles, params.num_particles);
        let invocations = (groups * STEER_GROUP_SIZE) as usize;
        let count = invocations
            .min(params.num_particles as usize)
            .min(particles.len());

        for (i, boid) in particles.iter_mut().enumerate().take(count) {
            *boid = kernels::steer(boid, i as u32, &params, &summary, &audio);
        }

        self.store(particles_id, &particles);
        Ok(())
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn create_buffer(&mut self, label: &str, stride: usize, len: usize) -> Result<BufferId> {
        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.buffers.insert(
            id,
            CpuBuffer {
                label: label.to_string(),
                stride,
                bytes: vec![0; stride * len],
            },
        );
        Ok(id)
    }

    fn release_buffer(&mut self, id: BufferId) {
        self.buffers.remove(&id);
        for state in [&mut self.reduce, &mut self.steer] {
            state.bindings.retain(|_, bound| *bound != id);
        }
    }

    fn write_buffer(&mut self, id: BufferId, data: &[u8]) -> Result<()> {
        let buffer = self
            .buffers
            .get_mut(&id)
            .ok_or_else(|| FlockError::lifecycle(format!("write to released buffer {}", id)))?;
        if data.len() > buffer.bytes.len() {
            return Err(FlockError::invalid_argument(format!(
                "{} bytes overflow buffer '{}' of {} elements",
                data.len(),
                buffer.label,
                buffer.bytes.len() / buffer.stride.max(1)
            )));
        }
        buffer.bytes[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&mut self, id: BufferId) -> Result<Vec<u8>> {
        self.buffers
            .get(&id)
            .map(|b| b.bytes.clone())
            .ok_or_else(|| FlockError::lifecycle(format!("read from released buffer {}", id)))
    }

    fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    fn thread_group_size(&self, kernel: Kernel) -> [u32; 3] {
        match kernel {
            Kernel::Reduce => [self.reduce_group_size, 1, 1],
            Kernel::Steer => [STEER_GROUP_SIZE, 1, 1],
        }
    }

    fn set_buffer(&mut self, kernel: Kernel, name: &str, id: BufferId) -> Result<()> {
        kernel.check_binding(name)?;
        if !self.buffers.contains_key(&id) {
            return Err(FlockError::lifecycle(format!(
                "cannot bind released buffer {} to '{}'",
                id, name
            )));
        }
        if let Some(slot) = kernel.bindings().iter().copied().find(|b| *b == name) {
            self.state_mut(kernel).bindings.insert(slot, id);
        }
        Ok(())
    }

    fn set_uniform(&mut self, kernel: Kernel, name: &str, value: UniformValue) -> Result<()> {
        kernel.check_uniform(name, &value)?;
        self.state_mut(kernel).uniforms.set(name, value);
        Ok(())
    }

    fn dispatch(&mut self, kernel: Kernel, groups: [u32; 3]) -> Result<()> {
        trace!(kernel = kernel.name(), ?groups, "cpu dispatch");
        match kernel {
            Kernel::Reduce => self.run_reduce(groups[0])?,
            Kernel::Steer => self.run_steer(groups[0])?,
        }

        let state = self.state(kernel);
        let bindings = kernel
            .bindings()
            .iter()
            .filter_map(|name| state.bindings.get(name).map(|id| (*name, *id)))
            .collect();
        let record = DispatchRecord {
            kernel,
            groups,
            bindings,
            uniforms: state.uniforms.clone(),
        };
        self.log.push(record);
        Ok(())
    }
}
