//! Headless wgpu backend.
//!
//! Runs the kernels from [`shaders`] as compute pipelines on whatever adapter
//! wgpu picks. Every dispatch is its own submission: uniforms are written
//! with `queue.write_buffer`, a bind group is built from the current
//! bindings, and the pass is recorded and submitted. Readback copies into a
//! `MAP_READ` staging buffer and blocks on `device.poll`.

pub mod shaders;

use std::collections::HashMap;
use std::sync::mpsc;

use tracing::{debug, info, trace};

use crate::backend::{BufferId, ComputeBackend, Kernel, STEER_GROUP_SIZE};
use crate::error::{FlockError, GpuError, Result};
use crate::uniforms::{UniformSet, UniformValue};

/// Largest reduce block a workgroup may hold on default limits.
pub const MAX_BLOCK_SIZE: u32 = 256;

struct GpuBuffer {
    buffer: wgpu::Buffer,
    label: String,
    size: u64,
}

struct GpuKernel {
    pipeline: wgpu::ComputePipeline,
    uniform_buffer: wgpu::Buffer,
    uniforms: UniformSet,
    bindings: HashMap<&'static str, BufferId>,
}

/// Compute backend on a wgpu device.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_info: wgpu::AdapterInfo,
    buffers: HashMap<BufferId, GpuBuffer>,
    next_id: u64,
    reduce: GpuKernel,
    steer: GpuKernel,
    block_size: u32,
    /// Copy of the reduce input when it aliases the output.
    alias_staging: Option<wgpu::Buffer>,
}

impl WgpuBackend {
    /// Open the default adapter and build both pipelines.
    pub fn new(block_size: u32) -> Result<Self> {
        pollster::block_on(Self::new_async(block_size))
    }

    pub async fn new_async(block_size: u32) -> Result<Self> {
        if block_size < 2 || !block_size.is_power_of_two() || block_size > MAX_BLOCK_SIZE {
            return Err(FlockError::invalid_argument(format!(
                "wgpu reduce block size must be a power of two in 2..={}, got {}",
                MAX_BLOCK_SIZE, block_size
            )));
        }

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;
        let adapter_info = adapter.get_info();

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Flock Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(GpuError::from)?;

        info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            block_size,
            "wgpu backend ready"
        );

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let reduce = create_kernel(&device, Kernel::Reduce, &shaders::reduce_shader(block_size));
        let steer = create_kernel(&device, Kernel::Steer, &shaders::steer_shader(STEER_GROUP_SIZE));
        if let Some(err) = device.pop_error_scope().await {
            return Err(FlockError::lifecycle(format!(
                "compute pipeline creation failed: {}",
                err
            )));
        }

        Ok(Self {
            device,
            queue,
            adapter_info,
            buffers: HashMap::new(),
            next_id: 1,
            reduce,
            steer,
            block_size,
            alias_staging: None,
        })
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    fn kernel(&self, kernel: Kernel) -> &GpuKernel {
        match kernel {
            Kernel::Reduce => &self.reduce,
            Kernel::Steer => &self.steer,
        }
    }

    fn kernel_mut(&mut self, kernel: Kernel) -> &mut GpuKernel {
        match kernel {
            Kernel::Reduce => &mut self.reduce,
            Kernel::Steer => &mut self.steer,
        }
    }

    fn bound(&self, kernel: Kernel, name: &str) -> Result<BufferId> {
        let id = self.kernel(kernel).bindings.get(name).copied().ok_or_else(|| {
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

    /// Make sure the alias staging buffer holds at least `size` bytes.
    fn ensure_alias_staging(&mut self, size: u64) {
        let too_small = self
            .alias_staging
            .as_ref()
            .map_or(true, |b| b.size() < size);
        if too_small {
            self.alias_staging = Some(self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Reduce Alias Staging"),
                size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
        }
    }
}

fn create_kernel(device: &wgpu::Device, kernel: Kernel, source: &str) -> GpuKernel {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(kernel.name()),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(kernel.name()),
        layout: None, // Auto layout
        module: &shader,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    });

    let uniforms = UniformSet::from_layout(kernel.uniform_layout());
    let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Kernel Uniforms"),
        size: uniforms.to_bytes().len() as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    GpuKernel {
        pipeline,
        uniform_buffer,
        uniforms,
        bindings: HashMap::new(),
    }
}

impl ComputeBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn create_buffer(&mut self, label: &str, stride: usize, len: usize) -> Result<BufferId> {
        let size = (stride * len) as u64;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.buffers.insert(
            id,
            GpuBuffer {
                buffer,
                label: label.to_string(),
                size,
            },
        );
        Ok(id)
    }

    fn release_buffer(&mut self, id: BufferId) {
        if let Some(gpu) = self.buffers.remove(&id) {
            gpu.buffer.destroy();
        }
        for kernel in [&mut self.reduce, &mut self.steer] {
            kernel.bindings.retain(|_, bound| *bound != id);
        }
    }

    fn write_buffer(&mut self, id: BufferId, data: &[u8]) -> Result<()> {
        let gpu = self.buffers.get(&id).ok_or(GpuError::UnknownBuffer(id.0))?;
        if data.len() as u64 > gpu.size {
            return Err(FlockError::invalid_argument(format!(
                "{} bytes overflow buffer '{}' of {} bytes",
                data.len(),
                gpu.label,
                gpu.size
            )));
        }
        self.queue.write_buffer(&gpu.buffer, 0, data);
        Ok(())
    }

    fn read_buffer(&mut self, id: BufferId) -> Result<Vec<u8>> {
        let gpu = self.buffers.get(&id).ok_or(GpuError::UnknownBuffer(id.0))?;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging"),
            size: gpu.size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(&gpu.buffer, 0, &staging, 0, gpu.size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|e| GpuError::BufferMapping(e.to_string()))?
            .map_err(|e| GpuError::BufferMapping(e.to_string()))?;
        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(bytes)
    }

    fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    fn thread_group_size(&self, kernel: Kernel) -> [u32; 3] {
        match kernel {
            Kernel::Reduce => [self.block_size, 1, 1],
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
            self.kernel_mut(kernel).bindings.insert(slot, id);
        }
        Ok(())
    }

    fn set_uniform(&mut self, kernel: Kernel, name: &str, value: UniformValue) -> Result<()> {
        kernel.check_uniform(name, &value)?;
        self.kernel_mut(kernel).uniforms.set(name, value);
        Ok(())
    }

    fn dispatch(&mut self, kernel: Kernel, groups: [u32; 3]) -> Result<()> {
        // Resolve bindings first so a missing one fails before any GPU work.
        let ids = kernel
            .bindings()
            .iter()
            .map(|name| self.bound(kernel, name))
            .collect::<Result<Vec<_>>>()?;

        // The reduce kernel reads binding 0 and writes binding 1; when a later
        // pass reduces the scratch buffer in place, read from a copy instead.
        let aliased = kernel == Kernel::Reduce && ids.len() == 2 && ids[0] == ids[1];
        let alias_size = if aliased {
            self.buffers.get(&ids[0]).map_or(0, |b| b.size)
        } else {
            0
        };
        if aliased {
            self.ensure_alias_staging(alias_size);
        }

        let gpu_kernel = self.kernel(kernel);
        self.queue
            .write_buffer(&gpu_kernel.uniform_buffer, 0, &gpu_kernel.uniforms.to_bytes());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(kernel.name()),
            });

        let mut resources: Vec<&wgpu::Buffer> = Vec::with_capacity(ids.len());
        for (slot, id) in ids.iter().enumerate() {
            let buffer = &self
                .buffers
                .get(id)
                .ok_or(GpuError::UnknownBuffer(id.0))?
                .buffer;
            match (&self.alias_staging, aliased && slot == 0) {
                (Some(staging), true) => {
                    encoder.copy_buffer_to_buffer(buffer, 0, staging, 0, alias_size);
                    resources.push(staging);
                }
                _ => resources.push(buffer),
            }
        }
        resources.push(&gpu_kernel.uniform_buffer);

        let layout = gpu_kernel.pipeline.get_bind_group_layout(0);
        let entries: Vec<wgpu::BindGroupEntry> = resources
            .iter()
            .enumerate()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel.name()),
            layout: &layout,
            entries: &entries,
        });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.name()),
                timestamp_writes: None,
            });
            pass.set_pipeline(&gpu_kernel.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let [x, y, z] = groups;
            pass.dispatch_workgroups(x, y, z);
        }
        self.queue.submit(Some(encoder.finish()));

        trace!(kernel = kernel.name(), ?groups, aliased, "wgpu dispatch");
        if aliased {
            debug!(bytes = alias_size, "reduce input copied to staging");
        }
        Ok(())
    }
}
