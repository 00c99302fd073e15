//! Multi-pass block reduction over the particle buffer.
//!
//! Each pass folds blocks of `block_size` entries into one aggregate entry,
//! so a power-of-two particle array of length `N` shrinks to `N / B`, then
//! `N / B²`, until fewer than `B` entries remain. The first pass reads the
//! particle buffer; every later pass reads the scratch buffer the previous
//! pass wrote.
//!
//! An array shorter than one block has an empty pass plan; [`ReductionPipeline::run`]
//! still folds it into `scratch[0]` with a single one-group pass.

use tracing::debug;

use crate::backend::{bindings, BufferHandle, Kernel, SharedBackend};
use crate::error::{FlockError, Result};
use crate::uniforms::names;

/// Outcome of one reduction chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReductionReport {
    /// Number of dispatched passes.
    pub passes: u32,
    /// Number of leading scratch entries holding the result.
    pub final_len: u32,
}

/// Drives the reduce kernel pass over pass.
#[derive(Clone, Copy, Debug)]
pub struct ReductionPipeline {
    block_size: u32,
}

impl ReductionPipeline {
    /// `block_size` must be a power of two of at least 2.
    pub fn new(block_size: u32) -> Result<Self> {
        if block_size < 2 || !block_size.is_power_of_two() {
            return Err(FlockError::invalid_argument(format!(
                "reduction block size must be a power of two >= 2, got {}",
                block_size
            )));
        }
        Ok(Self { block_size })
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Input lengths of every pass for an array of `n` entries.
    ///
    /// `n = 1024, B = 32` gives `[1024, 32]`; `n < B` gives no passes.
    pub fn pass_plan(&self, n: u32) -> Result<Vec<u32>> {
        if n == 0 || !n.is_power_of_two() {
            return Err(FlockError::invalid_argument(format!(
                "reduction length must be a non-zero power of two, got {}",
                n
            )));
        }
        let mut plan = Vec::new();
        let mut n = n;
        while n >= self.block_size {
            plan.push(n);
            n /= self.block_size;
        }
        Ok(plan)
    }

    /// Reduce the first `n` entries of `particles` into `scratch`.
    pub fn run(
        &self,
        backend: &SharedBackend,
        particles: &BufferHandle,
        scratch: &BufferHandle,
        n: u32,
    ) -> Result<ReductionReport> {
        let plan = self.pass_plan(n)?;
        if (n as usize) > particles.len() {
            return Err(FlockError::invalid_argument(format!(
                "reduction length {} exceeds particle buffer '{}' of {}",
                n,
                particles.label(),
                particles.len()
            )));
        }
        let aggregates = (n / self.block_size).max(1);
        if aggregates as usize > scratch.len() {
            return Err(FlockError::invalid_argument(format!(
                "scratch buffer '{}' of {} cannot hold {} aggregates",
                scratch.label(),
                scratch.len(),
                aggregates
            )));
        }

        let mut backend = backend.borrow_mut();
        let [group_x, _, _] = backend.thread_group_size(Kernel::Reduce);
        let group_x = group_x.max(1);

        // Too short for a full block: fold everything into scratch[0] with one
        // group, so steering never reads the buffer it writes.
        let plan = if plan.is_empty() { vec![n] } else { plan };

        let mut current = particles.id();
        for (pass, &len) in plan.iter().enumerate() {
            backend.set_buffer(Kernel::Reduce, bindings::PARTICLE_BUFFER, current)?;
            backend.set_buffer(Kernel::Reduce, bindings::REDUCTION_BUFFER, scratch.id())?;
            backend.set_uniform(Kernel::Reduce, names::NUM_PARTICLES, len.into())?;
            backend.set_uniform(Kernel::Reduce, names::PASS_INDEX, (pass as u32).into())?;
            backend.dispatch(Kernel::Reduce, [(len / group_x).max(1), 1, 1])?;
            debug!(pass, len, out = (len / self.block_size).max(1), "reduction pass");
            current = scratch.id();
        }

        let final_len = plan.last().map_or(n, |&len| (len / self.block_size).max(1));
        Ok(ReductionReport {
            passes: plan.len() as u32,
            final_len,
        })
    }
}
