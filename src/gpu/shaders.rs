//! WGSL sources for the reduce and steer kernels.
//!
//! Both shaders are generated so the workgroup size and the uniform struct
//! follow the host-side declarations in [`Kernel`]. Binding indices follow
//! [`Kernel::bindings`] order, with the uniform buffer last.

use crate::backend::Kernel;
use crate::particle::{AudioState, BoidState};
use crate::uniforms::UniformSet;

fn uniform_struct(kernel: Kernel, name: &str) -> String {
    let fields = UniformSet::from_layout(kernel.uniform_layout()).to_wgsl_fields();
    format!("struct {name} {{\n{fields}\n}};")
}

/// Block reduction with `block_size` invocations per workgroup.
///
/// Each workgroup folds `block_size` consecutive entries of `particleBuffer`
/// into entry `workgroup_id.x` of `reductionBuffer`.
pub fn reduce_shader(block_size: u32) -> String {
    let boid_struct = BoidState::WGSL_STRUCT;
    let uniforms = uniform_struct(Kernel::Reduce, "ReduceUniforms");

    format!(
        r#"{boid_struct}

{uniforms}

@group(0) @binding(0)
var<storage, read> particleBuffer: array<BoidState>;

@group(0) @binding(1)
var<storage, read_write> reductionBuffer: array<BoidState>;

@group(0) @binding(2)
var<uniform> uniforms: ReduceUniforms;

var<workgroup> position_sums: array<vec4<f32>, {block_size}>;
var<workgroup> forward_sums: array<vec3<f32>, {block_size}>;

@compute @workgroup_size({block_size})
fn main(
    @builtin(local_invocation_id) local_id: vec3<u32>,
    @builtin(workgroup_id) group_id: vec3<u32>,
) {{
    let tid = local_id.x;
    let index = group_id.x * {block_size}u + tid;

    var weight = 0.0;
    var position = vec3<f32>(0.0);
    var forward = vec3<f32>(0.0);
    if index < uniforms.numParticles && index < arrayLength(&particleBuffer) {{
        let boid = particleBuffer[index];
        if uniforms.passIndex == 0u {{
            // Zero-sized entries are padding past the live boids.
            if boid.size > 0.0 {{
                weight = 1.0;
            }}
        }} else {{
            weight = boid.size;
        }}
        position = boid.position * weight;
        forward = boid.forward * weight;
    }}
    position_sums[tid] = vec4<f32>(position, weight);
    forward_sums[tid] = forward;
    workgroupBarrier();

    for (var stride = {block_size}u / 2u; stride > 0u; stride = stride / 2u) {{
        if tid < stride {{
            position_sums[tid] = position_sums[tid] + position_sums[tid + stride];
            forward_sums[tid] = forward_sums[tid] + forward_sums[tid + stride];
        }}
        workgroupBarrier();
    }}

    if tid == 0u && group_id.x < arrayLength(&reductionBuffer) {{
        let total = position_sums[0];
        var result: BoidState;
        if total.w > 0.0 {{
            result.position = total.xyz / total.w;
            result.forward = forward_sums[0] / total.w;
        }}
        result.size = total.w;
        reductionBuffer[group_id.x] = result;
    }}
}}
"#
    )
}

/// Per-boid steering with `group_size` invocations per workgroup.
pub fn steer_shader(group_size: u32) -> String {
    let boid_struct = BoidState::WGSL_STRUCT;
    let audio_struct = AudioState::WGSL_STRUCT;
    let uniforms = uniform_struct(Kernel::Steer, "SteerUniforms");

    format!(
        r#"{boid_struct}

{audio_struct}

{uniforms}

struct FlockSummary {{
    centroid: vec3<f32>,
    heading: vec3<f32>,
    count: f32,
}};

@group(0) @binding(0)
var<storage, read_write> particleBuffer: array<BoidState>;

@group(0) @binding(1)
var<storage, read> reductionBuffer: array<BoidState>;

@group(0) @binding(2)
var<storage, read> audioBuffer: array<AudioState>;

@group(0) @binding(3)
var<uniform> uniforms: SteerUniforms;

fn safe_normalize(v: vec3<f32>) -> vec3<f32> {{
    let magnitude = length(v);
    if magnitude > 1e-6 {{
        return v / magnitude;
    }}
    return vec3<f32>(0.0);
}}

fn flock_summary() -> FlockSummary {{
    var summary: FlockSummary;
    let wanted = f32(uniforms.numParticles);
    let reduced = arrayLength(&reductionBuffer);

    if reduced > 0u && reductionBuffer[0].size > 0.0 {{
        for (var j = 0u; j < reduced; j = j + 1u) {{
            let entry = reductionBuffer[j];
            if summary.count >= wanted || entry.size <= 0.0 {{
                break;
            }}
            summary.count = summary.count + entry.size;
            summary.centroid = summary.centroid + entry.position * entry.size;
            summary.heading = summary.heading + entry.forward * entry.size;
        }}
    }} else {{
        // No reduction ran: average the particles directly.
        let n = min(uniforms.numParticles, arrayLength(&particleBuffer));
        for (var j = 0u; j < n; j = j + 1u) {{
            summary.count = summary.count + 1.0;
            summary.centroid = summary.centroid + particleBuffer[j].position;
            summary.heading = summary.heading + particleBuffer[j].forward;
        }}
    }}

    if summary.count > 0.0 {{
        summary.centroid = summary.centroid / summary.count;
        summary.heading = summary.heading / summary.count;
    }}
    return summary;
}}

@compute @workgroup_size({group_size})
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {{
    let index = global_id.x;
    if index >= uniforms.numParticles || index >= arrayLength(&particleBuffer) {{
        return;
    }}

    let summary = flock_summary();
    var boid = particleBuffer[index];

    var amplitude = 0.0;
    let audio_len = arrayLength(&audioBuffer);
    if uniforms.fftResolution > 0u && audio_len > 0u {{
        let bin = index % uniforms.fftResolution;
        if bin < audio_len {{
            amplitude = audioBuffer[bin].amplitude;
        }}
    }}

    let separation = safe_normalize(boid.position - summary.centroid);
    let alignment = safe_normalize(summary.heading);
    let seek = safe_normalize(uniforms.targetPosition - boid.position);
    var tap = vec3<f32>(0.0);
    if uniforms.isTapped != 0u {{
        tap = safe_normalize(boid.position - uniforms.tapPosition);
    }}

    let steering = separation * uniforms.separationWeight
        + alignment * uniforms.alignmentWeight
        + seek * uniforms.targetWeight
        + tap;
    let desired = boid.forward + steering * uniforms.deltaTime;
    let desired_len = length(desired);
    var forward = boid.forward;
    if desired_len > 1e-6 {{
        forward = desired / desired_len;
    }}

    boid.forward = forward;
    boid.position = boid.position + forward * uniforms.moveSpeed * (1.0 + amplitude) * uniforms.deltaTime;
    boid.color = vec3<f32>(min(amplitude, 1.0), forward.y * 0.5 + 0.5, forward.z * 0.5 + 0.5);
    particleBuffer[index] = boid;
}}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_shader_uses_block_size() {
        let src = reduce_shader(64);
        assert!(src.contains("@workgroup_size(64)"));
        assert!(src.contains("array<vec4<f32>, 64>"));
        assert!(src.contains("numParticles: u32,"));
        assert!(src.contains("passIndex: u32,"));
    }

    #[test]
    fn test_steer_shader_declares_wire_names() {
        let src = steer_shader(64);
        for name in Kernel::Steer.bindings() {
            assert!(src.contains(&format!("{}: array<", name)), "missing binding {}", name);
        }
        for (name, _) in Kernel::Steer.uniform_layout() {
            assert!(src.contains(&format!("uniforms.{}", name)), "unused uniform {}", name);
        }
    }
}
