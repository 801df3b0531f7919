const PARAMS_WGSL: &str = r#"
struct Params {
  dims: vec4<u32>,
  block_dims: vec4<u32>,
  num_blocks: vec4<u32>,
  origin_world: vec4<f32>,
  threshold: f32,
  max_vertices: u32,
  active_count: u32,
  dispatch_width: u32,
};

override WORKGROUP_SIZE: u32 = 64u;
const MAX_WORKGROUP_SIZE: u32 = 256u;

fn block_origin(block: u32) -> vec3<u32> {
  let nb = params.num_blocks.xyz;
  let coord = vec3<u32>(block % nb.x, (block / nb.x) % nb.y, block / (nb.x * nb.y));
  return coord * params.block_dims.xyz;
}
"#;

/// Stage 1: one workgroup per block, strided per-lane min/max over the block
/// footprint and a halving tree in workgroup memory.
pub const REDUCE_WGSL: &str = r#"
@group(0) @binding(0) var<storage, read> volume: array<f32>;
@group(0) @binding(1) var<storage, read_write> block_ranges: array<vec2<f32>>;
@group(0) @binding(2) var<uniform> params: Params;

var<workgroup> lane_min: array<f32, MAX_WORKGROUP_SIZE>;
var<workgroup> lane_max: array<f32, MAX_WORKGROUP_SIZE>;

fn voxel(p: vec3<u32>) -> f32 {
  return volume[p.x + params.dims.x * (p.y + params.dims.y * p.z)];
}

@compute @workgroup_size(WORKGROUP_SIZE)
fn main(@builtin(workgroup_id) wg_id: vec3<u32>, @builtin(local_invocation_id) lid: vec3<u32>) {
  let block = wg_id.x + wg_id.y * params.dispatch_width;
  if (block >= params.num_blocks.w) {
    return;
  }

  let lo = block_origin(block);
  let hi = min(lo + params.block_dims.xyz + vec3<u32>(1u), params.dims.xyz);
  let ext = hi - lo;
  let count = ext.x * ext.y * ext.z;

  // Seeding with a footprint sample keeps idle lanes neutral.
  var mn = voxel(lo);
  var mx = mn;
  var i = lid.x;
  loop {
    if (i >= count) {
      break;
    }
    let p = lo + vec3<u32>(i % ext.x, (i / ext.x) % ext.y, i / (ext.x * ext.y));
    let v = voxel(p);
    mn = min(mn, v);
    mx = max(mx, v);
    i = i + WORKGROUP_SIZE;
  }
  lane_min[lid.x] = mn;
  lane_max[lid.x] = mx;
  workgroupBarrier();

  var stride = WORKGROUP_SIZE / 2u;
  loop {
    if (stride == 0u) {
      break;
    }
    if (lid.x < stride) {
      lane_min[lid.x] = min(lane_min[lid.x], lane_min[lid.x + stride]);
      lane_max[lid.x] = max(lane_max[lid.x], lane_max[lid.x + stride]);
    }
    workgroupBarrier();
    stride = stride / 2u;
  }

  if (lid.x == 0u) {
    block_ranges[block] = vec2<f32>(lane_min[0], lane_max[0]);
  }
}
"#;

/// Stage 2: `scan_local` writes each block's offset within its workgroup and
/// the workgroup totals; the host scans the totals in place into group
/// offsets; `scatter` writes active block indices to their final slots.
pub const COMPACT_WGSL: &str = r#"
@group(0) @binding(0) var<storage, read> block_ranges: array<vec2<f32>>;
@group(0) @binding(1) var<storage, read_write> local_offsets: array<u32>;
@group(0) @binding(2) var<storage, read_write> group_sums: array<u32>;
@group(0) @binding(3) var<storage, read_write> active_blocks: array<u32>;
@group(0) @binding(4) var<uniform> params: Params;

var<workgroup> scan_buf: array<u32, MAX_WORKGROUP_SIZE>;

fn is_active(i: u32) -> u32 {
  if (i >= params.num_blocks.w) {
    return 0u;
  }
  let r = block_ranges[i];
  return select(0u, 1u, r.x <= params.threshold && params.threshold <= r.y);
}

fn num_groups() -> u32 {
  return (params.num_blocks.w + WORKGROUP_SIZE - 1u) / WORKGROUP_SIZE;
}

@compute @workgroup_size(WORKGROUP_SIZE)
fn scan_local(@builtin(workgroup_id) wg_id: vec3<u32>, @builtin(local_invocation_id) lid: vec3<u32>) {
  let group = wg_id.x + wg_id.y * params.dispatch_width;
  if (group >= num_groups()) {
    return;
  }
  let i = group * WORKGROUP_SIZE + lid.x;
  let flag = is_active(i);
  scan_buf[lid.x] = flag;
  workgroupBarrier();

  var offset = 1u;
  loop {
    if (offset >= WORKGROUP_SIZE) {
      break;
    }
    var add = 0u;
    if (lid.x >= offset) {
      add = scan_buf[lid.x - offset];
    }
    workgroupBarrier();
    scan_buf[lid.x] = scan_buf[lid.x] + add;
    workgroupBarrier();
    offset = offset * 2u;
  }

  if (i < params.num_blocks.w) {
    local_offsets[i] = scan_buf[lid.x] - flag;
  }
  if (lid.x == WORKGROUP_SIZE - 1u) {
    group_sums[group] = scan_buf[lid.x];
  }
}

@compute @workgroup_size(WORKGROUP_SIZE)
fn scatter(@builtin(workgroup_id) wg_id: vec3<u32>, @builtin(local_invocation_id) lid: vec3<u32>) {
  let group = wg_id.x + wg_id.y * params.dispatch_width;
  let i = group * WORKGROUP_SIZE + lid.x;
  if (is_active(i) == 1u) {
    active_blocks[group_sums[group] + local_offsets[i]] = i;
  }
}
"#;

/// Stage 3: one workgroup per active block. Each invocation strides over the
/// block's cells and appends whole triangles through a single atomic counter.
/// Claims past `max_vertices` are counted but not written.
pub const GENERATE_WGSL: &str = r#"
@group(0) @binding(0) var<storage, read> volume: array<f32>;
@group(0) @binding(1) var<storage, read> edge_table: array<vec4<u32>, 12>;
@group(0) @binding(2) var<storage, read> edge_masks: array<u32, 256>;
@group(0) @binding(3) var<storage, read> tri_table: array<i32, 4096>;
@group(0) @binding(4) var<storage, read> active_blocks: array<u32>;
@group(0) @binding(5) var<storage, read_write> out_vertices: array<f32>;
@group(0) @binding(6) var<storage, read_write> counter: array<atomic<u32>>;
@group(0) @binding(7) var<uniform> params: Params;

fn corner_offset(c: u32) -> vec3<u32> {
  return vec3<u32>((c & 1u) ^ ((c >> 1u) & 1u), (c >> 1u) & 1u, (c >> 2u) & 1u);
}

fn sample_clamped(p: vec3<u32>) -> f32 {
  let q = min(p, params.dims.xyz - vec3<u32>(1u));
  return volume[q.x + params.dims.x * (q.y + params.dims.y * q.z)];
}

fn interpolate(cell: vec3<u32>, va: f32, vb: f32, edge: vec4<u32>) -> vec3<f32> {
  let denom = vb - va;
  var t = 0.5;
  if (denom != 0.0) {
    t = clamp((params.threshold - va) / denom, 0.0, 1.0);
  }
  let o = vec3<u32>(edge.w & 1u, (edge.w >> 1u) & 1u, (edge.w >> 2u) & 1u);
  var p = vec3<f32>(cell + o);
  p[edge.z] = p[edge.z] + t;
  return p;
}

fn polygonise(cell: vec3<u32>) {
  var values: array<f32, 8>;
  var config = 0u;
  for (var c = 0u; c < 8u; c = c + 1u) {
    let v = sample_clamped(cell + corner_offset(c));
    values[c] = v;
    if (v < params.threshold) {
      config = config | (1u << c);
    }
  }

  let mask = edge_masks[config];
  if (mask == 0u) {
    return;
  }

  var points: array<vec3<f32>, 12>;
  for (var e = 0u; e < 12u; e = e + 1u) {
    if ((mask & (1u << e)) != 0u) {
      let edge = edge_table[e];
      points[e] = interpolate(cell, values[edge.x], values[edge.y], edge);
    }
  }

  let row = config * 16u;
  var n = 0u;
  loop {
    if (n >= 16u || tri_table[row + n] < 0) {
      break;
    }
    n = n + 1u;
  }

  let base = atomicAdd(&counter[0], n);
  if (base + n > params.max_vertices) {
    return;
  }
  for (var k = 0u; k < n; k = k + 1u) {
    let grid = points[u32(tri_table[row + k])];
    let world = params.origin_world.xyz + grid * params.origin_world.w;
    let o = (base + k) * 3u;
    out_vertices[o] = world.x;
    out_vertices[o + 1u] = world.y;
    out_vertices[o + 2u] = world.z;
  }
}

@compute @workgroup_size(WORKGROUP_SIZE)
fn main(@builtin(workgroup_id) wg_id: vec3<u32>, @builtin(local_invocation_id) lid: vec3<u32>) {
  let slot = wg_id.x + wg_id.y * params.dispatch_width;
  if (slot >= params.active_count) {
    return;
  }
  let origin = block_origin(active_blocks[slot]);
  let bd = params.block_dims.xyz;
  let cells = bd.x * bd.y * bd.z;

  var linear = lid.x;
  loop {
    if (linear >= cells) {
      break;
    }
    let cell = origin + vec3<u32>(linear % bd.x, (linear / bd.x) % bd.y, linear / (bd.x * bd.y));
    if (all(cell + vec3<u32>(1u) < params.dims.xyz)) {
      polygonise(cell);
    }
    linear = linear + WORKGROUP_SIZE;
  }
}
"#;

/// Prepends the shared `Params` block and helpers to a stage shader.
pub fn with_params(stage: &str) -> String {
    format!("{PARAMS_WGSL}\n{stage}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_shaders_share_params_and_entry_points() {
        for (src, entries) in [
            (REDUCE_WGSL, &["fn main("][..]),
            (COMPACT_WGSL, &["fn scan_local(", "fn scatter("][..]),
            (GENERATE_WGSL, &["fn main("][..]),
        ] {
            let full = with_params(src);
            assert!(full.contains("struct Params"));
            assert!(full.contains("override WORKGROUP_SIZE"));
            for entry in entries {
                assert!(full.contains(entry), "missing {entry}");
            }
        }
    }
}
