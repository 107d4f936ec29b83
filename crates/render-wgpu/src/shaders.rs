/// Opaque and transparent scene passes: HDR color plus object id.
pub const SCENE_SHADER: &str = r#"
struct Camera {
    view_proj: mat4x4<f32>,
    light_dir: vec4<f32>,
};

struct Draw {
    model: mat4x4<f32>,
    normal_0: vec4<f32>,
    normal_1: vec4<f32>,
    normal_2: vec4<f32>,
    base_color: vec4<f32>,
    // rgb = emissive, w = 1.0 when lit
    emissive: vec4<f32>,
    object_id: vec4<u32>,
};

@group(0) @binding(0)
var<uniform> camera: Camera;

@group(1) @binding(0)
var<uniform> draw: Draw;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_normal: vec3<f32>,
};

struct SceneOutput {
    @location(0) color: vec4<f32>,
    @location(1) id: u32,
};

@vertex
fn vs_main(vertex: VertexInput) -> VertexOutput {
    let normal_matrix = mat3x3<f32>(draw.normal_0.xyz, draw.normal_1.xyz, draw.normal_2.xyz);
    var out: VertexOutput;
    out.clip_position = camera.view_proj * draw.model * vec4<f32>(vertex.position, 1.0);
    out.world_normal = normal_matrix * vertex.normal;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> SceneOutput {
    let ambient = 0.25;
    var rgb = draw.base_color.rgb;
    if (draw.emissive.w > 0.5) {
        let n = normalize(in.world_normal);
        let lambert = max(dot(n, camera.light_dir.xyz), 0.0);
        rgb = rgb * (ambient + (1.0 - ambient) * lambert);
    }
    var out: SceneOutput;
    out.color = vec4<f32>(rgb + draw.emissive.rgb, draw.base_color.a);
    out.id = draw.object_id.x;
    return out;
}
"#;

/// Full-screen post effects. Every entry point reads `src` texel-exact at
/// the fragment's pixel.
pub const POST_SHADER: &str = r#"
struct Params {
    a: vec4<f32>,
    b: vec4<f32>,
};

@group(0) @binding(0)
var src: texture_2d<f32>;

@group(0) @binding(1)
var<uniform> params: Params;

@vertex
fn vs_fullscreen(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}

fn luminance(c: vec4<f32>) -> f32 {
    return dot(c.rgb, vec3<f32>(0.2126, 0.7152, 0.0722));
}

fn load_clamped(p: vec2<i32>) -> vec4<f32> {
    let size = vec2<i32>(textureDimensions(src));
    return textureLoad(src, clamp(p, vec2<i32>(0), size - 1), 0);
}

@fragment
fn fs_copy(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
    return textureLoad(src, vec2<i32>(pos.xy), 0);
}

// params.a.xy = destination size; the source may be at a different scale.
@fragment
fn fs_present(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
    let size = vec2<f32>(textureDimensions(src));
    let q = min(vec2<i32>(pos.xy * size / params.a.xy), vec2<i32>(size) - 1);
    let c = textureLoad(src, q, 0);
    return vec4<f32>(clamp(c.rgb, vec3<f32>(0.0), vec3<f32>(1.0)), 1.0);
}

@fragment
fn fs_tonemap(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
    let c = textureLoad(src, vec2<i32>(pos.xy), 0);
    return vec4<f32>(vec3<f32>(1.0) - exp(-c.rgb * params.a.x), c.a);
}

@fragment
fn fs_color_grade(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
    let c = textureLoad(src, vec2<i32>(pos.xy), 0);
    let l = vec3<f32>(luminance(c));
    var rgb = mix(l, c.rgb, params.a.x);
    rgb = (rgb - 0.5) * params.a.y + 0.5;
    return vec4<f32>(max(rgb * params.b.rgb, vec3<f32>(0.0)), c.a);
}

@fragment
fn fs_vignette(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
    let c = textureLoad(src, vec2<i32>(pos.xy), 0);
    let size = vec2<f32>(textureDimensions(src));
    let uv = pos.xy / size;
    let d = distance(uv, vec2<f32>(0.5)) / 0.70710678;
    let f = 1.0 - params.a.x * smoothstep(params.a.y, 1.0, d);
    return vec4<f32>(c.rgb * f, c.a);
}

@fragment
fn fs_edge_blur(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
    let p = vec2<i32>(pos.xy);
    let c = textureLoad(src, p, 0);
    let l = load_clamped(p - vec2<i32>(1, 0));
    let r = load_clamped(p + vec2<i32>(1, 0));
    let u = load_clamped(p - vec2<i32>(0, 1));
    let d = load_clamped(p + vec2<i32>(0, 1));
    let lc = luminance(c);
    let hi = max(lc, max(max(luminance(l), luminance(r)), max(luminance(u), luminance(d))));
    let lo = min(lc, min(min(luminance(l), luminance(r)), min(luminance(u), luminance(d))));
    if (hi - lo > params.a.x) {
        return (c + l + r + u + d) / 5.0;
    }
    return c;
}
"#;

/// Selection outline from the id channel.
pub const OUTLINE_SHADER: &str = r#"
struct Outline {
    color: vec4<f32>,
    // x = reach in pixels, y = selection length
    info: vec4<u32>,
};

@group(0) @binding(0)
var src: texture_2d<f32>;

@group(0) @binding(1)
var ids: texture_2d<u32>;

@group(0) @binding(2)
var<uniform> outline: Outline;

@group(0) @binding(3)
var<storage, read> selection: array<u32>;

@vertex
fn vs_fullscreen(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}

fn is_selected(id: u32) -> bool {
    if (id == 0u) {
        return false;
    }
    for (var i = 0u; i < outline.info.y; i = i + 1u) {
        if (selection[i] == id) {
            return true;
        }
    }
    return false;
}

@fragment
fn fs_outline(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
    let p = vec2<i32>(pos.xy);
    let size = vec2<i32>(textureDimensions(ids));
    let c = textureLoad(src, p, 0);
    let center = textureLoad(ids, p, 0).x;
    let center_selected = is_selected(center);
    var offsets = array<vec2<i32>, 4>(
        vec2<i32>(1, 0), vec2<i32>(-1, 0), vec2<i32>(0, 1), vec2<i32>(0, -1)
    );
    for (var dist = 1; dist <= i32(outline.info.x); dist = dist + 1) {
        for (var k = 0; k < 4; k = k + 1) {
            let q = p + offsets[k] * dist;
            if (any(q < vec2<i32>(0)) || any(q >= size)) {
                continue;
            }
            let other = textureLoad(ids, q, 0).x;
            if (other != center && (center_selected || is_selected(other))) {
                return vec4<f32>(mix(c.rgb, outline.color.rgb, outline.color.a), c.a);
            }
        }
    }
    return c;
}
"#;

/// Temporal resolve: camera-only reprojection into the history target.
pub const TEMPORAL_SHADER: &str = r#"
struct Resolve {
    inverse_view_proj: mat4x4<f32>,
    previous_view_proj: mat4x4<f32>,
    blend: vec4<f32>,
};

@group(0) @binding(0)
var src: texture_2d<f32>;

@group(0) @binding(1)
var history: texture_2d<f32>;

@group(0) @binding(2)
var depth: texture_depth_2d;

@group(0) @binding(3)
var<uniform> resolve: Resolve;

@vertex
fn vs_fullscreen(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}

@fragment
fn fs_resolve(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
    let p = vec2<i32>(pos.xy);
    let current = textureLoad(src, p, 0);
    let size = vec2<f32>(textureDimensions(src));
    let z = textureLoad(depth, p, 0);
    let ndc = vec2<f32>(pos.x / size.x * 2.0 - 1.0, 1.0 - pos.y / size.y * 2.0);
    let world = resolve.inverse_view_proj * vec4<f32>(ndc, z, 1.0);
    if (abs(world.w) <= 1e-5) {
        return current;
    }
    let prev = resolve.previous_view_proj * (world / world.w);
    if (prev.w <= 1e-5) {
        return current;
    }
    let prev_ndc = prev.xy / prev.w;
    let q = floor(vec2<f32>((prev_ndc.x + 1.0) * 0.5 * size.x, (1.0 - prev_ndc.y) * 0.5 * size.y));
    if (any(q < vec2<f32>(0.0)) || any(q >= size)) {
        return current;
    }
    return mix(current, textureLoad(history, vec2<i32>(q), 0), resolve.blend.x);
}
"#;

/// Overlay line list, no depth test.
pub const LINE_SHADER: &str = r#"
struct Camera {
    view_proj: mat4x4<f32>,
    light_dir: vec4<f32>,
};

@group(0) @binding(0)
var<uniform> camera: Camera;

struct LineVertex {
    @location(0) position: vec3<f32>,
    @location(1) color: vec4<f32>,
};

struct LineOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) color: vec4<f32>,
};

@vertex
fn vs_line(vertex: LineVertex) -> LineOutput {
    var out: LineOutput;
    out.clip_position = camera.view_proj * vec4<f32>(vertex.position, 1.0);
    out.color = vertex.color;
    return out;
}

@fragment
fn fs_line(in: LineOutput) -> @location(0) vec4<f32> {
    return in.color;
}
"#;
