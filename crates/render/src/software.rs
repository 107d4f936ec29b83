//! CPU reference backend.
//!
//! A small edge-function triangle rasterizer writing the same color, id and
//! depth channels as the GPU backend. Used by the CLI for headless output and
//! by tests, where exact pixel values matter more than speed.

use glam::{Mat4, UVec2, Vec2, Vec3, Vec3Swizzles, Vec4, Vec4Swizzles};
use stagehand_assets::ShadingMode;
use stagehand_common::{CameraParams, ObjectId};

use crate::RenderItem;
use crate::config::{OutlineConfig, PostEffectKind};
use crate::overlay::OverlayLine;
use crate::pipeline::{
    BackendError, ColorImage, FrameBackend, PixelRect, TargetError, TemporalResolve,
};
use crate::post::{ColorSource, EffectInitError};

const DEFAULT_MAX_TEXTURE_SIZE: u32 = 4096;
const CLIP_EPSILON: f32 = 1e-5;
const AMBIENT: f32 = 0.25;

/// Failures the backend reports on purpose, for exercising the fallback
/// paths.
#[derive(Debug, Clone, Default)]
pub struct SoftwareFaults {
    pub refuse_allocation: Vec<ColorSource>,
    pub unsupported_effects: Vec<&'static str>,
}

#[derive(Debug, Clone, Default)]
struct ColorBuffer {
    size: UVec2,
    pixels: Vec<Vec4>,
}

impl ColorBuffer {
    fn new(size: UVec2) -> Self {
        Self {
            size,
            pixels: vec![Vec4::ZERO; (size.x * size.y) as usize],
        }
    }

    fn at(&self, x: u32, y: u32) -> Vec4 {
        self.pixels[(y * self.size.x + x) as usize]
    }

    /// Clamped-to-edge read.
    fn at_clamped(&self, x: i64, y: i64) -> Vec4 {
        let x = x.clamp(0, self.size.x as i64 - 1) as u32;
        let y = y.clamp(0, self.size.y as i64 - 1) as u32;
        self.at(x, y)
    }
}

fn luminance(c: Vec4) -> f32 {
    c.xyz().dot(Vec3::new(0.2126, 0.7152, 0.0722))
}

fn smoothstep(e0: f32, e1: f32, x: f32) -> f32 {
    let t = ((x - e0) / (e1 - e0).max(f32::EPSILON)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Twice the signed area of triangle `(a, b, p)`.
fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrawMode {
    Opaque,
    Transparent,
}

/// CPU implementation of `FrameBackend`.
#[derive(Debug)]
pub struct SoftwareBackend {
    size: UVec2,
    color: ColorBuffer,
    ids: Vec<u32>,
    depth: Vec<f32>,
    aux: [Option<ColorBuffer>; 2],
    history: Option<ColorBuffer>,
    max_texture_size: u32,
    light_dir: Vec3,
    faults: SoftwareFaults,
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self {
            size: UVec2::ZERO,
            color: ColorBuffer::default(),
            ids: Vec::new(),
            depth: Vec::new(),
            aux: [None, None],
            history: None,
            max_texture_size: DEFAULT_MAX_TEXTURE_SIZE,
            light_dir: Vec3::new(0.4, 1.0, 0.6).normalize(),
            faults: SoftwareFaults::default(),
        }
    }

    pub fn with_faults(faults: SoftwareFaults) -> Self {
        Self {
            faults,
            ..Self::new()
        }
    }

    pub fn with_max_texture_size(mut self, max: u32) -> Self {
        self.max_texture_size = max;
        self
    }

    pub fn faults_mut(&mut self) -> &mut SoftwareFaults {
        &mut self.faults
    }

    /// Shrink a target behind the pipeline's back so its next validation
    /// fails, as an incomplete framebuffer would.
    pub fn corrupt(&mut self, target: ColorSource) {
        if let Some(buffer) = self.buffer_mut(target) {
            *buffer = ColorBuffer::new(UVec2::ONE);
        }
    }

    /// Depth-channel copy, for debugging views.
    pub fn depth(&self) -> &[f32] {
        &self.depth
    }

    fn buffer(&self, target: ColorSource) -> Option<&ColorBuffer> {
        match target {
            ColorSource::Primary => Some(&self.color),
            ColorSource::AuxA => self.aux[0].as_ref(),
            ColorSource::AuxB => self.aux[1].as_ref(),
            ColorSource::History => self.history.as_ref(),
        }
    }

    fn buffer_mut(&mut self, target: ColorSource) -> Option<&mut ColorBuffer> {
        match target {
            ColorSource::Primary => Some(&mut self.color),
            ColorSource::AuxA => self.aux[0].as_mut(),
            ColorSource::AuxB => self.aux[1].as_mut(),
            ColorSource::History => self.history.as_mut(),
        }
    }

    fn take(&mut self, target: ColorSource) -> Option<ColorBuffer> {
        match target {
            ColorSource::Primary => Some(std::mem::take(&mut self.color)),
            ColorSource::AuxA => self.aux[0].take(),
            ColorSource::AuxB => self.aux[1].take(),
            ColorSource::History => self.history.take(),
        }
    }

    fn put(&mut self, target: ColorSource, buffer: ColorBuffer) {
        match target {
            ColorSource::Primary => self.color = buffer,
            ColorSource::AuxA => self.aux[0] = Some(buffer),
            ColorSource::AuxB => self.aux[1] = Some(buffer),
            ColorSource::History => self.history = Some(buffer),
        }
    }

    /// Run a per-pixel pass from `src` into `dst`. Skipped with a warning when
    /// either target is missing or the sizes disagree.
    fn pass<F>(&mut self, src: ColorSource, dst: ColorSource, f: F)
    where
        F: Fn(&Self, &ColorBuffer, u32, u32) -> Vec4,
    {
        let Some(mut out) = self.take(dst) else {
            tracing::warn!(dst = dst.name(), "pass target missing");
            return;
        };
        match self.buffer(src) {
            Some(input) if input.size == out.size => {
                for y in 0..out.size.y {
                    for x in 0..out.size.x {
                        out.pixels[(y * out.size.x + x) as usize] = f(self, input, x, y);
                    }
                }
            }
            _ => tracing::warn!(src = src.name(), dst = dst.name(), "pass input unusable"),
        }
        self.put(dst, out);
    }

    fn shade(&self, item: &RenderItem, normal: Vec3) -> Vec4 {
        let desc = &item.material.desc;
        let base = desc.base_color;
        let rgb = match desc.shading {
            ShadingMode::Unlit => base.xyz(),
            ShadingMode::Lit => {
                let lambert = normal.dot(self.light_dir).max(0.0);
                base.xyz() * (AMBIENT + (1.0 - AMBIENT) * lambert)
            }
        };
        (rgb + desc.emissive).extend(base.w)
    }

    fn to_screen(&self, clip: Vec4) -> Vec3 {
        let ndc = clip.xyz() / clip.w;
        Vec3::new(
            (ndc.x + 1.0) * 0.5 * self.size.x as f32,
            (1.0 - ndc.y) * 0.5 * self.size.y as f32,
            ndc.z,
        )
    }

    fn rasterize(&mut self, item: &RenderItem, view_projection: Mat4, mode: DrawMode) {
        let mvp = view_projection * item.world;
        let data = &item.geometry.data;
        let id = item.object_id().0;

        for tri in data.indices.chunks_exact(3) {
            let verts = [
                data.vertices.get(tri[0] as usize),
                data.vertices.get(tri[1] as usize),
                data.vertices.get(tri[2] as usize),
            ];
            let [Some(v0), Some(v1), Some(v2)] = verts else {
                continue;
            };
            let clip = [v0, v1, v2].map(|v| mvp * Vec3::from_array(v.position).extend(1.0));
            let (polygon, count) = clip_near(clip);
            if count < 3 {
                continue;
            }
            let normal = (item.normal
                * (Vec3::from_array(v0.normal)
                    + Vec3::from_array(v1.normal)
                    + Vec3::from_array(v2.normal)))
            .normalize_or_zero();
            let color = self.shade(item, normal);
            for k in 1..count - 1 {
                let piece = [polygon[0], polygon[k], polygon[k + 1]].map(|c| self.to_screen(c));
                self.fill_triangle(piece, color, id, mode);
            }
        }
    }

    fn fill_triangle(&mut self, s: [Vec3; 3], color: Vec4, id: u32, mode: DrawMode) {
        let (w, h) = (self.size.x as i64, self.size.y as i64);
        let area = edge(s[0].xy(), s[1].xy(), s[2].xy());
        if area.abs() <= f32::EPSILON || !area.is_finite() {
            return;
        }

        let min_x = s.iter().map(|p| p.x).fold(f32::MAX, f32::min).floor().max(0.0) as i64;
        let max_x = (s.iter().map(|p| p.x).fold(f32::MIN, f32::max).ceil() as i64).min(w - 1);
        let min_y = s.iter().map(|p| p.y).fold(f32::MAX, f32::min).floor().max(0.0) as i64;
        let max_y = (s.iter().map(|p| p.y).fold(f32::MIN, f32::max).ceil() as i64).min(h - 1);

        for py in min_y..=max_y {
            for px in min_x..=max_x {
                let p = Vec2::new(px as f32 + 0.5, py as f32 + 0.5);
                let b0 = edge(s[1].xy(), s[2].xy(), p) / area;
                let b1 = edge(s[2].xy(), s[0].xy(), p) / area;
                let b2 = edge(s[0].xy(), s[1].xy(), p) / area;
                if b0 < 0.0 || b1 < 0.0 || b2 < 0.0 {
                    continue;
                }
                let z = b0 * s[0].z + b1 * s[1].z + b2 * s[2].z;
                if !(0.0..=1.0).contains(&z) {
                    continue;
                }
                let i = (py * w + px) as usize;
                if z >= self.depth[i] {
                    continue;
                }
                match mode {
                    DrawMode::Opaque => {
                        self.color.pixels[i] = color;
                        self.ids[i] = id;
                        self.depth[i] = z;
                    }
                    DrawMode::Transparent => {
                        let dst = self.color.pixels[i];
                        let rgb = dst.xyz().lerp(color.xyz(), color.w);
                        self.color.pixels[i] = rgb.extend(dst.w.max(color.w));
                    }
                }
            }
        }
    }

    fn plot(buffer: &mut ColorBuffer, x: i64, y: i64, color: Vec4) {
        if x < 0 || y < 0 || x >= buffer.size.x as i64 || y >= buffer.size.y as i64 {
            return;
        }
        let i = (y as u32 * buffer.size.x + x as u32) as usize;
        let dst = buffer.pixels[i];
        buffer.pixels[i] = dst.xyz().lerp(color.xyz(), color.w).extend(dst.w.max(color.w));
    }
}

/// Clip a clip-space triangle to the part in front of `w = CLIP_EPSILON`.
/// Returns the polygon's vertices in winding order and how many are used.
fn clip_near(tri: [Vec4; 3]) -> ([Vec4; 4], usize) {
    let mut out = [Vec4::ZERO; 4];
    let mut count = 0;
    for i in 0..3 {
        let (a, b) = (tri[i], tri[(i + 1) % 3]);
        let (a_in, b_in) = (a.w > CLIP_EPSILON, b.w > CLIP_EPSILON);
        if a_in {
            out[count] = a;
            count += 1;
        }
        if a_in != b_in {
            let t = (CLIP_EPSILON - a.w) / (b.w - a.w);
            out[count] = a.lerp(b, t);
            count += 1;
        }
    }
    (out, count)
}

fn apply_effect_pixel(effect: &PostEffectKind, input: &ColorBuffer, x: u32, y: u32) -> Vec4 {
    let c = input.at(x, y);
    match effect {
        PostEffectKind::Tonemap { exposure } => {
            let rgb = Vec3::ONE - (-c.xyz() * *exposure).exp();
            rgb.extend(c.w)
        }
        PostEffectKind::ColorGrade {
            saturation,
            contrast,
            tint,
        } => {
            let l = Vec3::splat(luminance(c));
            let rgb = l.lerp(c.xyz(), *saturation);
            let rgb = (rgb - 0.5) * *contrast + 0.5;
            (rgb * *tint).max(Vec3::ZERO).extend(c.w)
        }
        PostEffectKind::Vignette { strength, radius } => {
            let size = input.size.as_vec2();
            let uv = (Vec2::new(x as f32, y as f32) + 0.5) / size;
            let d = uv.distance(Vec2::splat(0.5)) / std::f32::consts::FRAC_1_SQRT_2;
            let f = 1.0 - strength * smoothstep(*radius, 1.0, d);
            (c.xyz() * f).extend(c.w)
        }
        PostEffectKind::EdgeBlur { threshold } => {
            let (xi, yi) = (x as i64, y as i64);
            let n = [
                input.at_clamped(xi - 1, yi),
                input.at_clamped(xi + 1, yi),
                input.at_clamped(xi, yi - 1),
                input.at_clamped(xi, yi + 1),
            ];
            let lumas = n.map(luminance);
            let lc = luminance(c);
            let max = lumas.iter().copied().fold(lc, f32::max);
            let min = lumas.iter().copied().fold(lc, f32::min);
            if max - min > *threshold {
                (c + n[0] + n[1] + n[2] + n[3]) / 5.0
            } else {
                c
            }
        }
    }
}

impl FrameBackend for SoftwareBackend {
    fn max_texture_size(&self) -> u32 {
        self.max_texture_size
    }

    fn allocate_primary(&mut self, size: UVec2) -> Result<(), TargetError> {
        if size.x > self.max_texture_size || size.y > self.max_texture_size {
            return Err(TargetError::Allocation {
                target: ColorSource::Primary.name(),
                size,
                reason: format!("exceeds max texture size {}", self.max_texture_size),
            });
        }
        let len = (size.x * size.y) as usize;
        self.size = size;
        self.color = ColorBuffer::new(size);
        self.ids = vec![0; len];
        self.depth = vec![1.0; len];
        Ok(())
    }

    fn allocate_color(&mut self, target: ColorSource, size: UVec2) -> Result<(), TargetError> {
        if target == ColorSource::Primary {
            return self.allocate_primary(size);
        }
        if self.faults.refuse_allocation.contains(&target) {
            self.release_color(target);
            return Err(TargetError::Allocation {
                target: target.name(),
                size,
                reason: "allocation refused".into(),
            });
        }
        tracing::debug!(slot = target.name(), %size, "color target allocated");
        self.put(target, ColorBuffer::new(size));
        Ok(())
    }

    fn release_color(&mut self, target: ColorSource) {
        match target {
            ColorSource::Primary => {}
            ColorSource::AuxA => self.aux[0] = None,
            ColorSource::AuxB => self.aux[1] = None,
            ColorSource::History => self.history = None,
        }
    }

    fn validate_color(&self, target: ColorSource, size: UVec2) -> Result<(), TargetError> {
        match self.buffer(target) {
            Some(buffer) if buffer.size == size && buffer.pixels.len() == (size.x * size.y) as usize => {
                Ok(())
            }
            Some(buffer) => Err(TargetError::Invalid {
                target: target.name(),
                reason: format!("size {} does not match {}", buffer.size, size),
            }),
            None => Err(TargetError::Invalid {
                target: target.name(),
                reason: "not allocated".into(),
            }),
        }
    }

    fn init_effect(&mut self, effect: &PostEffectKind) -> Result<(), EffectInitError> {
        if self.faults.unsupported_effects.contains(&effect.name()) {
            return Err(EffectInitError::Unsupported(effect.name()));
        }
        Ok(())
    }

    fn clear(&mut self, color: Vec4) {
        self.color.pixels.fill(color);
        self.ids.fill(ObjectId::NONE.0);
        self.depth.fill(1.0);
    }

    fn draw_opaque(&mut self, items: &[RenderItem], camera: &CameraParams) {
        let vp = camera.view_projection();
        for item in items {
            self.rasterize(item, vp, DrawMode::Opaque);
        }
    }

    fn draw_transparent(&mut self, items: &[RenderItem], camera: &CameraParams) {
        let vp = camera.view_projection();
        for item in items {
            self.rasterize(item, vp, DrawMode::Transparent);
        }
    }

    fn copy_color(&mut self, src: ColorSource, dst: ColorSource) {
        self.pass(src, dst, |_, input, x, y| input.at(x, y));
    }

    fn apply_effect(&mut self, effect: &PostEffectKind, src: ColorSource, dst: ColorSource) {
        self.pass(src, dst, |_, input, x, y| apply_effect_pixel(effect, input, x, y));
    }

    fn outline(
        &mut self,
        selection: &[ObjectId],
        style: &OutlineConfig,
        src: ColorSource,
        dst: ColorSource,
    ) {
        let reach = style.width.max(1) as i64;
        self.pass(src, dst, |this, input, x, y| {
            let c = input.at(x, y);
            let (w, h) = (this.size.x as i64, this.size.y as i64);
            let id_at = |px: i64, py: i64| this.ids[(py * w + px) as usize];
            let center = id_at(x as i64, y as i64);
            let selected = |id: u32| id != 0 && selection.contains(&ObjectId(id));
            for step in 1..=reach {
                for (dx, dy) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
                    let (nx, ny) = (x as i64 + dx * step, y as i64 + dy * step);
                    if nx < 0 || ny < 0 || nx >= w || ny >= h {
                        continue;
                    }
                    let other = id_at(nx, ny);
                    if other != center && (selected(center) || selected(other)) {
                        return c.xyz().lerp(style.color.xyz(), style.color.w).extend(c.w);
                    }
                }
            }
            c
        });
    }

    fn temporal_resolve(&mut self, src: ColorSource, dst: ColorSource, resolve: &TemporalResolve) {
        let Some(history) = self.history.take() else {
            self.copy_color(src, dst);
            return;
        };
        self.pass(src, dst, |this, input, x, y| {
            let current = input.at(x, y);
            let size = this.size.as_vec2();
            let depth = this.depth[(y * this.size.x + x) as usize];
            let ndc = Vec2::new(
                (x as f32 + 0.5) / size.x * 2.0 - 1.0,
                1.0 - (y as f32 + 0.5) / size.y * 2.0,
            );
            let world = resolve.inverse_view_projection * ndc.extend(depth).extend(1.0);
            if world.w.abs() <= CLIP_EPSILON {
                return current;
            }
            let prev = resolve.previous_view_projection * (world / world.w);
            if prev.w <= CLIP_EPSILON {
                return current;
            }
            let prev_ndc = prev.xy() / prev.w;
            let px = ((prev_ndc.x + 1.0) * 0.5 * size.x).floor();
            let py = ((1.0 - prev_ndc.y) * 0.5 * size.y).floor();
            if px < 0.0 || py < 0.0 || px >= size.x || py >= size.y || history.size != this.size {
                return current;
            }
            current.lerp(history.at(px as u32, py as u32), resolve.blend)
        });
        self.history = Some(history);
    }

    fn draw_overlay(&mut self, lines: &[OverlayLine], camera: &CameraParams, target: ColorSource) {
        let vp = camera.view_projection();
        let size = self.size;
        let Some(buffer) = self.buffer_mut(target) else {
            return;
        };
        for line in lines {
            let mut a = vp * line.a.extend(1.0);
            let mut b = vp * line.b.extend(1.0);
            if a.w <= CLIP_EPSILON && b.w <= CLIP_EPSILON {
                continue;
            }
            // Clip against the camera plane.
            if a.w <= CLIP_EPSILON {
                let t = (CLIP_EPSILON - a.w) / (b.w - a.w);
                a = a.lerp(b, t);
            } else if b.w <= CLIP_EPSILON {
                let t = (CLIP_EPSILON - b.w) / (a.w - b.w);
                b = b.lerp(a, t);
            }
            let to_px = |c: Vec4| {
                let ndc = c.xy() / c.w;
                Vec2::new(
                    (ndc.x + 1.0) * 0.5 * size.x as f32,
                    (1.0 - ndc.y) * 0.5 * size.y as f32,
                )
            };
            let (pa, pb) = (to_px(a), to_px(b));
            if !(pa.is_finite() && pb.is_finite()) {
                continue;
            }
            let span = (pb - pa).abs().max_element().ceil();
            // Bound work for lines projected far outside the target.
            let steps = span.clamp(1.0, 4.0 * (size.x + size.y) as f32) as u32;
            for i in 0..=steps {
                let p = pa.lerp(pb, i as f32 / steps as f32);
                Self::plot(buffer, p.x.floor() as i64, p.y.floor() as i64, line.color);
            }
        }
    }

    fn read_ids(&mut self, rect: PixelRect) -> Result<Vec<u32>, BackendError> {
        if self.ids.is_empty() {
            return Err(BackendError::NotAllocated);
        }
        if rect.x + rect.width > self.size.x || rect.y + rect.height > self.size.y {
            return Err(BackendError::OutOfBounds { size: self.size });
        }
        let mut out = Vec::with_capacity(rect.area());
        for y in rect.y..rect.y + rect.height {
            let row = (y * self.size.x) as usize;
            out.extend_from_slice(&self.ids[row + rect.x as usize..row + (rect.x + rect.width) as usize]);
        }
        Ok(out)
    }

    fn read_depth(&mut self, x: u32, y: u32) -> Result<f32, BackendError> {
        if self.depth.is_empty() {
            return Err(BackendError::NotAllocated);
        }
        if x >= self.size.x || y >= self.size.y {
            return Err(BackendError::OutOfBounds { size: self.size });
        }
        Ok(self.depth[(y * self.size.x + x) as usize])
    }

    fn read_color(&mut self, source: ColorSource) -> Result<ColorImage, BackendError> {
        let buffer = self.buffer(source).ok_or(BackendError::NotAllocated)?;
        Ok(ColorImage {
            size: buffer.size,
            pixels: buffer.pixels.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(size: UVec2) -> SoftwareBackend {
        let mut b = SoftwareBackend::new();
        b.allocate_primary(size).unwrap();
        b.allocate_color(ColorSource::AuxA, size).unwrap();
        b.allocate_color(ColorSource::AuxB, size).unwrap();
        b
    }

    #[test]
    fn clear_resets_channels() {
        let mut b = backend(UVec2::new(4, 4));
        b.ids[3] = 9;
        b.depth[3] = 0.2;
        b.clear(Vec4::new(0.0, 0.0, 1.0, 1.0));
        assert!(b.ids.iter().all(|&id| id == 0));
        assert!(b.depth.iter().all(|&d| d == 1.0));
        assert_eq!(b.color.at(0, 0), Vec4::new(0.0, 0.0, 1.0, 1.0));
    }

    #[test]
    fn copy_and_tonemap() {
        let mut b = backend(UVec2::new(2, 2));
        b.clear(Vec4::new(1.0, 0.0, 0.0, 1.0));
        b.apply_effect(
            &PostEffectKind::Tonemap { exposure: 1.0 },
            ColorSource::Primary,
            ColorSource::AuxA,
        );
        let out = b.read_color(ColorSource::AuxA).unwrap();
        let expected = 1.0 - (-1.0f32).exp();
        assert!((out.pixels[0].x - expected).abs() < 1e-6);
        assert_eq!(out.pixels[0].y, 0.0);
    }

    #[test]
    fn color_grade_desaturates() {
        let mut b = backend(UVec2::new(2, 2));
        b.clear(Vec4::new(1.0, 0.0, 0.0, 1.0));
        b.apply_effect(
            &PostEffectKind::ColorGrade {
                saturation: 0.0,
                contrast: 1.0,
                tint: Vec3::ONE,
            },
            ColorSource::Primary,
            ColorSource::AuxB,
        );
        let px = b.read_color(ColorSource::AuxB).unwrap().pixels[0];
        assert!((px.x - px.y).abs() < 1e-6 && (px.y - px.z).abs() < 1e-6);
    }

    #[test]
    fn vignette_darkens_corners_only() {
        let mut b = backend(UVec2::new(16, 16));
        b.clear(Vec4::ONE);
        b.apply_effect(
            &PostEffectKind::Vignette {
                strength: 1.0,
                radius: 0.3,
            },
            ColorSource::Primary,
            ColorSource::AuxA,
        );
        let out = b.read_color(ColorSource::AuxA).unwrap();
        assert!(out.get(0, 0).unwrap().x < 0.2);
        assert!((out.get(8, 8).unwrap().x - 1.0).abs() < 1e-6);
    }

    #[test]
    fn validation_detects_corruption() {
        let size = UVec2::new(4, 4);
        let mut b = backend(size);
        assert!(b.validate_color(ColorSource::AuxA, size).is_ok());
        b.corrupt(ColorSource::AuxA);
        assert!(b.validate_color(ColorSource::AuxA, size).is_err());
        assert!(b.validate_color(ColorSource::History, size).is_err());
    }

    #[test]
    fn refused_allocation() {
        let mut b = SoftwareBackend::with_faults(SoftwareFaults {
            refuse_allocation: vec![ColorSource::AuxB],
            ..SoftwareFaults::default()
        });
        let size = UVec2::new(4, 4);
        assert!(b.allocate_color(ColorSource::AuxA, size).is_ok());
        assert!(b.allocate_color(ColorSource::AuxB, size).is_err());
    }

    #[test]
    fn primary_larger_than_max_fails() {
        let mut b = SoftwareBackend::new().with_max_texture_size(64);
        assert!(b.allocate_primary(UVec2::new(128, 8)).is_err());
    }

    #[test]
    fn read_ids_bounds() {
        let mut b = backend(UVec2::new(4, 4));
        assert!(
            b.read_ids(PixelRect {
                x: 3,
                y: 3,
                width: 2,
                height: 1
            })
            .is_err()
        );
        assert_eq!(
            b.read_ids(PixelRect {
                x: 1,
                y: 1,
                width: 2,
                height: 2
            })
            .unwrap(),
            vec![0; 4]
        );
    }

    #[test]
    fn near_clip_keeps_the_visible_part() {
        let front = Vec4::new(0.0, 0.0, 0.5, 1.0);
        let (poly, count) = clip_near([front, front + Vec4::X, front + Vec4::Y]);
        assert_eq!(count, 3);
        assert_eq!(poly[..3], [front, front + Vec4::X, front + Vec4::Y]);

        // One vertex behind the camera leaves a quad on the clip plane.
        let behind = Vec4::new(0.0, 0.0, -2.0, -1.0);
        let (poly, count) = clip_near([front, front + Vec4::X, behind]);
        assert_eq!(count, 4);
        assert!(poly[..4].iter().all(|v| v.w >= CLIP_EPSILON * 0.99));

        // Two behind leaves a smaller triangle.
        let (_, count) = clip_near([front, behind, behind + Vec4::X]);
        assert_eq!(count, 3);
        let (_, count) = clip_near([behind, behind, behind]);
        assert_eq!(count, 0);
    }

    #[test]
    fn overlay_line_touches_target_but_not_ids() {
        let size = UVec2::new(32, 32);
        let mut b = backend(size);
        b.clear(Vec4::new(0.0, 0.0, 0.0, 1.0));
        let camera = CameraParams::look_at(
            Vec3::new(0.0, 0.0, 5.0),
            Vec3::ZERO,
            Vec3::Y,
            60f32.to_radians(),
            0.1,
            100.0,
            size,
        );
        let line = OverlayLine {
            a: Vec3::new(-1.0, 0.0, 0.0),
            b: Vec3::new(1.0, 0.0, 0.0),
            color: Vec4::new(1.0, 0.0, 0.0, 1.0),
        };
        b.draw_overlay(&[line], &camera, ColorSource::AuxA);
        let aux = b.read_color(ColorSource::AuxA).unwrap();
        assert!(aux.pixels.iter().any(|p| p.x == 1.0));
        let primary = b.read_color(ColorSource::Primary).unwrap();
        assert!(primary.pixels.iter().all(|p| p.x == 0.0));
        assert!(b.ids.iter().all(|&id| id == 0));
    }
}
