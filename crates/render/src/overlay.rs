use glam::{Vec3, Vec4};

use crate::render_list::RenderItem;

/// World-space line segment drawn after post-processing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayLine {
    pub a: Vec3,
    pub b: Vec3,
    pub color: Vec4,
}

/// Line geometry for gizmo and debug overlays. Overlays land in the final
/// color target only and never in the id channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayList {
    lines: Vec<OverlayLine>,
}

impl OverlayList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, a: Vec3, b: Vec3, color: Vec4) {
        self.lines.push(OverlayLine { a, b, color });
    }

    /// Closed polyline through `points`.
    pub fn polygon(&mut self, points: &[Vec3], color: Vec4) {
        for (i, &a) in points.iter().enumerate() {
            let b = points[(i + 1) % points.len()];
            self.line(a, b, color);
        }
    }

    pub fn extend(&mut self, other: &OverlayList) {
        self.lines.extend_from_slice(&other.lines);
    }

    pub fn lines(&self) -> &[OverlayLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

/// Mesh edges of every item, transformed to world space.
pub fn wireframe_overlay(items: &[RenderItem], color: Vec4) -> OverlayList {
    let mut overlay = OverlayList::new();
    for item in items {
        let data = &item.geometry.data;
        for (i, j) in data.edges() {
            let (Some(a), Some(b)) = (data.vertices.get(i as usize), data.vertices.get(j as usize))
            else {
                continue;
            };
            overlay.line(
                item.world.transform_point3(Vec3::from_array(a.position)),
                item.world.transform_point3(Vec3::from_array(b.position)),
                color,
            );
        }
    }
    overlay
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polygon_closes() {
        let mut overlay = OverlayList::new();
        overlay.polygon(&[Vec3::ZERO, Vec3::X, Vec3::Y], Vec4::ONE);
        assert_eq!(overlay.len(), 3);
        assert_eq!(overlay.lines()[2].b, Vec3::ZERO);
    }

    #[test]
    fn extend_appends() {
        let mut a = OverlayList::new();
        a.line(Vec3::ZERO, Vec3::X, Vec4::ONE);
        let mut b = OverlayList::new();
        b.line(Vec3::ZERO, Vec3::Y, Vec4::ONE);
        a.extend(&b);
        assert_eq!(a.len(), 2);
        a.clear();
        assert!(a.is_empty());
    }
}
