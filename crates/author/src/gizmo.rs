//! Transform gizmo: handle hit-testing, overlay geometry and the drag state
//! machine.
//!
//! A drag runs Idle → `begin_drag` → `update_drag`* → `end_drag` (or
//! `cancel_drag`) → Idle. Every update recomputes the entity transforms from
//! the snapshots taken at `begin_drag`, so updates are idempotent and never
//! accumulate error. Geometry that degenerates (ray parallel to the drag
//! plane or axis, zero-length vectors) turns the update into a no-op.

use glam::{Quat, Vec2, Vec3, Vec4};
use stagehand_common::geometry::{
    GEOMETRY_EPSILON, closest_line_parameter, orthonormal_basis, ray_segment_distance,
    ray_sphere, wrap_angle,
};
use stagehand_common::{CameraParams, EntityId, Plane, Ray, SnapSettings, Transform};
use stagehand_ecs::{SceneMut, SceneQuery};
use stagehand_render::{GizmoConfig, OverlayList};

use crate::editor::{CompositeEdit, TransformChange};
use crate::selection::Selection;

/// Smallest scale component a scale drag will write.
pub const MIN_SCALE: f32 = 1e-3;

/// Plane handles span this fraction range of the handle length on both axes.
const PLANE_HANDLE_SPAN: (f32, f32) = (0.2, 0.45);
/// Uniform-scale sphere radius as a fraction of the handle length.
const UNIFORM_HANDLE_RADIUS: f32 = 0.12;
const RING_SEGMENTS: usize = 48;

const HIGHLIGHT: Vec4 = Vec4::new(1.0, 0.85, 0.1, 1.0);
const UNIFORM_COLOR: Vec4 = Vec4::new(0.9, 0.9, 0.9, 1.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GizmoMode {
    #[default]
    Translate,
    Rotate,
    Scale,
}

/// Orientation of the handle axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GizmoSpace {
    #[default]
    World,
    /// Aligned with the active entity's world rotation.
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PivotMode {
    /// The active entity's world position.
    #[default]
    Active,
    /// Centroid of the selected entities' world positions.
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn unit(self) -> Vec3 {
        match self {
            Self::X => Vec3::X,
            Self::Y => Vec3::Y,
            Self::Z => Vec3::Z,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::X => 0,
            Self::Y => 1,
            Self::Z => 2,
        }
    }

    /// The two axes spanning the plane perpendicular to `self`.
    fn others(self) -> (Axis, Axis) {
        match self {
            Self::X => (Axis::Y, Axis::Z),
            Self::Y => (Axis::Z, Axis::X),
            Self::Z => (Axis::X, Axis::Y),
        }
    }

    fn color(self) -> Vec4 {
        match self {
            Self::X => Vec4::new(0.9, 0.2, 0.2, 1.0),
            Self::Y => Vec4::new(0.3, 0.85, 0.3, 1.0),
            Self::Z => Vec4::new(0.25, 0.45, 0.95, 1.0),
        }
    }
}

/// A manipulable part of the gizmo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handle {
    TranslateAxis(Axis),
    /// Plane handle, named by the plane's normal axis.
    TranslatePlane(Axis),
    RotateAxis(Axis),
    ScaleAxis(Axis),
    ScaleUniform,
}

const TRANSLATE_HANDLES: [Handle; 6] = [
    Handle::TranslateAxis(Axis::X),
    Handle::TranslateAxis(Axis::Y),
    Handle::TranslateAxis(Axis::Z),
    Handle::TranslatePlane(Axis::Z),
    Handle::TranslatePlane(Axis::Y),
    Handle::TranslatePlane(Axis::X),
];
const ROTATE_HANDLES: [Handle; 3] = [
    Handle::RotateAxis(Axis::X),
    Handle::RotateAxis(Axis::Y),
    Handle::RotateAxis(Axis::Z),
];
const SCALE_HANDLES: [Handle; 4] = [
    Handle::ScaleAxis(Axis::X),
    Handle::ScaleAxis(Axis::Y),
    Handle::ScaleAxis(Axis::Z),
    Handle::ScaleUniform,
];

impl Handle {
    /// Handles visible in `mode`.
    pub fn for_mode(mode: GizmoMode) -> &'static [Handle] {
        match mode {
            GizmoMode::Translate => &TRANSLATE_HANDLES,
            GizmoMode::Rotate => &ROTATE_HANDLES,
            GizmoMode::Scale => &SCALE_HANDLES,
        }
    }

    pub fn mode(self) -> GizmoMode {
        match self {
            Self::TranslateAxis(_) | Self::TranslatePlane(_) => GizmoMode::Translate,
            Self::RotateAxis(_) => GizmoMode::Rotate,
            Self::ScaleAxis(_) | Self::ScaleUniform => GizmoMode::Scale,
        }
    }

    pub fn kind(self) -> DragKind {
        match self {
            Self::TranslateAxis(_) => DragKind::AxisTranslate,
            Self::TranslatePlane(_) => DragKind::PlaneTranslate,
            Self::RotateAxis(_) => DragKind::Rotate,
            Self::ScaleAxis(_) => DragKind::ScaleAxis,
            Self::ScaleUniform => DragKind::ScaleUniform,
        }
    }

    pub fn id(self) -> HandleId {
        let offset = match self {
            Self::TranslateAxis(a) => 1 + a.index() as u32,
            Self::TranslatePlane(a) => 4 + a.index() as u32,
            Self::RotateAxis(a) => 7 + a.index() as u32,
            Self::ScaleAxis(a) => 10 + a.index() as u32,
            Self::ScaleUniform => 13,
        };
        HandleId(HandleId::BASE + offset)
    }
}

/// Numeric handle identifier from a reserved range that no entity id or
/// other handle uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(pub u32);

impl HandleId {
    pub const NONE: Self = Self(0);
    const BASE: u32 = EntityId::MAX.0 + 1;

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    pub fn handle(self) -> Option<Handle> {
        let offset = self.0.checked_sub(Self::BASE)?;
        let axis = |i: u32| Axis::ALL[(i % 3) as usize];
        match offset {
            1..=3 => Some(Handle::TranslateAxis(axis(offset - 1))),
            4..=6 => Some(Handle::TranslatePlane(axis(offset - 4))),
            7..=9 => Some(Handle::RotateAxis(axis(offset - 7))),
            10..=12 => Some(Handle::ScaleAxis(axis(offset - 10))),
            13 => Some(Handle::ScaleUniform),
            _ => None,
        }
    }
}

impl From<Handle> for HandleId {
    fn from(handle: Handle) -> Self {
        handle.id()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragKind {
    AxisTranslate,
    PlaneTranslate,
    Rotate,
    ScaleAxis,
    ScaleUniform,
}

impl DragKind {
    fn label(self) -> &'static str {
        match self {
            Self::AxisTranslate | Self::PlaneTranslate => "Move",
            Self::Rotate => "Rotate",
            Self::ScaleAxis | Self::ScaleUniform => "Scale",
        }
    }
}

/// Where the gizmo sits and how its axes are oriented.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub pivot: Vec3,
    /// Orientation of translate and rotate handles.
    pub orientation: Quat,
    /// World rotation of the active entity; scale handles always follow it
    /// because they act on local scale.
    pub active_rotation: Quat,
}

impl Placement {
    fn handle_rotation(&self, handle: Handle) -> Quat {
        match handle {
            Handle::ScaleAxis(_) | Handle::ScaleUniform => self.active_rotation,
            _ => self.orientation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Snapshot {
    id: EntityId,
    local: Transform,
    world: Transform,
}

/// Geometry fixed at drag start.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Anchor {
    Axis { dir: Vec3, t0: f32 },
    Plane { plane: Plane, a: Vec3, b: Vec3, hit0: Vec3 },
    Rotate { plane: Plane, axis: Vec3, u: Vec3, v: Vec3, angle0: f32 },
    ScaleAxis { dir: Vec3, component: usize, t0: f32 },
    ScaleUniform { plane: Plane, radius0: f32 },
}

/// The live manipulation. Its presence is what "dragging" means.
#[derive(Debug, Clone, PartialEq)]
pub struct DragSession {
    handle: Handle,
    pivot: Vec3,
    snapshots: Vec<Snapshot>,
    anchor: Anchor,
}

impl DragSession {
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn kind(&self) -> DragKind {
        self.handle.kind()
    }

    pub fn pivot(&self) -> Vec3 {
        self.pivot
    }

    /// Entities the drag moves, in selection order.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.snapshots.iter().map(|s| s.id)
    }
}

/// Gizmo state: mode, space, snapping, hover and the optional drag session.
#[derive(Debug, Clone, Default)]
pub struct Gizmo {
    mode: GizmoMode,
    space: GizmoSpace,
    pivot_mode: PivotMode,
    snap: SnapSettings,
    config: GizmoConfig,
    hover: Option<Handle>,
    session: Option<DragSession>,
}

impl Gizmo {
    pub fn new(config: GizmoConfig, snap: SnapSettings) -> Self {
        Self {
            config,
            snap,
            ..Self::default()
        }
    }

    pub fn mode(&self) -> GizmoMode {
        self.mode
    }

    /// Switch mode; refused while a drag is live.
    pub fn set_mode(&mut self, mode: GizmoMode) -> bool {
        if self.session.is_some() {
            return false;
        }
        if self.mode != mode {
            self.hover = None;
        }
        self.mode = mode;
        true
    }

    pub fn space(&self) -> GizmoSpace {
        self.space
    }

    /// Switch space; refused while a drag is live.
    pub fn set_space(&mut self, space: GizmoSpace) -> bool {
        if self.session.is_some() {
            return false;
        }
        self.space = space;
        true
    }

    pub fn pivot_mode(&self) -> PivotMode {
        self.pivot_mode
    }

    pub fn set_pivot_mode(&mut self, pivot_mode: PivotMode) -> bool {
        if self.session.is_some() {
            return false;
        }
        self.pivot_mode = pivot_mode;
        true
    }

    pub fn snap(&self) -> SnapSettings {
        self.snap
    }

    /// Takes effect on the next update, including mid-drag.
    pub fn set_snap(&mut self, snap: SnapSettings) {
        self.snap = snap;
    }

    pub fn config(&self) -> &GizmoConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: GizmoConfig) {
        self.config = config;
    }

    pub fn hover(&self) -> Option<Handle> {
        self.hover
    }

    pub fn set_hover(&mut self, hover: Option<Handle>) {
        self.hover = hover;
    }

    pub fn is_dragging(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&DragSession> {
        self.session.as_ref()
    }

    /// Pivot and orientation for the current selection, or `None` when
    /// nothing live is selected.
    pub fn placement<S: SceneQuery + ?Sized>(
        &self,
        scene: &S,
        selection: &Selection,
    ) -> Option<Placement> {
        let active = scene.world_transform(selection.active()?)?;
        let pivot = match self.pivot_mode {
            PivotMode::Active => active.position,
            PivotMode::Center => {
                let positions: Vec<Vec3> = selection
                    .ids()
                    .iter()
                    .filter_map(|id| scene.world_transform(*id))
                    .map(|t| t.position)
                    .collect();
                positions.iter().copied().sum::<Vec3>() / positions.len().max(1) as f32
            }
        };
        let active_rotation = active.rotation.normalize();
        let orientation = match self.space {
            GizmoSpace::World => Quat::IDENTITY,
            GizmoSpace::Local => active_rotation,
        };
        Some(Placement {
            pivot,
            orientation,
            active_rotation,
        })
    }

    /// World length of the handles at `pivot`, constant in screen pixels.
    /// `None` when the pivot is behind the near plane.
    pub fn handle_length(&self, camera: &CameraParams, pivot: Vec3) -> Option<f32> {
        let depth = camera.depth_along_view(pivot);
        if depth <= camera.near {
            return None;
        }
        Some(camera.pixels_to_world(self.config.handle_pixels, depth))
    }

    /// Nearest visible handle along `ray`.
    pub fn pick_handle<S: SceneQuery + ?Sized>(
        &self,
        ray: &Ray,
        camera: &CameraParams,
        scene: &S,
        selection: &Selection,
    ) -> Option<Handle> {
        let placement = self.placement(scene, selection)?;
        let length = self.handle_length(camera, placement.pivot)?;
        let depth = camera.depth_along_view(placement.pivot);
        let tolerance = camera.pixels_to_world(self.config.pick_tolerance_pixels, depth);

        let mut best: Option<(f32, Handle)> = None;
        for &handle in Handle::for_mode(self.mode) {
            let Some(t) = hit_handle(handle, ray, &placement, length, tolerance) else {
                continue;
            };
            if best.is_none_or(|(best_t, _)| t < best_t) {
                best = Some((t, handle));
            }
        }
        best.map(|(_, handle)| handle)
    }

    /// [`Gizmo::pick_handle`] for a cursor in viewport pixels.
    pub fn pick_handle_at<S: SceneQuery + ?Sized>(
        &self,
        cursor: Vec2,
        camera: &CameraParams,
        scene: &S,
        selection: &Selection,
    ) -> Option<Handle> {
        let ray = camera.ray_from_pixel(cursor)?;
        self.pick_handle(&ray, camera, scene, selection)
    }

    /// Start dragging `handle` from the cursor position. Returns `false` and
    /// stays idle when the selection is empty, the handle is `NONE` or not
    /// part of the current mode, or the start geometry is degenerate.
    pub fn begin_drag<S: SceneMut + ?Sized>(
        &mut self,
        handle: HandleId,
        cursor: Vec2,
        camera: &CameraParams,
        scene: &S,
        selection: &Selection,
    ) -> bool {
        let Some(ray) = camera.ray_from_pixel(cursor) else {
            return false;
        };
        self.begin_drag_ray(handle, &ray, camera, scene, selection)
    }

    /// [`Gizmo::begin_drag`] with an explicit pick ray.
    pub fn begin_drag_ray<S: SceneMut + ?Sized>(
        &mut self,
        handle: HandleId,
        ray: &Ray,
        camera: &CameraParams,
        scene: &S,
        selection: &Selection,
    ) -> bool {
        if self.session.is_some() {
            tracing::debug!("begin_drag while dragging ignored");
            return false;
        }
        let Some(handle) = handle.handle() else {
            return false;
        };
        if handle.mode() != self.mode || selection.is_empty() {
            return false;
        }
        let Some(placement) = self.placement(scene, selection) else {
            return false;
        };

        // Descendants of other selected entities follow their ancestor.
        let ids = selection.ids();
        let snapshots: Vec<Snapshot> = ids
            .iter()
            .copied()
            .filter(|id| !ids.iter().any(|other| scene.is_descendant_of(*id, *other)))
            .filter_map(|id| {
                Some(Snapshot {
                    id,
                    local: scene.local_transform(id)?,
                    world: scene.world_transform(id)?,
                })
            })
            .collect();
        if snapshots.is_empty() {
            return false;
        }

        let Some(anchor) = anchor(handle, ray, camera, &placement) else {
            tracing::debug!(?handle, "degenerate drag start");
            return false;
        };
        tracing::debug!(?handle, entities = snapshots.len(), "drag started");
        self.hover = Some(handle);
        self.session = Some(DragSession {
            handle,
            pivot: placement.pivot,
            snapshots,
            anchor,
        });
        true
    }

    /// Move the drag to the cursor position. Returns whether transforms
    /// were written.
    pub fn update_drag<S: SceneMut + ?Sized>(
        &mut self,
        cursor: Vec2,
        camera: &CameraParams,
        scene: &mut S,
    ) -> bool {
        let Some(ray) = camera.ray_from_pixel(cursor) else {
            return false;
        };
        self.update_drag_ray(&ray, scene)
    }

    /// [`Gizmo::update_drag`] with an explicit pick ray.
    pub fn update_drag_ray<S: SceneMut + ?Sized>(&mut self, ray: &Ray, scene: &mut S) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        let Some(op) = drag_op(session, ray, &self.snap) else {
            return false;
        };
        if op.is_identity() {
            // Zero delta: the recomputed targets would drift by round-off.
            for snapshot in &session.snapshots {
                scene.set_local_transform(snapshot.id, snapshot.local);
            }
            return true;
        }
        for snapshot in &session.snapshots {
            let target = op.apply(session.pivot, snapshot);
            if !target.is_finite() {
                continue;
            }
            if target == snapshot.world {
                scene.set_local_transform(snapshot.id, snapshot.local);
            } else if op.is_local() {
                scene.set_local_transform(snapshot.id, local_scaled(snapshot, target));
            } else {
                scene.set_world_transform(snapshot.id, target);
            }
        }
        true
    }

    /// Finish the drag. Every entity whose local transform changed becomes
    /// one record of a single composite edit; `None` when nothing changed.
    pub fn end_drag<S: SceneMut + ?Sized>(&mut self, scene: &S) -> Option<CompositeEdit> {
        let session = self.session.take()?;
        let changes: Vec<TransformChange> = session
            .snapshots
            .iter()
            .filter_map(|s| {
                let new = scene.local_transform(s.id)?;
                (new != s.local).then_some(TransformChange {
                    id: s.id,
                    old: s.local,
                    new,
                })
            })
            .collect();
        tracing::debug!(handle = ?session.handle, changed = changes.len(), "drag ended");
        if changes.is_empty() {
            return None;
        }
        Some(CompositeEdit::new(session.kind().label(), changes))
    }

    /// Abort the drag, restoring every captured local transform. Emits no
    /// edit.
    pub fn cancel_drag<S: SceneMut + ?Sized>(&mut self, scene: &mut S) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        for snapshot in &session.snapshots {
            scene.set_local_transform(snapshot.id, snapshot.local);
        }
        tracing::debug!(handle = ?session.handle, "drag cancelled");
        true
    }

    /// Line geometry for the visible handles, with the hovered or dragged
    /// handle highlighted.
    pub fn overlay<S: SceneQuery + ?Sized>(
        &self,
        camera: &CameraParams,
        scene: &S,
        selection: &Selection,
    ) -> OverlayList {
        let mut overlay = OverlayList::new();
        let Some(placement) = self.placement(scene, selection) else {
            return overlay;
        };
        let Some(length) = self.handle_length(camera, placement.pivot) else {
            return overlay;
        };
        let highlighted = match &self.session {
            Some(session) => Some(session.handle),
            None => self.hover,
        };
        let pivot = placement.pivot;
        for &handle in Handle::for_mode(self.mode) {
            let rotation = placement.handle_rotation(handle);
            let color = |base: Vec4| if highlighted == Some(handle) { HIGHLIGHT } else { base };
            match handle {
                Handle::TranslateAxis(axis) => {
                    let dir = rotation * axis.unit();
                    let tip = pivot + dir * length;
                    overlay.line(pivot, tip, color(axis.color()));
                    let (a, b) = axis.others();
                    let back = tip - dir * length * 0.12;
                    for side in [rotation * a.unit(), rotation * b.unit()] {
                        overlay.line(tip, back + side * length * 0.04, color(axis.color()));
                        overlay.line(tip, back - side * length * 0.04, color(axis.color()));
                    }
                }
                Handle::TranslatePlane(normal) => {
                    let (a, b) = normal.others();
                    let (a, b) = (rotation * a.unit(), rotation * b.unit());
                    let (lo, hi) = (PLANE_HANDLE_SPAN.0 * length, PLANE_HANDLE_SPAN.1 * length);
                    let corners = [
                        pivot + a * lo + b * lo,
                        pivot + a * hi + b * lo,
                        pivot + a * hi + b * hi,
                        pivot + a * lo + b * hi,
                    ];
                    overlay.polygon(&corners, color(normal.color()));
                }
                Handle::RotateAxis(axis) => {
                    let dir = rotation * axis.unit();
                    if let Some((u, v)) = orthonormal_basis(dir) {
                        overlay.polygon(&circle(pivot, u, v, length), color(axis.color()));
                    }
                }
                Handle::ScaleAxis(axis) => {
                    let dir = rotation * axis.unit();
                    let tip = pivot + dir * length;
                    overlay.line(pivot, tip, color(axis.color()));
                    let (a, b) = axis.others();
                    let (a, b) = (rotation * a.unit() * 0.05 * length, rotation * b.unit() * 0.05 * length);
                    overlay.polygon(&[tip + a + b, tip + a - b, tip - a - b, tip - a + b], color(axis.color()));
                }
                Handle::ScaleUniform => {
                    if let Some((u, v)) = orthonormal_basis(camera.forward) {
                        let r = UNIFORM_HANDLE_RADIUS * length;
                        overlay.polygon(&circle(pivot, u, v, r), color(UNIFORM_COLOR));
                    }
                }
            }
        }
        overlay
    }
}

fn circle(center: Vec3, u: Vec3, v: Vec3, radius: f32) -> Vec<Vec3> {
    (0..RING_SEGMENTS)
        .map(|i| {
            let a = i as f32 / RING_SEGMENTS as f32 * std::f32::consts::TAU;
            center + (u * a.cos() + v * a.sin()) * radius
        })
        .collect()
}

/// Ray parameter where `ray` hits `handle`, if it does.
fn hit_handle(
    handle: Handle,
    ray: &Ray,
    placement: &Placement,
    length: f32,
    tolerance: f32,
) -> Option<f32> {
    let pivot = placement.pivot;
    let rotation = placement.handle_rotation(handle);
    match handle {
        Handle::TranslateAxis(axis) | Handle::ScaleAxis(axis) => {
            let tip = pivot + rotation * axis.unit() * length;
            let (distance, t) = ray_segment_distance(ray, pivot, tip);
            (distance <= tolerance).then_some(t)
        }
        Handle::TranslatePlane(normal) => {
            let plane = Plane::from_point_normal(pivot, rotation * normal.unit())?;
            let t = plane.intersect_ray(ray)?;
            let rel = ray.at(t) - pivot;
            let (a, b) = normal.others();
            let (lo, hi) = (PLANE_HANDLE_SPAN.0 * length, PLANE_HANDLE_SPAN.1 * length);
            let inside = |c: f32| (lo..=hi).contains(&c);
            (inside(rel.dot(rotation * a.unit())) && inside(rel.dot(rotation * b.unit())))
                .then_some(t)
        }
        Handle::RotateAxis(axis) => {
            let plane = Plane::from_point_normal(pivot, rotation * axis.unit())?;
            let t = plane.intersect_ray(ray)?;
            let radius = (ray.at(t) - pivot).length();
            ((radius - length).abs() <= tolerance).then_some(t)
        }
        Handle::ScaleUniform => ray_sphere(ray, pivot, UNIFORM_HANDLE_RADIUS * length),
    }
}

fn anchor(handle: Handle, ray: &Ray, camera: &CameraParams, placement: &Placement) -> Option<Anchor> {
    let pivot = placement.pivot;
    let rotation = placement.handle_rotation(handle);
    match handle {
        Handle::TranslateAxis(axis) => {
            let dir = (rotation * axis.unit()).try_normalize()?;
            let t0 = closest_line_parameter(ray, pivot, dir)?;
            Some(Anchor::Axis { dir, t0 })
        }
        Handle::TranslatePlane(normal) => {
            let plane = Plane::from_point_normal(pivot, rotation * normal.unit())?;
            let hit0 = plane.intersect_point(ray)?;
            let (a, b) = normal.others();
            Some(Anchor::Plane {
                plane,
                a: rotation * a.unit(),
                b: rotation * b.unit(),
                hit0,
            })
        }
        Handle::RotateAxis(axis) => {
            let axis = (rotation * axis.unit()).try_normalize()?;
            let plane = Plane::from_point_normal(pivot, axis)?;
            let (u, v) = orthonormal_basis(axis)?;
            let angle0 = plane_angle(plane.intersect_point(ray)? - pivot, u, v)?;
            Some(Anchor::Rotate {
                plane,
                axis,
                u,
                v,
                angle0,
            })
        }
        Handle::ScaleAxis(axis) => {
            let dir = (rotation * axis.unit()).try_normalize()?;
            let t0 = closest_line_parameter(ray, pivot, dir)?;
            Some(Anchor::ScaleAxis {
                dir,
                component: axis.index(),
                t0,
            })
        }
        Handle::ScaleUniform => {
            let plane = Plane::from_point_normal(pivot, -camera.forward)?;
            let radius0 = (plane.intersect_point(ray)? - pivot).length();
            Some(Anchor::ScaleUniform { plane, radius0 })
        }
    }
}

/// Angle of `offset` in the `(u, v)` basis; `None` at the pivot itself.
fn plane_angle(offset: Vec3, u: Vec3, v: Vec3) -> Option<f32> {
    if offset.length_squared() <= GEOMETRY_EPSILON * GEOMETRY_EPSILON {
        return None;
    }
    let angle = offset.dot(v).atan2(offset.dot(u));
    angle.is_finite().then_some(angle)
}

/// What one update does to every snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
enum DragOp {
    Translate(Vec3),
    Rotate(Quat),
    /// Delta added to one local scale component.
    ScaleAxis { component: usize, delta: f32 },
    ScaleUniform(f32),
}

impl DragOp {
    fn is_local(self) -> bool {
        matches!(self, Self::ScaleAxis { .. })
    }

    /// True when the update leaves every snapshot where it started.
    fn is_identity(self) -> bool {
        match self {
            Self::Translate(delta) => delta == Vec3::ZERO,
            Self::Rotate(dq) => dq == Quat::IDENTITY,
            Self::ScaleAxis { delta, .. } => delta == 0.0,
            Self::ScaleUniform(factor) => factor == 1.0,
        }
    }

    /// Target world transform for a snapshot. Axis scale keeps the world
    /// transform here and is finished in [`local_scaled`].
    fn apply(self, pivot: Vec3, snapshot: &Snapshot) -> Transform {
        let world = snapshot.world;
        match self {
            Self::Translate(delta) => Transform {
                position: world.position + delta,
                ..world
            },
            Self::Rotate(dq) => Transform {
                position: pivot + dq * (world.position - pivot),
                rotation: (dq * world.rotation).normalize(),
                scale: world.scale,
            },
            Self::ScaleAxis { component, delta } => {
                if delta == 0.0 {
                    world
                } else {
                    let mut scale = snapshot.local.scale;
                    scale[component] = (scale[component] + delta).max(MIN_SCALE);
                    Transform { scale, ..world }
                }
            }
            Self::ScaleUniform(factor) => Transform {
                position: pivot + (world.position - pivot) * factor,
                scale: world.scale * factor,
                ..world
            },
        }
    }
}

/// Local transform for an axis-scale target: the snapshot's local transform
/// with the new scale.
fn local_scaled(snapshot: &Snapshot, target: Transform) -> Transform {
    Transform {
        scale: target.scale,
        ..snapshot.local
    }
}

fn drag_op(session: &DragSession, ray: &Ray, snap: &SnapSettings) -> Option<DragOp> {
    let pivot = session.pivot;
    match session.anchor {
        Anchor::Axis { dir, t0 } => {
            let t = closest_line_parameter(ray, pivot, dir)?;
            let delta = snap.snap_move(t - t0);
            Some(DragOp::Translate(dir * delta))
        }
        Anchor::Plane { plane, a, b, hit0 } => {
            let offset = plane.intersect_point(ray)? - hit0;
            let da = snap.snap_move(offset.dot(a));
            let db = snap.snap_move(offset.dot(b));
            Some(DragOp::Translate(a * da + b * db))
        }
        Anchor::Rotate {
            plane,
            axis,
            u,
            v,
            angle0,
        } => {
            let angle = plane_angle(plane.intersect_point(ray)? - pivot, u, v)?;
            let delta = snap.snap_angle(wrap_angle(angle - angle0));
            Some(DragOp::Rotate(Quat::from_axis_angle(axis, delta)))
        }
        Anchor::ScaleAxis { dir, component, t0 } => {
            let t = closest_line_parameter(ray, pivot, dir)?;
            Some(DragOp::ScaleAxis {
                component,
                delta: snap.snap_scale(t - t0),
            })
        }
        Anchor::ScaleUniform { plane, radius0 } => {
            if radius0 <= GEOMETRY_EPSILON {
                return None;
            }
            let radius = (plane.intersect_point(ray)? - pivot).length();
            let factor = snap.snap_scale(radius / radius0).max(MIN_SCALE);
            factor.is_finite().then_some(DragOp::ScaleUniform(factor))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::UVec2;
    use stagehand_ecs::{MaterialId, MeshKind, MeshRenderer, Scene};

    fn camera() -> CameraParams {
        CameraParams::look_at(
            Vec3::new(0.0, 0.0, 10.0),
            Vec3::ZERO,
            Vec3::Y,
            60f32.to_radians(),
            0.1,
            100.0,
            UVec2::new(320, 240),
        )
    }

    fn scene_with(positions: &[Vec3]) -> (Scene, Vec<EntityId>) {
        let mut scene = Scene::new();
        let cube = MeshRenderer::primitive(MeshKind::Cube, MaterialId(1));
        let ids = positions
            .iter()
            .map(|p| scene.spawn_mesh("e", Transform::from_position(*p), cube).unwrap())
            .collect();
        (scene, ids)
    }

    fn down_at(p: Vec3) -> Ray {
        Ray::new(p + Vec3::Y * 5.0, Vec3::NEG_Y).unwrap()
    }

    #[test]
    fn handle_ids_round_trip_and_are_distinct() {
        let all: Vec<Handle> = [GizmoMode::Translate, GizmoMode::Rotate, GizmoMode::Scale]
            .iter()
            .flat_map(|m| Handle::for_mode(*m).iter().copied())
            .collect();
        assert_eq!(all.len(), 13);
        for (i, h) in all.iter().enumerate() {
            assert_eq!(h.id().handle(), Some(*h));
            assert!(!h.id().is_none());
            assert_ne!(h.id().0, stagehand_common::ObjectId::GIZMO.0);
            assert!(EntityId::new(h.id().0).is_err());
            for other in &all[i + 1..] {
                assert_ne!(h.id(), other.id());
            }
        }
        assert_eq!(HandleId::NONE.handle(), None);
        assert_eq!(HandleId(7).handle(), None);
    }

    #[test]
    fn handle_length_is_constant_in_pixels() {
        let gizmo = Gizmo::default();
        let cam = camera();
        let near = gizmo.handle_length(&cam, Vec3::new(0.0, 0.0, 5.0)).unwrap();
        let far = gizmo.handle_length(&cam, Vec3::new(0.0, 0.0, -10.0)).unwrap();
        assert!((far / near - 4.0).abs() < 1e-4);
        let expected = 100.0 / 240.0 * 2.0 * 10.0 * 30f32.to_radians().tan();
        let mid = gizmo.handle_length(&cam, Vec3::ZERO).unwrap();
        assert!((mid - expected).abs() < 1e-4);
        assert!(gizmo.handle_length(&cam, Vec3::new(0.0, 0.0, 20.0)).is_none());
    }

    #[test]
    fn pick_axis_handle_along_its_length() {
        let (scene, ids) = scene_with(&[Vec3::ZERO]);
        let mut selection = Selection::new();
        selection.select(ids[0]);
        let gizmo = Gizmo::default();
        let cam = camera();
        let length = gizmo.handle_length(&cam, Vec3::ZERO).unwrap();

        let on_x = cam.world_to_pixel(Vec3::X * length * 0.7).unwrap();
        assert_eq!(
            gizmo.pick_handle_at(on_x, &cam, &scene, &selection),
            Some(Handle::TranslateAxis(Axis::X))
        );
        let on_y = cam.world_to_pixel(Vec3::Y * length * 0.7).unwrap();
        assert_eq!(
            gizmo.pick_handle_at(on_y, &cam, &scene, &selection),
            Some(Handle::TranslateAxis(Axis::Y))
        );
        let plane = cam.world_to_pixel(Vec3::new(0.3, 0.3, 0.0) * length).unwrap();
        assert_eq!(
            gizmo.pick_handle_at(plane, &cam, &scene, &selection),
            Some(Handle::TranslatePlane(Axis::Z))
        );
        let away = cam.world_to_pixel(Vec3::new(-0.6, -0.6, 0.0) * length).unwrap();
        assert_eq!(gizmo.pick_handle_at(away, &cam, &scene, &selection), None);
    }

    #[test]
    fn pick_needs_a_selection() {
        let (scene, _) = scene_with(&[Vec3::ZERO]);
        let gizmo = Gizmo::default();
        let cam = camera();
        let ray = cam.ray_from_pixel(Vec2::new(200.0, 120.0)).unwrap();
        assert_eq!(gizmo.pick_handle(&ray, &cam, &scene, &Selection::new()), None);
    }

    #[test]
    fn pick_rotate_ring() {
        let (scene, ids) = scene_with(&[Vec3::ZERO]);
        let mut selection = Selection::new();
        selection.select(ids[0]);
        let mut gizmo = Gizmo::default();
        gizmo.set_mode(GizmoMode::Rotate);
        let cam = camera();
        let length = gizmo.handle_length(&cam, Vec3::ZERO).unwrap();
        // The Z ring faces the camera.
        let on_ring = cam.world_to_pixel(Vec3::new(0.0, length, 0.0)).unwrap();
        assert_eq!(
            gizmo.pick_handle_at(on_ring, &cam, &scene, &selection),
            Some(Handle::RotateAxis(Axis::Z))
        );
    }

    #[test]
    fn pivot_modes() {
        let (scene, ids) = scene_with(&[Vec3::ZERO, Vec3::new(4.0, 0.0, 2.0)]);
        let mut selection = Selection::new();
        selection.add(ids[0]);
        selection.add(ids[1]);
        selection.set_active(ids[0]);
        let mut gizmo = Gizmo::default();
        assert_eq!(gizmo.placement(&scene, &selection).unwrap().pivot, Vec3::ZERO);
        gizmo.set_pivot_mode(PivotMode::Center);
        assert_eq!(
            gizmo.placement(&scene, &selection).unwrap().pivot,
            Vec3::new(2.0, 0.0, 1.0)
        );
    }

    #[test]
    fn local_space_follows_active_rotation() {
        let (mut scene, ids) = scene_with(&[Vec3::ZERO]);
        let rotation = Quat::from_rotation_y(std::f32::consts::FRAC_PI_2);
        scene.set_local_transform(
            ids[0],
            Transform {
                rotation,
                ..Transform::IDENTITY
            },
        );
        let mut selection = Selection::new();
        selection.select(ids[0]);
        let mut gizmo = Gizmo::default();
        assert_eq!(gizmo.placement(&scene, &selection).unwrap().orientation, Quat::IDENTITY);
        gizmo.set_space(GizmoSpace::Local);
        let placement = gizmo.placement(&scene, &selection).unwrap();
        assert!((placement.orientation * Vec3::X).abs_diff_eq(Vec3::NEG_Z, 1e-5));
    }

    #[test]
    fn mode_switch_refused_while_dragging() {
        let (scene, ids) = scene_with(&[Vec3::ZERO]);
        let mut selection = Selection::new();
        selection.select(ids[0]);
        let mut gizmo = Gizmo::default();
        let ray = Ray::new(Vec3::new(0.5, 0.0, 5.0), Vec3::NEG_Z).unwrap();
        assert!(gizmo.begin_drag_ray(
            Handle::TranslateAxis(Axis::X).id(),
            &ray,
            &camera(),
            &scene,
            &selection
        ));
        assert!(!gizmo.set_mode(GizmoMode::Rotate));
        assert!(!gizmo.set_space(GizmoSpace::Local));
        assert_eq!(gizmo.mode(), GizmoMode::Translate);
    }

    #[test]
    fn rotation_wraps_across_pi() {
        let (mut scene, ids) = scene_with(&[Vec3::ZERO]);
        let mut selection = Selection::new();
        selection.select(ids[0]);
        let mut gizmo = Gizmo::default();
        gizmo.set_mode(GizmoMode::Rotate);
        let cam = camera();

        // Start just short of +PI and end just past it; the delta is small.
        let (u, v) = orthonormal_basis(Vec3::Y).unwrap();
        let at = |angle: f32| (u * angle.cos() + v * angle.sin()) * 2.0;
        let start = std::f32::consts::PI - 0.05;
        let end = -std::f32::consts::PI + 0.05;
        assert!(gizmo.begin_drag_ray(
            Handle::RotateAxis(Axis::Y).id(),
            &down_at(at(start)),
            &cam,
            &scene,
            &selection
        ));
        assert!(gizmo.update_drag_ray(&down_at(at(end)), &mut scene));
        let rotation = scene.local_transform(ids[0]).unwrap().rotation;
        let (_, angle) = rotation.to_axis_angle();
        assert!((angle - 0.1).abs() < 1e-3, "angle {angle}");
    }

    #[test]
    fn overlay_highlights_hover() {
        let (scene, ids) = scene_with(&[Vec3::ZERO]);
        let mut selection = Selection::new();
        let mut gizmo = Gizmo::default();
        let cam = camera();
        assert!(gizmo.overlay(&cam, &scene, &selection).is_empty());

        selection.select(ids[0]);
        let plain = gizmo.overlay(&cam, &scene, &selection);
        assert!(!plain.is_empty());
        assert!(plain.lines().iter().all(|l| l.color != HIGHLIGHT));

        gizmo.set_hover(Some(Handle::TranslateAxis(Axis::Y)));
        let hovered = gizmo.overlay(&cam, &scene, &selection);
        assert_eq!(hovered.len(), plain.len());
        assert!(hovered.lines().iter().any(|l| l.color == HIGHLIGHT));

        gizmo.set_mode(GizmoMode::Rotate);
        let rings = gizmo.overlay(&cam, &scene, &selection);
        assert_eq!(rings.len(), 3 * RING_SEGMENTS);
    }

    #[test]
    fn snapped_zero_ops_are_identity() {
        let snap = SnapSettings {
            enabled: true,
            ..SnapSettings::default()
        };
        let rotate = DragOp::Rotate(Quat::from_axis_angle(Vec3::Y, snap.snap_angle(-0.02)));
        assert!(rotate.is_identity());
        assert!(DragOp::Translate(Vec3::X * snap.snap_move(-0.1)).is_identity());
        assert!(
            DragOp::ScaleAxis {
                component: 0,
                delta: snap.snap_scale(0.04),
            }
            .is_identity()
        );
        assert!(DragOp::ScaleUniform(snap.snap_scale(1.04)).is_identity());
        assert!(!DragOp::Rotate(Quat::from_rotation_y(snap.angle_step)).is_identity());
        assert!(!DragOp::ScaleUniform(1.5).is_identity());
    }
}
