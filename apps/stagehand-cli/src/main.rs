mod session;

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use glam::{UVec2, Vec2};
use stagehand_assets::MaterialLibrary;
use stagehand_author::{Axis, GizmoMode, Handle};
use stagehand_common::Ray;
use stagehand_common::geometry::orthonormal_basis;
use stagehand_ecs::SceneQuery;
use stagehand_render::ViewportConfig;
use stagehand_tools::SceneInspector;
use tracing_subscriber::EnvFilter;

use session::Session;

#[derive(Parser)]
#[command(name = "stagehand-cli", about = "Headless scene viewport: render, pick and drag")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Viewport configuration (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Material library (JSON); defaults to the demo materials
    #[arg(long, global = true)]
    materials: Option<PathBuf>,

    /// Render width in pixels
    #[arg(long, default_value = "640", global = true)]
    width: u32,

    /// Render height in pixels
    #[arg(long, default_value = "480", global = true)]
    height: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration and the demo scene
    Info,
    /// Render the demo scene to a PNG
    Render {
        #[arg(short, long, default_value = "frame.png")]
        out: PathBuf,
        /// Entities to select (outlined, with gizmo)
        #[arg(short, long)]
        select: Vec<String>,
        /// Frames to render before saving; more than one lets temporal
        /// resolve accumulate history
        #[arg(long, default_value = "1")]
        frames: u32,
    },
    /// Pick at a pixel, or a rectangle when --to-x/--to-y are given
    Pick {
        x: f32,
        y: f32,
        /// Use the fat (neighborhood) pick
        #[arg(long)]
        fat: bool,
        #[arg(long, requires = "to_y")]
        to_x: Option<f32>,
        #[arg(long, requires = "to_x")]
        to_y: Option<f32>,
    },
    /// Drag a gizmo axis handle on a named entity and report the edit
    Drag {
        entity: String,
        #[arg(long, value_enum, default_value = "x")]
        axis: AxisArg,
        #[arg(long, value_enum, default_value = "translate")]
        mode: ModeArg,
        /// Axis parameter where the drag starts
        #[arg(long, default_value = "0.0")]
        from: f32,
        /// Axis parameter where the drag ends
        #[arg(long, default_value = "1.0")]
        to: f32,
        /// Snap step; snapping is off when omitted
        #[arg(long)]
        step: Option<f32>,
        /// Cancel instead of ending the drag
        #[arg(long)]
        cancel: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum AxisArg {
    X,
    Y,
    Z,
}

impl From<AxisArg> for Axis {
    fn from(axis: AxisArg) -> Self {
        match axis {
            AxisArg::X => Axis::X,
            AxisArg::Y => Axis::Y,
            AxisArg::Z => Axis::Z,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Translate,
    Scale,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = match &cli.config {
        Some(path) => ViewportConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ViewportConfig::default(),
    };
    let materials = match &cli.materials {
        Some(path) => MaterialLibrary::load(path)
            .with_context(|| format!("loading materials {}", path.display()))?,
        None => stagehand_tools::demo::materials(),
    };
    let size = UVec2::new(cli.width, cli.height);
    if size.min_element() < 2 {
        bail!("render size must be at least 2x2, got {}x{}", size.x, size.y);
    }

    match cli.command {
        Commands::Info => {
            println!("stagehand-cli v{}", env!("CARGO_PKG_VERSION"));
            print!("{}", config.to_yaml()?);
            let session = Session::new(config, materials, size)?;
            println!("{}", SceneInspector::summary(&session.scene));
            for id in SceneInspector::list_entities(&session.scene) {
                if let Some(info) = SceneInspector::inspect_entity(&session.scene, id) {
                    println!("  {info}");
                }
            }
        }
        Commands::Render {
            out,
            select,
            frames,
        } => {
            let mut session = Session::new(config, materials, size)?;
            session.select_names(&select)?;
            for _ in 0..frames.max(1) {
                session.render()?;
            }
            println!("{}", SceneInspector::frame(session.viewport.stats()));
            session.save_png(&out)?;
            println!("wrote {}", out.display());
        }
        Commands::Pick {
            x,
            y,
            fat,
            to_x,
            to_y,
        } => {
            let mut session = Session::new(config, materials, size)?;
            session.render()?;
            let cursor = Vec2::new(x, y);
            if let (Some(tx), Some(ty)) = (to_x, to_y) {
                let ids = session.viewport.object_ids_in_rect(cursor, Vec2::new(tx, ty));
                println!("{} entities in rectangle", ids.len());
                for id in ids {
                    if let Some(info) = SceneInspector::inspect_entity(&session.scene, id) {
                        println!("  {info}");
                    }
                }
                return Ok(());
            }
            let hit = if fat {
                session.viewport.object_id_at_fat(cursor)
            } else {
                session.viewport.entity_at(cursor)
            };
            match hit.and_then(|id| SceneInspector::inspect_entity(&session.scene, id)) {
                Some(info) => println!("hit {info}"),
                None => println!("no entity at ({x}, {y})"),
            }
            if let Some(p) = session.viewport.world_position_at(cursor) {
                println!("world position ({:.3}, {:.3}, {:.3})", p.x, p.y, p.z);
            }
        }
        Commands::Drag {
            entity,
            axis,
            mode,
            from,
            to,
            step,
            cancel,
        } => {
            let mut session = Session::new(config, materials, size)?;
            session.select_names(std::slice::from_ref(&entity))?;
            drag(&mut session, axis.into(), mode, from, to, step, cancel)?;
        }
    }

    Ok(())
}

/// Ray perpendicular to `axis` through the entity's pivot whose closest point
/// on the axis line sits at parameter `t`.
fn axis_ray(session: &Session, handle: Handle, axis: Axis, t: f32) -> anyhow::Result<Ray> {
    let placement = session
        .gizmo
        .placement(&session.scene, &session.selection)
        .context("nothing selected")?;
    let rotation = match handle {
        Handle::ScaleAxis(_) => placement.active_rotation,
        _ => placement.orientation,
    };
    let dir = rotation * axis.unit();
    let (side, _) = orthonormal_basis(dir).context("degenerate axis")?;
    Ray::new(placement.pivot + dir * t + side * 5.0, -side).context("degenerate ray")
}

fn drag(
    session: &mut Session,
    axis: Axis,
    mode: ModeArg,
    from: f32,
    to: f32,
    step: Option<f32>,
    cancel: bool,
) -> anyhow::Result<()> {
    let (gizmo_mode, handle) = match mode {
        ModeArg::Translate => (GizmoMode::Translate, Handle::TranslateAxis(axis)),
        ModeArg::Scale => (GizmoMode::Scale, Handle::ScaleAxis(axis)),
    };
    session.gizmo.set_mode(gizmo_mode);
    let mut snap = session.gizmo.snap();
    if let Some(step) = step {
        snap.enabled = true;
        snap.move_step = step;
        snap.scale_step = step;
    }
    session.gizmo.set_snap(snap);

    let Some(id) = session.selection.active() else {
        bail!("nothing selected");
    };
    let before = session.scene.world_transform(id).context("entity vanished")?;

    let start = axis_ray(session, handle, axis, from)?;
    let end = axis_ray(session, handle, axis, to)?;
    if !session
        .gizmo
        .begin_drag_ray(handle.id(), &start, &session.camera, &session.scene, &session.selection)
    {
        bail!("drag could not start on {handle:?}");
    }
    session.gizmo.update_drag_ray(&end, &mut session.scene);
    let during = session.scene.world_transform(id).context("entity vanished")?;
    println!(
        "drag {:?}: position {:?} -> {:?}, scale {:?} -> {:?}",
        handle, before.position, during.position, before.scale, during.scale
    );

    if cancel {
        session.gizmo.cancel_drag(&mut session.scene);
        let after = session.scene.world_transform(id).context("entity vanished")?;
        println!("cancelled: position {:?}, scale {:?}", after.position, after.scale);
        return Ok(());
    }

    match session.gizmo.end_drag(&session.scene) {
        Some(edit) => {
            println!("edit `{}` with {} change(s)", edit.label, edit.len());
            session.editor.record(edit);
            session.editor.undo(&mut session.scene);
            let undone = session.scene.world_transform(id).context("entity vanished")?;
            println!("after undo: position {:?}, scale {:?}", undone.position, undone.scale);
            session.editor.redo(&mut session.scene);
        }
        None => println!("no change recorded"),
    }
    session.render()?;
    println!("{}", SceneInspector::frame(session.viewport.stats()));
    Ok(())
}
