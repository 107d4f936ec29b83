mod state;
mod ui;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use egui::Context as EguiContext;
use glam::{UVec2, Vec2, Vec3};
use stagehand_assets::MaterialLibrary;
use stagehand_input::{Action, BindingTable, Bindings, Key as ChordKey, KeyChord, Modifiers};
use stagehand_render::ViewportConfig;
use stagehand_render_wgpu::WgpuBackend;
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{DeviceEvent, ElementState, KeyEvent, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, KeyCode, ModifiersState, NamedKey, PhysicalKey};
use winit::window::{Window, WindowId};

use state::AppState;

#[derive(Parser)]
#[command(name = "stagehand-desktop", about = "Stagehand scene viewport")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Viewport configuration (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Material library (JSON); defaults to the demo materials
    #[arg(long)]
    materials: Option<PathBuf>,

    /// Key binding overrides (YAML map of chord to action)
    #[arg(long)]
    bindings: Option<PathBuf>,
}

/// Startup inputs loaded before the window exists.
struct Startup {
    config: ViewportConfig,
    materials: MaterialLibrary,
    bindings: Bindings,
}

impl Startup {
    fn load(cli: &Cli) -> Result<Self> {
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
        let bindings = match &cli.bindings {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading bindings {}", path.display()))?;
                let table: BindingTable = serde_yaml::from_str(&text)?;
                Bindings::with_overrides(&table)?
            }
            None => Bindings::default(),
        };
        Ok(Self {
            config,
            materials,
            bindings,
        })
    }
}

/// Window, surface and egui plumbing.
struct Gpu {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    config: wgpu::SurfaceConfiguration,
    egui_winit: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,
}

impl Gpu {
    fn new(event_loop: &ActiveEventLoop, egui_ctx: &EguiContext) -> Result<Self> {
        let attrs = Window::default_attributes()
            .with_title("Stagehand")
            .with_inner_size(PhysicalSize::new(1280u32, 720));
        let window = Arc::new(event_loop.create_window(attrs).context("creating window")?);

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window.clone())
            .context("creating surface")?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .context("no suitable GPU adapter")?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("stagehand_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
            },
            None,
        ))
        .context("creating device")?;

        let size = window.inner_size();
        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or_else(|| caps.formats.first())
            .copied()
            .context("surface reports no formats")?;
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let egui_winit = egui_winit::State::new(
            egui_ctx.clone(),
            egui::ViewportId::ROOT,
            &window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );
        let egui_renderer = egui_wgpu::Renderer::new(&device, format, None, 1, false);

        tracing::info!(
            backend = adapter.get_info().backend.to_str(),
            ?format,
            "GPU initialized"
        );

        Ok(Self {
            window,
            surface,
            device: Arc::new(device),
            queue: Arc::new(queue),
            config,
            egui_winit,
            egui_renderer,
        })
    }

    fn size(&self) -> UVec2 {
        UVec2::new(self.config.width, self.config.height)
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        self.config.width = size.width.max(1);
        self.config.height = size.height.max(1);
        self.surface.configure(&self.device, &self.config);
    }
}

/// Keyboard and mouse state the window layer tracks between events.
#[derive(Default)]
struct InputState {
    keys_held: HashSet<KeyCode>,
    /// Right mouse held: fly mode.
    mouse_captured: bool,
    modifiers: ModifiersState,
}

impl InputState {
    /// Camera-local fly direction from held WASD/QE keys.
    fn fly_direction(&self) -> Vec3 {
        let held = |code| self.keys_held.contains(&code);
        let mut dir = Vec3::ZERO;
        for (code, axis) in [
            (KeyCode::KeyW, Vec3::Z),
            (KeyCode::KeyS, Vec3::NEG_Z),
            (KeyCode::KeyD, Vec3::X),
            (KeyCode::KeyA, Vec3::NEG_X),
            (KeyCode::KeyE, Vec3::Y),
            (KeyCode::KeyQ, Vec3::NEG_Y),
        ] {
            if held(code) {
                dir += axis;
            }
        }
        dir
    }

    fn chord(&self, key: &Key) -> Option<KeyChord> {
        let key = match key {
            Key::Character(text) => ChordKey::Char(text.chars().next()?.to_ascii_lowercase()),
            Key::Named(NamedKey::Escape) => ChordKey::Escape,
            Key::Named(NamedKey::Delete | NamedKey::Backspace) => ChordKey::Delete,
            Key::Named(NamedKey::Tab) => ChordKey::Tab,
            Key::Named(NamedKey::Space) => ChordKey::Space,
            _ => return None,
        };
        Some(KeyChord {
            key,
            modifiers: Modifiers {
                ctrl: self.modifiers.control_key() || self.modifiers.super_key(),
                shift: self.modifiers.shift_key(),
            },
        })
    }
}

struct GpuApp {
    startup: Option<Startup>,
    state: Option<AppState<WgpuBackend>>,
    gpu: Option<Gpu>,
    input: InputState,
    egui_ctx: EguiContext,
    last_frame: Instant,
}

impl GpuApp {
    fn new(startup: Startup) -> Self {
        Self {
            startup: Some(startup),
            state: None,
            gpu: None,
            input: InputState::default(),
            egui_ctx: EguiContext::default(),
            last_frame: Instant::now(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let startup = self.startup.take().context("already initialized")?;
        let gpu = Gpu::new(event_loop, &self.egui_ctx)?;
        let backend = WgpuBackend::new(gpu.device.clone(), gpu.queue.clone(), Some(gpu.config.format));
        let state = AppState::new(
            backend,
            startup.config,
            startup.materials,
            startup.bindings,
            gpu.size(),
        )?;
        self.gpu = Some(gpu);
        self.state = Some(state);
        Ok(())
    }

    fn keyboard(&mut self, event: &KeyEvent) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        let pressed = event.state == ElementState::Pressed;
        if let PhysicalKey::Code(code) = event.physical_key {
            if pressed {
                self.input.keys_held.insert(code);
            } else {
                self.input.keys_held.remove(&code);
            }
        }
        // While flying, letters steer the camera instead of switching tools.
        if !pressed || event.repeat || self.input.mouse_captured {
            return;
        }
        if event.logical_key == Key::Named(NamedKey::F1) {
            state.show_inspector = !state.show_inspector;
            return;
        }
        if let Some(chord) = self.input.chord(&event.logical_key) {
            tracing::trace!(%chord, "key");
            state.key(chord);
        }
    }

    fn redraw(&mut self) {
        let now = Instant::now();
        let dt = (now - self.last_frame).as_secs_f32().min(0.1);
        self.last_frame = now;

        let (Some(gpu), Some(state)) = (self.gpu.as_mut(), self.state.as_mut()) else {
            return;
        };
        if self.input.mouse_captured {
            state.fly(self.input.fly_direction(), dt);
        }

        let frame = match gpu.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                gpu.surface.configure(&gpu.device, &gpu.config);
                return;
            }
            Err(err) => {
                tracing::error!(%err, "surface error");
                return;
            }
        };
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        match state.frame() {
            Ok(output) => {
                state
                    .viewport
                    .pipeline()
                    .backend()
                    .present(output.color, &view, gpu.size());
            }
            Err(err) => tracing::warn!(%err, "frame failed"),
        }

        let raw_input = gpu.egui_winit.take_egui_input(&gpu.window);
        let full_output = self.egui_ctx.run(raw_input, |ctx| state.draw_ui(ctx));
        gpu.egui_winit
            .handle_platform_output(&gpu.window, full_output.platform_output);
        let paint_jobs = self
            .egui_ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);
        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [gpu.config.width, gpu.config.height],
            pixels_per_point: full_output.pixels_per_point,
        };

        for (id, delta) in &full_output.textures_delta.set {
            gpu.egui_renderer
                .update_texture(&gpu.device, &gpu.queue, *id, delta);
        }
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("egui_encoder"),
            });
        gpu.egui_renderer.update_buffers(
            &gpu.device,
            &gpu.queue,
            &mut encoder,
            &paint_jobs,
            &screen_descriptor,
        );
        {
            let mut pass = encoder
                .begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("egui_pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    ..Default::default()
                })
                .forget_lifetime();
            gpu.egui_renderer
                .render(&mut pass, &paint_jobs, &screen_descriptor);
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));
        for id in &full_output.textures_delta.free {
            gpu.egui_renderer.free_texture(id);
        }

        frame.present();
        gpu.window.request_redraw();
    }
}

impl ApplicationHandler for GpuApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.gpu.is_some() {
            return;
        }
        if let Err(err) = self.init(event_loop) {
            tracing::error!("startup failed: {err:#}");
            event_loop.exit();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(gpu) = self.gpu.as_mut() {
            let response = gpu.egui_winit.on_window_event(&gpu.window, &event);
            if response.consumed {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let (Some(gpu), Some(state)) = (self.gpu.as_mut(), self.state.as_mut()) {
                    gpu.resize(size);
                    state.resize(gpu.size());
                }
            }
            WindowEvent::ModifiersChanged(modifiers) => {
                self.input.modifiers = modifiers.state();
            }
            WindowEvent::KeyboardInput { event, .. } => self.keyboard(&event),
            WindowEvent::CursorMoved { position, .. } => {
                if let Some(state) = self.state.as_mut() {
                    state.cursor_moved(Vec2::new(position.x as f32, position.y as f32));
                }
            }
            WindowEvent::MouseInput { button, state: button_state, .. } => {
                let pressed = button_state == ElementState::Pressed;
                match button {
                    MouseButton::Right => {
                        self.input.mouse_captured = pressed;
                        if let Some(gpu) = &self.gpu {
                            gpu.window.set_cursor_visible(!pressed);
                        }
                    }
                    MouseButton::Left => {
                        let Some(state) = self.state.as_mut() else {
                            return;
                        };
                        if pressed {
                            let cursor = state.cursor();
                            state.apply(Action::Press {
                                cursor,
                                additive: self.input.modifiers.shift_key(),
                            });
                        } else {
                            state.apply(Action::Release);
                        }
                    }
                    _ => {}
                }
            }
            WindowEvent::RedrawRequested => self.redraw(),
            _ => {}
        }
    }

    fn device_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        _device_id: winit::event::DeviceId,
        event: DeviceEvent,
    ) {
        if let DeviceEvent::MouseMotion { delta } = event {
            if self.input.mouse_captured {
                if let Some(state) = self.state.as_mut() {
                    state.apply(Action::LookCamera(Vec2::new(delta.0 as f32, delta.1 as f32)));
                }
            }
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(gpu) = &self.gpu {
            gpu.window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    tracing::info!("stagehand-desktop starting");
    let startup = Startup::load(&cli)?;

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = GpuApp::new(startup);
    event_loop.run_app(&mut app)?;

    Ok(())
}
