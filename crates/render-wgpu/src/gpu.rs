use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{UVec2, Vec3, Vec4};
use stagehand_assets::{GeometrySlot, ShadingMode};
use stagehand_common::{CameraParams, ObjectId};
use stagehand_render::{
    BackendError, ColorImage, ColorSource, EffectInitError, FrameBackend, OutlineConfig,
    OverlayLine, PixelRect, PostEffectKind, RenderItem, TargetError, TemporalResolve,
};
use wgpu::util::DeviceExt;

use crate::readback::{self, Region};
use crate::shaders;

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
const ID_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Uint;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Per-draw uniforms live at this stride inside one buffer, addressed with
/// dynamic offsets.
const DRAW_STRIDE: usize = 256;

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct CameraUniform {
    view_proj: [[f32; 4]; 4],
    light_dir: [f32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct DrawUniform {
    model: [[f32; 4]; 4],
    normal: [[f32; 4]; 3],
    base_color: [f32; 4],
    emissive: [f32; 4],
    object_id: [u32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
struct PostParams {
    a: [f32; 4],
    b: [f32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct OutlineUniform {
    color: [f32; 4],
    info: [u32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct ResolveUniform {
    inverse_view_proj: [[f32; 4]; 4],
    previous_view_proj: [[f32; 4]; 4],
    blend: [f32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
struct LineVertex {
    position: [f32; 3],
    color: [f32; 4],
}

struct GpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

#[derive(Default)]
struct Targets {
    size: UVec2,
    color: Option<wgpu::Texture>,
    ids: Option<wgpu::Texture>,
    depth: Option<wgpu::Texture>,
    aux: [Option<wgpu::Texture>; 2],
    history: Option<wgpu::Texture>,
}

/// Which scene pass a draw belongs to.
#[derive(Clone, Copy, PartialEq, Eq)]
enum ScenePass {
    Opaque,
    Transparent,
}

/// `FrameBackend` on a wgpu device.
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    targets: Targets,
    meshes: HashMap<GeometrySlot, GpuMesh>,
    light_dir: Vec3,
    camera_layout: wgpu::BindGroupLayout,
    draw_layout: wgpu::BindGroupLayout,
    post_layout: wgpu::BindGroupLayout,
    outline_layout: wgpu::BindGroupLayout,
    temporal_layout: wgpu::BindGroupLayout,
    opaque_pipeline: wgpu::RenderPipeline,
    transparent_pipeline: wgpu::RenderPipeline,
    post_module: wgpu::ShaderModule,
    post_pipeline_layout: wgpu::PipelineLayout,
    copy_pipeline: wgpu::RenderPipeline,
    effect_pipelines: HashMap<&'static str, wgpu::RenderPipeline>,
    outline_pipeline: wgpu::RenderPipeline,
    temporal_pipeline: wgpu::RenderPipeline,
    line_pipeline: wgpu::RenderPipeline,
    present_pipeline: Option<wgpu::RenderPipeline>,
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn texture_entry(binding: u32, sample_type: wgpu::TextureSampleType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type,
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

const UNFILTERED: wgpu::TextureSampleType = wgpu::TextureSampleType::Float { filterable: false };

fn fullscreen_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    entry_point: &str,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_fullscreen"),
            compilation_options: Default::default(),
            buffers: &[],
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some(entry_point),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: Default::default(),
        multiview: None,
        cache: None,
    })
}

fn scene_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    pass: ScenePass,
) -> wgpu::RenderPipeline {
    let (label, blend, id_writes, depth_write) = match pass {
        ScenePass::Opaque => (
            "opaque_pipeline",
            wgpu::BlendState::REPLACE,
            wgpu::ColorWrites::ALL,
            true,
        ),
        ScenePass::Transparent => (
            "transparent_pipeline",
            wgpu::BlendState::ALPHA_BLENDING,
            wgpu::ColorWrites::empty(),
            false,
        ),
    };
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &[wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<stagehand_assets::MeshVertex>() as u64,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &wgpu::vertex_attr_array![
                    0 => Float32x3,
                    1 => Float32x3,
                ],
            }],
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some("fs_main"),
            compilation_options: Default::default(),
            targets: &[
                Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: Some(blend),
                    write_mask: wgpu::ColorWrites::ALL,
                }),
                Some(wgpu::ColorTargetState {
                    format: ID_FORMAT,
                    blend: None,
                    write_mask: id_writes,
                }),
            ],
        }),
        // Both faces are drawn; imported meshes carry no winding guarantee.
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: depth_write,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: Default::default(),
            bias: Default::default(),
        }),
        multisample: Default::default(),
        multiview: None,
        cache: None,
    })
}

impl WgpuBackend {
    /// Build pipelines on `device`. `present_format` enables
    /// [`WgpuBackend::present`] onto a surface of that format.
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        present_format: Option<wgpu::TextureFormat>,
    ) -> Self {
        let camera_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("camera_layout"),
            entries: &[uniform_entry(
                0,
                wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            )],
        });
        let draw_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("draw_layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(std::mem::size_of::<DrawUniform>() as u64),
                },
                count: None,
            }],
        });
        let post_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("post_layout"),
            entries: &[
                texture_entry(0, UNFILTERED),
                uniform_entry(1, wgpu::ShaderStages::FRAGMENT),
            ],
        });
        let outline_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("outline_layout"),
            entries: &[
                texture_entry(0, UNFILTERED),
                texture_entry(1, wgpu::TextureSampleType::Uint),
                uniform_entry(2, wgpu::ShaderStages::FRAGMENT),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let temporal_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("temporal_layout"),
            entries: &[
                texture_entry(0, UNFILTERED),
                texture_entry(1, UNFILTERED),
                texture_entry(2, wgpu::TextureSampleType::Depth),
                uniform_entry(3, wgpu::ShaderStages::FRAGMENT),
            ],
        });

        let scene_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("scene_shader"),
            source: wgpu::ShaderSource::Wgsl(shaders::SCENE_SHADER.into()),
        });
        let scene_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("scene_pipeline_layout"),
            bind_group_layouts: &[&camera_layout, &draw_layout],
            push_constant_ranges: &[],
        });
        let opaque_pipeline = scene_pipeline(&device, &scene_layout, &scene_module, ScenePass::Opaque);
        let transparent_pipeline =
            scene_pipeline(&device, &scene_layout, &scene_module, ScenePass::Transparent);

        let post_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("post_shader"),
            source: wgpu::ShaderSource::Wgsl(shaders::POST_SHADER.into()),
        });
        let post_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("post_pipeline_layout"),
            bind_group_layouts: &[&post_layout],
            push_constant_ranges: &[],
        });
        let copy_pipeline = fullscreen_pipeline(
            &device,
            "copy_pipeline",
            &post_pipeline_layout,
            &post_module,
            "fs_copy",
            COLOR_FORMAT,
        );
        let present_pipeline = present_format.map(|format| {
            fullscreen_pipeline(
                &device,
                "present_pipeline",
                &post_pipeline_layout,
                &post_module,
                "fs_present",
                format,
            )
        });

        let outline_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("outline_shader"),
            source: wgpu::ShaderSource::Wgsl(shaders::OUTLINE_SHADER.into()),
        });
        let outline_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("outline_pipeline_layout"),
            bind_group_layouts: &[&outline_layout],
            push_constant_ranges: &[],
        });
        let outline_pipeline = fullscreen_pipeline(
            &device,
            "outline_pipeline",
            &outline_pipeline_layout,
            &outline_module,
            "fs_outline",
            COLOR_FORMAT,
        );

        let temporal_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("temporal_shader"),
            source: wgpu::ShaderSource::Wgsl(shaders::TEMPORAL_SHADER.into()),
        });
        let temporal_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("temporal_pipeline_layout"),
            bind_group_layouts: &[&temporal_layout],
            push_constant_ranges: &[],
        });
        let temporal_pipeline = fullscreen_pipeline(
            &device,
            "temporal_pipeline",
            &temporal_pipeline_layout,
            &temporal_module,
            "fs_resolve",
            COLOR_FORMAT,
        );

        let line_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("line_shader"),
            source: wgpu::ShaderSource::Wgsl(shaders::LINE_SHADER.into()),
        });
        let line_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("line_pipeline_layout"),
            bind_group_layouts: &[&camera_layout],
            push_constant_ranges: &[],
        });
        let line_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("line_pipeline"),
            layout: Some(&line_layout),
            vertex: wgpu::VertexState {
                module: &line_module,
                entry_point: Some("vs_line"),
                compilation_options: Default::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<LineVertex>() as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![
                        0 => Float32x3,
                        1 => Float32x4,
                    ],
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: &line_module,
                entry_point: Some("fs_line"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::LineList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: Default::default(),
            multiview: None,
            cache: None,
        });

        Self {
            device,
            queue,
            targets: Targets::default(),
            meshes: HashMap::new(),
            light_dir: Vec3::new(0.4, 1.0, 0.6).normalize(),
            camera_layout,
            draw_layout,
            post_layout,
            outline_layout,
            temporal_layout,
            opaque_pipeline,
            transparent_pipeline,
            post_module,
            post_pipeline_layout,
            copy_pipeline,
            effect_pipelines: HashMap::new(),
            outline_pipeline,
            temporal_pipeline,
            line_pipeline,
            present_pipeline,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Uploaded geometry slots.
    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    fn color_texture(&self, source: ColorSource) -> Option<&wgpu::Texture> {
        match source {
            ColorSource::Primary => self.targets.color.as_ref(),
            ColorSource::AuxA => self.targets.aux[0].as_ref(),
            ColorSource::AuxB => self.targets.aux[1].as_ref(),
            ColorSource::History => self.targets.history.as_ref(),
        }
    }

    fn color_slot(&mut self, source: ColorSource) -> &mut Option<wgpu::Texture> {
        match source {
            ColorSource::Primary => &mut self.targets.color,
            ColorSource::AuxA => &mut self.targets.aux[0],
            ColorSource::AuxB => &mut self.targets.aux[1],
            ColorSource::History => &mut self.targets.history,
        }
    }

    fn view(&self, source: ColorSource) -> Option<wgpu::TextureView> {
        self.color_texture(source)
            .map(|t| t.create_view(&wgpu::TextureViewDescriptor::default()))
    }

    /// Create a texture inside error scopes so allocation and validation
    /// failures come back as values instead of device-lost panics.
    fn create_texture_checked(
        &self,
        label: &'static str,
        size: UVec2,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> Result<wgpu::Texture, TargetError> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size.x.max(1),
                height: size.y.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        match validation.or(oom) {
            Some(err) => Err(TargetError::Allocation {
                target: label,
                size,
                reason: err.to_string(),
            }),
            None => Ok(texture),
        }
    }

    fn ensure_mesh(&mut self, item: &RenderItem) {
        let slot = item.geometry.slot;
        if self.meshes.contains_key(&slot) {
            return;
        }
        let data = &item.geometry.data;
        let vertex_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mesh_vertices"),
            contents: bytemuck::cast_slice(&data.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mesh_indices"),
            contents: bytemuck::cast_slice(&data.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        tracing::debug!(?slot, indices = data.indices.len(), "uploaded mesh");
        self.meshes.insert(
            slot,
            GpuMesh {
                vertex_buffer,
                index_buffer,
                index_count: data.indices.len() as u32,
            },
        );
    }

    fn camera_bind_group(&self, camera: &CameraParams) -> wgpu::BindGroup {
        let uniform = CameraUniform {
            view_proj: camera.view_projection().to_cols_array_2d(),
            light_dir: self.light_dir.extend(0.0).to_array(),
        };
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("camera_uniform"),
            contents: bytemuck::bytes_of(&uniform),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("camera_bind_group"),
            layout: &self.camera_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        })
    }

    fn draw_scene(&mut self, items: &[RenderItem], camera: &CameraParams, pass: ScenePass) {
        if items.is_empty() {
            return;
        }
        for item in items {
            self.ensure_mesh(item);
        }
        let (Some(color), Some(ids), Some(depth)) =
            (&self.targets.color, &self.targets.ids, &self.targets.depth)
        else {
            tracing::warn!("scene pass without allocated targets");
            return;
        };

        let mut uniforms = vec![0u8; items.len() * DRAW_STRIDE];
        for (chunk, item) in uniforms.chunks_exact_mut(DRAW_STRIDE).zip(items) {
            let uniform = draw_uniform(item);
            let bytes = bytemuck::bytes_of(&uniform);
            chunk[..bytes.len()].copy_from_slice(bytes);
        }
        let draw_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("draw_uniforms"),
            contents: &uniforms,
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let draw_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("draw_bind_group"),
            layout: &self.draw_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &draw_buffer,
                    offset: 0,
                    size: NonZeroU64::new(std::mem::size_of::<DrawUniform>() as u64),
                }),
            }],
        });
        let camera_group = self.camera_bind_group(camera);

        let color_view = color.create_view(&Default::default());
        let id_view = ids.create_view(&Default::default());
        let depth_view = depth.create_view(&Default::default());
        let pipeline = match pass {
            ScenePass::Opaque => &self.opaque_pipeline,
            ScenePass::Transparent => &self.transparent_pipeline,
        };

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("scene_encoder"),
        });
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("scene_pass"),
                color_attachments: &[
                    Some(wgpu::RenderPassColorAttachment {
                        view: &color_view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                    }),
                    Some(wgpu::RenderPassColorAttachment {
                        view: &id_view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                    }),
                ],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                ..Default::default()
            });
            rpass.set_pipeline(pipeline);
            rpass.set_bind_group(0, &camera_group, &[]);
            for (i, item) in items.iter().enumerate() {
                let Some(mesh) = self.meshes.get(&item.geometry.slot) else {
                    continue;
                };
                rpass.set_bind_group(1, &draw_group, &[(i * DRAW_STRIDE) as u32]);
                rpass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                rpass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                rpass.draw_indexed(0..mesh.index_count, 0, 0..1);
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    /// One full-screen triangle into `dst`.
    fn fullscreen_pass(
        &self,
        label: &str,
        pipeline: &wgpu::RenderPipeline,
        bind_group: &wgpu::BindGroup,
        dst: &wgpu::TextureView,
    ) {
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(label),
        });
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: dst,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                ..Default::default()
            });
            rpass.set_pipeline(pipeline);
            rpass.set_bind_group(0, bind_group, &[]);
            rpass.draw(0..3, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn post_bind_group(&self, src: &wgpu::TextureView, params: PostParams) -> wgpu::BindGroup {
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("post_params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("post_bind_group"),
            layout: &self.post_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(src),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: buffer.as_entire_binding(),
                },
            ],
        })
    }

    /// Blit `source` onto a presentation surface, scaling from the render
    /// resolution to the surface size.
    pub fn present(&self, source: ColorSource, surface_view: &wgpu::TextureView, surface_size: UVec2) {
        let Some(pipeline) = &self.present_pipeline else {
            tracing::warn!("present called without a present format");
            return;
        };
        let Some(src) = self.view(source) else {
            return;
        };
        let params = PostParams {
            a: [surface_size.x.max(1) as f32, surface_size.y.max(1) as f32, 0.0, 0.0],
            b: [0.0; 4],
        };
        let group = self.post_bind_group(&src, params);
        self.fullscreen_pass("present_pass", pipeline, &group, surface_view);
    }

    fn check_rect(&self, rect: PixelRect) -> Result<(), BackendError> {
        let size = self.targets.size;
        if self.targets.ids.is_none() {
            return Err(BackendError::NotAllocated);
        }
        if rect.width == 0
            || rect.height == 0
            || rect.x + rect.width > size.x
            || rect.y + rect.height > size.y
        {
            return Err(BackendError::OutOfBounds { size });
        }
        Ok(())
    }
}

fn draw_uniform(item: &RenderItem) -> DrawUniform {
    let desc = &item.material.desc;
    let lit = match desc.shading {
        ShadingMode::Lit => 1.0,
        ShadingMode::Unlit => 0.0,
    };
    let n = item.normal;
    DrawUniform {
        model: item.world.to_cols_array_2d(),
        normal: [
            n.x_axis.extend(0.0).to_array(),
            n.y_axis.extend(0.0).to_array(),
            n.z_axis.extend(0.0).to_array(),
        ],
        base_color: desc.base_color.to_array(),
        emissive: desc.emissive.extend(lit).to_array(),
        object_id: [item.object_id().0, 0, 0, 0],
    }
}

fn effect_params(effect: &PostEffectKind) -> PostParams {
    let zero = [0.0; 4];
    match *effect {
        PostEffectKind::Tonemap { exposure } => PostParams {
            a: [exposure, 0.0, 0.0, 0.0],
            b: zero,
        },
        PostEffectKind::ColorGrade {
            saturation,
            contrast,
            tint,
        } => PostParams {
            a: [saturation, contrast, 0.0, 0.0],
            b: tint.extend(1.0).to_array(),
        },
        PostEffectKind::Vignette { strength, radius } => PostParams {
            a: [strength, radius, 0.0, 0.0],
            b: zero,
        },
        PostEffectKind::EdgeBlur { threshold } => PostParams {
            a: [threshold, 0.0, 0.0, 0.0],
            b: zero,
        },
    }
}

fn line_vertices(lines: &[OverlayLine]) -> Vec<LineVertex> {
    lines
        .iter()
        .flat_map(|line| {
            [line.a, line.b].map(|p| LineVertex {
                position: p.to_array(),
                color: line.color.to_array(),
            })
        })
        .collect()
}

impl FrameBackend for WgpuBackend {
    fn max_texture_size(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn allocate_primary(&mut self, size: UVec2) -> Result<(), TargetError> {
        let attachment = wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC;
        let color = self.create_texture_checked(
            "primary",
            size,
            COLOR_FORMAT,
            attachment | wgpu::TextureUsages::COPY_DST,
        )?;
        let ids = self.create_texture_checked("object_id", size, ID_FORMAT, attachment)?;
        let depth = self.create_texture_checked("depth", size, DEPTH_FORMAT, attachment)?;
        tracing::debug!(width = size.x, height = size.y, "allocated primary target");
        self.targets.size = size;
        self.targets.color = Some(color);
        self.targets.ids = Some(ids);
        self.targets.depth = Some(depth);
        Ok(())
    }

    fn allocate_color(&mut self, target: ColorSource, size: UVec2) -> Result<(), TargetError> {
        if target == ColorSource::Primary {
            return self.allocate_primary(size);
        }
        *self.color_slot(target) = None;
        let texture = self.create_texture_checked(
            target.name(),
            size,
            COLOR_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
        )?;
        *self.color_slot(target) = Some(texture);
        Ok(())
    }

    fn release_color(&mut self, target: ColorSource) {
        if let Some(texture) = self.color_slot(target).take() {
            texture.destroy();
        }
    }

    fn validate_color(&self, target: ColorSource, size: UVec2) -> Result<(), TargetError> {
        let Some(texture) = self.color_texture(target) else {
            return Err(TargetError::Invalid {
                target: target.name(),
                reason: "not allocated".into(),
            });
        };
        let actual = UVec2::new(texture.width(), texture.height());
        if actual != size || texture.format() != COLOR_FORMAT {
            return Err(TargetError::Invalid {
                target: target.name(),
                reason: format!("{actual} {:?}, expected {size}", texture.format()),
            });
        }
        Ok(())
    }

    fn init_effect(&mut self, effect: &PostEffectKind) -> Result<(), EffectInitError> {
        let name = effect.name();
        if self.effect_pipelines.contains_key(name) {
            return Ok(());
        }
        let entry = format!("fs_{name}");
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = fullscreen_pipeline(
            &self.device,
            name,
            &self.post_pipeline_layout,
            &self.post_module,
            &entry,
            COLOR_FORMAT,
        );
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(EffectInitError::Backend {
                name,
                reason: err.to_string(),
            });
        }
        self.effect_pipelines.insert(name, pipeline);
        Ok(())
    }

    fn clear(&mut self, color: Vec4) {
        let (Some(target), Some(ids), Some(depth)) =
            (&self.targets.color, &self.targets.ids, &self.targets.depth)
        else {
            return;
        };
        let color_view = target.create_view(&Default::default());
        let id_view = ids.create_view(&Default::default());
        let depth_view = depth.create_view(&Default::default());
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("clear_encoder"),
        });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear_pass"),
                color_attachments: &[
                    Some(wgpu::RenderPassColorAttachment {
                        view: &color_view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color {
                                r: f64::from(color.x),
                                g: f64::from(color.y),
                                b: f64::from(color.z),
                                a: f64::from(color.w),
                            }),
                            store: wgpu::StoreOp::Store,
                        },
                    }),
                    Some(wgpu::RenderPassColorAttachment {
                        view: &id_view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                            store: wgpu::StoreOp::Store,
                        },
                    }),
                ],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                ..Default::default()
            });
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn draw_opaque(&mut self, items: &[RenderItem], camera: &CameraParams) {
        self.draw_scene(items, camera, ScenePass::Opaque);
    }

    fn draw_transparent(&mut self, items: &[RenderItem], camera: &CameraParams) {
        self.draw_scene(items, camera, ScenePass::Transparent);
    }

    fn copy_color(&mut self, src: ColorSource, dst: ColorSource) {
        let (Some(from), Some(to)) = (self.color_texture(src), self.color_texture(dst)) else {
            tracing::warn!(src = src.name(), dst = dst.name(), "copy between missing targets");
            return;
        };
        if from.size() != to.size() {
            tracing::warn!(src = src.name(), dst = dst.name(), "copy between mismatched targets");
            return;
        }
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("copy_encoder"),
        });
        encoder.copy_texture_to_texture(
            from.as_image_copy(),
            to.as_image_copy(),
            from.size(),
        );
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn apply_effect(&mut self, effect: &PostEffectKind, src: ColorSource, dst: ColorSource) {
        let (Some(src_view), Some(dst_view)) = (self.view(src), self.view(dst)) else {
            return;
        };
        let pipeline = match self.effect_pipelines.get(effect.name()) {
            Some(pipeline) => pipeline,
            None => {
                tracing::warn!(effect = effect.name(), "effect not initialized, copying");
                &self.copy_pipeline
            }
        };
        let group = self.post_bind_group(&src_view, effect_params(effect));
        self.fullscreen_pass(effect.name(), pipeline, &group, &dst_view);
    }

    fn outline(
        &mut self,
        selection: &[ObjectId],
        style: &OutlineConfig,
        src: ColorSource,
        dst: ColorSource,
    ) {
        let (Some(src_view), Some(dst_view), Some(ids)) =
            (self.view(src), self.view(dst), &self.targets.ids)
        else {
            return;
        };
        let id_view = ids.create_view(&Default::default());
        let uniform = OutlineUniform {
            color: style.color.to_array(),
            info: [style.width.max(1), selection.len() as u32, 0, 0],
        };
        let mut raw: Vec<u32> = selection.iter().map(|id| id.0).collect();
        // Storage bindings cannot be empty.
        if raw.is_empty() {
            raw.push(0);
        }
        let uniform_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("outline_uniform"),
            contents: bytemuck::bytes_of(&uniform),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let selection_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("outline_selection"),
            contents: bytemuck::cast_slice(&raw),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("outline_bind_group"),
            layout: &self.outline_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&src_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&id_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: selection_buffer.as_entire_binding(),
                },
            ],
        });
        self.fullscreen_pass("outline", &self.outline_pipeline, &group, &dst_view);
    }

    fn temporal_resolve(&mut self, src: ColorSource, dst: ColorSource, resolve: &TemporalResolve) {
        if self.targets.history.is_none() || self.targets.depth.is_none() {
            self.copy_color(src, dst);
            return;
        }
        let (Some(history_view), Some(depth), Some(src_view), Some(dst_view)) = (
            self.view(ColorSource::History),
            self.targets.depth.as_ref(),
            self.view(src),
            self.view(dst),
        ) else {
            return;
        };
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor {
            aspect: wgpu::TextureAspect::DepthOnly,
            ..Default::default()
        });
        let uniform = ResolveUniform {
            inverse_view_proj: resolve.inverse_view_projection.to_cols_array_2d(),
            previous_view_proj: resolve.previous_view_projection.to_cols_array_2d(),
            blend: [resolve.blend, 0.0, 0.0, 0.0],
        };
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("resolve_uniform"),
            contents: bytemuck::bytes_of(&uniform),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("temporal_bind_group"),
            layout: &self.temporal_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&src_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&history_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&depth_view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: buffer.as_entire_binding(),
                },
            ],
        });
        self.fullscreen_pass("temporal_resolve", &self.temporal_pipeline, &group, &dst_view);
    }

    fn draw_overlay(&mut self, lines: &[OverlayLine], camera: &CameraParams, target: ColorSource) {
        if lines.is_empty() {
            return;
        }
        let Some(view) = self.view(target) else {
            return;
        };
        let vertices = line_vertices(lines);
        let vertex_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("overlay_vertices"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let camera_group = self.camera_bind_group(camera);
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("overlay_encoder"),
        });
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("overlay_pass"),
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
            });
            rpass.set_pipeline(&self.line_pipeline);
            rpass.set_bind_group(0, &camera_group, &[]);
            rpass.set_vertex_buffer(0, vertex_buffer.slice(..));
            rpass.draw(0..vertices.len() as u32, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn read_ids(&mut self, rect: PixelRect) -> Result<Vec<u32>, BackendError> {
        self.check_rect(rect)?;
        let ids = self.targets.ids.as_ref().ok_or(BackendError::NotAllocated)?;
        let bytes = readback::read_region(
            &self.device,
            &self.queue,
            Region {
                texture: ids,
                aspect: wgpu::TextureAspect::All,
                x: rect.x,
                y: rect.y,
                width: rect.width,
                height: rect.height,
                bytes_per_texel: 4,
            },
        )?;
        Ok(bytes
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    fn read_depth(&mut self, x: u32, y: u32) -> Result<f32, BackendError> {
        self.check_rect(PixelRect {
            x,
            y,
            width: 1,
            height: 1,
        })?;
        let depth = self.targets.depth.as_ref().ok_or(BackendError::NotAllocated)?;
        let bytes = readback::read_region(
            &self.device,
            &self.queue,
            Region {
                texture: depth,
                aspect: wgpu::TextureAspect::DepthOnly,
                x,
                y,
                width: 1,
                height: 1,
                bytes_per_texel: 4,
            },
        )?;
        match bytes.as_slice() {
            [a, b, c, d, ..] => Ok(f32::from_le_bytes([*a, *b, *c, *d])),
            _ => Err(BackendError::Readback("short depth read".into())),
        }
    }

    fn read_color(&mut self, source: ColorSource) -> Result<ColorImage, BackendError> {
        let texture = self.color_texture(source).ok_or(BackendError::NotAllocated)?;
        let size = UVec2::new(texture.width(), texture.height());
        let bytes = readback::read_region(
            &self.device,
            &self.queue,
            Region {
                texture,
                aspect: wgpu::TextureAspect::All,
                x: 0,
                y: 0,
                width: size.x,
                height: size.y,
                bytes_per_texel: 8,
            },
        )?;
        let pixels = bytes
            .chunks_exact(8)
            .map(|t| {
                let channel = |i: usize| readback::f16_to_f32(u16::from_le_bytes([t[i], t[i + 1]]));
                Vec4::new(channel(0), channel(2), channel(4), channel(6))
            })
            .collect();
        Ok(ColorImage { size, pixels })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_layouts_fit_wgsl() {
        assert!(std::mem::size_of::<DrawUniform>() <= DRAW_STRIDE);
        assert_eq!(std::mem::size_of::<DrawUniform>() % 16, 0);
        assert_eq!(std::mem::size_of::<CameraUniform>(), 80);
        assert_eq!(std::mem::size_of::<ResolveUniform>(), 144);
        assert_eq!(std::mem::size_of::<OutlineUniform>(), 32);
        assert_eq!(DRAW_STRIDE % 256, 0);
    }

    #[test]
    fn effect_params_pack_fields() {
        let grade = effect_params(&PostEffectKind::ColorGrade {
            saturation: 0.5,
            contrast: 1.2,
            tint: Vec3::new(1.0, 0.9, 0.8),
        });
        assert_eq!(grade.a, [0.5, 1.2, 0.0, 0.0]);
        assert_eq!(grade.b, [1.0, 0.9, 0.8, 1.0]);
        let tone = effect_params(&PostEffectKind::Tonemap { exposure: 2.0 });
        assert_eq!(tone.a[0], 2.0);
    }

    #[test]
    fn overlay_lines_become_vertex_pairs() {
        let lines = [
            OverlayLine {
                a: Vec3::ZERO,
                b: Vec3::X,
                color: Vec4::ONE,
            },
            OverlayLine {
                a: Vec3::Y,
                b: Vec3::Z,
                color: Vec4::new(1.0, 0.0, 0.0, 1.0),
            },
        ];
        let vertices = line_vertices(&lines);
        assert_eq!(vertices.len(), 4);
        assert_eq!(vertices[1].position, [1.0, 0.0, 0.0]);
        assert_eq!(vertices[3].color, [1.0, 0.0, 0.0, 1.0]);
    }
}
