mod buffers;
mod camera;
mod dispatch;
mod geometry;
mod image_texture;
mod renderer;
mod scene;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context as _;
use clap::Parser;

use renderer::RenderSession;
use scene::Scene;

use egui::{Color32, DragValue, Frame, FullOutput};

use wgpu::{
    Adapter, Backends, BindGroup, Device, Dx12Compiler, Gles3MinorVersion, Instance,
    InstanceDescriptor, InstanceFlags, PipelineLayout, Queue, Surface, TextureDescriptor,
    TextureDimension, TextureFormat, TextureUsages,
};

use winit::{
    dpi::PhysicalSize,
    event::{ElementState, Event, KeyEvent, WindowEvent},
    event_loop::EventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::Window,
};

use egui_wgpu_backend::{RenderPass as EguiRenderPass, ScreenDescriptor};
use egui_winit_platform::{Platform, PlatformDescriptor};

/// Progressive path tracer. Scenes come from a scene description file or
/// from bare mesh files rendered with default materials.
#[derive(Parser, Debug)]
#[command(name = "gpu_path_tracer")]
struct Cli {
    /// Accumulate a fixed number of frames, save the image here and exit
    #[arg(short = 'f', long = "file")]
    file: Option<PathBuf>,

    /// Scene description file
    #[arg(short = 's', long = "scene")]
    scene: Option<PathBuf>,

    /// Disable the pixel buffer readback path (accepted for script
    /// compatibility, the buffer path is always used)
    #[arg(short = 'n', long = "nopbo")]
    nopbo: bool,

    /// Mesh files to render when no scene file is given
    meshes: Vec<PathBuf>,
}

pub fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    if cli.nopbo {
        log::debug!("--nopbo accepted, readback always goes through a buffer");
    }

    let scene = match &cli.scene {
        Some(path) => Scene::load(path)?,
        None => {
            anyhow::ensure!(
                !cli.meshes.is_empty(),
                "no scene given, pass --scene <file> or mesh files"
            );
            Scene::from_mesh_files(&cli.meshes)
        }
    };

    if let Some(out) = &cli.file {
        return pollster::block_on(render_batch(&scene, out));
    }

    let event_loop = EventLoop::new().expect("failed to make eventloop");

    let builder = winit::window::WindowBuilder::new();

    // GPU buffer readback requires n * 256 bytes (n * 64 pixels * 4*u8 colors)
    // for every horisontal row, so the window width snaps to a multiple of 64
    let window_size = PhysicalSize::new(
        align_width(scene.properties.width),
        scene.properties.height.max(1),
    );

    let window = builder
        .with_inner_size(window_size)
        .build(&event_loop)
        .expect("failed to make window");

    pollster::block_on(run(event_loop, window, &scene))
}

fn align_width(width: u32) -> u32 {
    (width.max(64) / 64) * 64
}

/// Headless mode: one adapter without a surface, a fixed accumulation run,
/// one PNG on disk.
async fn render_batch(scene: &Scene, out: &std::path::Path) -> anyhow::Result<()> {
    let instance = generate_instance();

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        })
        .await
        .context("failed to find a compute adapter")?;

    let (device, queue) = generate_device_and_queue(&adapter).await;

    let width = align_width(scene.properties.width);
    let height = scene.properties.height.max(1);

    let mut session = RenderSession::new(&device, &queue, scene, width, height)?;
    session.render_batch(&device, &queue, renderer::ACCUMULATION_FRAMES, out)
}

async fn run(event_loop: EventLoop<()>, window: Window, scene: &Scene) -> anyhow::Result<()> {
    let mut size = window.inner_size();

    let mut show_ui = true;
    let mut screenshot_counter: u32 = 0;

    let mut frame_counter: u32 = 0;
    let mut frames_per_second: u32 = 0;

    let instance = generate_instance();

    let surface: Surface = instance
        .create_surface(&window)
        .expect("failed to make a surface");
    let adapter = create_adapter(&instance, &surface).await;
    let (device, queue) = generate_device_and_queue(&adapter).await;

    let mut session = RenderSession::new(&device, &queue, scene, size.width, size.height)?;

    // ################################ RENDER PIPELINE #########################################

    let mut texture = create_texture(&device, size);

    let sampler: wgpu::Sampler = generate_sampler(&device);

    let (bind_group_layout, mut bind_group) = create_device_bindgroup(&device, &texture, &sampler);

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: None,
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });

    let render_pipeline = create_render_pipeline(&device, &pipeline_layout, texture.format());

    let mut surface_config = wgpu::SurfaceConfiguration {
        usage: TextureUsages::RENDER_ATTACHMENT,
        format: texture.format(),
        width: size.width,
        height: size.height,
        present_mode: wgpu::PresentMode::Immediate,
        desired_maximum_frame_latency: 2,
        alpha_mode: wgpu::CompositeAlphaMode::Auto,
        view_formats: vec![texture.format()],
    };

    surface.configure(&device, &surface_config);

    let window = &window;

    /* ################################ EGUI CODE ##################################### */

    let scale_factor = window.scale_factor();

    let mut platform = Platform::new(PlatformDescriptor {
        physical_width: size.width,
        physical_height: size.height,
        scale_factor,
        font_definitions: Default::default(),
        style: Default::default(),
    });

    let mut screen_descriptor = ScreenDescriptor {
        physical_width: size.width,
        physical_height: size.height,
        scale_factor: scale_factor as f32,
    };

    let mut egui_rpass = EguiRenderPass::new(&device, surface_config.format, 1);

    let mut fps_timer = Instant::now();
    let mut frame_timer = Instant::now();

    /* ################################################################################ */

    event_loop
        .run(|event, target| {
            platform.handle_event(&event);
            let _ = (&instance, &pipeline_layout);

            match event {
                Event::DeviceEvent { .. } => {
                    window.request_redraw();
                }
                Event::WindowEvent { event, .. } => {
                    match event {
                        WindowEvent::Resized(new_size) => {
                            size.width = align_width(new_size.width);
                            size.height = new_size.height.max(1);

                            surface_config.width = size.width;
                            surface_config.height = size.height;

                            screen_descriptor.physical_height = size.height;
                            screen_descriptor.physical_width = size.width;

                            session.on_resize(&device, &queue, size.width, size.height);

                            texture = create_texture(&device, size);

                            (_, bind_group) = create_device_bindgroup(&device, &texture, &sampler);

                            surface.configure(&device, &surface_config);

                            window.request_redraw();
                        }

                        WindowEvent::CloseRequested => {
                            target.exit();
                        }

                        WindowEvent::KeyboardInput {
                            event:
                                KeyEvent {
                                    physical_key: PhysicalKey::Code(code),
                                    repeat: false,
                                    state: ElementState::Pressed,
                                    ..
                                },
                            ..
                        } => {
                            match code {
                                KeyCode::KeyF => {
                                    session.recenter(&device, &queue);
                                }
                                KeyCode::KeyS => {
                                    let path =
                                        PathBuf::from(format!("frame_{}.png", screenshot_counter));
                                    screenshot_counter += 1;
                                    if let Err(error) = session.save_image(&device, &queue, &path) {
                                        log::error!("screenshot failed: {error:#}");
                                    }
                                }
                                KeyCode::F11 => {
                                    show_ui = !show_ui;
                                }
                                _ => {}
                            }
                            window.request_redraw();
                        }

                        WindowEvent::RedrawRequested => {
                            session.compute_frame(&device, &queue);
                            frame_counter += 1;

                            if fps_timer.elapsed().as_millis() > 1000 {
                                fps_timer = Instant::now();
                                frames_per_second = frame_counter;
                                frame_counter = 0;
                            }

                            let mut encoder = device.create_command_encoder(
                                &wgpu::CommandEncoderDescriptor {
                                    label: Some("Encoder"),
                                },
                            );

                            session.update_texture(&mut encoder, &texture);

                            let frame: wgpu::SurfaceTexture = surface
                                .get_current_texture()
                                .expect("Failed to acquire next swap chain texture");

                            let view: wgpu::TextureView = frame
                                .texture
                                .create_view(&wgpu::TextureViewDescriptor::default());

                            setup_renderpass(&mut encoder, &view, &render_pipeline, &bind_group);

                            let full_output = create_ui(
                                &mut platform,
                                &mut session,
                                &device,
                                &queue,
                                frames_per_second,
                            );

                            let paint_jobs = platform
                                .context()
                                .tessellate(full_output.shapes, full_output.pixels_per_point);

                            // ######### Adding egui renderpass to the encoder ###########
                            if show_ui {
                                egui_rpass
                                    .add_textures(&device, &queue, &full_output.textures_delta)
                                    .expect("couldnt add textures");

                                egui_rpass.update_buffers(
                                    &device,
                                    &queue,
                                    &paint_jobs,
                                    &screen_descriptor,
                                );

                                egui_rpass
                                    .execute(
                                        &mut encoder,
                                        &view,
                                        &paint_jobs,
                                        &screen_descriptor,
                                        None,
                                    )
                                    .expect("egui render pass failed");
                            }

                            queue.submit(Some(encoder.finish()));

                            frame.present();

                            egui_rpass
                                .remove_textures(full_output.textures_delta)
                                .expect("textures could not be removed");

                            let timestep = frame_timer.elapsed().as_secs_f32() * 1000.0;
                            frame_timer = Instant::now();

                            session.on_update(&device, &queue, &platform.context(), timestep);

                            window.request_redraw();
                        }

                        _ => {
                            window.request_redraw();
                        }
                    }
                }
                _ => {
                    window.request_redraw();
                }
            }
        })
        .expect("Eventloop failed");

    Ok(())
}

fn create_texture(device: &wgpu::Device, size: winit::dpi::PhysicalSize<u32>) -> wgpu::Texture {
    let texture_size = wgpu::Extent3d {
        width: size.width.max(1),
        height: size.height.max(1),
        depth_or_array_layers: 1,
    };

    device.create_texture(&TextureDescriptor {
        label: None,
        size: texture_size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format: TextureFormat::Rgba8UnormSrgb,
        usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,

        view_formats: &[],
    })
}

fn create_device_bindgroup(
    device: &wgpu::Device,
    texture: &wgpu::Texture,
    sampler: &wgpu::Sampler,
) -> (wgpu::BindGroupLayout, BindGroup) {
    let texture_view = texture.create_view(&wgpu::TextureViewDescriptor::default());

    let texture_bind = 0;
    let sampler_bind = 1;

    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Texture Bind Group Layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: texture_bind,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: sampler_bind,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
    });

    let render_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        layout: &bind_group_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: texture_bind,
                resource: wgpu::BindingResource::TextureView(&texture_view),
            },
            wgpu::BindGroupEntry {
                binding: sampler_bind,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
        label: Some("Texture Bind Group"),
    });

    (bind_group_layout, render_bind_group)
}

fn setup_renderpass(
    encoder: &mut wgpu::CommandEncoder,
    view: &wgpu::TextureView,
    render_pipeline: &wgpu::RenderPipeline,
    bind_group: &BindGroup,
) {
    let mut rpass: wgpu::RenderPass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: None,
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Load,
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
    rpass.set_pipeline(render_pipeline);
    rpass.set_bind_group(0, bind_group, &[]);
    rpass.draw(0..6, 0..1);
}

fn create_render_pipeline(
    device: &wgpu::Device,
    pipeline_layout: &PipelineLayout,
    swapchain_format: TextureFormat,
) -> wgpu::RenderPipeline {
    let shader = device.create_shader_module(wgpu::include_wgsl!("render_shader.wgsl"));

    let render_pipeline: wgpu::RenderPipeline =
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: None,
            layout: Some(pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                compilation_options: Default::default(),
                targets: &[Some(swapchain_format.into())],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

    render_pipeline
}

async fn create_adapter(instance: &wgpu::Instance, surface: &Surface<'_>) -> wgpu::Adapter {
    instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            // Request an adapter which can render to our surface
            compatible_surface: Some(surface),
        })
        .await
        .expect("Failed to find an appropriate adapter")
}

async fn generate_device_and_queue(adapter: &Adapter) -> (Device, Queue) {
    let adapter_limits = wgpu::Limits {
        max_storage_buffers_per_shader_stage: 10,
        ..wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits())
    };
    adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: None,
                required_features: wgpu::Features::empty(),
                required_limits: adapter_limits,
            },
            None,
        )
        .await
        .expect("Failed to create device")
}

fn generate_sampler(device: &wgpu::Device) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

fn generate_instance() -> Instance {
    let instance_desc: wgpu::InstanceDescriptor = InstanceDescriptor {
        backends: Backends::VULKAN,
        flags: InstanceFlags::default(),
        dx12_shader_compiler: Dx12Compiler::default(),
        gles_minor_version: Gles3MinorVersion::default(),
    };

    wgpu::Instance::new(instance_desc)
}

// ######################### UI CREATION ########################################

fn create_ui(
    platform: &mut Platform,
    session: &mut RenderSession,
    device: &Device,
    queue: &Queue,
    frames_per_second: u32,
) -> FullOutput {
    platform.begin_frame();

    // important, create a egui context, do not use platform.context()
    let egui_context = platform.context();

    let mut style = (*egui_context.style()).clone();
    style.visuals.override_text_color = Some(Color32::from_rgb(200, 200, 200));
    egui_context.set_style(style);

    let transparent_frame = Frame::none().fill(egui::Color32::from_rgba_unmultiplied(0, 0, 0, 200));

    egui::SidePanel::right("side_panel")
        .resizable(false)
        .frame(transparent_frame)
        .show(&egui_context, |ui| {
            ui.set_max_width(180.0);

            ui.label(format!("fps: {}", frames_per_second));
            ui.label(format!("accumulated frames: {}", session.frame()));

            ui.vertical_centered(|ui| {
                let mut max_depth = session.max_depth();
                if ui
                    .add(egui::Slider::new(&mut max_depth, 1..=10).text("max depth"))
                    .changed()
                {
                    session.set_max_depth(device, queue, max_depth);
                }

                let mut accumulate = session.accumulate();
                if ui.checkbox(&mut accumulate, "light accumulation").changed() {
                    session.set_accumulate(device, queue, accumulate);
                }

                let mut lights_visible = session.lights_visible();
                if ui
                    .checkbox(&mut lights_visible, "show light geometry")
                    .changed()
                {
                    session.set_lights_visible(device, queue, lights_visible);
                }

                ui.add_space(10.0);

                if !session.materials.is_empty() {
                    ui_material_selection(session, ui, device, queue);
                }

                if !session.lights.is_empty() {
                    ui.add_space(10.0);
                    ui_light_selection(session, ui, device, queue);
                }
            });
        });

    egui_context.end_frame()
}

fn ui_material_selection(
    session: &mut RenderSession,
    ui: &mut egui::Ui,
    device: &Device,
    queue: &Queue,
) {
    ui.vertical_centered_justified(|ui: &mut egui::Ui| {
        ui.label("selected material:");
        ui.add(
            egui::Slider::new(&mut session.material_index, 0..=(session.materials.len() - 1))
                .integer(),
        );

        let index = session.material_index;
        let mut interacted = false;

        {
            let material = &mut session.materials[index];

            let mut color: [f32; 3] = material.color.into();
            if ui
                .color_edit_button_rgb(&mut color)
                .on_hover_text("color")
                .changed()
            {
                material.color = color.into();
                interacted = true;
            }

            let mut emission: [f32; 3] = material.emission.into();
            ui.label("emission:");
            ui.horizontal(|ui| {
                if create_drag_value!(ui, &mut emission[0], 0.2, 0.0..=200.0, "R: ") {
                    interacted = true;
                }
                if create_drag_value!(ui, &mut emission[1], 0.2, 0.0..=200.0, "G: ") {
                    interacted = true;
                }
                if create_drag_value!(ui, &mut emission[2], 0.2, 0.0..=200.0, "B: ") {
                    interacted = true;
                }
            });
            if interacted {
                material.emission = emission.into();
            }

            if create_drag_value!(ui, &mut material.metallic, 0.01, 0.0..=1.0, "metallic: ") {
                interacted = true;
            }

            if create_drag_value!(ui, &mut material.roughness, 0.01, 0.0..=1.0, "roughness: ") {
                interacted = true;
            }

            if create_drag_value!(ui, &mut material.specular, 0.01, 0.0..=1.0, "specular: ") {
                interacted = true;
            }

            if create_drag_value!(
                ui,
                &mut material.specular_tint,
                0.01,
                0.0..=1.0,
                "specular tint: "
            ) {
                interacted = true;
            }

            if create_drag_value!(
                ui,
                &mut material.subsurface,
                0.01,
                0.0..=1.0,
                "subsurface: "
            ) {
                interacted = true;
            }

            if create_drag_value!(
                ui,
                &mut material.anisotropic,
                0.01,
                0.0..=1.0,
                "anisotropic: "
            ) {
                interacted = true;
            }

            if create_drag_value!(ui, &mut material.sheen, 0.01, 0.0..=1.0, "sheen: ") {
                interacted = true;
            }

            if create_drag_value!(ui, &mut material.sheen_tint, 0.01, 0.0..=1.0, "sheen tint: ") {
                interacted = true;
            }

            if create_drag_value!(ui, &mut material.clearcoat, 0.01, 0.0..=1.0, "clearcoat: ") {
                interacted = true;
            }

            if create_drag_value!(
                ui,
                &mut material.clearcoat_gloss,
                0.01,
                0.0..=1.0,
                "clearcoat gloss: "
            ) {
                interacted = true;
            }
        }

        if interacted {
            session.apply_material(device, queue, index);
        }
    });
}

fn ui_light_selection(
    session: &mut RenderSession,
    ui: &mut egui::Ui,
    device: &Device,
    queue: &Queue,
) {
    ui.vertical_centered_justified(|ui: &mut egui::Ui| {
        ui.label("selected light:");
        ui.add(
            egui::Slider::new(&mut session.light_index, 0..=(session.lights.len() - 1)).integer(),
        );

        let index = session.light_index;
        let mut interacted = false;

        {
            let light = &mut session.lights[index];

            ui.label("emission:");
            ui.horizontal(|ui| {
                if create_drag_value!(ui, &mut light.emission[0], 0.2, 0.0..=200.0, "R: ") {
                    interacted = true;
                }
                if create_drag_value!(ui, &mut light.emission[1], 0.2, 0.0..=200.0, "G: ") {
                    interacted = true;
                }
                if create_drag_value!(ui, &mut light.emission[2], 0.2, 0.0..=200.0, "B: ") {
                    interacted = true;
                }
            });
        }

        if interacted {
            session.apply_light(device, queue, index);
        }
    });
}

// simple macro for makíng the UI more compact
#[macro_export]
macro_rules! create_drag_value {
    ($ui:expr, $value:expr, $speed:expr, $range:expr, $prefix:expr) => {{
        if $ui
            .add(
                DragValue::new($value)
                    .speed($speed)
                    .clamp_range($range)
                    .prefix($prefix),
            )
            .changed()
        {
            true
        } else {
            false
        }
    }};
}
