use std::path::Path;

use anyhow::Context as _;
use egui::Context;
use wgpu::{include_wgsl, BindGroupLayout, ComputePipeline, Device, Queue};

use crate::buffers::{DataBuffers, LightRecord, MaterialRecord, Params};
use crate::camera::Camera;
use crate::dispatch::{DispatchTables, ShaderLibrary};
use crate::geometry::{self, Aabb, RenderGroup};
use crate::image_texture::{self, ImageTexture};
use crate::scene::{MaterialParameter, Scene};

/// Frames averaged per batch render and per progress report.
pub const ACCUMULATION_FRAMES: u32 = 256;

pub const DEFAULT_MAX_DEPTH: u32 = 3;

/// Counts accumulation frames. Each frame takes the current count as its
/// sample seed, then advances it; resetting starts the average over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameAccumulator {
    frame: u32,
}

impl FrameAccumulator {
    pub fn new() -> FrameAccumulator {
        FrameAccumulator { frame: 0 }
    }

    /// Returns the seed for the frame about to render and advances the count.
    pub fn tick(&mut self) -> u32 {
        let seed = self.frame;
        self.frame += 1;
        seed
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn reset(&mut self) {
        self.frame = 0;
    }
}

/// Owns everything one progressive render needs: the camera, the host-side
/// material and light registries, the assembled geometry, the GPU tables and
/// the compute pipeline. Every interaction that changes what the image
/// converges to goes through a method here so the accumulation reset can
/// never be forgotten.
pub struct RenderSession {
    pub camera: Camera,
    pub materials: Vec<MaterialParameter>,
    /// Material picked in the editor panel.
    pub material_index: usize,
    /// Light picked in the editor panel.
    pub light_index: usize,
    pub lights: Vec<LightRecord>,
    group: RenderGroup,
    scene_bounds: Aabb,
    textures: Vec<ImageTexture>,
    texture_size: [u32; 2],
    dispatch_words: Vec<u32>,

    params: Params,
    accumulator: FrameAccumulator,

    buffers: DataBuffers,
    bind_group: wgpu::BindGroup,
    compute_pipeline: ComputePipeline,
}

impl RenderSession {
    pub fn new(
        device: &Device,
        queue: &Queue,
        scene: &Scene,
        width: u32,
        height: u32,
    ) -> anyhow::Result<RenderSession> {
        let (group, scene_bounds) = geometry::assemble(scene)?;
        let (textures, texture_size) = image_texture::load_all(&scene.textures)?;

        let mut camera = Camera::new(width, height);
        if !group.objects.is_empty() {
            camera.frame_bounds(&scene_bounds);
        }

        let mut library = ShaderLibrary::default();
        let tables = DispatchTables::build(&mut library);
        let dispatch_words = tables.words();
        log::debug!("shader routines: {:?}", library.entry_points());

        let material_records: Vec<MaterialRecord> =
            scene.materials.iter().map(MaterialRecord::from).collect();
        let lights: Vec<LightRecord> = scene.lights.iter().map(LightRecord::from).collect();

        let params = Params {
            screen_width: width,
            screen_height: height,
            frame: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            material_count: material_records.len() as u32,
            light_count: lights.len() as u32,
            object_count: group.objects.len() as u32,
            lights_visible: group.lights_visible as u32,
            accumulate: 1,
            texture_width: texture_size[0],
            texture_height: texture_size[1],
            texture_count: textures.len() as u32,
        };

        let (buffers, bind_group_layout, bind_group) = DataBuffers::new(
            device,
            camera.pose(),
            &camera.ray_directions,
            &material_records,
            &lights,
            &dispatch_words,
            &group.triangle_table(),
            &group.object_table(),
            &group.lights,
            params,
        );

        buffers.upload_textures(&textures, queue, texture_size[0], texture_size[1]);

        let compute_pipeline = create_compute_pipeline(device, &bind_group_layout);

        log::info!(
            "session: {} objects, {} lights, {} materials, {} textures",
            group.objects.len(),
            lights.len(),
            material_records.len(),
            textures.len()
        );

        Ok(RenderSession {
            camera,
            materials: scene.materials.clone(),
            material_index: 0,
            light_index: 0,
            lights,
            group,
            scene_bounds,
            textures,
            texture_size,
            dispatch_words,
            params,
            accumulator: FrameAccumulator::new(),
            buffers,
            bind_group,
            compute_pipeline,
        })
    }

    pub fn frame(&self) -> u32 {
        self.accumulator.frame()
    }

    pub fn max_depth(&self) -> u32 {
        self.params.max_depth
    }

    pub fn accumulate(&self) -> bool {
        self.params.accumulate != 0
    }

    pub fn lights_visible(&self) -> bool {
        self.params.lights_visible != 0
    }

    /// Runs one accumulation frame: the frame count becomes the sample seed,
    /// the shader adds its estimate to the running sum and writes the
    /// averaged image to the output buffer.
    pub fn compute_frame(&mut self, device: &Device, queue: &Queue) {
        self.params.frame = self.accumulator.tick();
        self.buffers.update_params(queue, self.params);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Compute Encoder"),
        });

        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Path Trace Pass"),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(&self.compute_pipeline);
            compute_pass.set_bind_group(0, &self.bind_group, &[]);
            compute_pass.dispatch_workgroups(
                self.params.screen_width.div_ceil(8),
                self.params.screen_height.div_ceil(8),
                1,
            );
        }

        queue.submit(Some(encoder.finish()));
    }

    /// Copies the averaged image into the display texture for the blit pass.
    pub fn update_texture(&self, encoder: &mut wgpu::CommandEncoder, texture: &wgpu::Texture) {
        encoder.copy_buffer_to_texture(
            wgpu::ImageCopyBuffer {
                buffer: &self.buffers.output_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * self.params.screen_width), // 4x u8 per pixel
                    rows_per_image: Some(self.params.screen_height),
                },
            },
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: self.params.screen_width,
                height: self.params.screen_height,
                depth_or_array_layers: 1,
            },
        );
    }

    pub fn reset_accumulation(&mut self, device: &Device, queue: &Queue) {
        self.accumulator.reset();
        self.params.frame = 0;
        self.buffers.reset_accumulation(device, queue, self.params);
    }

    pub fn on_update(
        &mut self,
        device: &Device,
        queue: &Queue,
        egui_context: &Context,
        timestep: f32,
    ) {
        let moved = self.camera.on_update(egui_context, timestep);
        if moved {
            self.buffers.update_rays(queue, &self.camera.ray_directions);
            self.buffers.update_camera(queue, self.camera.pose());
            self.reset_accumulation(device, queue);
        }
    }

    /// Rebuilds the per-pixel tables for the new resolution. The scene
    /// tables survive, textures are re-uploaded into the fresh bindings.
    pub fn on_resize(&mut self, device: &Device, queue: &Queue, width: u32, height: u32) {
        if width == self.params.screen_width && height == self.params.screen_height {
            return;
        }

        self.camera.on_resize(width, height);
        self.params.screen_width = width;
        self.params.screen_height = height;
        self.accumulator.reset();
        self.params.frame = 0;

        let material_records: Vec<MaterialRecord> =
            self.materials.iter().map(MaterialRecord::from).collect();

        let (buffers, bind_group_layout, bind_group) = DataBuffers::new(
            device,
            self.camera.pose(),
            &self.camera.ray_directions,
            &material_records,
            &self.lights,
            &self.dispatch_words,
            &self.group.triangle_table(),
            &self.group.object_table(),
            &self.group.lights,
            self.params,
        );

        buffers.upload_textures(
            &self.textures,
            queue,
            self.texture_size[0],
            self.texture_size[1],
        );

        self.buffers = buffers;
        self.bind_group = bind_group;
        self.compute_pipeline = create_compute_pipeline(device, &bind_group_layout);
    }

    pub fn set_max_depth(&mut self, device: &Device, queue: &Queue, max_depth: u32) {
        if self.params.max_depth == max_depth {
            return;
        }
        self.params.max_depth = max_depth;
        self.reset_accumulation(device, queue);
    }

    pub fn set_accumulate(&mut self, device: &Device, queue: &Queue, accumulate: bool) {
        self.params.accumulate = accumulate as u32;
        self.reset_accumulation(device, queue);
    }

    pub fn set_lights_visible(&mut self, device: &Device, queue: &Queue, visible: bool) {
        self.group.lights_visible = visible;
        self.params.lights_visible = visible as u32;
        self.reset_accumulation(device, queue);
    }

    /// Pushes one edited material to the GPU and starts the average over.
    pub fn apply_material(&mut self, device: &Device, queue: &Queue, index: usize) {
        let record = MaterialRecord::from(&self.materials[index]);
        self.buffers.update_material(queue, index as u32, &record);
        self.reset_accumulation(device, queue);
    }

    /// Same contract for light edits: overwrite in place, reset the average.
    pub fn apply_light(&mut self, device: &Device, queue: &Queue, index: usize) {
        let record = self.lights[index];
        self.buffers.update_light(queue, index as u32, &record);
        self.reset_accumulation(device, queue);
    }

    /// Puts the camera back at its default pose relative to the scene.
    pub fn recenter(&mut self, device: &Device, queue: &Queue) {
        self.camera.frame_bounds(&self.scene_bounds);
        self.buffers.update_rays(queue, &self.camera.ray_directions);
        self.buffers.update_camera(queue, self.camera.pose());
        self.reset_accumulation(device, queue);
    }

    /// Reads the averaged image back and writes it as a PNG.
    pub fn save_image(&self, device: &Device, queue: &Queue, path: &Path) -> anyhow::Result<()> {
        let pixels = self.buffers.read_output(device, queue);
        image::save_buffer(
            path,
            &pixels,
            self.params.screen_width,
            self.params.screen_height,
            image::ExtendedColorType::Rgba8,
        )
        .with_context(|| format!("could not write image {}", path.display()))?;

        log::info!("wrote {}", path.display());
        Ok(())
    }

    /// Headless render: accumulates the requested number of frames and
    /// writes the result to disk.
    pub fn render_batch(
        &mut self,
        device: &Device,
        queue: &Queue,
        frames: u32,
        out: &Path,
    ) -> anyhow::Result<()> {
        for _ in 0..frames {
            self.compute_frame(device, queue);
            if self.frame() % ACCUMULATION_FRAMES == 0 {
                log::info!("accumulated {} / {} frames", self.frame(), frames);
            }
        }

        device.poll(wgpu::Maintain::Wait);
        self.save_image(device, queue, out)
    }
}

fn create_compute_pipeline(device: &Device, layout: &BindGroupLayout) -> ComputePipeline {
    let compute_module = device.create_shader_module(include_wgsl!("compute_shader.wgsl"));

    let compute_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Compute Pipeline Layout"),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });

    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("Compute Pipeline"),
        layout: Some(&compute_pipeline_layout),
        module: &compute_module,
        entry_point: "main",
        compilation_options: wgpu::PipelineCompilationOptions::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_after_reset_seeds_zero() {
        let mut accumulator = FrameAccumulator::new();
        assert_eq!(accumulator.tick(), 0);
        assert_eq!(accumulator.tick(), 1);
        assert_eq!(accumulator.frame(), 2);

        accumulator.reset();
        assert_eq!(accumulator.frame(), 0);
        assert_eq!(accumulator.tick(), 0);
    }

    #[test]
    fn reset_is_idempotent() {
        let mut accumulator = FrameAccumulator::new();
        for _ in 0..10 {
            accumulator.tick();
        }

        accumulator.reset();
        accumulator.reset();
        assert_eq!(accumulator.frame(), 0);
    }
}
