use glam::Vec3A;

use wgpu::{util::DeviceExt, BindGroup, BindGroupLayout, Buffer, Device, Queue, Texture};

use crate::dispatch::LightKind;
use crate::image_texture::ImageTexture;
use crate::scene::{LightParameter, MaterialParameter};

/// Per-frame constants plus the table lengths the shader needs to bound its
/// loops. Counts describe the real tables; buffers padded with a zeroed
/// record to stay bindable are never iterated past their count.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Params {
    pub screen_width: u32,
    pub screen_height: u32,
    pub frame: u32, // accumulation frame, doubles as the sample seed
    pub max_depth: u32,
    pub material_count: u32,
    pub light_count: u32,
    pub object_count: u32,
    pub lights_visible: u32,
    pub accumulate: u32,
    pub texture_width: u32,
    pub texture_height: u32,
    pub texture_count: u32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RayCamera {
    pub origin: [f32; 3],  // vec3, aligned to 12 bytes
    pub _padding: [u8; 4], // padding to ensure 16-byte alignment
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Ray {
    pub direction: [f32; 3], // vec3, aligned to 12 bytes
    pub _padding: [u8; 4],   // padding to ensure 16-byte alignment
}

/// Flat GPU image of one `MaterialParameter`, indexed by the material id
/// stored on each object. `brdf` is the dispatch-table discriminant;
/// `albedo_tex` is `u32::MAX` for untextured materials.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialRecord {
    pub color: [f32; 3],
    pub metallic: f32,
    pub emission: [f32; 3],
    pub subsurface: f32,
    pub specular: f32,
    pub specular_tint: f32,
    pub roughness: f32,
    pub anisotropic: f32,
    pub sheen: f32,
    pub sheen_tint: f32,
    pub clearcoat: f32,
    pub clearcoat_gloss: f32,
    pub brdf: u32,
    pub albedo_tex: u32,
    pub _padding: [u32; 2],
}

pub const NO_TEXTURE: u32 = u32::MAX;

impl From<&MaterialParameter> for MaterialRecord {
    fn from(m: &MaterialParameter) -> MaterialRecord {
        MaterialRecord {
            color: m.color.into(),
            metallic: m.metallic,
            emission: m.emission.into(),
            subsurface: m.subsurface,
            specular: m.specular,
            specular_tint: m.specular_tint,
            roughness: m.roughness,
            anisotropic: m.anisotropic,
            sheen: m.sheen,
            sheen_tint: m.sheen_tint,
            clearcoat: m.clearcoat,
            clearcoat_gloss: m.clearcoat_gloss,
            brdf: m.brdf.index(),
            albedo_tex: m.albedo_tex.unwrap_or(NO_TEXTURE),
            _padding: [0; 2],
        }
    }
}

/// Flat GPU image of one `LightParameter`. For quads `u`/`v` are the derived
/// edge vectors; for spheres only `radius` applies. `kind` indexes the light
/// sampling dispatch table.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightRecord {
    pub position: [f32; 3],
    pub radius: f32,
    pub emission: [f32; 3],
    pub area: f32,
    pub normal: [f32; 3],
    pub kind: u32,
    pub u: [f32; 3],
    pub _padding: u32,
    pub v: [f32; 3],
    pub _padding2: u32,
}

impl From<&LightParameter> for LightRecord {
    fn from(l: &LightParameter) -> LightRecord {
        LightRecord {
            position: l.position.into(),
            radius: l.radius,
            emission: l.emission.into(),
            area: l.area,
            normal: l.normal.into(),
            kind: l.kind.index(),
            u: l.u.into(),
            _padding: 0,
            v: l.v.into(),
            _padding2: 0,
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SceneTriangle {
    a: [f32; 3],           // vec3, aligned to 12 bytes
    _padding: [u8; 4],     // padding to ensure 16-byte alignment
    edge_ab: [f32; 3],     // vec3, aligned to 12 bytes
    _padding2: [u8; 4],    // padding to ensure 16-byte alignment
    edge_ac: [f32; 3],     // vec3, aligned to 12 bytes
    _padding3: [u8; 4],    // padding to ensure 16-byte alignment
    face_normal: [f32; 3], // vec3, aligned to 12 bytes
    _padding4: [u8; 4],    // padding to ensure 16-byte alignment
}

impl SceneTriangle {
    pub fn new(a: Vec3A, b: Vec3A, c: Vec3A) -> SceneTriangle {
        // precalculations to save on compute
        let edge_ab = b - a;
        let edge_ac = c - a;
        let face_normal = edge_ab.cross(edge_ac).normalize();

        SceneTriangle {
            a: a.into(),
            _padding: [0; 4],
            edge_ab: edge_ab.into(),
            _padding2: [0; 4],
            edge_ac: edge_ac.into(),
            _padding3: [0; 4],
            face_normal: face_normal.into(),
            _padding4: [0; 4],
        }
    }
}

/// One entry per mesh in the opaque partition: its triangle range, bounds,
/// the material it renders with and that material's BRDF discriminant so
/// the shader routes straight into the dispatch table.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ObjectInfo {
    pub min_bounds: [f32; 3],
    pub first_triangle_index: u32,
    pub max_bounds: [f32; 3],
    pub triangle_count: u32,
    pub material_index: u32,
    pub brdf: u32,
    pub _padding: [u32; 2],
}

/// One entry per light in the light partition; the geometry itself lives in
/// the light table, this is the instance tag.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightInstance {
    pub light_index: u32,
    pub kind: u32,
    pub _padding: [u32; 2],
}

impl LightInstance {
    pub fn new(light_index: u32, kind: LightKind) -> LightInstance {
        LightInstance {
            light_index,
            kind: kind.index(),
            _padding: [0; 2],
        }
    }
}

macro_rules! bind_group_entry {
    ($binding:expr, $resource:expr) => {
        wgpu::BindGroupEntry {
            binding: $binding,
            resource: $resource.as_entire_binding(),
        }
    };
}

fn storage_buffer<T: bytemuck::Pod>(device: &Device, label: &str, data: &[T]) -> Buffer {
    // zero-length buffers are not bindable, pad with one zeroed record
    let padded: Vec<T>;
    let contents = if data.is_empty() {
        padded = vec![T::zeroed()];
        &padded[..]
    } else {
        data
    };

    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::cast_slice(contents),
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
    })
}

/// Owns every table the compute shader reads: the dense material and light
/// registries, dispatch words, geometry, per-pixel rays, and the output and
/// accumulation images. All mutation goes through the `update_*` methods on
/// the control thread between submissions.
pub struct DataBuffers {
    pub output_buffer_size: u64,
    pub accumulation_buffer_size: u64,
    pub ray_buffer: Buffer,
    pub output_buffer: Buffer,
    pub params_buffer: Buffer,
    pub camera_buffer: Buffer,
    pub material_buffer: Buffer,
    pub light_buffer: Buffer,
    pub dispatch_buffer: Buffer,
    pub accumulation_buffer: Buffer,
    pub triangle_buffer: Buffer,
    pub object_buffer: Buffer,
    pub light_instance_buffer: Buffer,
    pub albedo_textures: Texture,
}

#[allow(clippy::too_many_arguments)]
impl DataBuffers {
    pub fn new(
        device: &Device,
        camera: RayCamera,
        camera_rays: &[Ray],
        materials: &[MaterialRecord],
        lights: &[LightRecord],
        dispatch_words: &[u32],
        triangles: &[SceneTriangle],
        objects: &[ObjectInfo],
        light_instances: &[LightInstance],
        params: Params,
    ) -> (DataBuffers, BindGroupLayout, BindGroup) {
        let ray_buffer = storage_buffer(device, "Ray Buffer", camera_rays);

        // one packed RGBA8 word per pixel
        let output_buffer_size = (params.screen_width as u64)
            * (params.screen_height as u64)
            * std::mem::size_of::<u32>() as u64;

        let output_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Output Buffer"),
            size: output_buffer_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        // RGBA f32 running sum per pixel
        let accumulation_buffer_size = (params.screen_width as u64)
            * (params.screen_height as u64)
            * std::mem::size_of::<[f32; 4]>() as u64;

        let accumulation_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Accumulation Buffer"),
            size: accumulation_buffer_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Params Buffer"),
            contents: bytemuck::cast_slice(&[params]),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        });

        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Camera Buffer"),
            contents: bytemuck::cast_slice(&[camera]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let material_buffer = storage_buffer(device, "Material Buffer", materials);
        let light_buffer = storage_buffer(device, "Light Buffer", lights);
        let dispatch_buffer = storage_buffer(device, "Dispatch Table Buffer", dispatch_words);
        let triangle_buffer = storage_buffer(device, "Triangle Buffer", triangles);
        let object_buffer = storage_buffer(device, "Object Buffer", objects);
        let light_instance_buffer =
            storage_buffer(device, "Light Instance Buffer", light_instances);

        let texture_size = wgpu::Extent3d {
            width: params.texture_width.max(1),
            height: params.texture_height.max(1),
            depth_or_array_layers: params.texture_count.max(1),
        };

        let albedo_textures = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Albedo Texture Array"),
            size: texture_size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let buffers = DataBuffers {
            output_buffer_size,
            accumulation_buffer_size,
            ray_buffer,
            output_buffer,
            params_buffer,
            camera_buffer,
            material_buffer,
            light_buffer,
            dispatch_buffer,
            accumulation_buffer,
            triangle_buffer,
            object_buffer,
            light_instance_buffer,
            albedo_textures,
        };

        let (bind_group_layout, compute_bind_group) = buffers.create_compute_bindgroup(device);

        (buffers, bind_group_layout, compute_bind_group)
    }

    fn create_compute_bindgroup(&self, device: &Device) -> (BindGroupLayout, BindGroup) {
        let params_bind = 0;
        let ray_directions_bind = 1;
        let output_bind = 2;
        let camera_bind = 3;
        let material_bind = 4;
        let light_bind = 5;
        let accumulation_bind = 6;
        let triangle_bind = 7;
        let object_bind = 8;
        let dispatch_bind = 9;
        let light_instance_bind = 10;
        let texture_bind = 11;

        let storage_read = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let storage_write = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[
                storage_read(params_bind),
                storage_read(ray_directions_bind),
                storage_write(output_bind),
                wgpu::BindGroupLayoutEntry {
                    binding: camera_bind,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage_read(material_bind),
                storage_read(light_bind),
                storage_write(accumulation_bind),
                storage_read(triangle_bind),
                storage_read(object_bind),
                storage_read(dispatch_bind),
                storage_read(light_instance_bind),
                wgpu::BindGroupLayoutEntry {
                    binding: texture_bind,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2Array,
                        multisampled: false,
                    },
                    count: None,
                },
            ],
            label: None,
        });

        let compute_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &bind_group_layout,
            entries: &[
                bind_group_entry!(params_bind, self.params_buffer),
                bind_group_entry!(ray_directions_bind, self.ray_buffer),
                bind_group_entry!(output_bind, self.output_buffer),
                bind_group_entry!(camera_bind, self.camera_buffer),
                bind_group_entry!(material_bind, self.material_buffer),
                bind_group_entry!(light_bind, self.light_buffer),
                bind_group_entry!(accumulation_bind, self.accumulation_buffer),
                bind_group_entry!(triangle_bind, self.triangle_buffer),
                bind_group_entry!(object_bind, self.object_buffer),
                bind_group_entry!(dispatch_bind, self.dispatch_buffer),
                bind_group_entry!(light_instance_bind, self.light_instance_buffer),
                wgpu::BindGroupEntry {
                    binding: texture_bind,
                    resource: wgpu::BindingResource::TextureView(
                        &self
                            .albedo_textures
                            .create_view(&wgpu::TextureViewDescriptor::default()),
                    ),
                },
            ],
            label: None,
        });

        (bind_group_layout, compute_bind_group)
    }

    pub fn upload_textures(
        &self,
        textures: &[ImageTexture],
        queue: &Queue,
        texture_width: u32,
        texture_height: u32,
    ) {
        for (i, texture) in textures.iter().enumerate() {
            queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &self.albedo_textures,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: 0,
                        y: 0,
                        z: i as u32,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                &texture.image_buffer,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * texture_width), // 4x u8 per pixel
                    rows_per_image: Some(texture_height),
                },
                wgpu::Extent3d {
                    width: texture_width,
                    height: texture_height,
                    depth_or_array_layers: 1,
                },
            );
        }
    }

    pub fn update_rays(&self, queue: &Queue, new_rays: &[Ray]) {
        queue.write_buffer(&self.ray_buffer, 0, bytemuck::cast_slice(new_rays));
    }

    pub fn update_camera(&self, queue: &Queue, camera: RayCamera) {
        queue.write_buffer(&self.camera_buffer, 0, bytemuck::cast_slice(&[camera]));
    }

    pub fn update_params(&self, queue: &Queue, params: Params) {
        queue.write_buffer(&self.params_buffer, 0, bytemuck::cast_slice(&[params]));
    }

    /// Overwrites one material record in place. The table keeps its length;
    /// the new value is visible to the next submitted invocation.
    pub fn update_material(&self, queue: &Queue, index: u32, record: &MaterialRecord) {
        let offset = index as u64 * std::mem::size_of::<MaterialRecord>() as u64;
        queue.write_buffer(
            &self.material_buffer,
            offset,
            bytemuck::cast_slice(std::slice::from_ref(record)),
        );
    }

    pub fn update_light(&self, queue: &Queue, index: u32, record: &LightRecord) {
        let offset = index as u64 * std::mem::size_of::<LightRecord>() as u64;
        queue.write_buffer(
            &self.light_buffer,
            offset,
            bytemuck::cast_slice(std::slice::from_ref(record)),
        );
    }

    /// Clears the radiance sum so the next frame starts the average over.
    pub fn reset_accumulation(&self, device: &Device, queue: &Queue, params: Params) {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Buffer Encoder"),
        });

        encoder.clear_buffer(&self.accumulation_buffer, 0, Some(self.accumulation_buffer_size));

        queue.write_buffer(&self.params_buffer, 0, bytemuck::cast_slice(&[params]));

        queue.submit(Some(encoder.finish()));
    }

    /// Copies the packed RGBA8 output into host memory. Blocks until the
    /// copy completes; only used for screenshots and batch output.
    pub fn read_output(&self, device: &Device, queue: &Queue) -> Vec<u8> {
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Output Staging Buffer"),
            size: self.output_buffer_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_buffer_to_buffer(&self.output_buffer, 0, &staging, 0, self.output_buffer_size);
        queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .expect("readback channel closed")
            .expect("failed to map output staging buffer");

        let pixels = slice.get_mapped_range().to_vec();
        staging.unmap();
        pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::BrdfKind;
    use glam::vec3a;

    #[test]
    fn material_record_round_trips_every_scalar_field() {
        let source = MaterialParameter {
            color: vec3a(0.1, 0.2, 0.3),
            emission: vec3a(4.0, 5.0, 6.0),
            metallic: 0.125,
            subsurface: 0.0625,
            specular: 0.55,
            roughness: 0.4375,
            specular_tint: 0.2,
            anisotropic: 0.3,
            sheen: 0.7,
            sheen_tint: 0.9,
            clearcoat: 0.15,
            clearcoat_gloss: 0.85,
            brdf: BrdfKind::Glass,
            albedo_tex: Some(3),
        };

        let record = MaterialRecord::from(&source);

        assert_eq!(record.color, [0.1, 0.2, 0.3]);
        assert_eq!(record.emission, [4.0, 5.0, 6.0]);
        assert_eq!(record.metallic.to_bits(), source.metallic.to_bits());
        assert_eq!(record.subsurface.to_bits(), source.subsurface.to_bits());
        assert_eq!(record.specular.to_bits(), source.specular.to_bits());
        assert_eq!(record.roughness.to_bits(), source.roughness.to_bits());
        assert_eq!(
            record.specular_tint.to_bits(),
            source.specular_tint.to_bits()
        );
        assert_eq!(record.anisotropic.to_bits(), source.anisotropic.to_bits());
        assert_eq!(record.sheen.to_bits(), source.sheen.to_bits());
        assert_eq!(record.sheen_tint.to_bits(), source.sheen_tint.to_bits());
        assert_eq!(record.clearcoat.to_bits(), source.clearcoat.to_bits());
        assert_eq!(
            record.clearcoat_gloss.to_bits(),
            source.clearcoat_gloss.to_bits()
        );
        assert_eq!(record.brdf, 1);
        assert_eq!(record.albedo_tex, 3);
    }

    #[test]
    fn untextured_material_serializes_the_sentinel() {
        let record = MaterialRecord::from(&MaterialParameter::default());
        assert_eq!(record.albedo_tex, NO_TEXTURE);
        assert_eq!(record.brdf, 0);
    }

    #[test]
    fn light_record_carries_derived_geometry() {
        let source = LightParameter {
            position: vec3a(1.0, 2.0, 3.0),
            normal: vec3a(0.0, -1.0, 0.0),
            emission: vec3a(10.0, 10.0, 8.0),
            u: vec3a(2.0, 0.0, 0.0),
            v: vec3a(0.0, 0.0, 2.0),
            area: 4.0,
            radius: 0.0,
            kind: LightKind::Quad,
        };

        let record = LightRecord::from(&source);
        assert_eq!(record.position, [1.0, 2.0, 3.0]);
        assert_eq!(record.u, [2.0, 0.0, 0.0]);
        assert_eq!(record.v, [0.0, 0.0, 2.0]);
        assert_eq!(record.area, 4.0);
        assert_eq!(record.kind, 1);
    }

    #[test]
    fn gpu_records_are_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<MaterialRecord>() % 16, 0);
        assert_eq!(std::mem::size_of::<LightRecord>() % 16, 0);
        assert_eq!(std::mem::size_of::<SceneTriangle>() % 16, 0);
        assert_eq!(std::mem::size_of::<ObjectInfo>() % 16, 0);
        assert_eq!(std::mem::size_of::<LightInstance>() % 16, 0);
        assert_eq!(std::mem::size_of::<Params>() % 16, 0);
    }
}
