use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use glam::{vec3a, Mat4, Vec3A};
use thiserror::Error;

use crate::buffers::{LightInstance, ObjectInfo, SceneTriangle};
use crate::scene::Scene;

/// Asset failures are fatal: a scene that references a mesh it cannot load
/// does not render at all.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("could not open mesh {path}: {source}")]
    MeshOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not read mesh {path}: {source}")]
    MeshRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not load texture {path}: {source}")]
    Texture {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("texture {path} is {got_width}x{got_height}, expected {want_width}x{want_height}")]
    TextureSize {
        path: PathBuf,
        got_width: u32,
        got_height: u32,
        want_width: u32,
        want_height: u32,
    },
}

/// Axis-aligned bounding box accumulated corner-by-corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3A,
    pub max: Vec3A,
}

impl Aabb {
    pub fn empty() -> Aabb {
        Aabb {
            min: Vec3A::splat(f32::MAX),
            max: Vec3A::splat(f32::MIN),
        }
    }

    pub fn include_point(&mut self, point: Vec3A) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn include(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn center(&self) -> Vec3A {
        (self.min + self.max) / 2.0
    }

    pub fn extent(&self) -> Vec3A {
        self.max - self.min
    }
}

/// One instantiated mesh in the opaque partition: transformed triangles plus
/// the table entry carrying its material index and BRDF tag.
#[derive(Debug, Clone)]
pub struct MeshObject {
    pub triangles: Vec<SceneTriangle>,
    pub info: ObjectInfo,
}

impl MeshObject {
    fn load(
        path: &Path,
        transform: &Mat4,
        material_index: u32,
        brdf: u32,
        first_triangle_index: u32,
    ) -> Result<(MeshObject, Aabb), AssetError> {
        let file = File::open(path).map_err(|source| AssetError::MeshOpen {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = BufReader::new(file);

        let stl_file = stl_io::read_stl(&mut reader).map_err(|source| AssetError::MeshRead {
            path: path.to_path_buf(),
            source,
        })?;

        let mut bounds = Aabb::empty();
        let points: Vec<Vec3A> = stl_file
            .vertices
            .iter()
            .map(|&vertex| {
                let point = vec3a(vertex[0], vertex[1], vertex[2]);
                let point = Vec3A::from(transform.transform_point3(point.into()));
                bounds.include_point(point);
                point
            })
            .collect();

        let triangles: Vec<SceneTriangle> = stl_file
            .faces
            .iter()
            .map(|face| {
                SceneTriangle::new(
                    points[face.vertices[0]],
                    points[face.vertices[1]],
                    points[face.vertices[2]],
                )
            })
            .collect();

        let info = ObjectInfo {
            min_bounds: bounds.min.into(),
            first_triangle_index,
            max_bounds: bounds.max.into(),
            triangle_count: triangles.len() as u32,
            material_index,
            brdf,
            _padding: [0; 2],
        };

        Ok((MeshObject { triangles, info }, bounds))
    }
}

/// Root grouping construct with two sibling partitions: opaque meshes and
/// light geometry. Keeping them apart lets debug views hide the lights
/// without touching the mesh tables.
#[derive(Debug, Clone)]
pub struct RenderGroup {
    pub objects: Vec<MeshObject>,
    pub lights: Vec<LightInstance>,
    pub lights_visible: bool,
}

impl RenderGroup {
    pub fn triangle_table(&self) -> Vec<SceneTriangle> {
        self.objects
            .iter()
            .flat_map(|object| object.triangles.iter().copied())
            .collect()
    }

    pub fn object_table(&self) -> Vec<ObjectInfo> {
        self.objects.iter().map(|object| object.info).collect()
    }
}

/// Instantiates one primitive per mesh and one per light, and returns the
/// union bounds of the opaque partition for default camera placement.
pub fn assemble(scene: &Scene) -> Result<(RenderGroup, Aabb), AssetError> {
    let mut group = RenderGroup {
        objects: Vec::with_capacity(scene.mesh_files.len()),
        lights: Vec::with_capacity(scene.lights.len()),
        lights_visible: true,
    };

    let mut scene_bounds = Aabb::empty();
    let mut first_triangle_index = 0u32;
    let mut triangle_total = 0usize;

    for (i, path) in scene.mesh_files.iter().enumerate() {
        let material = &scene.materials[i];
        let (object, bounds) = MeshObject::load(
            path,
            &scene.transforms[i],
            i as u32,
            material.brdf.index(),
            first_triangle_index,
        )?;

        log::info!("{}: {} triangles", path.display(), object.triangles.len());
        triangle_total += object.triangles.len();
        first_triangle_index += object.triangles.len() as u32;
        scene_bounds.include(&bounds);
        group.objects.push(object);
    }
    log::info!("total triangle count: {}", triangle_total);

    for (i, light) in scene.lights.iter().enumerate() {
        group.lights.push(LightInstance::new(i as u32, light.kind));
    }

    Ok((group, scene_bounds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::parse;
    use std::io::Write;

    #[test]
    fn aabb_accumulates_union_bounds() {
        let mut aabb = Aabb::empty();
        aabb.include_point(vec3a(-1.0, 0.0, 2.0));
        aabb.include_point(vec3a(3.0, -2.0, 0.0));

        let mut other = Aabb::empty();
        other.include_point(vec3a(0.0, 5.0, -4.0));
        aabb.include(&other);

        assert_eq!(aabb.min, vec3a(-1.0, -2.0, -4.0));
        assert_eq!(aabb.max, vec3a(3.0, 5.0, 2.0));
        assert_eq!(aabb.center(), vec3a(1.0, 1.5, -1.0));
        assert_eq!(aabb.extent(), vec3a(4.0, 7.0, 6.0));
    }

    #[test]
    fn missing_mesh_file_aborts_assembly() {
        let scene = Scene::from_mesh_files(&[PathBuf::from("does/not/exist.stl")]);
        let err = assemble(&scene).unwrap_err();
        assert!(matches!(err, AssetError::MeshOpen { .. }));
    }

    #[test]
    fn lights_form_their_own_partition() {
        let scene = parse(
            "light {\n position 0 0 0\n radius 1\n type 0\n}\n\
             light {\n position 0 5 0\n u 1 5 0\n v 0 5 1\n type 1\n}\n",
            Path::new(""),
        )
        .unwrap();

        let (group, _) = assemble(&scene).unwrap();
        assert!(group.objects.is_empty());
        assert_eq!(group.lights.len(), 2);
        assert!(group.lights_visible);
        assert_eq!(group.lights[0], LightInstance::new(0, scene.lights[0].kind));
        assert_eq!(group.lights[1].light_index, 1);
        assert_eq!(group.lights[1].kind, 1);
    }

    #[test]
    fn assembled_mesh_is_tagged_and_bounded() {
        // one right triangle written as a minimal binary STL
        let path = std::env::temp_dir().join("gpu_path_tracer_test_tri.stl");
        {
            let mut data: Vec<u8> = vec![0u8; 80];
            data.extend_from_slice(&1u32.to_le_bytes());
            let floats: [f32; 12] = [
                0.0, 1.0, 0.0, // normal
                0.0, 0.0, 0.0, // a
                1.0, 0.0, 0.0, // b
                0.0, 0.0, 2.0, // c
            ];
            for f in floats {
                data.extend_from_slice(&f.to_le_bytes());
            }
            data.extend_from_slice(&0u16.to_le_bytes());
            let mut file = File::create(&path).unwrap();
            file.write_all(&data).unwrap();
        }

        let scene_text = format!(
            "material glass {{\n brdf 1\n}}\n\
             mesh {{\n file {}\n material glass\n}}\n",
            path.file_name().unwrap().to_str().unwrap()
        );
        let scene = parse(&scene_text, &std::env::temp_dir()).unwrap();

        let (group, bounds) = assemble(&scene).unwrap();
        assert_eq!(group.objects.len(), 1);

        let info = group.objects[0].info;
        assert_eq!(info.material_index, 0);
        assert_eq!(info.brdf, 1);
        assert_eq!(info.first_triangle_index, 0);
        assert_eq!(info.triangle_count, 1);

        assert_eq!(bounds.min, vec3a(0.0, 0.0, 0.0));
        assert_eq!(bounds.max, vec3a(1.0, 0.0, 2.0));
        assert_eq!(group.triangle_table().len(), 1);
        assert_eq!(group.object_table().len(), 1);

        let _ = std::fs::remove_file(&path);
    }
}
