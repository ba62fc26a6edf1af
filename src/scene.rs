use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use glam::{vec3a, Mat4, Vec3A};
use thiserror::Error;

use crate::dispatch::{BrdfKind, LightKind};

/// One record per `material` block. Serialized into the flat GPU table by
/// `buffers::MaterialRecord`; the parsed form stays the editable source of
/// truth on the host side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialParameter {
    pub color: Vec3A,
    pub emission: Vec3A,
    pub metallic: f32,
    pub subsurface: f32,
    pub specular: f32,
    pub roughness: f32,
    pub specular_tint: f32,
    pub anisotropic: f32,
    pub sheen: f32,
    pub sheen_tint: f32,
    pub clearcoat: f32,
    pub clearcoat_gloss: f32,
    pub brdf: BrdfKind,
    /// Index into `Scene::textures`, shared between materials that name the
    /// same file.
    pub albedo_tex: Option<u32>,
}

impl Default for MaterialParameter {
    fn default() -> MaterialParameter {
        MaterialParameter {
            color: Vec3A::ZERO,
            emission: Vec3A::ZERO,
            metallic: 0.0,
            subsurface: 0.0,
            specular: 0.5,
            roughness: 0.5,
            specular_tint: 0.0,
            anisotropic: 0.0,
            sheen: 0.0,
            sheen_tint: 0.5,
            clearcoat: 0.0,
            clearcoat_gloss: 1.0,
            brdf: BrdfKind::Disney,
            albedo_tex: None,
        }
    }
}

/// One record per `light` block, with the sampling geometry already derived:
/// for quads `u`/`v` hold the edge vectors spanned from `position`, for
/// spheres they are unused and `radius` applies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightParameter {
    pub position: Vec3A,
    pub normal: Vec3A,
    pub emission: Vec3A,
    pub u: Vec3A,
    pub v: Vec3A,
    pub area: f32,
    pub radius: f32,
    pub kind: LightKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Properties {
    pub width: u32,
    pub height: u32,
}

impl Default for Properties {
    fn default() -> Properties {
        Properties {
            width: 1280,
            height: 720,
        }
    }
}

/// Aggregate scene graph. Mesh files and materials are parallel sequences:
/// mesh `i` renders with material `i`. That pairing is a file-format
/// contract; scenes that interleave `mesh` blocks out of order relative to
/// their intended materials get exactly what they wrote.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub mesh_files: Vec<PathBuf>,
    pub transforms: Vec<Mat4>,
    pub materials: Vec<MaterialParameter>,
    pub lights: Vec<LightParameter>,
    /// Albedo texture files, deduplicated by name. Decoded lazily when the
    /// render session is built so the scene owns every asset it references.
    pub textures: Vec<PathBuf>,
    pub properties: Properties,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("could not open scene file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("`{block}` block starting on line {line} is never closed")]
    UnterminatedBlock { block: &'static str, line: usize },
    #[error("unknown brdf variant {value} on line {line}")]
    UnknownBrdf { value: i64, line: usize },
    #[error("unknown light type {value} on line {line}")]
    UnknownLightType { value: i64, line: usize },
    #[error("light block starting on line {line} declares no `type`")]
    MissingLightType { line: usize },
}

impl Scene {
    pub fn load(path: &Path) -> Result<Scene, LoadError> {
        let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        // mesh and texture paths are relative to the scene file
        let asset_root = path.parent().unwrap_or(Path::new(".")).to_path_buf();

        parse(&text, &asset_root)
    }

    /// Ad-hoc scene for trailing command-line mesh arguments: every mesh gets
    /// the default material and there are no lights.
    pub fn from_mesh_files(paths: &[PathBuf]) -> Scene {
        let mut scene = Scene::default();
        for path in paths {
            scene.mesh_files.push(path.clone());
            scene.transforms.push(Mat4::IDENTITY);
            scene.materials.push(MaterialParameter::default());
        }
        scene
    }
}

/// Parses the block-structured scene text. Single pass, line oriented:
/// unknown keys are ignored for forward compatibility, `#` starts a comment
/// anywhere, and a block that reaches EOF before its `}` is an explicit
/// error rather than a silently truncated record.
pub fn parse(text: &str, asset_root: &Path) -> Result<Scene, LoadError> {
    let mut scene = Scene::default();
    let mut materials_by_name: HashMap<String, MaterialParameter> = HashMap::new();
    let mut texture_ids: HashMap<String, u32> = HashMap::new();

    let mut lines = text.lines().enumerate();

    while let Some((index, raw)) = lines.next() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let start_line = index + 1;

        match tokens[0] {
            "material" => {
                let name = tokens.get(1).unwrap_or(&"").to_string();
                if name.is_empty() {
                    log::warn!("line {}: material block without a name", start_line);
                }
                let material = parse_material(
                    &mut lines,
                    start_line,
                    &mut texture_ids,
                    &mut scene.textures,
                )?;
                materials_by_name.insert(name, material);
            }
            "light" => {
                let light = parse_light(&mut lines, start_line)?;
                scene.lights.push(light);
            }
            "properties" => {
                scene.properties = parse_properties(&mut lines, start_line)?;
            }
            "mesh" => {
                parse_mesh(
                    &mut lines,
                    start_line,
                    asset_root,
                    &materials_by_name,
                    &mut scene,
                )?;
            }
            other => {
                // forward compatible: skip anything we do not recognize
                log::debug!("line {}: ignoring `{}`", start_line, other);
            }
        }
    }

    Ok(scene)
}

/// Consumes lines until the block's closing `}` and hands each `key value...`
/// line to `field`. Returns an error if EOF arrives first.
fn scan_block<'a, I, F>(
    lines: &mut I,
    block: &'static str,
    start_line: usize,
    mut field: F,
) -> Result<(), LoadError>
where
    I: Iterator<Item = (usize, &'a str)>,
    F: FnMut(usize, &[&str]) -> Result<(), LoadError>,
{
    for (index, raw) in lines.by_ref() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.contains('}') {
            return Ok(());
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens[0] == "{" {
            continue;
        }
        field(index + 1, &tokens)?;
    }

    Err(LoadError::UnterminatedBlock {
        block,
        line: start_line,
    })
}

fn float_arg(tokens: &[&str]) -> Option<f32> {
    tokens.get(1).and_then(|t| t.parse().ok())
}

fn vec3_arg(tokens: &[&str]) -> Option<Vec3A> {
    let x = tokens.get(1)?.parse().ok()?;
    let y = tokens.get(2)?.parse().ok()?;
    let z = tokens.get(3)?.parse().ok()?;
    Some(vec3a(x, y, z))
}

fn parse_material<'a, I>(
    lines: &mut I,
    start_line: usize,
    texture_ids: &mut HashMap<String, u32>,
    textures: &mut Vec<PathBuf>,
) -> Result<MaterialParameter, LoadError>
where
    I: Iterator<Item = (usize, &'a str)>,
{
    let mut material = MaterialParameter::default();

    scan_block(lines, "material", start_line, |line, tokens| {
        match tokens[0] {
            "color" => {
                if let Some(v) = vec3_arg(tokens) {
                    material.color = v;
                }
            }
            "emission" => {
                if let Some(v) = vec3_arg(tokens) {
                    material.emission = v;
                }
            }
            "metallic" => material.metallic = float_arg(tokens).unwrap_or(material.metallic),
            "subsurface" => material.subsurface = float_arg(tokens).unwrap_or(material.subsurface),
            "specular" => material.specular = float_arg(tokens).unwrap_or(material.specular),
            "specularTint" => {
                material.specular_tint = float_arg(tokens).unwrap_or(material.specular_tint)
            }
            "roughness" => material.roughness = float_arg(tokens).unwrap_or(material.roughness),
            "anisotropic" => {
                material.anisotropic = float_arg(tokens).unwrap_or(material.anisotropic)
            }
            "sheen" => material.sheen = float_arg(tokens).unwrap_or(material.sheen),
            "sheenTint" => material.sheen_tint = float_arg(tokens).unwrap_or(material.sheen_tint),
            "clearcoat" => material.clearcoat = float_arg(tokens).unwrap_or(material.clearcoat),
            "clearcoatGloss" => {
                material.clearcoat_gloss = float_arg(tokens).unwrap_or(material.clearcoat_gloss)
            }
            "brdf" => {
                if let Some(value) = tokens.get(1).and_then(|t| t.parse::<i64>().ok()) {
                    material.brdf =
                        BrdfKind::from_index(value).ok_or(LoadError::UnknownBrdf { value, line })?;
                }
            }
            "albedoTex" => {
                if let Some(name) = tokens.get(1) {
                    // a filename seen twice reuses the previously recorded slot
                    let next_id = textures.len() as u32;
                    let id = *texture_ids.entry(name.to_string()).or_insert_with(|| {
                        textures.push(PathBuf::from(name));
                        next_id
                    });
                    material.albedo_tex = Some(id);
                }
            }
            _ => {}
        }
        Ok(())
    })?;

    Ok(material)
}

fn parse_light<'a, I>(lines: &mut I, start_line: usize) -> Result<LightParameter, LoadError>
where
    I: Iterator<Item = (usize, &'a str)>,
{
    let mut position = Vec3A::ZERO;
    let mut emission = Vec3A::ZERO;
    let mut normal = Vec3A::Y;
    let mut radius = 1.0f32;
    // `u` and `v` are absolute corner positions in the file, not vectors
    let mut corner_u = Vec3A::ZERO;
    let mut corner_v = Vec3A::ZERO;
    let mut kind: Option<LightKind> = None;

    scan_block(lines, "light", start_line, |line, tokens| {
        match tokens[0] {
            "position" => position = vec3_arg(tokens).unwrap_or(position),
            "emission" => emission = vec3_arg(tokens).unwrap_or(emission),
            "normal" => normal = vec3_arg(tokens).unwrap_or(normal),
            "radius" => radius = float_arg(tokens).unwrap_or(radius),
            "u" => corner_u = vec3_arg(tokens).unwrap_or(corner_u),
            "v" => corner_v = vec3_arg(tokens).unwrap_or(corner_v),
            "type" => {
                if let Some(value) = tokens.get(1).and_then(|t| t.parse::<i64>().ok()) {
                    kind = Some(
                        LightKind::from_index(value)
                            .ok_or(LoadError::UnknownLightType { value, line })?,
                    );
                }
            }
            _ => {}
        }
        Ok(())
    })?;

    // The geometry kind decides how the sampling fields are derived, so it is
    // mandatory even though field order within the block is free.
    let kind = kind.ok_or(LoadError::MissingLightType { line: start_line })?;

    let light = match kind {
        LightKind::Quad => {
            let edge_u = corner_u - position;
            let edge_v = corner_v - position;
            let cross = edge_u.cross(edge_v);
            LightParameter {
                position,
                normal: cross.normalize(),
                emission,
                u: edge_u,
                v: edge_v,
                area: cross.length(),
                radius,
                kind,
            }
        }
        LightKind::Sphere => LightParameter {
            position,
            normal: normal.normalize(),
            emission,
            u: Vec3A::ZERO,
            v: Vec3A::ZERO,
            area: 4.0 * std::f32::consts::PI * radius * radius,
            radius,
            kind,
        },
    };

    Ok(light)
}

fn parse_properties<'a, I>(lines: &mut I, start_line: usize) -> Result<Properties, LoadError>
where
    I: Iterator<Item = (usize, &'a str)>,
{
    let mut properties = Properties::default();

    scan_block(lines, "properties", start_line, |_, tokens| {
        match tokens[0] {
            "width" => {
                properties.width = tokens
                    .get(1)
                    .and_then(|t| t.parse().ok())
                    .unwrap_or(properties.width)
            }
            "height" => {
                properties.height = tokens
                    .get(1)
                    .and_then(|t| t.parse().ok())
                    .unwrap_or(properties.height)
            }
            _ => {}
        }
        Ok(())
    })?;

    Ok(properties)
}

fn parse_mesh<'a, I>(
    lines: &mut I,
    start_line: usize,
    asset_root: &Path,
    materials_by_name: &HashMap<String, MaterialParameter>,
    scene: &mut Scene,
) -> Result<(), LoadError>
where
    I: Iterator<Item = (usize, &'a str)>,
{
    let mut file: Option<PathBuf> = None;
    let mut material: Option<MaterialParameter> = None;

    scan_block(lines, "mesh", start_line, |line, tokens| {
        match tokens[0] {
            "file" => {
                if let Some(path) = tokens.get(1) {
                    file = Some(asset_root.join(path));
                }
            }
            "material" => {
                if let Some(name) = tokens.get(1) {
                    match materials_by_name.get(*name) {
                        Some(found) => material = Some(*found),
                        // recoverable: the mesh keeps rendering with the
                        // default material so the index pairing stays intact
                        None => log::warn!("line {}: could not find material {}", line, name),
                    }
                }
            }
            _ => {}
        }
        Ok(())
    })?;

    if let Some(path) = file {
        scene.mesh_files.push(path);
        scene.transforms.push(Mat4::IDENTITY);
        scene.materials.push(material.unwrap_or_default());
    } else {
        log::warn!("line {}: mesh block without a `file`", start_line);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(text: &str) -> Scene {
        parse(text, Path::new("data")).expect("scene should parse")
    }

    #[test]
    fn empty_material_block_gets_defaults() {
        let scene = parse_ok(
            "material foo {\n}\nmesh {\n file box.stl\n material foo\n}\n",
        );

        let m = scene.materials[0];
        assert_eq!(m.color, Vec3A::ZERO);
        assert_eq!(m.emission, Vec3A::ZERO);
        assert_eq!(m.metallic, 0.0);
        assert_eq!(m.subsurface, 0.0);
        assert_eq!(m.specular, 0.5);
        assert_eq!(m.roughness, 0.5);
        assert_eq!(m.specular_tint, 0.0);
        assert_eq!(m.anisotropic, 0.0);
        assert_eq!(m.sheen, 0.0);
        assert_eq!(m.sheen_tint, 0.5);
        assert_eq!(m.clearcoat, 0.0);
        assert_eq!(m.clearcoat_gloss, 1.0);
        assert_eq!(m.brdf, BrdfKind::Disney);
        assert_eq!(m.albedo_tex, None);
    }

    #[test]
    fn material_fields_and_brdf_are_read() {
        let scene = parse_ok(
            "material glass {\n color 0.9 0.9 1.0\n roughness 0.1\n brdf 1\n}\n\
             mesh {\n file ball.stl\n material glass\n}\n",
        );

        let m = scene.materials[0];
        assert_eq!(m.color, vec3a(0.9, 0.9, 1.0));
        assert_eq!(m.roughness, 0.1);
        assert_eq!(m.brdf, BrdfKind::Glass);
    }

    #[test]
    fn unknown_brdf_is_rejected() {
        let err = parse("material bad {\n brdf 7\n}\n", Path::new("")).unwrap_err();
        assert!(matches!(err, LoadError::UnknownBrdf { value: 7, .. }));
    }

    #[test]
    fn quad_light_derives_edges_area_and_normal() {
        let scene = parse_ok(
            "light {\n position 0 0 0\n u 1 0 0\n v 0 0 1\n emission 5 5 5\n type 1\n}\n",
        );

        let light = scene.lights[0];
        assert_eq!(light.kind, LightKind::Quad);
        assert_eq!(light.u, vec3a(1.0, 0.0, 0.0));
        assert_eq!(light.v, vec3a(0.0, 0.0, 1.0));
        assert!((light.area - 1.0).abs() < 1e-6);
        // cross((1,0,0), (0,0,1)) points down in a right-handed basis
        assert_eq!(light.normal, vec3a(0.0, -1.0, 0.0));
    }

    #[test]
    fn sphere_light_area_is_four_pi_r_squared() {
        let scene = parse_ok(
            "light {\n position 1 2 3\n radius 2\n normal 0 3 0\n type 0\n}\n",
        );

        let light = scene.lights[0];
        assert_eq!(light.kind, LightKind::Sphere);
        assert!((light.area - 50.26548).abs() < 1e-3);
        assert_eq!(light.normal, vec3a(0.0, 1.0, 0.0));
    }

    #[test]
    fn light_without_type_is_an_error() {
        let err = parse(
            "light {\n position 0 0 0\n radius 1\n}\n",
            Path::new(""),
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::MissingLightType { line: 1 }));
    }

    #[test]
    fn unterminated_block_is_reported() {
        let err = parse("material foo {\n color 1 1 1\n", Path::new("")).unwrap_err();
        assert!(matches!(
            err,
            LoadError::UnterminatedBlock {
                block: "material",
                line: 1
            }
        ));
    }

    #[test]
    fn meshes_and_materials_stay_index_aligned() {
        let scene = parse_ok(
            "material red {\n color 1 0 0\n}\n\
             material blue {\n color 0 0 1\n}\n\
             mesh {\n file a.stl\n material red\n}\n\
             mesh {\n file b.stl\n material missing\n}\n\
             mesh {\n file c.stl\n material blue\n}\n",
        );

        assert_eq!(scene.mesh_files.len(), 3);
        assert_eq!(scene.materials.len(), 3);
        assert_eq!(scene.transforms.len(), 3);
        assert_eq!(scene.materials[0].color, vec3a(1.0, 0.0, 0.0));
        // undefined reference falls back to the default material
        assert_eq!(scene.materials[1], MaterialParameter::default());
        assert_eq!(scene.materials[2].color, vec3a(0.0, 0.0, 1.0));
        assert_eq!(scene.mesh_files[0], PathBuf::from("data").join("a.stl"));
    }

    #[test]
    fn shared_albedo_texture_is_loaded_once() {
        let scene = parse_ok(
            "material a {\n albedoTex wood.png\n}\n\
             material b {\n albedoTex wood.png\n}\n\
             material c {\n albedoTex stone.png\n}\n\
             mesh {\n file a.stl\n material a\n}\n\
             mesh {\n file b.stl\n material b\n}\n\
             mesh {\n file c.stl\n material c\n}\n",
        );

        assert_eq!(scene.textures.len(), 2);
        assert_eq!(scene.materials[0].albedo_tex, Some(0));
        assert_eq!(scene.materials[1].albedo_tex, Some(0));
        assert_eq!(scene.materials[2].albedo_tex, Some(1));
    }

    #[test]
    fn properties_default_when_fields_are_omitted() {
        let scene = parse_ok("properties {\n}\n");
        assert_eq!(scene.properties.width, 1280);
        assert_eq!(scene.properties.height, 720);

        let scene = parse_ok("properties {\n width 640\n height 480\n}\n");
        assert_eq!(scene.properties.width, 640);
        assert_eq!(scene.properties.height, 480);
    }

    #[test]
    fn comments_and_unknown_keys_are_ignored() {
        let scene = parse_ok(
            "# a scene\nmaterial foo {\n # inline note\n shininess 3\n color 0.5 0.5 0.5\n}\n\
             mesh {\n file a.stl\n material foo\n}\n",
        );
        assert_eq!(scene.materials[0].color, Vec3A::splat(0.5));
    }

    #[test]
    fn ad_hoc_scene_from_mesh_args() {
        let scene = Scene::from_mesh_files(&[PathBuf::from("a.stl"), PathBuf::from("b.stl")]);
        assert_eq!(scene.mesh_files.len(), 2);
        assert_eq!(scene.materials.len(), 2);
        assert!(scene.lights.is_empty());
    }
}
