use std::path::{Path, PathBuf};

use image::{ImageBuffer, Rgba};

use crate::geometry::AssetError;

/// One decoded albedo texture, kept on the host for re-upload after a
/// buffer rebuild (resize).
#[derive(Debug, Clone)]
pub struct ImageTexture {
    pub image_buffer: ImageBuffer<Rgba<u8>, Vec<u8>>,
}

impl ImageTexture {
    pub fn from_file(path: &Path) -> Result<ImageTexture, AssetError> {
        let img = image::open(path).map_err(|source| AssetError::Texture {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(ImageTexture {
            image_buffer: img.to_rgba8(),
        })
    }

    pub fn white() -> ImageTexture {
        ImageTexture {
            image_buffer: ImageBuffer::from_pixel(1, 1, Rgba([255, 255, 255, 255])),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image_buffer.dimensions()
    }
}

/// Decodes every texture the scene references. All layers of the array
/// texture must share one size, so a mismatch is an asset error. An
/// untextured scene gets a single white 1x1 layer to keep the binding valid.
pub fn load_all(paths: &[PathBuf]) -> Result<(Vec<ImageTexture>, [u32; 2]), AssetError> {
    if paths.is_empty() {
        return Ok((vec![ImageTexture::white()], [1, 1]));
    }

    let mut textures = Vec::with_capacity(paths.len());
    let mut size: Option<[u32; 2]> = None;

    for path in paths {
        let texture = ImageTexture::from_file(path)?;
        let (width, height) = texture.dimensions();

        match size {
            None => size = Some([width, height]),
            Some([want_width, want_height]) if want_width != width || want_height != height => {
                return Err(AssetError::TextureSize {
                    path: path.clone(),
                    got_width: width,
                    got_height: height,
                    want_width,
                    want_height,
                });
            }
            Some(_) => {}
        }

        textures.push(texture);
    }

    let size = size.expect("at least one texture was decoded");
    Ok((textures, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(name: &str, width: u32, height: u32) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        let pixels = vec![128u8; (width * height * 4) as usize];
        image::save_buffer(
            &path,
            &pixels,
            width,
            height,
            image::ExtendedColorType::Rgba8,
        )
        .unwrap();
        path
    }

    #[test]
    fn untextured_scene_gets_a_white_fallback_layer() {
        let (textures, size) = load_all(&[]).unwrap();
        assert_eq!(textures.len(), 1);
        assert_eq!(size, [1, 1]);
        assert_eq!(
            textures[0].image_buffer.get_pixel(0, 0),
            &Rgba([255, 255, 255, 255])
        );
    }

    #[test]
    fn textures_decode_into_uniform_layers() {
        let a = write_png("gpu_path_tracer_tex_a.png", 4, 4);
        let b = write_png("gpu_path_tracer_tex_b.png", 4, 4);

        let (textures, size) = load_all(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(textures.len(), 2);
        assert_eq!(size, [4, 4]);

        let _ = std::fs::remove_file(a);
        let _ = std::fs::remove_file(b);
    }

    #[test]
    fn size_mismatch_is_an_asset_error() {
        let a = write_png("gpu_path_tracer_tex_c.png", 4, 4);
        let b = write_png("gpu_path_tracer_tex_d.png", 8, 8);

        let err = load_all(&[a.clone(), b.clone()]).unwrap_err();
        assert!(matches!(err, AssetError::TextureSize { .. }));

        let _ = std::fs::remove_file(a);
        let _ = std::fs::remove_file(b);
    }

    #[test]
    fn missing_texture_is_an_asset_error() {
        let err = load_all(&[PathBuf::from("no/such/texture.png")]).unwrap_err();
        assert!(matches!(err, AssetError::Texture { .. }));
    }
}
