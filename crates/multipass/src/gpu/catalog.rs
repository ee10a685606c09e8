use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::backend::{CatalogTexture, TextureCatalog};

use super::{GpuTexture, TextureWrap, WgpuBackend};

/// Decodes an image file into tightly packed RGBA8 rows, top row first.
pub fn decode_texture(path: &Path) -> Result<RgbaImage> {
    let image = image::open(path)
        .with_context(|| format!("failed to open texture at {}", path.display()))?;
    Ok(image.to_rgba8())
}

/// Full mip chain for `base`, from the base level down to 1x1.
///
/// Each level halves both sides (never below 1) with a triangle filter.
pub fn mip_chain(base: &RgbaImage) -> Vec<RgbaImage> {
    let mut levels = vec![base.clone()];
    loop {
        let Some(previous) = levels.last() else { break };
        let (width, height) = previous.dimensions();
        if width <= 1 && height <= 1 {
            break;
        }
        let next = imageops::resize(
            previous,
            (width / 2).max(1),
            (height / 2).max(1),
            FilterType::Triangle,
        );
        levels.push(next);
    }
    levels
}

/// Texture catalog backed by image files uploaded to the GPU.
///
/// Images are uploaded with a full mip chain and sampled with repeat
/// wrapping and trilinear filtering. They are not flipped: row 0 of the
/// file lands at texture v = 0, which is also where `fragCoord.y == 0`
/// sits, so `texture(iChannelN, fragCoord / iResolution.xy)` shows the
/// image upright.
///
/// Entries that fail to load stay in place as holes so indices keep
/// matching the document; channels bound to them sample the placeholder.
#[derive(Default)]
pub struct ImageCatalog {
    entries: Vec<Option<CatalogTexture<GpuTexture>>>,
    paths: Vec<PathBuf>,
}

impl ImageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load<P: AsRef<Path>>(backend: &mut WgpuBackend, paths: &[P]) -> Self {
        let mut catalog = Self::new();
        for path in paths {
            catalog.push_path(backend, path.as_ref());
        }
        catalog
    }

    /// Appends one file. Returns its catalog index.
    pub fn push_path(&mut self, backend: &mut WgpuBackend, path: &Path) -> usize {
        let index = self.entries.len();
        let label = format!("catalog texture #{index}");
        let uploaded = decode_texture(path).and_then(|pixels| {
            let (width, height) = pixels.dimensions();
            let levels = mip_chain(&pixels);
            let texture = backend.upload_texture(&label, &levels, TextureWrap::Repeat)?;
            tracing::debug!(
                index,
                path = %path.display(),
                width,
                height,
                mip_levels = levels.len(),
                "loaded catalog texture"
            );
            Ok(CatalogTexture {
                texture,
                width,
                height,
            })
        });
        let entry = match uploaded {
            Ok(texture) => Some(texture),
            Err(error) => {
                tracing::warn!(
                    index,
                    path = %path.display(),
                    error = %error,
                    "failed to load catalog texture; channel will sample placeholder"
                );
                None
            }
        };
        self.entries.push(entry);
        self.paths.push(path.to_path_buf());
        index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self, index: usize) -> Option<&Path> {
        self.paths.get(index).map(PathBuf::as_path)
    }
}

impl TextureCatalog<GpuTexture> for ImageCatalog {
    fn resolve(&self, index: usize) -> Option<CatalogTexture<GpuTexture>> {
        self.entries.get(index).cloned().flatten()
    }
}
