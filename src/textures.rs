//! Image transfer between the host and the renderer.
//!
//! Exported images are cached process-wide, keyed by host image name and
//! destination, so an image referenced by many materials is written once.
//! The host clears the cache when a new file is loaded.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::{Context, Result, anyhow, bail};
use image::{DynamicImage, ImageBuffer, Rgb, Rgba};
use log::debug;

use crate::color::{clamp01, linear_to_srgb_channel};
use crate::host::{Image, ImageFormat, ImageSource};
use crate::props::sanitize_id;

/// Where an exported image lives.
#[derive(Debug, Clone)]
pub enum TexturePayload {
    /// Decoded pixels handed to an in-process renderer.
    Bitmap(Arc<DynamicImage>),
    /// Path relative to the export directory.
    Filename(String),
}

impl TexturePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            TexturePayload::Bitmap(_) => "bitmap",
            TexturePayload::Filename(_) => "filename",
        }
    }
}

/// Destination of an image export.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    InMemory,
    Directory(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TextureKey {
    image: String,
    target: TextureTarget,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<TextureKey, TexturePayload>,
    written: HashSet<PathBuf>,
}

/// Thread-safe, clone-friendly cache of exported images.
#[derive(Debug, Clone, Default)]
pub struct TextureCache {
    inner: Arc<Mutex<CacheState>>,
}

impl TextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: &TextureKey) -> Option<TexturePayload> {
        let state = self.inner.lock().ok()?;
        state.entries.get(key).cloned()
    }

    fn insert(&self, key: TextureKey, payload: TexturePayload) {
        let Ok(mut state) = self.inner.lock() else {
            return;
        };
        state.entries.entry(key).or_insert(payload);
    }

    /// Claim an output path, suffixing `-001`, `-002`, ... when another image
    /// already wrote to it.
    fn claim_path(&self, dir: &Path, stem: &str, ext: &str) -> PathBuf {
        let first = dir.join(format!("{stem}.{ext}"));
        let Ok(mut state) = self.inner.lock() else {
            return first;
        };
        let mut path = first;
        let mut n = 0;
        while state.written.contains(&path) {
            n += 1;
            path = dir.join(format!("{stem}-{n:03}.{ext}"));
        }
        state.written.insert(path.clone());
        path
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut state) = self.inner.lock() {
            state.entries.clear();
            state.written.clear();
        }
    }
}

static TEXTURE_CACHE: OnceLock<TextureCache> = OnceLock::new();

pub fn texture_cache() -> &'static TextureCache {
    TEXTURE_CACHE.get_or_init(TextureCache::new)
}

/// Host file-load hook.
pub fn clear_texture_cache() {
    if let Some(cache) = TEXTURE_CACHE.get() {
        cache.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conversion {
    None,
    ToExr,
    ToPng,
}

/// Output extension for a host image format, and whether the pixels have to
/// be re-encoded to get there.
fn output_format(format: ImageFormat) -> (&'static str, Conversion) {
    match format {
        ImageFormat::Bmp => ("bmp", Conversion::None),
        ImageFormat::Hdr => ("hdr", Conversion::None),
        ImageFormat::Jpeg | ImageFormat::Jpeg2000 => ("jpg", Conversion::None),
        ImageFormat::Png => ("png", Conversion::None),
        ImageFormat::OpenExr | ImageFormat::OpenExrMultilayer => ("exr", Conversion::None),
        ImageFormat::Targa | ImageFormat::TargaRaw => ("tga", Conversion::None),
        ImageFormat::Cineon | ImageFormat::Dpx => ("exr", Conversion::ToExr),
        ImageFormat::Tiff | ImageFormat::Iris => ("png", Conversion::ToPng),
    }
}

pub fn output_extension(format: ImageFormat) -> &'static str {
    output_format(format).0
}

/// Resolve a host image path. Host-relative paths start with `//`.
pub fn resolve_image_path(filepath: &str, source_dir: &Path) -> PathBuf {
    let trimmed = filepath.strip_prefix("//").unwrap_or(filepath);
    let p = PathBuf::from(trimmed);
    if p.is_absolute() { p } else { source_dir.join(p) }
}

/// Export a host image once per destination and return where it went.
///
/// `suffix` distinguishes several exports of one image (UDIM tiles).
pub fn export_and_cache_texture(
    cache: &TextureCache,
    image: &Image,
    target: &TextureTarget,
    source_dir: &Path,
    suffix: Option<&str>,
) -> Result<TexturePayload> {
    let key = TextureKey {
        image: match suffix {
            Some(s) => format!("{}{s}", image.name),
            None => image.name.clone(),
        },
        target: target.clone(),
    };
    if let Some(hit) = cache.get(&key) {
        return Ok(hit);
    }

    let payload = match target {
        TextureTarget::InMemory => {
            let pixels = load_pixels(image, source_dir, suffix)?;
            TexturePayload::Bitmap(Arc::new(pixels))
        }
        TextureTarget::Directory(dir) => {
            let rel = write_texture(cache, image, dir, source_dir, suffix)?;
            TexturePayload::Filename(rel)
        }
    };
    debug!("exported image '{}' as {}", image.name, payload.kind());
    cache.insert(key, payload.clone());
    Ok(payload)
}

fn source_path(image: &Image, source_dir: &Path, suffix: Option<&str>) -> Option<PathBuf> {
    let filepath = image.filepath.as_deref()?;
    let filepath = match (image.source, suffix) {
        (ImageSource::Tiled, Some(tile)) => filepath.replace("<UDIM>", tile.trim_start_matches('.')),
        _ => filepath.to_string(),
    };
    Some(resolve_image_path(&filepath, source_dir))
}

fn load_pixels(image: &Image, source_dir: &Path, suffix: Option<&str>) -> Result<DynamicImage> {
    if let Some(pixels) = &image.pixels {
        return pixels_to_image(image, pixels);
    }
    let path = source_path(image, source_dir, suffix)
        .ok_or_else(|| anyhow!("image '{}' has neither a file nor pixels", image.name))?;
    image::open(&path).with_context(|| format!("failed to load image {}", path.display()))
}

/// Host pixel buffers are linear float RGBA with the bottom row first.
fn pixels_to_image(image: &Image, pixels: &[f32]) -> Result<DynamicImage> {
    let [w, h] = image.size;
    if w == 0 || h == 0 {
        bail!("image '{}' has no pixels", image.name);
    }
    let expected = w as usize * h as usize * 4;
    if pixels.len() != expected {
        bail!(
            "image '{}' has {} pixel values, expected {expected} for {w}x{h} RGBA",
            image.name,
            pixels.len()
        );
    }
    let mut flipped = Vec::with_capacity(expected);
    for row in pixels.chunks_exact(w as usize * 4).rev() {
        flipped.extend_from_slice(row);
    }
    let buf = ImageBuffer::<Rgba<f32>, _>::from_raw(w, h, flipped)
        .ok_or_else(|| anyhow!("image '{}' has an invalid pixel buffer", image.name))?;
    Ok(DynamicImage::ImageRgba32F(buf))
}

/// 8-bit sRGB-encoded RGB, the encoding used for converted PNGs.
fn to_srgb8(img: &DynamicImage, raw: bool) -> DynamicImage {
    let rgb = img.to_rgb32f();
    let (w, h) = rgb.dimensions();
    let out = ImageBuffer::from_fn(w, h, |x, y| {
        let p = rgb.get_pixel(x, y);
        let encode = |c: f32| {
            let c = if raw { c } else { linear_to_srgb_channel(c) };
            (clamp01(c) * 255.0).round() as u8
        };
        Rgb([encode(p[0]), encode(p[1]), encode(p[2])])
    });
    DynamicImage::ImageRgb8(out)
}

fn write_texture(
    cache: &TextureCache,
    image: &Image,
    dir: &Path,
    source_dir: &Path,
    suffix: Option<&str>,
) -> Result<String> {
    let (ext, conversion) = output_format(image.file_format);
    let tex_dir = dir.join("textures");
    std::fs::create_dir_all(&tex_dir)
        .with_context(|| format!("failed to create {}", tex_dir.display()))?;

    let stem = format!("{}{}", sanitize_id(&image.name), suffix.unwrap_or(""));
    let out = cache.claim_path(&tex_dir, &stem, ext);
    let source = source_path(image, source_dir, suffix);

    match (conversion, &image.pixels, source) {
        (Conversion::None, None, Some(src)) => {
            std::fs::copy(&src, &out).with_context(|| {
                format!("failed to copy image {} to {}", src.display(), out.display())
            })?;
        }
        (conversion, _, _) => {
            let pixels = load_pixels(image, source_dir, suffix)?;
            let encoded = match conversion {
                Conversion::ToPng => to_srgb8(&pixels, image.is_raw()),
                Conversion::ToExr => DynamicImage::ImageRgba32F(pixels.to_rgba32f()),
                Conversion::None => match ext {
                    "exr" => DynamicImage::ImageRgba32F(pixels.to_rgba32f()),
                    "hdr" => DynamicImage::ImageRgb32F(pixels.to_rgb32f()),
                    _ => to_srgb8(&pixels, image.is_raw()),
                },
            };
            encoded
                .save(&out)
                .with_context(|| format!("failed to write image {}", out.display()))?;
        }
    }

    let file_name = out
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("invalid texture file name {}", out.display()))?;
    Ok(format!("textures/{file_name}"))
}
