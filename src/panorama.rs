// panorama.rs - 全景纹理: 按名称加载照片, 解码, 等距柱状 (equirect) 映射
//
// U = (yaw + 180) / 360   水平循环 (U=0 与 U=1 无缝衔接)
// V = (90 - pitch) / 180  垂直夹取

use glam::{Vec2, Vec3};
use image::io::Reader as ImageReader;
use image::{GenericImageView, Rgba, RgbaImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::config::{Geometry, RenderConfig};
use crate::error::ViewError;

pub const EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

pub fn equirect_uv(yaw_deg: f32, pitch_deg: f32) -> Vec2 {
    Vec2::new(
        ((yaw_deg + 180.0) / 360.0).rem_euclid(1.0),
        ((90.0 - pitch_deg) / 180.0).clamp(0.0, 1.0),
    )
}

pub fn direction_uv(dir: Vec3, geometry: Geometry, cylinder_half_height_deg: f32) -> Vec2 {
    let horizontal = (dir.x * dir.x + dir.z * dir.z).sqrt();
    let yaw = dir.x.atan2(-dir.z).to_degrees();

    match geometry {
        Geometry::Sphere => {
            let pitch = dir.y.atan2(horizontal).to_degrees();
            equirect_uv(yaw, pitch)
        }
        Geometry::Cylinder => {
            let u = equirect_uv(yaw, 0.0).x;
            let v = if horizontal <= f32::EPSILON {
                if dir.y > 0.0 { 0.0 } else { 1.0 }
            } else {
                let half = cylinder_half_height_deg.to_radians().tan();
                (0.5 - (dir.y / horizontal) / (2.0 * half)).clamp(0.0, 1.0)
            };
            Vec2::new(u, v)
        }
    }
}

pub trait PhotoLibrary {
    fn resolve(&self, photo: &str) -> std::io::Result<Vec<u8>>;
}

/// Looks for `<root>/<photo>` and `<root>/<photo>.<ext>` in each root in order.
#[derive(Debug, Clone)]
pub struct DirectoryLibrary {
    roots: Vec<PathBuf>,
}

impl DirectoryLibrary {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            roots: roots.into_iter().collect(),
        }
    }

    fn candidates(&self, photo: &str) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        let direct = Path::new(photo);
        if direct.is_absolute() {
            candidates.push(direct.to_owned());
        }
        for root in &self.roots {
            candidates.push(root.join(photo));
            for ext in EXTENSIONS {
                candidates.push(root.join(format!("{photo}.{ext}")));
            }
        }
        candidates
    }
}

impl PhotoLibrary for DirectoryLibrary {
    fn resolve(&self, photo: &str) -> std::io::Result<Vec<u8>> {
        for path in self.candidates(photo) {
            if path.is_file() {
                log::debug!("Resolved photo '{}' to {:?}", photo, path);
                return std::fs::read(&path);
            }
        }
        Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no image named '{photo}' in {:?}", self.roots),
        ))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryLibrary {
    assets: HashMap<String, Vec<u8>>,
}

impl MemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, photo: impl Into<String>, bytes: Vec<u8>) {
        self.assets.insert(photo.into(), bytes);
    }
}

impl PhotoLibrary for MemoryLibrary {
    fn resolve(&self, photo: &str) -> std::io::Result<Vec<u8>> {
        self.assets.get(photo).cloned().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("no image named '{photo}'"))
        })
    }
}

#[derive(Debug, Clone)]
pub struct PanoramaTexture {
    photo: String,
    image: RgbaImage,
}

impl PanoramaTexture {
    /// Resolve and decode `photo`. Any failure becomes [`ViewError::TextureLoadFailed`].
    pub fn load(
        photo: &str,
        library: &dyn PhotoLibrary,
        config: &RenderConfig,
    ) -> Result<Self, ViewError> {
        let failed = |reason: String| ViewError::TextureLoadFailed {
            photo: photo.to_owned(),
            reason,
        };

        let bytes = library.resolve(photo).map_err(|e| failed(e.to_string()))?;
        let image = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(image::ImageError::IoError)
            .and_then(|mut r| {
                r.no_limits();
                r.decode()
            })
            .map_err(|e| failed(e.to_string()))?;

        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(failed("image is empty".to_owned()));
        }
        log::info!("Loaded panorama '{}' ({}x{})", photo, w, h);

        Ok(Self::from_image(photo, image.to_rgba8(), config))
    }

    pub fn from_image(photo: &str, img: RgbaImage, config: &RenderConfig) -> Self {
        let max = config.max_texture_dimension;
        let (src_w, src_h) = img.dimensions();

        // 超过 GPU 纹理尺寸上限时等比缩小
        let img = if src_w > max || src_h > max {
            let scale = (max as f32 / src_w.max(src_h) as f32).min(1.0);
            let new_w = ((src_w as f32 * scale) as u32).max(1);
            let new_h = ((src_h as f32 * scale) as u32).max(1);
            log::warn!(
                "Panorama {}x{} exceeds max texture size {}, scaled to {}x{}",
                src_w, src_h, max, new_w, new_h
            );
            image::DynamicImage::ImageRgba8(img)
                .resize(new_w, new_h, image::imageops::FilterType::Lanczos3)
                .to_rgba8()
        } else {
            img
        };

        // 兼容非 2:1 图片: 高度不足 width/2 时在顶部补黑, 原图贴到底部,
        // 这样每一行仍对应正确的纬度
        let (src_w, src_h) = img.dimensions();
        let target_h = src_w / 2;
        let img = if config.pad_to_two_to_one && target_h > 0 && src_h < target_h {
            let mut canvas = RgbaImage::from_pixel(src_w, target_h, Rgba([0, 0, 0, 255]));
            let y_offset = target_h - src_h;
            image::imageops::overlay(&mut canvas, &img, 0, y_offset as i64);
            log::debug!("Padded panorama from {}x{} to {}x{}", src_w, src_h, src_w, target_h);
            canvas
        } else {
            img
        };

        Self {
            photo: photo.to_owned(),
            image: img,
        }
    }

    pub fn photo(&self) -> &str {
        &self.photo
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    // 双线性采样: U 循环, V 夹取
    pub fn sample(&self, uv: Vec2) -> [u8; 4] {
        let (w, h) = self.image.dimensions();
        let x = uv.x.rem_euclid(1.0) * w as f32 - 0.5;
        let y = uv.y.clamp(0.0, 1.0) * h as f32 - 0.5;

        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;

        let wrap_x = |i: f32| (i as i64).rem_euclid(w as i64) as u32;
        let clamp_y = |j: f32| (j as i64).clamp(0, h as i64 - 1) as u32;

        let (xa, xb) = (wrap_x(x0), wrap_x(x0 + 1.0));
        let (ya, yb) = (clamp_y(y0), clamp_y(y0 + 1.0));

        let p = |px: u32, py: u32| self.image.get_pixel(px, py).0;
        let (p00, p10, p01, p11) = (p(xa, ya), p(xb, ya), p(xa, yb), p(xb, yb));

        let mut out = [0u8; 4];
        for c in 0..4 {
            let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
            let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
            out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
        }
        out
    }
}
