// renderer.rs - 全景渲染核心: 生成每帧的绘制指令交给后端 (GPU 或 CPU)
//
// 纹理被视为贴在以相机为中心的球面 (或圆柱面) 上.
// 每个像素的射线: camera.rotation * normalize(ndc.x * tan(hfov/2), ndc.y * tan(vfov/2), -1)

use glam::{Mat4, Quat, Vec2, Vec3};
use image::{Rgba, RgbaImage};

use crate::camera::{CameraTransform, Viewport};
use crate::config::{Geometry, RenderConfig};
use crate::error::{RenderError, ViewError};
use crate::panorama::{direction_uv, PanoramaTexture, PhotoLibrary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameContent {
    Panorama,
    Placeholder,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawInstruction {
    pub view_projection: Mat4,
    // camera -> world
    pub rotation: Quat,
    pub tan_half_fov: Vec2,
    pub geometry: Geometry,
    pub cylinder_half_height_deg: f32,
    pub content: FrameContent,
    pub viewport: Viewport,
}

impl DrawInstruction {
    pub fn ray(&self, ndc: Vec2) -> Vec3 {
        let local = Vec3::new(ndc.x * self.tan_half_fov.x, ndc.y * self.tan_half_fov.y, -1.0);
        self.rotation * local.normalize()
    }

    pub fn uv_at_ndc(&self, ndc: Vec2) -> Vec2 {
        direction_uv(self.ray(ndc), self.geometry, self.cylinder_half_height_deg)
    }
}

// 纹理缺失时的棋盘格, 与 shader 一致
pub fn placeholder_color(uv: Vec2) -> [u8; 4] {
    let cx = (uv.x * 16.0).floor() as i32;
    let cy = (uv.y * 8.0).floor() as i32;
    let g = if (cx + cy).rem_euclid(2) == 1 { 160 } else { 96 };
    [g, g, g, 255]
}

pub trait RenderBackend {
    fn upload_texture(&mut self, texture: &PanoramaTexture) -> Result<(), RenderError>;

    fn release_texture(&mut self);

    fn resize(&mut self, _viewport: Viewport) {}

    fn draw(&mut self, frame: &DrawInstruction) -> Result<(), RenderError>;
}

pub struct PanoramaRenderer {
    config: RenderConfig,
    texture: Option<PanoramaTexture>,
    frames: u64,
}

impl PanoramaRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            texture: None,
            frames: 0,
        }
    }

    pub fn has_texture(&self) -> bool {
        self.texture.is_some()
    }

    pub fn texture(&self) -> Option<&PanoramaTexture> {
        self.texture.as_ref()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Load `photo` and hand it to the backend. On failure the renderer keeps
    /// drawing the placeholder and the error is returned for reporting.
    pub fn load<B: RenderBackend + ?Sized>(
        &mut self,
        photo: &str,
        library: &dyn PhotoLibrary,
        backend: &mut B,
    ) -> Result<(), ViewError> {
        self.release(backend);

        let texture = PanoramaTexture::load(photo, library, &self.config)?;
        backend
            .upload_texture(&texture)
            .map_err(|e| ViewError::TextureLoadFailed {
                photo: photo.to_owned(),
                reason: e.to_string(),
            })?;
        self.texture = Some(texture);
        Ok(())
    }

    pub fn release<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) {
        if self.texture.take().is_some() {
            backend.release_texture();
        }
    }

    pub fn instruction(&self, camera: &CameraTransform, viewport: Viewport) -> DrawInstruction {
        let tan_v = (camera.fov_y_deg.to_radians() / 2.0).tan();
        DrawInstruction {
            view_projection: camera.view_projection,
            rotation: camera.rotation,
            tan_half_fov: Vec2::new(tan_v * camera.aspect, tan_v),
            geometry: self.config.geometry,
            cylinder_half_height_deg: self.config.cylinder_half_height_deg,
            content: if self.texture.is_some() {
                FrameContent::Panorama
            } else {
                FrameContent::Placeholder
            },
            viewport,
        }
    }

    pub fn uv_at_ndc(&self, camera: &CameraTransform, ndc: Vec2) -> Vec2 {
        self.instruction(camera, Viewport::new(1, 1)).uv_at_ndc(ndc)
    }

    pub fn render<B: RenderBackend + ?Sized>(
        &mut self,
        camera: &CameraTransform,
        viewport: Viewport,
        backend: &mut B,
    ) -> Result<(), RenderError> {
        let frame = self.instruction(camera, viewport);
        backend.draw(&frame)?;
        self.frames += 1;
        Ok(())
    }
}

// CPU 光线投射, 与 GPU shader 同一套公式
#[derive(Default)]
pub struct SoftwareBackend {
    texture: Option<PanoramaTexture>,
    frame: Option<RgbaImage>,
    last: Option<DrawInstruction>,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame(&self) -> Option<&RgbaImage> {
        self.frame.as_ref()
    }

    pub fn last_instruction(&self) -> Option<&DrawInstruction> {
        self.last.as_ref()
    }

    pub fn has_texture(&self) -> bool {
        self.texture.is_some()
    }
}

impl RenderBackend for SoftwareBackend {
    fn upload_texture(&mut self, texture: &PanoramaTexture) -> Result<(), RenderError> {
        self.texture = Some(texture.clone());
        Ok(())
    }

    fn release_texture(&mut self) {
        self.texture = None;
    }

    fn draw(&mut self, frame: &DrawInstruction) -> Result<(), RenderError> {
        let Viewport { width, height } = frame.viewport;
        if width == 0 || height == 0 {
            return Err(RenderError::SurfaceLost);
        }

        let mut image = RgbaImage::new(width, height);
        for (px, py, pixel) in image.enumerate_pixels_mut() {
            let ndc = Vec2::new(
                (px as f32 + 0.5) / width as f32 * 2.0 - 1.0,
                1.0 - (py as f32 + 0.5) / height as f32 * 2.0,
            );
            let uv = frame.uv_at_ndc(ndc);
            let color = match (&self.texture, frame.content) {
                (Some(texture), FrameContent::Panorama) => texture.sample(uv),
                _ => placeholder_color(uv),
            };
            *pixel = Rgba(color);
        }

        self.frame = Some(image);
        self.last = Some(*frame);
        Ok(())
    }
}
