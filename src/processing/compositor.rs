use std::io::Cursor;
use std::sync::Arc;

use fast_image_resize as fir;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbaImage, imageops};
use screen_config::{FlipState, ResampleFilter, SurfaceSize};
use tracing::debug;

use crate::decode::ImageSource;
use crate::error::CompositeError;
use crate::processing::layout::{CoverPlacement, cover_placement};

/// Fixed-size RGBA8 raster that becomes the screen texture.
///
/// The surface keeps no drawing state between calls: every composite starts
/// from a cleared buffer and a fresh resampler.
#[derive(Debug, Clone)]
pub struct WorkingSurface {
    image: RgbaImage,
    filter: ResampleFilter,
}

impl WorkingSurface {
    pub fn new(size: SurfaceSize, filter: ResampleFilter) -> Self {
        Self {
            image: RgbaImage::new(size.width, size.height),
            filter,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.image
    }

    /// Reset every pixel to transparent black.
    pub fn clear(&mut self) {
        self.image.fill(0);
    }

    pub fn is_blank(&self) -> bool {
        self.image.as_raw().iter().all(|&b| b == 0)
    }

    /// Draw `source` with a centered cover fit, then apply `flip`.
    ///
    /// Mirroring the finished surface about a midline is the same as mirroring
    /// the draw transform, because the placement is symmetric about both
    /// midlines.
    pub fn composite_cover(
        &mut self,
        source: &ImageSource,
        flip: FlipState,
    ) -> Result<CoverPlacement, CompositeError> {
        let (src_w, src_h) = (source.width(), source.height());
        let placement = cover_placement(self.width(), self.height(), src_w, src_h)
            .ok_or(CompositeError::EmptySource {
                width: src_w,
                height: src_h,
            })?;

        self.clear();

        let (left, top, crop_w, crop_h) = placement.visible_source_rect(src_w, src_h);
        let src_view = fir::images::ImageRef::new(
            src_w,
            src_h,
            source.as_rgba().as_raw(),
            fir::PixelType::U8x4,
        )?;
        let options = fir::ResizeOptions::new()
            .resize_alg(resize_alg(self.filter))
            .crop(left, top, crop_w, crop_h);
        {
            let (dst_w, dst_h) = (self.width(), self.height());
            let dst_buf: &mut [u8] = &mut self.image;
            let mut dst =
                fir::images::Image::from_slice_u8(dst_w, dst_h, dst_buf, fir::PixelType::U8x4)?;
            fir::Resizer::new().resize(&src_view, &mut dst, Some(&options))?;
        }

        if flip.mirror_horizontal {
            imageops::flip_horizontal_in_place(&mut self.image);
        }
        if flip.flip_vertical {
            imageops::flip_vertical_in_place(&mut self.image);
        }

        debug!(
            src_w,
            src_h,
            scale = placement.scale,
            offset_x = placement.offset_x,
            offset_y = placement.offset_y,
            mirror = flip.mirror_horizontal,
            flip = flip.flip_vertical,
            "composited cover"
        );
        Ok(placement)
    }

    /// Copy of the current content, detached from further surface writes.
    pub fn snapshot(&self) -> SurfaceSnapshot {
        SurfaceSnapshot {
            width: self.width(),
            height: self.height(),
            pixels: Arc::from(self.image.as_raw().as_slice()),
        }
    }
}

fn resize_alg(filter: ResampleFilter) -> fir::ResizeAlg {
    match filter {
        ResampleFilter::Nearest => fir::ResizeAlg::Nearest,
        ResampleFilter::Bilinear => fir::ResizeAlg::Convolution(fir::FilterType::Bilinear),
        ResampleFilter::CatmullRom => fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom),
        ResampleFilter::Lanczos3 => fir::ResizeAlg::Convolution(fir::FilterType::Lanczos3),
    }
}

/// Immutable RGBA8 copy of the working surface at bind time.
#[derive(Debug, Clone)]
pub struct SurfaceSnapshot {
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
}

impl SurfaceSnapshot {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &Arc<[u8]> {
        &self.pixels
    }

    pub fn to_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.pixels.to_vec())
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut out = Cursor::new(Vec::new());
        PngEncoder::new(&mut out).write_image(
            &self.pixels,
            self.width,
            self.height,
            ExtendedColorType::Rgba8,
        )?;
        Ok(out.into_inner())
    }
}
