/// Where a source image lands on a surface under a uniform "cover" scale.
///
/// Coordinates are in surface pixels with a top-left origin. The drawn
/// rectangle always contains the whole surface; overflow is split evenly
/// between both sides of the cropped axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverPlacement {
    pub surface_width: u32,
    pub surface_height: u32,
    pub scale: f64,
    pub draw_width: f64,
    pub draw_height: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl CoverPlacement {
    /// Portion of the source (in source pixels) that ends up on the surface,
    /// as `(left, top, width, height)`, clamped to the source bounds.
    pub fn visible_source_rect(&self, src_w: u32, src_h: u32) -> (f64, f64, f64, f64) {
        let src_w = f64::from(src_w);
        let src_h = f64::from(src_h);
        let left = (-self.offset_x / self.scale).clamp(0.0, src_w);
        let top = (-self.offset_y / self.scale).clamp(0.0, src_h);
        let width = (f64::from(self.surface_width) / self.scale).min(src_w - left);
        let height = (f64::from(self.surface_height) / self.scale).min(src_h - top);
        (left, top, width, height)
    }

    /// Whether the drawn rectangle spans the whole surface.
    pub fn covers_surface(&self, tolerance: f64) -> bool {
        self.offset_x <= tolerance
            && self.offset_y <= tolerance
            && self.offset_x + self.draw_width >= f64::from(self.surface_width) - tolerance
            && self.offset_y + self.draw_height >= f64::from(self.surface_height) - tolerance
    }
}

/// Centered cover fit of a `src_w`x`src_h` image onto a `canvas_w`x`canvas_h`
/// surface. Returns `None` when any dimension is zero.
pub fn cover_placement(
    canvas_w: u32,
    canvas_h: u32,
    src_w: u32,
    src_h: u32,
) -> Option<CoverPlacement> {
    if canvas_w == 0 || canvas_h == 0 || src_w == 0 || src_h == 0 {
        return None;
    }
    let cw = f64::from(canvas_w);
    let ch = f64::from(canvas_h);
    let iw = f64::from(src_w);
    let ih = f64::from(src_h);
    let scale = (cw / iw).max(ch / ih);
    let draw_width = iw * scale;
    let draw_height = ih * scale;
    Some(CoverPlacement {
        surface_width: canvas_w,
        surface_height: canvas_h,
        scale,
        draw_width,
        draw_height,
        offset_x: (cw - draw_width) * 0.5,
        offset_y: (ch - draw_height) * 0.5,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-6
    }

    #[test]
    fn portrait_source_fills_tall_surface_exactly() {
        let p = cover_placement(2048, 4096, 100, 200).unwrap();
        assert!(close(p.scale, 20.48));
        assert!(close(p.draw_width, 2048.0));
        assert!(close(p.draw_height, 4096.0));
        assert!(close(p.offset_x, 0.0));
        assert!(close(p.offset_y, 0.0));
        let (left, top, w, h) = p.visible_source_rect(100, 200);
        assert!(close(left, 0.0) && close(top, 0.0));
        assert!(close(w, 100.0) && close(h, 200.0));
    }

    #[test]
    fn wide_source_is_cropped_horizontally_and_centered() {
        let p = cover_placement(2048, 4096, 4000, 1000).unwrap();
        // height dominates: 4096 / 1000
        assert!(close(p.scale, 4.096));
        assert!(close(p.draw_width, 16384.0));
        assert!(close(p.draw_height, 4096.0));
        assert!(close(p.offset_x, (2048.0 - 16384.0) / 2.0));
        assert!(close(p.offset_y, 0.0));
        let (left, top, w, h) = p.visible_source_rect(4000, 1000);
        assert!(close(w, 500.0));
        assert!(close(h, 1000.0));
        assert!(close(left, 1750.0));
        assert!(close(top, 0.0));
    }

    #[test]
    fn placement_covers_for_assorted_sizes() {
        let surfaces = [(2048, 4096), (1179, 2556), (17, 31)];
        let sources = [(1, 1), (3, 7000), (7000, 3), (1920, 1080), (1179, 2556)];
        for (cw, ch) in surfaces {
            for (iw, ih) in sources {
                let p = cover_placement(cw, ch, iw, ih).unwrap();
                assert!(p.covers_surface(1e-6), "{iw}x{ih} on {cw}x{ch}: {p:?}");
                let expected = (f64::from(cw) / f64::from(iw)).max(f64::from(ch) / f64::from(ih));
                assert!(close(p.scale, expected));
                assert!(close(p.offset_x, (f64::from(cw) - p.draw_width) / 2.0));
                assert!(close(p.offset_y, (f64::from(ch) - p.draw_height) / 2.0));
            }
        }
    }

    #[test]
    fn zero_dimensions_have_no_placement() {
        assert!(cover_placement(2048, 4096, 0, 10).is_none());
        assert!(cover_placement(0, 4096, 10, 10).is_none());
    }
}
