//! Viewport state and coordinate math.
//!
//! The viewport is described by a page-space center point and a scale in
//! physical pixels per page unit. Input coordinates from the UI are logical
//! pixels and are converted through the device pixel ratio at the edges.

/// Viewport state for a single page.
#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    /// Page size in page units.
    pub page_width: f64,
    pub page_height: f64,
    /// Page point currently at the viewport center.
    pub center_x: f64,
    pub center_y: f64,
    /// Physical pixels per page unit.
    pub scale: f64,
    /// Scale at which the whole page fits the viewport.
    pub fit_scale: f64,
    /// Device pixel ratio (logical → physical), clamped to >= 1.
    pub dpr: f64,
    pub logical_width: f64,
    pub logical_height: f64,
    /// Physical viewport size: `floor(logical * dpr)`.
    pub pixel_width: u32,
    pub pixel_height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            page_width: 0.0,
            page_height: 0.0,
            center_x: 0.0,
            center_y: 0.0,
            scale: 1.0,
            fit_scale: 1.0,
            dpr: 1.0,
            logical_width: 0.0,
            logical_height: 0.0,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

impl Viewport {
    /// Update the viewport size from logical dimensions and a DPR.
    /// Returns the resulting physical pixel size.
    pub fn set_size(&mut self, logical_width: f64, logical_height: f64, dpr: f64) -> (u32, u32) {
        self.dpr = dpr.max(1.0);
        self.logical_width = logical_width.max(1.0);
        self.logical_height = logical_height.max(1.0);
        self.pixel_width = (self.logical_width * self.dpr).floor() as u32;
        self.pixel_height = (self.logical_height * self.dpr).floor() as u32;
        (self.pixel_width, self.pixel_height)
    }

    pub fn set_page_size(&mut self, width: f64, height: f64) {
        self.page_width = width;
        self.page_height = height;
    }

    pub fn has_page(&self) -> bool {
        self.page_width > 0.0 && self.page_height > 0.0
    }

    pub fn has_pixels(&self) -> bool {
        self.pixel_width > 0 && self.pixel_height > 0
    }

    /// Fit the page entirely into the viewport and center it.
    /// No-op (returning false) until both page and viewport have size.
    pub fn fit_page(&mut self) -> bool {
        if !self.has_page() || !self.has_pixels() {
            return false;
        }

        let scale_x = self.pixel_width as f64 / self.page_width;
        let scale_y = self.pixel_height as f64 / self.page_height;
        self.fit_scale = scale_x.min(scale_y);
        self.scale = self.fit_scale;
        self.center_x = self.page_width / 2.0;
        self.center_y = self.page_height / 2.0;
        true
    }

    /// Map a physical-pixel viewport point to page coordinates.
    pub fn screen_to_page(&self, x_px: f64, y_px: f64) -> (f64, f64) {
        if self.scale == 0.0 {
            return (0.0, 0.0);
        }
        (
            self.center_x + (x_px - self.pixel_width as f64 / 2.0) / self.scale,
            self.center_y + (y_px - self.pixel_height as f64 / 2.0) / self.scale,
        )
    }

    /// Pan by a logical-pixel delta (page moves with the gesture).
    pub fn pan_by(&mut self, dx_logical: f64, dy_logical: f64) -> bool {
        if self.scale == 0.0 {
            return false;
        }
        self.center_x -= dx_logical * self.dpr / self.scale;
        self.center_y -= dy_logical * self.dpr / self.scale;
        true
    }

    /// Zoom by `factor`, keeping the page point under the logical-pixel
    /// anchor fixed on screen. Rejects non-positive factors.
    pub fn zoom_at(&mut self, factor: f64, anchor_x_logical: f64, anchor_y_logical: f64) -> bool {
        if factor <= 0.0 || self.scale == 0.0 {
            return false;
        }

        let anchor_x_px = anchor_x_logical * self.dpr;
        let anchor_y_px = anchor_y_logical * self.dpr;
        let (page_x, page_y) = self.screen_to_page(anchor_x_px, anchor_y_px);

        self.scale *= factor;
        self.center_x = page_x - (anchor_x_px - self.pixel_width as f64 / 2.0) / self.scale;
        self.center_y = page_y - (anchor_y_px - self.pixel_height as f64 / 2.0) / self.scale;
        true
    }

    /// Zoom relative to the fit scale, in percent.
    pub fn zoom_percent(&self) -> f64 {
        if self.fit_scale == 0.0 {
            return 100.0;
        }
        self.scale / self.fit_scale * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fitted_viewport() -> Viewport {
        // S1: A4-ish page in a 1200x800 viewport.
        let mut viewport = Viewport::default();
        viewport.set_size(1200.0, 800.0, 1.0);
        viewport.set_page_size(595.0, 842.0);
        assert!(viewport.fit_page());
        viewport
    }

    #[test]
    fn fit_page_uses_the_limiting_axis_and_centers() {
        let viewport = fitted_viewport();

        let expected = 800.0 / 842.0;
        assert!((viewport.fit_scale - expected).abs() < 1e-12);
        assert_eq!(viewport.scale, viewport.fit_scale);
        assert_eq!((viewport.center_x, viewport.center_y), (297.5, 421.0));
        assert!((viewport.zoom_percent() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn fit_page_requires_page_and_viewport() {
        let mut viewport = Viewport::default();
        assert!(!viewport.fit_page());

        viewport.set_page_size(595.0, 842.0);
        assert!(!viewport.fit_page());

        viewport.set_size(1200.0, 800.0, 1.0);
        assert!(viewport.fit_page());
    }

    #[test]
    fn set_size_floors_pixels_and_clamps_inputs() {
        let mut viewport = Viewport::default();

        assert_eq!(viewport.set_size(1000.5, 600.9, 1.25), (1250, 751));
        assert_eq!(viewport.set_size(0.0, -5.0, 0.5), (1, 1));
        assert_eq!(viewport.dpr, 1.0);
    }

    #[test]
    fn pan_converts_logical_to_page_units() {
        let mut viewport = Viewport::default();
        viewport.set_size(500.0, 500.0, 2.0);
        viewport.set_page_size(1000.0, 1000.0);
        viewport.scale = 4.0;
        viewport.center_x = 500.0;
        viewport.center_y = 500.0;

        assert!(viewport.pan_by(10.0, -6.0));
        // 10 logical px * dpr 2 / scale 4 = 5 page units.
        assert_eq!(viewport.center_x, 495.0);
        assert_eq!(viewport.center_y, 503.0);
    }

    #[test]
    fn zoom_anchor_point_stays_fixed() {
        // S2: zooming at the top-left corner keeps that page point there.
        let mut viewport = fitted_viewport();
        let before = viewport.screen_to_page(0.0, 0.0);

        assert!(viewport.zoom_at(2.0, 0.0, 0.0));
        assert!((viewport.scale - 2.0 * viewport.fit_scale).abs() < 1e-12);

        let after = viewport.screen_to_page(0.0, 0.0);
        assert!((after.0 - before.0).abs() < 1e-6);
        assert!((after.1 - before.1).abs() < 1e-6);
    }

    #[test]
    fn zoom_anchor_holds_across_factors_and_anchors() {
        for factor in [0.125, 0.25, 0.5, 0.75, 1.0, 1.5, 2.0, 4.0, 8.0] {
            for anchor in [(0.0, 0.0), (600.0, 400.0), (1199.0, 1.0), (37.5, 777.25)] {
                let mut viewport = fitted_viewport();
                let before = viewport.screen_to_page(anchor.0, anchor.1);

                assert!(viewport.zoom_at(factor, anchor.0, anchor.1));
                let after = viewport.screen_to_page(anchor.0, anchor.1);

                assert!(
                    (after.0 - before.0).abs() < 1e-6 && (after.1 - before.1).abs() < 1e-6,
                    "anchor drifted for factor {factor} at {anchor:?}"
                );
            }
        }
    }

    #[test]
    fn zoom_anchor_respects_dpr() {
        let mut viewport = Viewport::default();
        viewport.set_size(600.0, 400.0, 2.0);
        viewport.set_page_size(595.0, 842.0);
        assert!(viewport.fit_page());

        let before = viewport.screen_to_page(300.0 * 2.0, 100.0 * 2.0);
        assert!(viewport.zoom_at(3.0, 300.0, 100.0));
        let after = viewport.screen_to_page(300.0 * 2.0, 100.0 * 2.0);

        assert!((after.0 - before.0).abs() < 1e-6);
        assert!((after.1 - before.1).abs() < 1e-6);
    }

    #[test]
    fn zoom_rejects_bad_factors() {
        let mut viewport = fitted_viewport();
        let unchanged = viewport.clone();

        assert!(!viewport.zoom_at(0.0, 10.0, 10.0));
        assert!(!viewport.zoom_at(-1.5, 10.0, 10.0));
        assert_eq!(viewport, unchanged);

        viewport.scale = 0.0;
        assert!(!viewport.zoom_at(2.0, 10.0, 10.0));
        assert!(!viewport.pan_by(1.0, 1.0));
    }

    #[test]
    fn zoom_percent_tracks_scale_against_fit() {
        let mut viewport = fitted_viewport();
        assert!(viewport.zoom_at(2.0, 600.0, 400.0));
        assert!((viewport.zoom_percent() - 200.0).abs() < 1e-9);

        viewport.fit_scale = 0.0;
        assert_eq!(viewport.zoom_percent(), 100.0);
    }
}
