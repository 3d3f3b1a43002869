//! World Coordinate System (WCS) for TAN-projected frames.
//!
//! Provides transformations between pixel coordinates and celestial coordinates
//! following the FITS WCS standard. Pixel coordinates are 1-based (FITS
//! convention): the centre of the first pixel is (1, 1).

use glam::DVec2;

use crate::fits::FrameHeader;

/// World Coordinate System of one frame.
///
/// # WCS Model
///
/// 1. Pixel to intermediate: `(xi, eta) = CD × (x - CRPIX1, y - CRPIX2)`
/// 2. Intermediate to sky: de-project from the tangent plane
#[derive(Debug, Clone, PartialEq)]
pub struct Wcs {
    /// Reference pixel coordinates (CRPIX1, CRPIX2)
    pub crpix: (f64, f64),

    /// Reference sky coordinates in degrees (CRVAL1=RA, CRVAL2=Dec)
    pub crval: (f64, f64),

    /// CD matrix [[CD1_1, CD1_2], [CD2_1, CD2_2]] in degrees/pixel
    pub cd: [[f64; 2]; 2],

    /// Image dimensions (width, height) in pixels
    pub naxis: (usize, usize),
}

impl Wcs {
    pub fn new(crpix: (f64, f64), crval: (f64, f64), cd: [[f64; 2]; 2], naxis: (usize, usize)) -> Self {
        Self {
            crpix,
            crval,
            cd,
            naxis,
        }
    }

    pub fn from_header(header: &FrameHeader) -> Self {
        Self::new(
            header.crpix,
            header.crval,
            header.cd,
            (header.naxis1, header.naxis2),
        )
    }

    /// Create a WCS from a pixel scale (arcsec/pixel) and a position angle
    /// (degrees, North through East), without shear.
    pub fn from_scale_rotation(
        crpix: (f64, f64),
        crval: (f64, f64),
        pixel_scale: f64,
        rotation: f64,
        naxis: (usize, usize),
    ) -> Self {
        let scale_deg = pixel_scale / 3600.0;
        let (sin_r, cos_r) = rotation.to_radians().sin_cos();

        // RA increases to the left on the sky, hence the negative CD1_1
        let cd = [
            [-scale_deg * cos_r, scale_deg * sin_r],
            [scale_deg * sin_r, scale_deg * cos_r],
        ];

        Self::new(crpix, crval, cd, naxis)
    }

    /// Convert pixel coordinates to sky coordinates (RA, Dec in degrees).
    pub fn pixel_to_sky(&self, pixel: DVec2) -> (f64, f64) {
        let dx = pixel.x - self.crpix.0;
        let dy = pixel.y - self.crpix.1;

        let xi = (self.cd[0][0] * dx + self.cd[0][1] * dy).to_radians();
        let eta = (self.cd[1][0] * dx + self.cd[1][1] * dy).to_radians();

        let ra0 = self.crval.0.to_radians();
        let dec0 = self.crval.1.to_radians();

        let (sin_dec0, cos_dec0) = dec0.sin_cos();
        let denom = cos_dec0 - eta * sin_dec0;

        let ra = ra0 + xi.atan2(denom);
        let dec = (sin_dec0 + eta * cos_dec0).atan2((xi.powi(2) + denom.powi(2)).sqrt());

        (ra.to_degrees().rem_euclid(360.0), dec.to_degrees())
    }

    /// Convert sky coordinates (RA, Dec in degrees) to pixel coordinates.
    ///
    /// Returns `None` for positions on the far hemisphere of the tangent point,
    /// where the gnomonic projection is undefined.
    pub fn sky_to_pixel(&self, ra: f64, dec: f64) -> Option<DVec2> {
        let ra_rad = ra.to_radians();
        let dec_rad = dec.to_radians();
        let ra0 = self.crval.0.to_radians();
        let dec0 = self.crval.1.to_radians();

        let (sin_dec, cos_dec) = dec_rad.sin_cos();
        let (sin_dec0, cos_dec0) = dec0.sin_cos();
        let (sin_dra, cos_dra) = (ra_rad - ra0).sin_cos();

        let d = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_dra;
        if d <= 0.0 {
            return None;
        }

        let xi = (cos_dec * sin_dra / d).to_degrees();
        let eta = ((sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_dra) / d).to_degrees();

        let det = self.determinant();
        debug_assert!(det.abs() > 1e-20, "CD matrix is singular (det = {})", det);

        let dx = (self.cd[1][1] * xi - self.cd[0][1] * eta) / det;
        let dy = (-self.cd[1][0] * xi + self.cd[0][0] * eta) / det;

        Some(DVec2::new(self.crpix.0 + dx, self.crpix.1 + dy))
    }

    fn determinant(&self) -> f64 {
        self.cd[0][0] * self.cd[1][1] - self.cd[0][1] * self.cd[1][0]
    }

    /// Pixel scale in arcseconds per pixel, averaged over both axes.
    pub fn pixel_scale_arcsec(&self) -> f64 {
        let scale_x = (self.cd[0][0].powi(2) + self.cd[1][0].powi(2)).sqrt();
        let scale_y = (self.cd[0][1].powi(2) + self.cd[1][1].powi(2)).sqrt();
        ((scale_x + scale_y) / 2.0) * 3600.0
    }

    /// Sky coordinates of the image centre, pixel (NAXIS1/2, NAXIS2/2).
    pub fn center(&self) -> (f64, f64) {
        self.pixel_to_sky(DVec2::new(
            self.naxis.0 as f64 / 2.0,
            self.naxis.1 as f64 / 2.0,
        ))
    }

    /// Cone radius in arcminutes that covers the frame from its centre.
    ///
    /// Mean of the two side lengths, halved, times sqrt(2), from the
    /// diagonal CD terms.
    pub fn query_radius_arcmin(&self) -> f64 {
        let width_arcmin = 3600.0 * self.cd[0][0].abs() * self.naxis.0 as f64 / 60.0;
        let height_arcmin = 3600.0 * self.cd[1][1].abs() * self.naxis.1 as f64 / 60.0;
        1.414 * (width_arcmin + height_arcmin) / 4.0
    }

    /// Whether a 1-based pixel position lies more than `border` pixels inside the frame.
    pub fn contains(&self, pixel: DVec2, border: f64) -> bool {
        border < pixel.x
            && pixel.x < self.naxis.0 as f64 - border
            && border < pixel.y
            && pixel.y < self.naxis.1 as f64 - border
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-6;

    fn odi_like() -> Wcs {
        // 0.11 arcsec/pixel, 11000 pixel square frame
        Wcs::from_scale_rotation((5500.0, 5500.0), (250.42, 36.46), 0.11, 0.0, (11000, 11000))
    }

    #[test]
    fn test_reference_pixel_maps_to_crval() {
        let wcs = odi_like();
        let (ra, dec) = wcs.pixel_to_sky(DVec2::new(5500.0, 5500.0));
        assert!((ra - 250.42).abs() < TOLERANCE);
        assert!((dec - 36.46).abs() < TOLERANCE);
    }

    #[test]
    fn test_sky_to_pixel_roundtrip_rotated() {
        let wcs = Wcs::from_scale_rotation((512.0, 512.0), (180.0, 45.0), 2.0, 30.0, (1024, 1024));

        for (x, y) in [(100.0, 100.0), (512.0, 512.0), (900.0, 700.0)] {
            let (ra, dec) = wcs.pixel_to_sky(DVec2::new(x, y));
            let p = wcs.sky_to_pixel(ra, dec).unwrap();
            assert!((x - p.x).abs() < 1e-8, "X mismatch: {} vs {}", x, p.x);
            assert!((y - p.y).abs() < 1e-8, "Y mismatch: {} vs {}", y, p.y);
        }
    }

    #[test]
    fn test_ra_wraps_near_zero() {
        let wcs = Wcs::from_scale_rotation((512.0, 512.0), (0.001, 10.0), 10.0, 0.0, (1024, 1024));
        // Pixels to the right have smaller RA, crossing 0h
        let (ra, _) = wcs.pixel_to_sky(DVec2::new(1000.0, 512.0));
        assert!(ra > 358.0 && ra < 360.0, "RA should wrap: {}", ra);
        let p = wcs.sky_to_pixel(ra, 10.0).unwrap();
        assert!((p.x - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_far_hemisphere_is_unprojectable() {
        let wcs = odi_like();
        assert!(wcs.sky_to_pixel(250.42 + 180.0, -36.46).is_none());
    }

    #[test]
    fn test_pixel_scale() {
        let wcs = odi_like();
        assert!((wcs.pixel_scale_arcsec() - 0.11).abs() < 1e-10);
    }

    #[test]
    fn test_query_radius() {
        // 11000 px * 0.11 arcsec = 20.1667 arcmin per side
        let wcs = odi_like();
        let side = 11000.0 * 0.11 / 60.0;
        let expected = 1.414 * (side + side) / 4.0;
        assert!((wcs.query_radius_arcmin() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_center_of_unrotated_frame() {
        let wcs = Wcs::from_scale_rotation((50.0, 50.0), (10.0, 20.0), 1.0, 0.0, (100, 100));
        let (ra, dec) = wcs.center();
        assert!((ra - 10.0).abs() < TOLERANCE);
        assert!((dec - 20.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_contains_respects_border() {
        let wcs = Wcs::from_scale_rotation((500.0, 500.0), (10.0, 20.0), 1.0, 0.0, (1000, 1000));
        assert!(wcs.contains(DVec2::new(500.0, 500.0), 100.0));
        assert!(!wcs.contains(DVec2::new(100.0, 500.0), 100.0));
        assert!(!wcs.contains(DVec2::new(500.0, 900.5), 100.0));
        assert!(wcs.contains(DVec2::new(100.5, 899.5), 100.0));
    }
}
