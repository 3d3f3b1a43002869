//! Projection of catalog stars into the frames and matching of the per-frame
//! measurements back to the catalog.
//!
//! Reference ids are 1-based row numbers of the `.sdssxy` list. Both frames of
//! a field share one id space: a star is kept only if it lands inside both
//! frames, so id `n` names the same catalog star in every product.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::Path;

use glam::DVec2;

use crate::catalog::{SdssBand, SdssStar};
use crate::error::TableError;
use crate::photometry::PhotRecord;
use crate::profile::StarProfile;
use crate::wcs::Wcs;

const XY_HEADER: &str = "# x y ra dec u uerr g gerr r rerr i ierr z zerr (all psfmags)";

/// A catalog star at its pixel position in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceStar {
    pub id: usize,
    /// 1-based pixel position
    pub x: f64,
    pub y: f64,
    pub star: SdssStar,
}

impl ReferenceStar {
    #[inline]
    pub fn position(&self) -> DVec2 {
        DVec2::new(self.x, self.y)
    }
}

/// Reference stars of one frame, in id order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceList {
    pub stars: Vec<ReferenceStar>,
}

impl ReferenceList {
    /// Project `stars` into a single frame, keeping those more than `border`
    /// pixels inside it.
    pub fn project(stars: &[SdssStar], wcs: &Wcs, border: f64) -> Self {
        let stars = stars
            .iter()
            .filter_map(|s| {
                let p = wcs.sky_to_pixel(s.ra, s.dec)?;
                wcs.contains(p, border).then(|| (p, s))
            })
            .enumerate()
            .map(|(i, (p, s))| ReferenceStar {
                id: i + 1,
                x: p.x,
                y: p.y,
                star: s.clone(),
            })
            .collect();
        Self { stars }
    }

    /// Project `stars` into two frames of the same field.
    ///
    /// Only stars inside both frames (each tested against its own size) are
    /// kept, so the two lists have equal length and matching ids.
    pub fn project_pair(stars: &[SdssStar], wcs_g: &Wcs, wcs_x: &Wcs, border: f64) -> (Self, Self) {
        let mut list_g = Vec::new();
        let mut list_x = Vec::new();

        for s in stars {
            let (Some(pg), Some(px)) = (
                wcs_g.sky_to_pixel(s.ra, s.dec),
                wcs_x.sky_to_pixel(s.ra, s.dec),
            ) else {
                continue;
            };
            if !(wcs_g.contains(pg, border) && wcs_x.contains(px, border)) {
                continue;
            }
            let id = list_g.len() + 1;
            list_g.push(ReferenceStar {
                id,
                x: pg.x,
                y: pg.y,
                star: s.clone(),
            });
            list_x.push(ReferenceStar {
                id,
                x: px.x,
                y: px.y,
                star: s.clone(),
            });
        }

        tracing::info!(
            "{} of {} catalog stars fall inside both frames",
            list_g.len(),
            stars.len()
        );
        (Self { stars: list_g }, Self { stars: list_x })
    }

    pub fn len(&self) -> usize {
        self.stars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stars.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&ReferenceStar> {
        self.stars.get(id.checked_sub(1)?).filter(|s| s.id == id)
    }

    pub fn write(&self, path: &Path) -> Result<(), TableError> {
        let mut out = String::with_capacity(160 * (self.stars.len() + 1));
        out.push_str(XY_HEADER);
        out.push('\n');
        for r in &self.stars {
            let s = &r.star;
            let _ = write!(out, "{:.3} {:.3} {:.7} {:.7}", r.x, r.y, s.ra, s.dec);
            for (m, e) in s.psf_mag.iter().zip(&s.psf_mag_err) {
                let _ = write!(out, " {m:.5} {e:.5}");
            }
            out.push('\n');
        }
        std::fs::write(path, out).map_err(|e| TableError::io(path, e))
    }

    /// Read a `.sdssxy` list; ids are assigned from row order.
    pub fn read(path: &Path) -> Result<Self, TableError> {
        let text = std::fs::read_to_string(path).map_err(|e| TableError::io(path, e))?;

        let mut stars = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let values = line
                .split_whitespace()
                .map(str::parse::<f64>)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| TableError::parse(path, idx + 1, e.to_string()))?;
            if values.len() != 14 {
                return Err(TableError::parse(
                    path,
                    idx + 1,
                    format!("expected 14 columns, found {}", values.len()),
                ));
            }

            let mut psf_mag = [0.0; 5];
            let mut psf_mag_err = [0.0; 5];
            for band in 0..5 {
                psf_mag[band] = values[4 + 2 * band];
                psf_mag_err[band] = values[5 + 2 * band];
            }
            stars.push(ReferenceStar {
                id: stars.len() + 1,
                x: values[0],
                y: values[1],
                star: SdssStar {
                    ra: values[2],
                    dec: values[3],
                    psf_mag,
                    psf_mag_err,
                    prob_psf: 1,
                },
            });
        }
        Ok(Self { stars })
    }
}

/// A reference star measured in both frames.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedStar {
    pub id: usize,
    pub catalog: SdssStar,
    pub g: PhotRecord,
    pub x: PhotRecord,
    /// Profile peak above sky in the g frame
    pub peak_g: Option<f64>,
    /// Profile peak above sky in the second frame
    pub peak_x: Option<f64>,
}

impl MatchedStar {
    #[inline]
    pub fn catalog_mag(&self, band: SdssBand) -> f64 {
        self.catalog.mag(band)
    }

    #[inline]
    pub fn catalog_err(&self, band: SdssBand) -> f64 {
        self.catalog.mag_err(band)
    }
}

/// Join photometry of both frames on reference id; the result is sorted by id.
///
/// Ids missing from either table (dropped stars) are skipped.
pub fn match_measurements(
    references: &ReferenceList,
    phot_g: &[PhotRecord],
    phot_x: &[PhotRecord],
    profiles_g: &[StarProfile],
    profiles_x: &[StarProfile],
) -> Vec<MatchedStar> {
    let by_id_x: HashMap<usize, &PhotRecord> = phot_x.iter().map(|r| (r.id, r)).collect();
    let peak_g: HashMap<usize, Option<f64>> = profiles_g.iter().map(|p| (p.id, p.peak)).collect();
    let peak_x: HashMap<usize, Option<f64>> = profiles_x.iter().map(|p| (p.id, p.peak)).collect();

    let mut matched: BTreeMap<usize, MatchedStar> = BTreeMap::new();
    for g in phot_g {
        let Some(x) = by_id_x.get(&g.id) else {
            continue;
        };
        let Some(reference) = references.get(g.id) else {
            tracing::warn!("Photometry id {} has no reference star", g.id);
            continue;
        };
        matched.insert(
            g.id,
            MatchedStar {
                id: g.id,
                catalog: reference.star.clone(),
                g: g.clone(),
                x: (*x).clone(),
                peak_g: peak_g.get(&g.id).copied().flatten(),
                peak_x: peak_x.get(&g.id).copied().flatten(),
            },
        );
    }

    tracing::info!(
        "Matched {} stars ({} in g, {} in second band)",
        matched.len(),
        phot_g.len(),
        phot_x.len()
    );
    matched.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{SyntheticFrame, TEST_DEC, TEST_RA};

    fn star(ra: f64, dec: f64, g: f64) -> SdssStar {
        SdssStar {
            ra,
            dec,
            psf_mag: [g + 1.0, g, g - 0.4, g - 0.6, g - 0.7],
            psf_mag_err: [0.05, 0.01, 0.01, 0.01, 0.02],
            prob_psf: 1,
        }
    }

    fn phot(id: usize, mag: f64) -> PhotRecord {
        PhotRecord {
            id,
            mag,
            merr: 0.01,
            msky: 100.0,
            stdev: 3.0,
            rapert: 10.0,
            xcen: 0.0,
            ycen: 0.0,
            ifilter: "odi_g".to_string(),
            xairmass: Some(1.1),
            image: "f".to_string(),
        }
    }

    #[test]
    fn test_project_applies_border() {
        // 1 arcsec/pixel, 400x400 frame centred on the test position
        let wcs = SyntheticFrame::new(400, 400).wcs();
        let stars = vec![
            star(TEST_RA, TEST_DEC, 18.0),
            // ~190 px north, inside the 100 px border strip
            star(TEST_RA, TEST_DEC + 190.0 / 3600.0, 18.0),
            star(TEST_RA + 180.0, -TEST_DEC, 18.0),
        ];
        let list = ReferenceList::project(&stars, &wcs, 100.0);
        assert_eq!(list.len(), 1);
        assert_eq!(list.stars[0].id, 1);
        assert!((list.stars[0].x - 200.0).abs() < 1e-6);
    }

    #[test]
    fn test_project_pair_shares_ids() {
        let wcs_g = SyntheticFrame::new(400, 400).wcs();
        // second frame shifted by 60 px in x
        let mut shifted = SyntheticFrame::new(400, 400);
        shifted.header.crpix.0 += 60.0;
        let wcs_x = shifted.wcs();

        let stars = vec![
            star(TEST_RA, TEST_DEC, 18.0),
            // 80 px west: x = 280 in g, but 340 in the shifted frame
            star(TEST_RA - 80.0 / 3600.0 / TEST_DEC.to_radians().cos(), TEST_DEC, 18.5),
            star(TEST_RA, TEST_DEC + 30.0 / 3600.0, 19.0),
        ];
        let (g, x) = ReferenceList::project_pair(&stars, &wcs_g, &wcs_x, 100.0);
        assert_eq!(g.len(), 2);
        assert_eq!(x.len(), 2);
        for (a, b) in g.stars.iter().zip(&x.stars) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.star, b.star);
            assert!((b.x - a.x - 60.0).abs() < 1e-6);
        }
        assert!((g.stars[1].star.mag(SdssBand::G) - 19.0).abs() < 1e-12);
    }

    #[test]
    fn test_list_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("field_g.sdssxy");
        let wcs = SyntheticFrame::new(400, 400).wcs();
        let list = ReferenceList::project(&[star(TEST_RA, TEST_DEC, 18.25)], &wcs, 100.0);

        list.write(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(XY_HEADER));

        let read = ReferenceList::read(&path).unwrap();
        assert_eq!(read.len(), 1);
        let r = &read.stars[0];
        assert_eq!(r.id, 1);
        assert!((r.x - list.stars[0].x).abs() < 1e-3);
        assert!((r.star.ra - TEST_RA).abs() < 1e-7);
        assert!((r.star.mag(SdssBand::G) - 18.25).abs() < 1e-9);
        assert!((r.star.mag_err(SdssBand::Z) - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_read_rejects_bad_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.sdssxy");
        std::fs::write(&path, "# header\n1 2 3\n").unwrap();
        assert!(ReferenceList::read(&path).is_err());
    }

    #[test]
    fn test_match_intersects_ids() {
        let wcs = SyntheticFrame::new(400, 400).wcs();
        let stars: Vec<SdssStar> = (0..4)
            .map(|i| star(TEST_RA, TEST_DEC + i as f64 * 20.0 / 3600.0, 17.0 + i as f64))
            .collect();
        let refs = ReferenceList::project(&stars, &wcs, 100.0);
        assert_eq!(refs.len(), 4);

        let phot_g = vec![phot(3, 1.0), phot(1, 2.0), phot(2, 3.0)];
        let phot_x = vec![phot(1, 4.0), phot(3, 5.0), phot(4, 6.0)];
        let mut profile = StarProfile {
            id: 3,
            x: 0.0,
            y: 0.0,
            mag: None,
            flux: None,
            sky: None,
            npix: 0,
            rmom: None,
            ellip: None,
            pa: None,
            peak: Some(5000.0),
            fwhm: Some(3.0),
        };
        let profiles_g = vec![profile.clone()];
        profile.peak = Some(4000.0);
        let profiles_x = vec![profile];

        let matched = match_measurements(&refs, &phot_g, &phot_x, &profiles_g, &profiles_x);
        let ids: Vec<usize> = matched.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!((matched[1].g.mag - 1.0).abs() < 1e-12);
        assert!((matched[1].x.mag - 5.0).abs() < 1e-12);
        assert_eq!(matched[1].peak_g, Some(5000.0));
        assert_eq!(matched[1].peak_x, Some(4000.0));
        assert_eq!(matched[0].peak_g, None);
        assert!((matched[1].catalog_mag(SdssBand::G) - 19.0).abs() < 1e-12);
    }
}
