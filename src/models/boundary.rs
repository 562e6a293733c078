use crate::error::{ProcessingError, Result};
use crate::utils::StableHasher;
use geo::{Area, BoundingRect, LineString, MultiPolygon, Polygon, Rect};
use validator::Validate;

/// One administrative unit with its region code and geometry.
#[derive(Debug, Clone, Validate)]
pub struct AdminPolygon {
    #[validate(length(min = 1))]
    pub region_code: String,

    pub name: Option<String>,

    #[validate(range(max = 5))]
    pub admin_level: u8,

    pub geometry: MultiPolygon<f64>,
}

impl AdminPolygon {
    pub fn new(region_code: impl Into<String>, admin_level: u8, geometry: MultiPolygon<f64>) -> Self {
        Self {
            region_code: region_code.into(),
            name: None,
            admin_level,
            geometry,
        }
    }

    pub fn from_polygon(region_code: impl Into<String>, admin_level: u8, polygon: Polygon<f64>) -> Self {
        Self::new(region_code, admin_level, MultiPolygon::new(vec![polygon]))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Planar area in the units of the geometry's CRS.
    pub fn area(&self) -> f64 {
        self.geometry.unsigned_area()
    }

    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.geometry.bounding_rect()
    }
}

/// A validated polygon set: unique region codes, kept in region-code order.
#[derive(Debug, Clone)]
pub struct BoundarySet {
    polygons: Vec<AdminPolygon>,
    signature: u64,
}

impl BoundarySet {
    pub fn new(mut polygons: Vec<AdminPolygon>) -> Result<Self> {
        for polygon in &polygons {
            polygon.validate()?;
        }

        polygons.sort_by(|a, b| a.region_code.cmp(&b.region_code));
        if let Some(pair) = polygons
            .windows(2)
            .find(|pair| pair[0].region_code == pair[1].region_code)
        {
            return Err(ProcessingError::DuplicateRegion {
                region_code: pair[0].region_code.clone(),
            });
        }

        let signature = content_signature(&polygons);
        Ok(Self {
            polygons,
            signature,
        })
    }

    pub fn polygons(&self) -> &[AdminPolygon] {
        &self.polygons
    }

    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn get(&self, region_code: &str) -> Option<&AdminPolygon> {
        self.polygons
            .binary_search_by(|p| p.region_code.as_str().cmp(region_code))
            .ok()
            .map(|idx| &self.polygons[idx])
    }

    pub fn region_codes(&self) -> Vec<&str> {
        self.polygons.iter().map(|p| p.region_code.as_str()).collect()
    }

    /// Content hash over codes, levels and every ring coordinate.
    pub fn signature(&self) -> u64 {
        self.signature
    }
}

fn content_signature(polygons: &[AdminPolygon]) -> u64 {
    let mut hasher = StableHasher::new();
    hasher.write_u64(polygons.len() as u64);
    for polygon in polygons {
        hasher.write_str(&polygon.region_code);
        hasher.write_u64(polygon.admin_level as u64);
        hasher.write_u64(polygon.geometry.0.len() as u64);
        for part in &polygon.geometry.0 {
            write_ring(&mut hasher, part.exterior());
            hasher.write_u64(part.interiors().len() as u64);
            for ring in part.interiors() {
                write_ring(&mut hasher, ring);
            }
        }
    }
    hasher.finish()
}

fn write_ring(hasher: &mut StableHasher, ring: &LineString<f64>) {
    hasher.write_u64(ring.0.len() as u64);
    for coord in &ring.0 {
        hasher.write_f64(coord.x);
        hasher.write_f64(coord.y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn square(code: &str, x: f64, y: f64, size: f64) -> AdminPolygon {
        AdminPolygon::from_polygon(
            code,
            2,
            polygon![
                (x: x, y: y),
                (x: x + size, y: y),
                (x: x + size, y: y + size),
                (x: x, y: y + size),
                (x: x, y: y),
            ],
        )
    }

    #[test]
    fn test_set_is_sorted_by_code() {
        let set = BoundarySet::new(vec![
            square("TD0702", 0.0, 0.0, 1.0),
            square("TD0101", 1.0, 0.0, 1.0),
        ])
        .unwrap();

        assert_eq!(set.region_codes(), vec!["TD0101", "TD0702"]);
        assert!(set.get("TD0702").is_some());
        assert!(set.get("TD9999").is_none());
        assert!((set.get("TD0101").unwrap().area() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_duplicate_codes_rejected() {
        let result = BoundarySet::new(vec![
            square("TD0101", 0.0, 0.0, 1.0),
            square("TD0101", 2.0, 0.0, 1.0),
        ]);
        assert!(matches!(
            result,
            Err(ProcessingError::DuplicateRegion { region_code }) if region_code == "TD0101"
        ));
    }

    #[test]
    fn test_empty_code_rejected() {
        let result = BoundarySet::new(vec![square("", 0.0, 0.0, 1.0)]);
        assert!(matches!(result, Err(ProcessingError::Validation(_))));
    }

    #[test]
    fn test_signature_tracks_content_not_order() {
        let a = BoundarySet::new(vec![square("A", 0.0, 0.0, 1.0), square("B", 1.0, 0.0, 1.0)]).unwrap();
        let b = BoundarySet::new(vec![square("B", 1.0, 0.0, 1.0), square("A", 0.0, 0.0, 1.0)]).unwrap();
        let moved = BoundarySet::new(vec![square("A", 0.0, 0.0, 1.0), square("B", 1.5, 0.0, 1.0)]).unwrap();

        assert_eq!(a.signature(), b.signature());
        assert_ne!(a.signature(), moved.signature());
    }
}
