use crate::error::{ProcessingError, Result};
use crate::models::{AdminPolygon, BoundarySet};
use crate::utils::constants::{
    AOI_ADM1_PCODES, DEFAULT_ADMIN_LEVEL, DEFAULT_CODE_FIELD, DEFAULT_NAME_FIELD,
};
use geo::{Contains, Coord, LineString, MultiPolygon, Polygon};
use serde::Deserialize;
use serde_json::{Map, Value};
use shapefile::dbase::{FieldValue, Record};
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::{debug, info};
use zip::ZipArchive;

#[derive(Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Deserialize)]
struct Feature {
    #[serde(default)]
    properties: Option<Map<String, Value>>,
    geometry: Option<Geometry>,
}

type Ring = Vec<Vec<f64>>;

#[derive(Deserialize)]
#[serde(tag = "type")]
enum Geometry {
    Polygon { coordinates: Vec<Ring> },
    MultiPolygon { coordinates: Vec<Vec<Ring>> },
    #[serde(other)]
    Unsupported,
}

/// Raw boundary content before parsing.
enum BoundarySource {
    GeoJson(String),
    Shapefile { shp: Vec<u8>, dbf: Vec<u8> },
}

/// Reads administrative boundaries from GeoJSON or an ESRI shapefile, plain
/// or inside a zip archive.
pub struct BoundaryReader {
    code_field: String,
    name_field: String,
    admin_level: u8,
    region_prefixes: Vec<String>,
}

impl BoundaryReader {
    pub fn new() -> Self {
        Self {
            code_field: DEFAULT_CODE_FIELD.to_string(),
            name_field: DEFAULT_NAME_FIELD.to_string(),
            admin_level: DEFAULT_ADMIN_LEVEL,
            region_prefixes: Vec::new(),
        }
    }

    pub fn with_code_field(mut self, field: &str) -> Self {
        self.code_field = field.to_string();
        self
    }

    pub fn with_name_field(mut self, field: &str) -> Self {
        self.name_field = field.to_string();
        self
    }

    pub fn with_admin_level(mut self, level: u8) -> Self {
        self.admin_level = level;
        self
    }

    /// Keep only regions whose code starts with one of `prefixes`.
    pub fn with_region_prefixes<S: AsRef<str>>(mut self, prefixes: &[S]) -> Self {
        self.region_prefixes = prefixes.iter().map(|p| p.as_ref().to_string()).collect();
        self
    }

    /// Restrict to the anticipatory-action area of interest.
    pub fn aoi_only(self) -> Self {
        self.with_region_prefixes(AOI_ADM1_PCODES)
    }

    pub fn read(&self, path: &Path) -> Result<BoundarySet> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        let source = match extension.as_deref() {
            Some("zip") => Self::read_zip_members(path)?,
            Some("shp") => BoundarySource::Shapefile {
                shp: std::fs::read(path)?,
                dbf: std::fs::read(path.with_extension("dbf"))?,
            },
            _ => BoundarySource::GeoJson(std::fs::read_to_string(path)?),
        };

        let set = match source {
            BoundarySource::GeoJson(content) => self.parse_str(&content)?,
            BoundarySource::Shapefile { shp, dbf } => self.parse_shapefile(shp, dbf)?,
        };
        info!(
            path = %path.display(),
            regions = set.len(),
            "loaded boundaries"
        );
        Ok(set)
    }

    /// The first `.geojson`/`.json` member, or else the first `.shp` member
    /// together with the `.dbf` of the same name.
    fn read_zip_members(path: &Path) -> Result<BoundarySource> {
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(file)?;

        let mut shp: Option<(String, Vec<u8>)> = None;
        let mut dbfs: Vec<(String, Vec<u8>)> = Vec::new();
        for i in 0..archive.len() {
            let mut member = archive.by_index(i)?;
            if !member.is_file() {
                continue;
            }
            let name = member.name().to_lowercase();

            if name.ends_with(".geojson") || name.ends_with(".json") {
                debug!(archive = %path.display(), member = %member.name(), "reading boundary member");
                let mut content = String::new();
                member.read_to_string(&mut content)?;
                return Ok(BoundarySource::GeoJson(content));
            }
            if let Some(stem) = name.strip_suffix(".shp") {
                if shp.is_none() {
                    debug!(archive = %path.display(), member = %member.name(), "reading shapefile member");
                    shp = Some((stem.to_string(), read_member(&mut member)?));
                }
            } else if let Some(stem) = name.strip_suffix(".dbf") {
                dbfs.push((stem.to_string(), read_member(&mut member)?));
            }
        }

        let Some((stem, shp)) = shp else {
            return Err(ProcessingError::MissingData(format!(
                "No GeoJSON or shapefile member found in {}",
                path.display()
            )));
        };
        let dbf = dbfs
            .into_iter()
            .find(|(name, _)| *name == stem)
            .map(|(_, bytes)| bytes)
            .ok_or_else(|| {
                ProcessingError::MissingData(format!(
                    "{}.shp in {} has no matching .dbf attribute table",
                    stem,
                    path.display()
                ))
            })?;
        Ok(BoundarySource::Shapefile { shp, dbf })
    }

    pub fn parse_str(&self, content: &str) -> Result<BoundarySet> {
        let collection: FeatureCollection = serde_json::from_str(content)?;

        let mut polygons = Vec::new();
        for (index, feature) in collection.features.into_iter().enumerate() {
            let properties = feature.properties.unwrap_or_default();
            let code = self.region_code(index, &properties)?;
            if !self.keeps(&code) {
                continue;
            }

            let geometry = match feature.geometry {
                Some(Geometry::Polygon { coordinates }) => {
                    MultiPolygon::new(vec![to_polygon(&coordinates)?])
                }
                Some(Geometry::MultiPolygon { coordinates }) => MultiPolygon::new(
                    coordinates
                        .iter()
                        .map(|rings| to_polygon(rings))
                        .collect::<Result<Vec<_>>>()?,
                ),
                Some(Geometry::Unsupported) | None => {
                    return Err(ProcessingError::InvalidFormat(format!(
                        "Region {} must have Polygon or MultiPolygon geometry",
                        code
                    )))
                }
            };

            polygons.push(self.admin_polygon(code, geometry, &properties));
        }

        BoundarySet::new(polygons)
    }

    /// Parse a shapefile from its `.shp` geometry and `.dbf` attribute bytes.
    pub fn parse_shapefile(&self, shp: Vec<u8>, dbf: Vec<u8>) -> Result<BoundarySet> {
        let shapes = shapefile::ShapeReader::new(Cursor::new(shp))?.read()?;
        let records = shapefile::dbase::Reader::new(Cursor::new(dbf))?.read()?;
        if shapes.len() != records.len() {
            return Err(ProcessingError::InvalidFormat(format!(
                "Shapefile has {} shapes but {} attribute records",
                shapes.len(),
                records.len()
            )));
        }

        let mut polygons = Vec::new();
        for (index, (shape, record)) in shapes.iter().zip(&records).enumerate() {
            let properties = self.record_properties(record);
            let code = self.region_code(index, &properties)?;
            if !self.keeps(&code) {
                continue;
            }

            let geometry = shape_geometry(shape).ok_or_else(|| {
                ProcessingError::InvalidFormat(format!(
                    "Region {} must have Polygon geometry",
                    code
                ))
            })?;
            polygons.push(self.admin_polygon(code, geometry, &properties));
        }

        BoundarySet::new(polygons)
    }

    fn region_code(&self, index: usize, properties: &Map<String, Value>) -> Result<String> {
        property_string(properties, &self.code_field).ok_or_else(|| {
            ProcessingError::InvalidFormat(format!(
                "Feature {} has no '{}' property",
                index, self.code_field
            ))
        })
    }

    fn admin_polygon(
        &self,
        code: String,
        geometry: MultiPolygon<f64>,
        properties: &Map<String, Value>,
    ) -> AdminPolygon {
        let polygon = AdminPolygon::new(code, self.admin_level, geometry);
        match property_string(properties, &self.name_field) {
            Some(name) => polygon.with_name(name),
            None => polygon,
        }
    }

    /// The code and name attributes of a DBF record as JSON values.
    fn record_properties(&self, record: &Record) -> Map<String, Value> {
        let mut properties = Map::new();
        for key in [&self.code_field, &self.name_field] {
            let value = match record.get(key) {
                Some(FieldValue::Character(Some(text))) => Value::String(text.trim().to_string()),
                Some(FieldValue::Numeric(Some(number))) => match serde_json::Number::from_f64(*number) {
                    Some(number) => Value::Number(number),
                    None => continue,
                },
                Some(FieldValue::Integer(number)) => Value::from(*number),
                _ => continue,
            };
            properties.insert(key.clone(), value);
        }
        properties
    }

    fn keeps(&self, code: &str) -> bool {
        self.region_prefixes.is_empty()
            || self
                .region_prefixes
                .iter()
                .any(|prefix| code.starts_with(prefix.as_str()))
    }
}

impl Default for BoundaryReader {
    fn default() -> Self {
        Self::new()
    }
}

fn property_string(properties: &Map<String, Value>, key: &str) -> Option<String> {
    match properties.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn read_member(member: &mut impl Read) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    member.read_to_end(&mut bytes)?;
    Ok(bytes)
}

fn shape_geometry(shape: &shapefile::Shape) -> Option<MultiPolygon<f64>> {
    match shape {
        shapefile::Shape::Polygon(polygon) => {
            Some(rings_to_multipolygon(polygon.rings(), |p| Coord { x: p.x, y: p.y }))
        }
        shapefile::Shape::PolygonM(polygon) => {
            Some(rings_to_multipolygon(polygon.rings(), |p| Coord { x: p.x, y: p.y }))
        }
        shapefile::Shape::PolygonZ(polygon) => {
            Some(rings_to_multipolygon(polygon.rings(), |p| Coord { x: p.x, y: p.y }))
        }
        _ => None,
    }
}

/// Shapefile polygons list outer and inner rings flat; each hole goes to the
/// outer ring that contains its first vertex.
fn rings_to_multipolygon<P>(
    rings: &[shapefile::PolygonRing<P>],
    coord: impl Fn(&P) -> Coord<f64>,
) -> MultiPolygon<f64> {
    let mut polygons: Vec<Polygon<f64>> = Vec::new();
    let mut holes: Vec<LineString<f64>> = Vec::new();
    for ring in rings {
        let line: LineString<f64> = ring.points().iter().map(&coord).collect();
        match ring {
            shapefile::PolygonRing::Outer(_) => polygons.push(Polygon::new(line, Vec::new())),
            shapefile::PolygonRing::Inner(_) => holes.push(line),
        }
    }

    for hole in holes {
        let Some(first) = hole.0.first().copied() else {
            continue;
        };
        let owner = polygons
            .iter()
            .position(|polygon| polygon.contains(&first))
            .or_else(|| polygons.len().checked_sub(1));
        if let Some(owner) = owner {
            polygons[owner].interiors_push(hole);
        }
    }
    MultiPolygon::new(polygons)
}

fn to_polygon(rings: &[Ring]) -> Result<Polygon<f64>> {
    let mut rings = rings.iter().map(|ring| to_line_string(ring));
    let exterior = rings
        .next()
        .ok_or_else(|| ProcessingError::InvalidFormat("Polygon has no exterior ring".to_string()))??;
    let interiors = rings.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn to_line_string(ring: &Ring) -> Result<LineString<f64>> {
    ring.iter()
        .map(|position| match position.as_slice() {
            [x, y, ..] => Ok(Coord { x: *x, y: *y }),
            _ => Err(ProcessingError::InvalidFormat(format!(
                "Position needs two coordinates, got {:?}",
                position
            ))),
        })
        .collect::<Result<Vec<_>>>()
        .map(LineString::new)
}
