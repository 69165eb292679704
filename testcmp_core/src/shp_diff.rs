use crate::geometry::{Geometry, GeometryComparator, Shape};
use crate::report::section_header;
use geo::{Coord, LineString};
use shapefile::PolygonRing;
use std::fmt::Write;
use std::path::Path;
use testcmp_common::{Result, TestCmpError};

/// Planar coordinates of any shapefile point flavour
trait PlanarPoint {
    fn coord(&self) -> Coord<f64>;
}

impl PlanarPoint for shapefile::Point {
    fn coord(&self) -> Coord<f64> {
        Coord { x: self.x, y: self.y }
    }
}

impl PlanarPoint for shapefile::PointM {
    fn coord(&self) -> Coord<f64> {
        Coord { x: self.x, y: self.y }
    }
}

impl PlanarPoint for shapefile::PointZ {
    fn coord(&self) -> Coord<f64> {
        Coord { x: self.x, y: self.y }
    }
}

fn coords<P: PlanarPoint>(points: &[P]) -> Vec<Coord<f64>> {
    points.iter().map(PlanarPoint::coord).collect()
}

fn point_shape<P: PlanarPoint>(point: &P) -> Shape {
    let c = point.coord();
    Shape {
        points: vec![c],
        n_parts: 0,
        geometry: Geometry::Point(c),
    }
}

fn polygon_shape<P: PlanarPoint>(rings: &[PolygonRing<P>]) -> Shape {
    let rings = rings
        .iter()
        .map(|ring| {
            let is_exterior = matches!(ring, PolygonRing::Outer(_));
            (LineString::new(coords(ring.points())), is_exterior)
        })
        .collect();
    Shape::from_rings(rings)
}

fn polyline_shape<P: PlanarPoint>(parts: &[Vec<P>]) -> Shape {
    Shape {
        points: parts.iter().flat_map(|part| coords(part)).collect(),
        n_parts: parts.len(),
        geometry: Geometry::Other(if parts.len() == 1 { "LineString" } else { "MultiLineString" }),
    }
}

fn multipoint_shape<P: PlanarPoint>(points: &[P]) -> Shape {
    Shape {
        points: coords(points),
        n_parts: 0,
        geometry: Geometry::Other("MultiPoint"),
    }
}

fn convert(shape: &shapefile::Shape) -> Shape {
    use shapefile::Shape as S;

    match shape {
        S::NullShape => Shape::null(),
        S::Point(p) => point_shape(p),
        S::PointM(p) => point_shape(p),
        S::PointZ(p) => point_shape(p),
        S::Polygon(p) => polygon_shape(p.rings()),
        S::PolygonM(p) => polygon_shape(p.rings()),
        S::PolygonZ(p) => polygon_shape(p.rings()),
        S::Polyline(p) => polyline_shape(p.parts()),
        S::PolylineM(p) => polyline_shape(p.parts()),
        S::PolylineZ(p) => polyline_shape(p.parts()),
        S::Multipoint(p) => multipoint_shape(p.points()),
        S::MultipointM(p) => multipoint_shape(p.points()),
        S::MultipointZ(p) => multipoint_shape(p.points()),
        // Patches are only counted; multipatch geometry is not compared.
        S::Multipatch(p) => Shape {
            points: Vec::new(),
            n_parts: p.patches().len(),
            geometry: Geometry::Other("Multipatch"),
        },
    }
}

/// Read all shapes of a `.shp` file.
pub fn read_shapes(path: &Path) -> Result<Vec<Shape>> {
    let shapes = shapefile::read_shapes(path).map_err(|e| TestCmpError::format(path, e))?;
    Ok(shapes.iter().map(convert).collect())
}

/// Comparison of shapefiles, shape by shape
#[derive(Debug, Clone)]
pub struct ShpDiffEngine {
    comparator: GeometryComparator,
    /// Number of differing shapes described in detail
    max_described: usize,
}

impl ShpDiffEngine {
    pub fn new(tolerance: f64, limit: usize) -> Self {
        Self {
            comparator: GeometryComparator::new(tolerance),
            max_described: (limit / 5).max(1),
        }
    }

    pub fn with_report_identical(mut self, report_identical: bool) -> Self {
        self.comparator.report_identical = report_identical;
        self
    }

    pub fn compare_files(&self, old: &Path, new: &Path, detail: &mut String) -> Result<usize> {
        let shapes_old = read_shapes(old)?;
        let shapes_new = read_shapes(new)?;
        self.compare_shapes(old, new, &shapes_old, &shapes_new, detail)
    }

    pub fn compare_shapes(
        &self,
        old: &Path,
        new: &Path,
        shapes_old: &[Shape],
        shapes_new: &[Shape],
        detail: &mut String,
    ) -> Result<usize> {
        let mut text = String::new();
        let mut diff_found = false;

        if shapes_old.len() != shapes_new.len() {
            diff_found = true;
            writeln!(
                text,
                "Not the same number of records: {} {}",
                shapes_old.len(),
                shapes_new.len()
            )?;
            writeln!(
                text,
                "Comparing the first {} records...",
                shapes_old.len().min(shapes_new.len())
            )?;
        }

        writeln!(text, "Difference in vertices:")?;
        let mut n_differing = 0;

        for (i, (s_old, s_new)) in shapes_old.iter().zip(shapes_new).enumerate() {
            let mut shape_text = String::new();
            let n = self.comparator.diff_shapes(i, s_old, s_new, &mut shape_text)?;
            if n != 0 {
                n_differing += 1;
            }
            if n == 0 || n_differing <= self.max_described {
                text.push_str(&shape_text);
            }
        }

        if n_differing > self.max_described {
            writeln!(
                text,
                "\n{} more differing shapes not described",
                n_differing - self.max_described
            )?;
        }

        diff_found = diff_found || n_differing != 0;
        text.push('\n');

        if diff_found || self.comparator.report_identical {
            section_header(detail, "diff", old, new)?;
            detail.push_str(&text);
        }

        Ok(usize::from(diff_found))
    }
}
