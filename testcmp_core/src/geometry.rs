//! Shape-by-shape comparison of vector geometry.
//!
//! Rings that differ only by their starting vertex or orientation are equal.
//! Otherwise two polygon rings are equivalent when the area of their
//! symmetric difference, relative to the area of the old ring, is within
//! the tolerance.

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{Area, BooleanOps, Coord, Line, LineString, MultiPolygon, Polygon};
use std::fmt::Write;
use testcmp_common::Result;

/// Geometry of one shapefile record
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Null,
    Point(Coord<f64>),
    Polygon(Polygon<f64>),
    MultiPolygon(MultiPolygon<f64>),
    /// Any other geometry, by type name
    Other(&'static str),
}

impl Geometry {
    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Null => "Null",
            Geometry::Point(_) => "Point",
            Geometry::Polygon(_) => "Polygon",
            Geometry::MultiPolygon(_) => "MultiPolygon",
            Geometry::Other(name) => name,
        }
    }
}

/// A record as stored: raw vertices, number of parts, interpreted geometry
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub points: Vec<Coord<f64>>,
    pub n_parts: usize,
    pub geometry: Geometry,
}

impl Shape {
    pub fn null() -> Self {
        Shape {
            points: Vec::new(),
            n_parts: 0,
            geometry: Geometry::Null,
        }
    }

    /// Build a polygon shape from rings in file order.
    ///
    /// Each exterior ring starts a new polygon, interior rings attach to the
    /// last exterior seen.
    pub fn from_rings(rings: Vec<(LineString<f64>, bool)>) -> Self {
        let points = rings.iter().flat_map(|(ring, _)| ring.0.iter().copied()).collect();
        let n_parts = rings.len();

        let mut polygons: Vec<(LineString<f64>, Vec<LineString<f64>>)> = Vec::new();
        for (ring, is_exterior) in rings {
            match polygons.last_mut() {
                Some((_, holes)) if !is_exterior => holes.push(ring),
                _ => polygons.push((ring, Vec::new())),
            }
        }

        let mut polygons: Vec<Polygon<f64>> = polygons
            .into_iter()
            .map(|(exterior, holes)| Polygon::new(exterior, holes))
            .collect();

        let geometry = match polygons.len() {
            0 => Geometry::Null,
            1 => Geometry::Polygon(polygons.remove(0)),
            _ => Geometry::MultiPolygon(MultiPolygon::new(polygons)),
        };

        Shape {
            points,
            n_parts,
            geometry,
        }
    }
}

/// Where a ring sits inside a shape, for the report
#[derive(Debug, Clone, Copy)]
struct RingLabel {
    shape: usize,
    part: Option<usize>,
    interior: Option<usize>,
}

/// Compares shapes with an area-based relative tolerance
#[derive(Debug, Clone)]
pub struct GeometryComparator {
    pub tolerance: f64,
    pub report_identical: bool,
}

impl GeometryComparator {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            report_identical: false,
        }
    }

    /// Compare shape number `i`. Returns 1 if a difference beyond tolerance is found.
    pub fn diff_shapes(&self, i: usize, old: &Shape, new: &Shape, out: &mut String) -> Result<usize> {
        if old.points == new.points {
            if self.report_identical {
                writeln!(out, "\nVertices for shape {} are identical.", i)?;
            }
            return Ok(0);
        }

        let mut text = String::new();
        writeln!(text, "\nVertices for shape {} differ.", i)?;

        let diff_found = if old.geometry == Geometry::Null {
            writeln!(text, "Old shape is NULL.")?;
            true
        } else if new.geometry == Geometry::Null {
            writeln!(text, "New shape is NULL.")?;
            true
        } else if old.n_parts != new.n_parts {
            writeln!(text, "Numbers of parts in shape {} differ: {} {}", i, old.n_parts, new.n_parts)?;
            true
        } else if old.points.is_empty() {
            writeln!(text, "No point in old shape {}", i)?;
            true
        } else if new.points.is_empty() {
            writeln!(text, "No point in new shape {}", i)?;
            true
        } else {
            self.compare_geometries(i, &old.geometry, &new.geometry, &mut text)? != 0
        };

        if diff_found || self.report_identical {
            out.push_str(&text);
        }

        Ok(usize::from(diff_found))
    }

    fn compare_geometries(&self, i: usize, old: &Geometry, new: &Geometry, out: &mut String) -> Result<usize> {
        match (old, new) {
            (Geometry::MultiPolygon(p_old), Geometry::MultiPolygon(p_new)) => {
                let mut n_diff = 0;
                if p_old.0.len() != p_new.0.len() {
                    writeln!(out, "Numbers of polygons differ: {} {}", p_old.0.len(), p_new.0.len())?;
                    n_diff += 1;
                }
                for (j, (a, b)) in p_old.0.iter().zip(&p_new.0).enumerate() {
                    n_diff += self.compare_poly(i, Some(j), a, b, out)?;
                }
                Ok(n_diff)
            }
            (Geometry::Polygon(a), Geometry::Polygon(b)) => self.compare_poly(i, None, a, b, out),
            (Geometry::Point(a), Geometry::Point(b)) => {
                let rel = [(b.x / a.x - 1.0).abs(), (b.y / a.y - 1.0).abs()];
                writeln!(out, "Absolute value of relative difference: [{} {}]", rel[0], rel[1])?;
                Ok(usize::from(rel.iter().any(|d| *d > self.tolerance)))
            }
            (a, b) if a.type_name() == b.type_name() => {
                writeln!(out, "Geometry type not supported: {}", a.type_name())?;
                Ok(1)
            }
            (a, b) => {
                writeln!(out, "Geometry types differ: {} {}", a.type_name(), b.type_name())?;
                Ok(1)
            }
        }
    }

    fn compare_poly(
        &self,
        shape: usize,
        part: Option<usize>,
        old: &Polygon<f64>,
        new: &Polygon<f64>,
        out: &mut String,
    ) -> Result<usize> {
        let label = RingLabel {
            shape,
            part,
            interior: None,
        };
        let mut n_diff = self.compare_rings(label, old.exterior(), new.exterior(), out)?;

        if old.interiors().len() != new.interiors().len() {
            writeln!(
                out,
                "Numbers of interior rings differ: {} {}",
                old.interiors().len(),
                new.interiors().len()
            )?;
            n_diff += 1;
        }

        for (k, (a, b)) in old.interiors().iter().zip(new.interiors()).enumerate() {
            let label = RingLabel {
                interior: Some(k),
                ..label
            };
            n_diff += self.compare_rings(label, a, b, out)?;
        }

        Ok(n_diff)
    }

    fn compare_rings(
        &self,
        label: RingLabel,
        old: &LineString<f64>,
        new: &LineString<f64>,
        out: &mut String,
    ) -> Result<usize> {
        write!(out, "\nShape {}", label.shape)?;
        if let Some(j) = label.part {
            write!(out, ", part {}", j)?;
        }
        match label.interior {
            None => writeln!(out, ", exterior:")?,
            Some(k) => writeln!(out, ", interior {}:", k)?,
        }

        if rings_equal(old, new) {
            writeln!(out, "This is just a difference by permutation or ordering.")?;
            return Ok(0);
        }

        if old.0.len() != new.0.len() {
            writeln!(out, "Numbers of points differ: {} {}", old.0.len(), new.0.len())?;
        }

        match (ring_validity(old), ring_validity(new)) {
            (None, None) => {
                let p_old = Polygon::new(old.clone(), Vec::new());
                let p_new = Polygon::new(new.clone(), Vec::new());
                let area_old = p_old.unsigned_area();

                if area_old == 0.0 {
                    writeln!(out, "Area of old shape is 0.")?;
                    writeln!(out, "Note this should never be in a polygon shapefile.")?;
                    return Ok(1);
                }

                let ratio = p_new.xor(&p_old).unsigned_area() / area_old;
                if ratio <= self.tolerance {
                    writeln!(out, "Negligible difference")?;
                    Ok(0)
                } else {
                    writeln!(out, "Area of symmetric difference / area of old shape: {}", ratio)?;
                    Ok(1)
                }
            }
            (old_reason, new_reason) => {
                writeln!(out, "Cannot compute symmetric difference.")?;
                writeln!(out, "old: {}", old_reason.as_deref().unwrap_or("Valid Geometry"))?;
                writeln!(out, "new: {}", new_reason.as_deref().unwrap_or("Valid Geometry"))?;
                Ok(1)
            }
        }
    }
}

/// Vertices of a ring without the closing vertex and without repeated consecutive vertices
fn ring_vertices(ring: &LineString<f64>) -> Vec<Coord<f64>> {
    let mut vertices: Vec<Coord<f64>> = Vec::with_capacity(ring.0.len());
    for c in &ring.0 {
        if vertices.last() != Some(c) {
            vertices.push(*c);
        }
    }
    if vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }
    vertices
}

/// Equality of two rings as point sets: same cycle of vertices up to rotation and direction.
pub fn rings_equal(a: &LineString<f64>, b: &LineString<f64>) -> bool {
    let va = ring_vertices(a);
    let vb = ring_vertices(b);

    if va.len() != vb.len() {
        return false;
    }
    if va.is_empty() {
        return true;
    }

    let n = va.len();
    let reversed: Vec<Coord<f64>> = vb.iter().rev().copied().collect();

    (0..n).any(|shift| {
        (0..n).all(|i| va[i] == vb[(i + shift) % n]) || (0..n).all(|i| va[i] == reversed[(i + shift) % n])
    })
}

/// Why a ring is not a valid linear ring, or `None` if it is.
pub fn ring_validity(ring: &LineString<f64>) -> Option<String> {
    if let Some(c) = ring.0.iter().find(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Some(format!("Invalid Coordinate[{} {}]", c.x, c.y));
    }

    if ring.0.len() < 4 {
        return Some("Too few points in geometry component".to_string());
    }

    if ring.0.first() != ring.0.last() {
        return Some("Ring not closed".to_string());
    }

    let mut closed = ring_vertices(ring);
    if closed.len() < 3 {
        return Some("Too few points in geometry component".to_string());
    }
    closed.push(closed[0]);

    let segments: Vec<Line<f64>> = closed.windows(2).map(|w| Line::new(w[0], w[1])).collect();
    let n = segments.len();

    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            match line_intersection(segments[i], segments[j]) {
                None => {}
                Some(LineIntersection::SinglePoint { .. }) if adjacent => {}
                Some(LineIntersection::SinglePoint { intersection, .. }) => {
                    return Some(format!("Ring Self-intersection[{} {}]", intersection.x, intersection.y));
                }
                Some(LineIntersection::Collinear { intersection }) => {
                    return Some(format!(
                        "Ring Self-intersection[{} {}]",
                        intersection.start.x, intersection.start.y
                    ));
                }
            }
        }
    }

    None
}
