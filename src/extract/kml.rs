use geo_types::{Coord, Geometry, LineString, Point, Polygon};
use roxmltree::{Document, Node};

use super::ExtractReport;
use crate::error::ExtractError;
use crate::record::{AttributeMap, AttributedGeometry};

/// Namespace assumed when the root element carries none.
pub const KML_NAMESPACE: &str = "http://www.opengis.net/kml/2.2";

/// Parse KML text and extract its placemarks.
pub fn parse_kml(text: &str) -> Result<(Vec<AttributedGeometry>, ExtractReport), ExtractError> {
    let doc = Document::parse(text)?;
    Ok(extract(&doc))
}

/// Extract every placemark with usable coordinates from a parsed tree.
pub fn extract(doc: &Document) -> (Vec<AttributedGeometry>, ExtractReport) {
    let root = doc.root_element();
    let namespace = root
        .tag_name()
        .namespace()
        .or_else(|| root.lookup_namespace_uri(None))
        .unwrap_or(KML_NAMESPACE)
        .to_string();
    let matcher = Matcher {
        namespace: &namespace,
    };

    let mut report = ExtractReport {
        namespace: namespace.clone(),
        ..Default::default()
    };
    let mut features = Vec::new();

    for placemark in root.descendants().filter(|n| matcher.is(n, "Placemark")) {
        report.placemarks += 1;
        let name = matcher
            .first(placemark, "name")
            .and_then(|n| n.text())
            .map(|s| s.trim().to_string());

        let Some((geometry, elevation)) = matcher.geometry(placemark) else {
            tracing::warn!("Extract: placemark {:?} has no geometry, skipping", name);
            report.skipped_without_geometry += 1;
            report.skipped_names.push(name);
            continue;
        };
        match geometry {
            Geometry::Point(_) => report.points += 1,
            Geometry::LineString(_) => report.linestrings += 1,
            _ => report.polygons += 1,
        }

        let timestamp_raw = matcher
            .first(placemark, "when")
            .and_then(|n| n.text())
            .map(|s| s.trim().to_string());

        let attributes = matcher.attributes(placemark);
        tracing::debug!(
            "Extract: placemark {:?} with {} attributes",
            name,
            attributes.len()
        );

        features.push(AttributedGeometry {
            name,
            geometry,
            elevation,
            timestamp_raw,
            attributes,
        });
    }

    report.extracted = features.len();
    tracing::info!(
        "Extract: {} placemarks, {} extracted, {} skipped without geometry (namespace {})",
        report.placemarks,
        report.extracted,
        report.skipped_without_geometry,
        report.namespace
    );
    (features, report)
}

struct Matcher<'n> {
    namespace: &'n str,
}

impl Matcher<'_> {
    /// Elements in the resolved namespace match, as do un-namespaced ones.
    fn is(&self, node: &Node, local: &str) -> bool {
        if !node.is_element() || node.tag_name().name() != local {
            return false;
        }
        match node.tag_name().namespace() {
            Some(ns) => ns == self.namespace,
            None => true,
        }
    }

    fn first<'a, 'input>(&self, scope: Node<'a, 'input>, local: &str) -> Option<Node<'a, 'input>> {
        scope.descendants().skip(1).find(|n| self.is(n, local))
    }

    fn all<'a, 'input: 'a>(
        &'a self,
        scope: Node<'a, 'input>,
        local: &'a str,
    ) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
        scope.descendants().skip(1).filter(move |n| self.is(n, local))
    }

    fn coordinates_text<'a>(&self, scope: Node<'a, '_>) -> Option<&'a str> {
        self.first(scope, "coordinates").and_then(|n| n.text())
    }

    /// Point, then LineString, then Polygon; the first one that parses wins.
    fn geometry(&self, placemark: Node) -> Option<(Geometry<f64>, Option<f64>)> {
        if let Some(point) = self.first(placemark, "Point")
            && let Some(text) = self.coordinates_text(point)
            && let Ok(tuples) = parse_coordinates(text)
            && let Some(first) = tuples.first()
        {
            return Some((Geometry::Point(Point::from(first.coord)), first.altitude));
        }

        if let Some(line) = self.first(placemark, "LineString")
            && let Some(text) = self.coordinates_text(line)
            && let Ok(tuples) = parse_coordinates(text)
            && tuples.len() >= 2
        {
            let coords: Vec<Coord<f64>> = tuples.iter().map(|t| t.coord).collect();
            return Some((Geometry::LineString(LineString::from(coords)), None));
        }

        if let Some(polygon) = self.first(placemark, "Polygon")
            && let Some(polygon) = self.polygon(polygon)
        {
            return Some((Geometry::Polygon(polygon), None));
        }

        None
    }

    fn polygon(&self, node: Node) -> Option<Polygon<f64>> {
        let outer_text = match self.first(node, "outerBoundaryIs") {
            Some(outer) => self.coordinates_text(outer)?,
            None => self.coordinates_text(node)?,
        };
        let exterior = ring(outer_text)?;
        let interiors = self
            .all(node, "innerBoundaryIs")
            .filter_map(|inner| self.coordinates_text(inner))
            .filter_map(ring)
            .collect();
        // Polygon::new closes open rings.
        Some(Polygon::new(exterior, interiors))
    }

    /// SimpleData under any SchemaData, plus Data/value pairs. Last write wins.
    fn attributes(&self, placemark: Node) -> AttributeMap {
        let mut attributes = AttributeMap::new();
        for node in placemark.descendants().skip(1) {
            if self.is(&node, "SimpleData") {
                if let Some(key) = node.attribute("name") {
                    attributes.insert(key, node.text().map(str::to_string));
                }
            } else if self.is(&node, "Data")
                && let Some(key) = node.attribute("name")
            {
                let value = self
                    .first(node, "value")
                    .and_then(|v| v.text())
                    .map(str::to_string);
                attributes.insert(key, value);
            }
        }
        attributes
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Tuple {
    coord: Coord<f64>,
    altitude: Option<f64>,
}

/// Parse whitespace-separated `lon,lat[,alt]` tuples.
fn parse_coordinates(text: &str) -> Result<Vec<Tuple>, std::num::ParseFloatError> {
    text.split_whitespace()
        .map(|tuple| {
            let mut parts = tuple.split(',').map(str::trim);
            let x = parts.next().unwrap_or_default().parse::<f64>()?;
            let y = parts.next().unwrap_or_default().parse::<f64>()?;
            let altitude = match parts.next() {
                Some(z) if !z.is_empty() => Some(z.parse::<f64>()?),
                _ => None,
            };
            Ok(Tuple {
                coord: Coord { x, y },
                altitude,
            })
        })
        .collect()
}

fn ring(text: &str) -> Option<LineString<f64>> {
    let tuples = parse_coordinates(text).ok()?;
    if tuples.len() < 3 {
        return None;
    }
    Some(LineString::from(
        tuples.iter().map(|t| t.coord).collect::<Vec<_>>(),
    ))
}
