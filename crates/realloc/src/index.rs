use geo::{BoundingRect, MultiPolygon};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};

type Envelope = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// Bounding-box index over a polygon set. Candidates only; exact overlap is
/// decided by the intersection area.
pub struct EnvelopeIndex {
    tree: RTree<Envelope>,
}

fn corners(geometry: &MultiPolygon<f64>) -> Option<([f64; 2], [f64; 2])> {
    let rect = geometry.bounding_rect()?;
    Some(([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]))
}

impl EnvelopeIndex {
    pub fn build<'a>(geometries: impl IntoIterator<Item = &'a MultiPolygon<f64>>) -> Self {
        let entries: Vec<Envelope> = geometries
            .into_iter()
            .enumerate()
            .filter_map(|(i, g)| {
                let (lo, hi) = corners(g)?;
                Some(GeomWithData::new(Rectangle::from_corners(lo, hi), i))
            })
            .collect();
        Self { tree: RTree::bulk_load(entries) }
    }

    /// Positions of indexed geometries whose envelope touches `geometry`'s,
    /// in ascending order.
    pub fn candidates(&self, geometry: &MultiPolygon<f64>) -> Vec<usize> {
        let Some((lo, hi)) = corners(geometry) else {
            return Vec::new();
        };
        let query = AABB::from_corners(lo, hi);
        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&query)
            .map(|e| e.data)
            .collect();
        hits.sort_unstable();
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, MultiPolygon};

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: x0, y: y0),
            (x: x1, y: y0),
            (x: x1, y: y1),
            (x: x0, y: y1),
            (x: x0, y: y0),
        ]])
    }

    #[test]
    fn candidates_are_sorted_and_filtered() {
        let targets = vec![
            rect(10.0, 10.0, 11.0, 11.0),
            rect(0.0, 0.0, 1.0, 1.0),
            rect(1.0, 0.0, 2.0, 1.0),
            rect(50.0, 50.0, 60.0, 60.0),
        ];
        let index = EnvelopeIndex::build(&targets);

        let hits = index.candidates(&rect(0.5, 0.25, 1.5, 0.75));
        assert_eq!(hits, vec![1, 2]);
    }

    #[test]
    fn touching_envelopes_are_candidates() {
        let targets = vec![rect(1.0, 0.0, 2.0, 1.0)];
        let index = EnvelopeIndex::build(&targets);
        assert_eq!(index.candidates(&rect(0.0, 0.0, 1.0, 1.0)), vec![0]);
    }

    #[test]
    fn empty_index() {
        let index = EnvelopeIndex::build(std::iter::empty::<&MultiPolygon<f64>>());
        assert!(index.candidates(&rect(0.0, 0.0, 1.0, 1.0)).is_empty());
    }
}
