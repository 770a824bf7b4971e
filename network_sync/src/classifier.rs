use crate::boundaries::{BoundaryIndex, Point};
use crate::error::ClassifyError;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::trace;

/// Continental prefilter. Anything outside this box cannot be inside a tracked
/// facility, so no polygon is tested.
pub const MIN_LATITUDE: f64 = 21.0;
pub const MAX_LATITUDE: f64 = 75.0;
pub const MIN_LONGITUDE: f64 = -179.0;
pub const MAX_LONGITUDE: f64 = -50.0;

pub fn within_prefilter(latitude: f64, longitude: f64) -> bool {
    (MIN_LATITUDE..=MAX_LATITUDE).contains(&latitude)
        && (MIN_LONGITUDE..=MAX_LONGITUDE).contains(&longitude)
}

#[derive(Debug, Clone)]
pub struct GeofenceClassifier {
    index: Arc<BoundaryIndex>,
}

impl GeofenceClassifier {
    pub const fn new(index: Arc<BoundaryIndex>) -> Self {
        Self { index }
    }

    pub fn assign(&self, latitude: f64, longitude: f64) -> Option<String> {
        assign_with(&self.index, Point::new(latitude, longitude))
    }

    /// Classifies `points` across a bounded pool of blocking workers. Result `i`
    /// belongs to point `i`.
    ///
    /// The list is cut into contiguous partitions, one per worker. Each worker
    /// fills its own vector and the vectors are concatenated in partition order
    /// once every worker has joined, so nothing is shared while classifying.
    pub async fn assign_parallel(
        &self,
        points: Vec<Point>,
        max_workers: usize,
    ) -> Result<Vec<Option<String>>, ClassifyError> {
        if points.is_empty() {
            return Ok(Vec::new());
        }

        let workers = worker_count(points.len(), max_workers);
        let chunk_size = points.len().div_ceil(workers);
        trace!(points = points.len(), workers, chunk_size, "classifying positions");

        let points = Arc::new(points);
        let mut handles = Vec::with_capacity(workers);
        for start in (0..points.len()).step_by(chunk_size) {
            let end = (start + chunk_size).min(points.len());
            let index = Arc::clone(&self.index);
            let points = Arc::clone(&points);
            handles.push(tokio::task::spawn_blocking(move || {
                points[start..end]
                    .iter()
                    .map(|pt| assign_with(&index, *pt))
                    .collect::<Vec<_>>()
            }));
        }

        let mut assignments = Vec::with_capacity(points.len());
        for handle in handles {
            assignments.extend(handle.await?);
        }

        Ok(assignments)
    }
}

fn assign_with(index: &BoundaryIndex, pt: Point) -> Option<String> {
    if !within_prefilter(pt.latitude, pt.longitude) {
        return None;
    }
    index.classify(pt).map(str::to_string)
}

/// `min(cores, max_workers, len)`, never below one.
pub fn worker_count(len: usize, max_workers: usize) -> usize {
    let cores = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
    cores.min(max_workers).min(len).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> Arc<BoundaryIndex> {
        Arc::new(
            BoundaryIndex::from_json(
                r#"[
                    {"id": "ZDV", "coords": [[-112, 37], [-112, 44], [-102, 44], [-102, 37]]},
                    {"id": "ZAN", "coords": [[-170, 51], [-170, 71], [-130, 71], [-130, 51]]},
                    {"id": "NZZC", "coords": [[166, -48], [166, -34], [179, -34], [179, -48]]}
                ]"#,
            )
            .unwrap(),
        )
    }

    #[test]
    fn prefilter_bounds_are_inclusive() {
        assert!(within_prefilter(21.0, -179.0));
        assert!(within_prefilter(75.0, -50.0));
        assert!(!within_prefilter(20.99, -100.0));
        assert!(!within_prefilter(40.0, -49.9));
        assert!(!within_prefilter(40.0, 10.0));
    }

    #[test]
    fn assign_returns_facility_inside_continent() {
        let classifier = GeofenceClassifier::new(index());

        assert_eq!(classifier.assign(39.86, -104.67).as_deref(), Some("ZDV"));
        assert_eq!(classifier.assign(61.17, -150.0).as_deref(), Some("ZAN"));
        assert_eq!(classifier.assign(35.0, -90.0), None);
    }

    #[test]
    fn assign_skips_polygons_outside_prefilter() {
        // NZZC contains this point, but it is outside the continental box
        let classifier = GeofenceClassifier::new(index());

        assert_eq!(classifier.assign(-41.0, 174.0), None);
    }

    #[test]
    fn worker_count_is_bounded() {
        assert_eq!(worker_count(1, 8), 1);
        assert_eq!(worker_count(100, 1), 1);
        assert_eq!(worker_count(100, 0), 1);
        assert!(worker_count(100, 4) <= 4);
    }

    #[tokio::test]
    async fn parallel_assignment_preserves_input_order() {
        let classifier = GeofenceClassifier::new(index());
        let points: Vec<Point> = (0..250)
            .map(|i| match i % 3 {
                0 => Point::new(39.86, -104.67),
                1 => Point::new(61.17, -150.0),
                _ => Point::new(-41.0, 174.0),
            })
            .collect();

        let expected: Vec<Option<String>> = points
            .iter()
            .map(|pt| classifier.assign(pt.latitude, pt.longitude))
            .collect();
        let actual = classifier.assign_parallel(points, 4).await.unwrap();

        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn parallel_assignment_of_nothing_is_empty() {
        let classifier = GeofenceClassifier::new(index());

        assert!(classifier.assign_parallel(Vec::new(), 4).await.unwrap().is_empty());
    }
}
