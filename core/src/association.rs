//! Nearest-neighbor data association.
use crate::measurements::LandmarkObservation;

/// Assign every observation the id of the closest candidate by Euclidean distance.
///
/// Both sequences must be in the same frame. Ties go to the first candidate reaching the minimum, so the
/// result depends on candidate order but never on chance. Positions are left untouched. With no candidates
/// the observations keep whatever id they had (normally `None`), which callers treat as "no match".
///
/// # Example
/// ```rust
/// use localizer::association::nearest_neighbor;
/// use localizer::measurements::LandmarkObservation;
///
/// let candidates = vec![
///     LandmarkObservation::with_id(1, 0.0, 0.0),
///     LandmarkObservation::with_id(2, 10.0, 10.0),
/// ];
/// let mut observations = vec![LandmarkObservation::new(1.0, 1.0)];
/// nearest_neighbor(&candidates, &mut observations);
/// assert_eq!(observations[0].id, Some(1));
/// ```
pub fn nearest_neighbor(candidates: &[LandmarkObservation], observations: &mut [LandmarkObservation]) {
    for observation in observations.iter_mut() {
        let mut min_distance = f64::MAX;
        for candidate in candidates {
            let distance = observation.distance_to(candidate);
            if distance < min_distance {
                min_distance = distance;
                observation.id = candidate.id;
            }
        }
    }
}
