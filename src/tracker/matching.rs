//! Matching utilities for detection-to-track association.

use ndarray::Array2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentResult {
    /// `(track_index, detection_index)` pairs, ordered by track index.
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

/// Greedy best-match assignment over an IoU similarity matrix of shape
/// `(tracks, detections)`.
///
/// Each detection picks the track with the highest IoU strictly above
/// `thresh`; ties keep the earliest track. When several detections pick the
/// same track, only the highest-scoring one keeps it (ties keep the earliest
/// detection) and the rest are reported unmatched. This is not a globally
/// optimal assignment.
pub fn greedy_assignment(ious: &Array2<f32>, thresh: f32) -> AssignmentResult {
    let (num_tracks, num_dets) = ious.dim();

    let mut choice: Vec<Option<(usize, f32)>> = vec![None; num_dets];
    for (det_idx, best) in choice.iter_mut().enumerate() {
        for track_idx in 0..num_tracks {
            let iou = ious[[track_idx, det_idx]];
            if iou > thresh && best.is_none_or(|(_, best_iou)| iou > best_iou) {
                *best = Some((track_idx, iou));
            }
        }
    }

    let mut owner: Vec<Option<(usize, f32)>> = vec![None; num_tracks];
    for (det_idx, picked) in choice.iter().enumerate() {
        if let Some((track_idx, iou)) = *picked {
            let slot = &mut owner[track_idx];
            if slot.is_none_or(|(_, held)| iou > held) {
                *slot = Some((det_idx, iou));
            }
        }
    }

    let mut matches = Vec::new();
    let mut unmatched_tracks = Vec::new();
    let mut det_matched = vec![false; num_dets];
    for (track_idx, slot) in owner.iter().enumerate() {
        match slot {
            Some((det_idx, _)) => {
                matches.push((track_idx, *det_idx));
                det_matched[*det_idx] = true;
            }
            None => unmatched_tracks.push(track_idx),
        }
    }

    let unmatched_detections = det_matched
        .iter()
        .enumerate()
        .filter_map(|(i, &m)| if m { None } else { Some(i) })
        .collect();

    AssignmentResult {
        matches,
        unmatched_tracks,
        unmatched_detections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_empty_inputs() {
        let no_tracks = Array2::<f32>::zeros((0, 3));
        let res = greedy_assignment(&no_tracks, 0.5);
        assert!(res.matches.is_empty());
        assert_eq!(res.unmatched_detections, vec![0, 1, 2]);

        let no_dets = Array2::<f32>::zeros((2, 0));
        let res = greedy_assignment(&no_dets, 0.5);
        assert_eq!(res.unmatched_tracks, vec![0, 1]);
        assert!(res.unmatched_detections.is_empty());
    }

    #[test]
    fn test_threshold_is_strict() {
        let ious = array![[0.5_f32]];
        let res = greedy_assignment(&ious, 0.5);
        assert!(res.matches.is_empty());
        assert_eq!(res.unmatched_detections, vec![0]);
    }

    #[test]
    fn test_picks_highest_track() {
        // rows: tracks, cols: detections
        let ious = array![[0.6_f32], [0.9], [0.7]];
        let res = greedy_assignment(&ious, 0.5);
        assert_eq!(res.matches, vec![(1, 0)]);
        assert_eq!(res.unmatched_tracks, vec![0, 2]);
    }

    #[test]
    fn test_track_tie_keeps_earliest() {
        let ious = array![[0.8_f32], [0.8]];
        let res = greedy_assignment(&ious, 0.5);
        assert_eq!(res.matches, vec![(0, 0)]);
    }

    #[test]
    fn test_contention_keeps_best_detection() {
        // Both detections prefer track 0; detection 1 overlaps it more.
        let ious = array![[0.6_f32, 0.8]];
        let res = greedy_assignment(&ious, 0.5);
        assert_eq!(res.matches, vec![(0, 1)]);
        assert_eq!(res.unmatched_detections, vec![0]);
    }

    #[test]
    fn test_contention_tie_keeps_earliest_detection() {
        let ious = array![[0.7_f32, 0.7]];
        let res = greedy_assignment(&ious, 0.5);
        assert_eq!(res.matches, vec![(0, 0)]);
        assert_eq!(res.unmatched_detections, vec![1]);
    }
}
