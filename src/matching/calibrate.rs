/// Score calibration
///
/// Converts backend-native scores to [0, 1] so every stage can be compared
/// against the configured cutoffs.

/// Clamp to [0, 1]; NaN becomes 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Min-max normalize a set of values to [0, 1].
///
/// With a single value or all values equal, returns 1.0 for all
/// (used when every value carries the same signal).
pub fn normalize(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return vec![];
    }
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    if (max - min).abs() < f64::EPSILON {
        return vec![1.0; values.len()];
    }

    values.iter().map(|v| (v - min) / (max - min)).collect()
}

/// Min-max normalization anchored at 0 and a query ceiling.
///
/// `ceiling` is the score the query would get against a document identical to
/// itself: a perfect lexical match maps to 1.0, a partial overlap to the share
/// of that ceiling it reaches. The ceiling is raised to the largest raw score
/// so nothing exceeds 1.0. Unlike plain min-max over the candidate pool, a lone
/// weak candidate stays weak.
pub fn anchored(raw: &[f64], ceiling: f64) -> Vec<f64> {
    let top = raw.iter().cloned().fold(ceiling, f64::max);
    if top <= 0.0 || !top.is_finite() {
        return vec![0.0; raw.len()];
    }
    let mut with_anchors = Vec::with_capacity(raw.len() + 2);
    with_anchors.push(0.0);
    with_anchors.push(top);
    with_anchors.extend(raw.iter().map(|v| v.max(0.0)));
    normalize(&with_anchors).split_off(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_basic() {
        let result = normalize(&[1.0, 2.0, 3.0]);
        assert!((result[0] - 0.0).abs() < 1e-10);
        assert!((result[1] - 0.5).abs() < 1e-10);
        assert!((result[2] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_normalize_all_equal() {
        assert_eq!(normalize(&[5.0, 5.0, 5.0]), vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize(&[]).is_empty());
    }

    #[test]
    fn test_anchored_perfect_match_is_one() {
        let scores = anchored(&[4.0, 2.0], 4.0);
        assert!((scores[0] - 1.0).abs() < 1e-10);
        assert!((scores[1] - 0.5).abs() < 1e-10);
    }

    #[test]
    fn test_anchored_lone_weak_candidate_stays_weak() {
        // Plain min-max would report 1.0 for a single candidate.
        let scores = anchored(&[1.0], 5.0);
        assert!((scores[0] - 0.2).abs() < 1e-10);
    }

    #[test]
    fn test_anchored_never_exceeds_one() {
        let scores = anchored(&[6.0, 3.0], 4.0);
        assert!((scores[0] - 1.0).abs() < 1e-10);
        assert!((scores[1] - 0.5).abs() < 1e-10);
    }

    #[test]
    fn test_anchored_zero_ceiling() {
        assert_eq!(anchored(&[0.0], 0.0), vec![0.0]);
    }

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(1.2), 1.0);
        assert_eq!(clamp_unit(-0.3), 0.0);
        assert_eq!(clamp_unit(0.42), 0.42);
    }
}
