//! Jaccard-distance admission for k-diverse results.

use std::collections::HashSet;

use wikipath_core::normalize;

/// `1 − |A∩B| / |A∪B|` over the normalized title sets of two paths.
pub fn jaccard_distance(a: &[String], b: &[String]) -> f64 {
    let sa: HashSet<String> = a.iter().map(|t| normalize(t)).collect();
    let sb: HashSet<String> = b.iter().map(|t| normalize(t)).collect();
    let union = sa.union(&sb).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = sa.intersection(&sb).count();
    1.0 - (intersection as f64 / union as f64)
}

/// Smallest distance from `candidate` to any admitted path; `None` when
/// nothing is admitted yet.
pub fn min_distance(candidate: &[String], admitted: &[Vec<String>]) -> Option<f64> {
    admitted
        .iter()
        .map(|p| jaccard_distance(candidate, p))
        .fold(None, |acc: Option<f64>, d| {
            Some(acc.map_or(d, |a| a.min(d)))
        })
}

/// A candidate joins the result set only if it keeps at least
/// `min_diversity` distance to every path admitted before it.
pub fn is_admissible(candidate: &[String], admitted: &[Vec<String>], min_diversity: f64) -> bool {
    min_distance(candidate, admitted).map_or(true, |d| d >= min_diversity)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(titles: &[&str]) -> Vec<String> {
        titles.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn identical_paths_have_zero_distance() {
        let a = path(&["A", "B", "C"]);
        let b = path(&["a", "b", "C"]);
        assert_eq!(jaccard_distance(&a, &b), 0.0);
    }

    #[test]
    fn disjoint_interiors_share_only_endpoints() {
        let a = path(&["A", "B", "Z"]);
        let b = path(&["A", "C", "Z"]);
        // {a,b,z} vs {a,c,z}: 2 shared of 4 total.
        assert!((jaccard_distance(&a, &b) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn admission_is_inclusive_at_the_threshold() {
        let admitted = vec![path(&["A", "B", "Z"])];
        assert!(is_admissible(&path(&["A", "C", "Z"]), &admitted, 0.5));
        assert!(!is_admissible(&path(&["A", "B", "X", "Z"]), &admitted, 0.5));
        // First candidate is always admissible.
        assert!(is_admissible(&path(&["A", "B", "Z"]), &[], 1.0));
    }

    #[test]
    fn min_distance_takes_the_closest_path() {
        let admitted = vec![path(&["A", "B", "Z"]), path(&["A", "C", "Z"])];
        let d = min_distance(&path(&["A", "B", "W", "Z"]), &admitted).unwrap();
        // Closest is [A,B,Z]: 3 shared of 4 total.
        assert!((d - 0.25).abs() < 1e-9);
    }
}
