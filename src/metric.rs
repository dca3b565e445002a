/// Distance over parameter space.
///
/// Implementations must be symmetric, non-negative and zero only for identical
/// points, otherwise the clusterer's assignments are meaningless.
pub trait Metric {
    fn distance(&self, a: &[f64], b: &[f64]) -> f64;

    fn distance_squared(&self, a: &[f64], b: &[f64]) -> f64 {
        self.distance(a, b).powi(2)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMetric;

impl Metric for EuclideanMetric {
    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        self.distance_squared(a, b).sqrt()
    }

    fn distance_squared(&self, a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn pythagoras() {
        assert_eq!(EuclideanMetric.distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0);
    }

    proptest! {
        #[test]
        fn euclidean_axioms(
            a in prop::collection::vec((-1000i32..1000).prop_map(|v| f64::from(v) / 8.0), 3),
            b in prop::collection::vec((-1000i32..1000).prop_map(|v| f64::from(v) / 8.0), 3),
        ) {
            let metric = EuclideanMetric;
            let ab = metric.distance(&a, &b);
            prop_assert!(ab >= 0.0);
            prop_assert_eq!(ab, metric.distance(&b, &a));
            prop_assert_eq!(metric.distance(&a, &a), 0.0);
            if a != b {
                prop_assert!(ab > 0.0);
            }
        }
    }
}
