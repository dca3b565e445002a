use std::f64::consts::PI;
use std::sync::Arc;

use nalgebra::DMatrix;
use nsmc::sampler::DrawStats;
use nsmc::{Ellipsoid, EllipsoidSampler, EuclideanMetric};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn unit_circle(centre: [f64; 2]) -> Ellipsoid {
    Ellipsoid::from_covariance(centre.to_vec(), DMatrix::identity(2, 2), 0.0).unwrap()
}

#[test]
fn identical_ellipsoids_sample_like_one() {
    let sampler = EllipsoidSampler::from_ellipsoids(
        Arc::new(EuclideanMetric),
        vec![unit_circle([0.0, 0.0]), unit_circle([0.0, 0.0])],
    );
    let rng = &mut ChaCha8Rng::seed_from_u64(21);
    let mut stats = DrawStats::default();
    let ndraws = 40_000;
    let mut quadrant = 0;
    let mut inner = 0;
    for _ in 0..ndraws {
        let (_, point) = sampler.draw_candidate(rng, &mut stats).unwrap();
        if point[0] > 0.0 && point[1] > 0.0 {
            quadrant += 1;
        }
        if point[0].hypot(point[1]) < 0.5 {
            inner += 1;
        }
    }
    let quadrant = quadrant as f64 / ndraws as f64;
    let inner = inner as f64 / ndraws as f64;
    assert!((quadrant - 0.25).abs() < 0.25 * 0.05, "{quadrant}");
    assert!((inner - 0.25).abs() < 0.25 * 0.05, "{inner}");
    // every proposal lies in both ellipsoids, so half are dropped
    let rejected = stats.overlap_rejections as f64 / stats.proposals as f64;
    assert!((rejected - 0.5).abs() < 0.02, "{rejected}");
    assert!((stats.ln_union_volume(sampler.ln_total_volume()) - PI.ln()).abs() < 0.03);
}

#[test]
fn lens_of_overlapping_circles_matches_area_ratio() {
    let sampler = EllipsoidSampler::from_ellipsoids(
        Arc::new(EuclideanMetric),
        vec![unit_circle([0.0, 0.0]), unit_circle([1.0, 0.0])],
    );
    assert_eq!(sampler.neighbours(0), &[1]);
    let lens = 2.0 * 0.5_f64.acos() - 0.5 * 3.0_f64.sqrt();
    let union = 2.0 * PI - lens;
    let expected = lens / union;

    let rng = &mut ChaCha8Rng::seed_from_u64(22);
    let mut stats = DrawStats::default();
    let ndraws = 40_000;
    let in_lens = (0..ndraws)
        .filter(|_| {
            let (_, point) = sampler.draw_candidate(rng, &mut stats).unwrap();
            sampler.coverage(&point) == 2
        })
        .count();
    let fraction = in_lens as f64 / ndraws as f64;
    assert!(
        (fraction - expected).abs() < expected * 0.05,
        "lens fraction {fraction}, expected {expected}"
    );
    let ln_union = stats.ln_union_volume(sampler.ln_total_volume());
    assert!((ln_union - union.ln()).abs() < 0.02, "{ln_union}");
}

#[test]
fn draws_from_disjoint_ellipsoids_follow_volume() {
    let big = Ellipsoid::from_covariance(vec![0.0, 0.0], DMatrix::from_diagonal_element(2, 2, 9.0), 0.0)
        .unwrap();
    let sampler = EllipsoidSampler::from_ellipsoids(
        Arc::new(EuclideanMetric),
        vec![big, unit_circle([10.0, 0.0])],
    );
    let rng = &mut ChaCha8Rng::seed_from_u64(23);
    let mut stats = DrawStats::default();
    let ndraws = 20_000;
    let from_small = (0..ndraws)
        .filter(|_| sampler.draw_candidate(rng, &mut stats).unwrap().0 == 1)
        .count();
    let fraction = from_small as f64 / ndraws as f64;
    assert!((fraction - 0.1).abs() < 0.01, "{fraction}");
    assert_eq!(stats.overlap_rejections, 0);
}
