use nsmc::{Clusterer, EuclideanMetric, KmeansClusterer};
use rand::distributions::Distribution;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use statrs::distribution::Normal;

fn blob(centre: [f64; 2], n: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f64>> {
    let noise = Normal::new(0.0, 1.0).unwrap();
    (0..n)
        .map(|_| {
            vec![
                centre[0] + noise.sample(rng),
                centre[1] + noise.sample(rng),
            ]
        })
        .collect()
}

#[test]
fn two_separated_blobs_give_two_clusters() {
    let clusterer = KmeansClusterer::new(EuclideanMetric, 1, 5, 10, 0.01);
    let mut found = 0;
    for seed in 0..100 {
        let rng = &mut ChaCha8Rng::seed_from_u64(seed);
        let mut points = blob([0.0, 0.0], 150, rng);
        points.extend(blob([12.0, 12.0], 150, rng));
        let partition = clusterer.partition(&points, rng);
        if partition.nclusters == 2 {
            found += 1;
            // the blobs must not be mixed
            assert!(partition.assignments[..150]
                .iter()
                .all(|&c| c == partition.assignments[0]));
            assert!(partition.assignments[150..]
                .iter()
                .all(|&c| c == partition.assignments[150]));
            assert_ne!(partition.assignments[0], partition.assignments[150]);
        }
    }
    assert!(found >= 95, "two clusters found in {found} of 100 runs");
}

#[test]
fn single_blob_stays_whole() {
    let clusterer = KmeansClusterer::new(EuclideanMetric, 1, 5, 10, 0.01);
    let mut single = 0;
    for seed in 0..20 {
        let rng = &mut ChaCha8Rng::seed_from_u64(1_000 + seed);
        let points = blob([3.0, -3.0], 300, rng);
        if clusterer.partition(&points, rng).nclusters == 1 {
            single += 1;
        }
    }
    assert!(single >= 18, "{single}");
}

#[test]
fn minimum_cluster_count_is_respected() {
    let clusterer = KmeansClusterer::new(EuclideanMetric, 3, 4, 5, 0.01);
    let rng = &mut ChaCha8Rng::seed_from_u64(3);
    let points = blob([0.0, 0.0], 100, rng);
    let partition = clusterer.partition(&points, rng);
    assert!((3..=4).contains(&partition.nclusters));
    assert_eq!(partition.cluster_sizes().iter().sum::<usize>(), 100);
    assert!(partition.cluster_sizes().iter().all(|&size| size > 0));
}

#[test]
fn too_few_points_fall_back_to_one_cluster() {
    let clusterer = KmeansClusterer::new(EuclideanMetric, 2, 5, 5, 0.01);
    let rng = &mut ChaCha8Rng::seed_from_u64(4);
    let partition = clusterer.partition(&[vec![1.0, 1.0]], rng);
    assert_eq!(partition.nclusters, 1);
    assert_eq!(partition.assignments, vec![0]);
}
