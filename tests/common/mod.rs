use camino::Utf8PathBuf;
use nalgebra::DMatrix;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Width of the synthetic test schema: 3 supernova parameters followed by
/// two host covariates.
pub const TEST_DIM: usize = 5;

/// Centers of the two synthetic host populations.
pub const CLUSTER_A: [f64; TEST_DIM] = [0.0, -1.0, 0.5, 0.3, 1.0];
pub const CLUSTER_B: [f64; TEST_DIM] = [4.0, 2.0, -0.5, 0.8, 3.0];

/// Two well-separated Gaussian populations with per-sample diagonal
/// measurement covariance, reproducible from `seed`.
pub fn synthetic_hosts(
    n_per_cluster: usize,
    seed: u64,
) -> (DMatrix<f64>, Vec<DMatrix<f64>>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = 2 * n_per_cluster;
    let mut x = DMatrix::zeros(n, TEST_DIM);
    for i in 0..n {
        let center = if i < n_per_cluster { CLUSTER_A } else { CLUSTER_B };
        for j in 0..TEST_DIM {
            let noise: f64 = rng.sample(StandardNormal);
            x[(i, j)] = center[j] + 0.3 * noise;
        }
    }
    let xerr = vec![DMatrix::identity(TEST_DIM, TEST_DIM) * 0.01; n];
    (x, xerr)
}

/// Unique scratch path for a persisted model.
pub fn scratch_model_path(name: &str) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(std::env::temp_dir())
        .expect("temp dir is not valid UTF-8")
        .join(format!("snhost_it_{name}_{}.json", std::process::id()))
}
