//!
//! Initialization collaborators
//!
//! * `dirichlet`: random probability vectors
//! * `kmeans`: k-means++ seeding followed by Lloyd iterations
//! * `sample_normal`: draws from a multivariate normal
//!
//! Every function takes the caller's random generator.
//!
use crate::error::{config_error, Result};
use crate::linalg::cholesky_lower;
use itertools::Itertools;
use ndarray::prelude::*;
use rand::prelude::*;
use statrs::distribution::{Gamma, Normal};

///
/// Draw from `Dirichlet(alpha)` by normalizing `Gamma(alpha_i, 1)` draws.
///
pub fn dirichlet<R: Rng>(alpha: ArrayView1<f64>, rng: &mut R) -> Result<Array1<f64>> {
    let mut x = Array1::<f64>::zeros(alpha.len());
    for (xi, &a) in x.iter_mut().zip(alpha.iter()) {
        let gamma = Gamma::new(a, 1.0).or_else(|e| {
            config_error(format!("invalid dirichlet concentration {}: {}", a, e))
        })?;
        *xi = gamma.sample(rng);
    }
    let total = x.sum();
    if total > 0.0 {
        x /= total;
    } else {
        // every draw underflowed
        let i = rng.gen_range(0..x.len());
        x.fill(0.0);
        x[i] = 1.0;
    }
    Ok(x)
}

///
/// `[n, k]` rows drawn from symmetric `Dirichlet(concentration)`
///
pub fn dirichlet_rows<R: Rng>(
    n: usize,
    k: usize,
    concentration: f64,
    rng: &mut R,
) -> Result<Array2<f64>> {
    let alpha = Array1::from_elem(k, concentration);
    let mut ret = Array2::<f64>::zeros((n, k));
    for mut row in ret.outer_iter_mut() {
        row.assign(&dirichlet(alpha.view(), rng)?);
    }
    Ok(ret)
}

///
/// Result of `kmeans`
///
#[derive(Clone, Debug)]
pub struct KMeans {
    /// `[k, D]`
    pub centers: Array2<f64>,
    /// cluster of each input row
    pub labels: Vec<usize>,
    pub inertia: f64,
}

impl KMeans {
    pub fn counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.centers.nrows()];
        for &l in self.labels.iter() {
            counts[l] += 1;
        }
        counts
    }
}

fn sq_dist(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest(x: ArrayView1<f64>, centers: &Array2<f64>) -> (usize, f64) {
    centers
        .outer_iter()
        .map(|c| sq_dist(x, c))
        .enumerate()
        .fold((0, f64::INFINITY), |best, (i, d)| if d < best.1 { (i, d) } else { best })
}

fn kmeans_plus_plus<R: Rng>(x: ArrayView2<f64>, k: usize, rng: &mut R) -> Array2<f64> {
    let (n, d) = x.dim();
    let mut centers = Array2::<f64>::zeros((k, d));
    centers.row_mut(0).assign(&x.row(rng.gen_range(0..n)));
    let mut dists: Vec<f64> = x.outer_iter().map(|r| sq_dist(r, centers.row(0))).collect();
    for c in 1..k {
        let total: f64 = dists.iter().sum();
        let chosen = if total > 0.0 {
            let threshold = rng.gen::<f64>() * total;
            let mut cumulative = 0.0;
            let mut chosen = n - 1;
            for (i, &dist) in dists.iter().enumerate() {
                cumulative += dist;
                if cumulative >= threshold {
                    chosen = i;
                    break;
                }
            }
            chosen
        } else {
            c % n
        };
        centers.row_mut(c).assign(&x.row(chosen));
        for (i, dist) in dists.iter_mut().enumerate() {
            *dist = dist.min(sq_dist(x.row(i), centers.row(c)));
        }
    }
    centers
}

fn lloyd(x: ArrayView2<f64>, mut centers: Array2<f64>, max_iter: usize) -> KMeans {
    let (n, d) = x.dim();
    let k = centers.nrows();
    let mut labels = vec![usize::MAX; n];
    for _ in 0..max_iter {
        let mut changed = false;
        for (i, row) in x.outer_iter().enumerate() {
            let (best, _) = nearest(row, &centers);
            if labels[i] != best {
                labels[i] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }
        let mut sums = Array2::<f64>::zeros((k, d));
        let mut counts = vec![0usize; k];
        for (i, row) in x.outer_iter().enumerate() {
            let mut s = sums.row_mut(labels[i]);
            s += &row;
            counts[labels[i]] += 1;
        }
        for c in 0..k {
            // empty clusters keep their center
            if counts[c] > 0 {
                let m = &sums.row(c) / counts[c] as f64;
                centers.row_mut(c).assign(&m);
            }
        }
    }
    let inertia = x
        .outer_iter()
        .zip(labels.iter())
        .map(|(row, &l)| sq_dist(row, centers.row(l)))
        .sum();
    KMeans {
        centers,
        labels,
        inertia,
    }
}

///
/// k-means clustering of the rows of `x` into `k` clusters, keeping the best
/// of `n_init` restarts.
///
/// Rows are clustered in lexicographic order, so the result does not depend
/// on how the rows are ordered in `x`.
///
pub fn kmeans<R: Rng>(x: ArrayView2<f64>, k: usize, n_init: usize, rng: &mut R) -> Result<KMeans> {
    let n = x.nrows();
    if k == 0 {
        return config_error("number of clusters must be positive");
    }
    if k > n {
        return config_error(format!("{} clusters requested for {} samples", k, n));
    }
    let order: Vec<usize> = (0..n)
        .sorted_by(|&a, &b| {
            x.row(a)
                .iter()
                .zip(x.row(b).iter())
                .map(|(p, q)| p.partial_cmp(q).unwrap_or(std::cmp::Ordering::Equal))
                .find(|o| *o != std::cmp::Ordering::Equal)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .collect();
    let sorted = x.select(Axis(0), &order);

    let mut best: Option<KMeans> = None;
    for _ in 0..n_init.max(1) {
        let centers = kmeans_plus_plus(sorted.view(), k, rng);
        let result = lloyd(sorted.view(), centers, 300);
        if best.as_ref().map_or(true, |b| result.inertia < b.inertia) {
            best = Some(result);
        }
    }
    let mut result = match best {
        Some(result) => result,
        None => return config_error("k-means produced no result"),
    };
    let mut labels = vec![0; n];
    for (sorted_index, &original) in order.iter().enumerate() {
        labels[original] = result.labels[sorted_index];
    }
    result.labels = labels;
    Ok(result)
}

///
/// `n` draws from `N(mean, cov)`, `[n, D]`
///
pub fn sample_normal<R: Rng>(
    mean: ArrayView1<f64>,
    cov: ArrayView2<f64>,
    n: usize,
    rng: &mut R,
) -> Result<Array2<f64>> {
    let d = mean.len();
    let l = cholesky_lower(cov, "sampling covariance")?;
    let normal = Normal::new(0.0, 1.0).or_else(|e| config_error(e.to_string()))?;
    let mut ret = Array2::<f64>::zeros((n, d));
    for mut row in ret.outer_iter_mut() {
        let z: Array1<f64> = (0..d).map(|_| normal.sample(rng)).collect();
        row.assign(&(&mean + &l.dot(&z)));
    }
    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn dirichlet_is_probability() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let x = dirichlet(array![0.5, 0.5, 0.5].view(), &mut rng).unwrap();
        assert_abs_diff_eq!(x.sum(), 1.0, epsilon = 1e-12);
        assert!(x.iter().all(|&v| v >= 0.0));
        let single = dirichlet(array![0.5].view(), &mut rng).unwrap();
        assert_eq!(single, array![1.0]);
        let rows = dirichlet_rows(3, 4, 0.25, &mut rng).unwrap();
        for row in rows.outer_iter() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-12);
        }
        assert!(dirichlet(array![0.0].view(), &mut rng).is_err());
    }
    #[test]
    fn kmeans_two_blobs() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let x = array![[0.0, 0.1], [10.0, 10.0], [0.2, 0.0], [10.1, 9.9], [0.1, 0.1]];
        let km = kmeans(x.view(), 2, 5, &mut rng).unwrap();
        assert_eq!(km.labels[0], km.labels[2]);
        assert_eq!(km.labels[0], km.labels[4]);
        assert_eq!(km.labels[1], km.labels[3]);
        assert_ne!(km.labels[0], km.labels[1]);
        let mut counts = km.counts();
        counts.sort();
        assert_eq!(counts, vec![2, 3]);
    }
    #[test]
    fn kmeans_ignores_row_order() {
        let x = array![[0.0], [0.3], [5.0], [5.2], [9.0], [9.1]];
        let y = array![[9.1], [5.2], [0.0], [9.0], [0.3], [5.0]];
        let a = kmeans(x.view(), 3, 3, &mut Xoshiro256PlusPlus::seed_from_u64(2)).unwrap();
        let b = kmeans(y.view(), 3, 3, &mut Xoshiro256PlusPlus::seed_from_u64(2)).unwrap();
        assert_eq!(a.centers, b.centers);
    }
    #[test]
    fn too_many_clusters() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let x = array![[0.0], [1.0]];
        assert!(kmeans(x.view(), 3, 1, &mut rng).unwrap_err().is_config());
    }
    #[test]
    fn normal_draws() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let mean = array![1.0, -1.0];
        let cov = array![[1.0, 0.5], [0.5, 2.0]];
        let x = sample_normal(mean.view(), cov.view(), 20000, &mut rng).unwrap();
        let m = x.mean_axis(Axis(0)).unwrap();
        assert_abs_diff_eq!(m[0], 1.0, epsilon = 0.05);
        assert_abs_diff_eq!(m[1], -1.0, epsilon = 0.05);
        let cv = crate::covariance::empirical_covariance(x.view(), 0.0);
        assert_abs_diff_eq!(cv[[0, 1]], 0.5, epsilon = 0.1);
    }
}
