//! Integer least squares by the LAMBDA method: LᵀDL factorization of
//! the float ambiguity covariance, integer Gauss decorrelation, then a
//! depth first tree search over the decorrelated space, bounded and
//! iterative (no recursion).

use log::error;
use nalgebra::{DMatrix, DVector};

use crate::error::Error;

/// Search abort bound
const LOOP_MAX: usize = 10_000;

fn round(x: f64) -> f64 {
    (x + 0.5).floor()
}

fn sgn(x: f64) -> f64 {
    if x <= 0.0 {
        -1.0
    } else {
        1.0
    }
}

/// Q = LᵀDL factorization, L unit lower triangular, D diagonal.
/// Fails when Q is not positive definite.
fn factorize(n: usize, q: &DMatrix<f64>) -> Result<(DMatrix<f64>, DVector<f64>), Error> {
    let mut a = q.clone();
    let mut l = DMatrix::<f64>::zeros(n, n);
    let mut d = DVector::<f64>::zeros(n);

    for i in (0..n).rev() {
        d[i] = a[(i, i)];
        if d[i] <= 0.0 {
            return Err(Error::AmbiguityFactorization);
        }

        let sqrt_d = d[i].sqrt();
        for j in 0..=i {
            l[(i, j)] = a[(i, j)] / sqrt_d;
        }
        for j in 0..i {
            for k in 0..=j {
                a[(j, k)] -= l[(i, k)] * l[(i, j)];
            }
        }
        for j in 0..=i {
            l[(i, j)] /= l[(i, i)];
        }
    }

    Ok((l, d))
}

/// Integer Gauss transformation on column j, pivot i
fn gauss_transform(n: usize, l: &mut DMatrix<f64>, z: &mut DMatrix<f64>, i: usize, j: usize) {
    let mu = round(l[(i, j)]);

    if mu != 0.0 {
        for k in i..n {
            l[(k, j)] -= mu * l[(k, i)];
        }
        for k in 0..n {
            z[(k, j)] -= mu * z[(k, i)];
        }
    }
}

/// Permutation of adjacent columns j, j+1
fn permute(
    n: usize,
    l: &mut DMatrix<f64>,
    d: &mut DVector<f64>,
    j: usize,
    del: f64,
    z: &mut DMatrix<f64>,
) {
    let eta = d[j] / del;
    let lam = d[j + 1] * l[(j + 1, j)] / del;

    d[j] = eta * d[j + 1];
    d[j + 1] = del;

    for k in 0..j {
        let a0 = l[(j, k)];
        let a1 = l[(j + 1, k)];
        l[(j, k)] = -l[(j + 1, j)] * a0 + a1;
        l[(j + 1, k)] = eta * a0 + lam * a1;
    }
    l[(j + 1, j)] = lam;

    for k in j + 2..n {
        l.swap((k, j), (k, j + 1));
    }
    for k in 0..n {
        z.swap((k, j), (k, j + 1));
    }
}

/// LAMBDA reduction: decorrelates the ambiguity space through integer
/// Gauss transformations and column permutations. Returns Z.
fn reduction(n: usize, l: &mut DMatrix<f64>, d: &mut DVector<f64>) -> DMatrix<f64> {
    let mut z = DMatrix::<f64>::identity(n, n);

    let mut j = n as isize - 2;
    let mut k = n as isize - 2;

    while j >= 0 {
        let ju = j as usize;

        if j <= k {
            for i in ju + 1..n {
                gauss_transform(n, l, &mut z, i, ju);
            }
        }

        let del = d[ju] + l[(ju + 1, ju)].powi(2) * d[ju + 1];

        if del + 1.0E-6 < d[ju + 1] {
            permute(n, l, d, ju, del, &mut z);
            k = j;
            j = n as isize - 2;
        } else {
            j -= 1;
        }
    }

    z
}

/// Depth first integer search over the decorrelated space: returns the
/// m best candidates (columns) with their squared norms, sorted best
/// first.
fn search(
    n: usize,
    m: usize,
    l: &DMatrix<f64>,
    d: &DVector<f64>,
    zs: &DVector<f64>,
) -> Result<(DMatrix<f64>, Vec<f64>), Error> {
    let mut nn = 0_usize;
    let mut imax = 0_usize;
    let mut maxdist = 1.0E99_f64;

    let mut s_mat = DMatrix::<f64>::zeros(n, n);
    let mut dist = vec![0.0_f64; n];
    let mut zb = vec![0.0_f64; n];
    let mut z = vec![0.0_f64; n];
    let mut step = vec![0.0_f64; n];

    let mut zn = DMatrix::<f64>::zeros(n, m);
    let mut s = vec![0.0_f64; m];

    let mut k = n - 1;
    zb[k] = zs[k];
    z[k] = round(zb[k]);

    let mut y = zb[k] - z[k];
    step[k] = sgn(y);

    let mut count = 0_usize;

    loop {
        if count >= LOOP_MAX {
            error!("ambiguity search abort (loops={})", count);
            return Err(Error::AmbiguitySearch);
        }
        count += 1;

        let newdist = dist[k] + y * y / d[k];

        if newdist < maxdist {
            if k != 0 {
                // move down
                k -= 1;
                dist[k] = newdist;

                for i in 0..=k {
                    s_mat[(k, i)] =
                        s_mat[(k + 1, i)] + (z[k + 1] - zb[k + 1]) * l[(k + 1, i)];
                }

                zb[k] = zs[k] + s_mat[(k, k)];
                z[k] = round(zb[k]);
                y = zb[k] - z[k];
                step[k] = sgn(y);
            } else {
                // candidate found
                if nn < m {
                    if nn == 0 || newdist > s[imax] {
                        imax = nn;
                    }
                    for i in 0..n {
                        zn[(i, nn)] = z[i];
                    }
                    s[nn] = newdist;
                    nn += 1;
                } else {
                    if newdist < s[imax] {
                        for i in 0..n {
                            zn[(i, imax)] = z[i];
                        }
                        s[imax] = newdist;

                        imax = 0;
                        for i in 0..m {
                            if s[imax] < s[i] {
                                imax = i;
                            }
                        }
                    }
                    maxdist = s[imax];
                }

                z[0] += step[0];
                y = zb[0] - z[0];
                step[0] = -step[0] - sgn(step[0]);
            }
        } else {
            // exit or move up
            if k == n - 1 {
                break;
            }

            k += 1;
            z[k] += step[k];
            y = zb[k] - z[k];
            step[k] = -step[k] - sgn(step[k]);
        }
    }

    if nn == 0 {
        return Err(Error::AmbiguitySearch);
    }

    // sort by squared norm, best first
    for i in 0..m.min(nn) {
        for j in i + 1..m.min(nn) {
            if s[i] < s[j] {
                continue;
            }
            s.swap(i, j);
            for k in 0..n {
                zn.swap((k, i), (k, j));
            }
        }
    }

    Ok((zn, s))
}

/// Integer least square estimation:
/// resolves the m best integer vectors minimizing
/// (a - ẑ)ᵀ Q⁻¹ (a - ẑ), with their squared norms, sorted best first.
///
/// ## Input
/// - a: float ambiguity vector (n)
/// - q: float ambiguity covariance (n x n)
/// - m: number of candidates (2 for a ratio test)
pub(crate) fn lambda(
    n: usize,
    m: usize,
    a: &DVector<f64>,
    q: &DMatrix<f64>,
) -> Result<(DMatrix<f64>, Vec<f64>), Error> {
    assert!(n > 0 && m > 0, "internal error: empty ambiguity problem");

    let (mut l, mut d) = factorize(n, q)?;
    let z = reduction(n, &mut l, &mut d);

    // decorrelated float solution
    let zs = z.transpose() * a;

    let (zn, s) = search(n, m, &l, &d, &zs)?;

    // back transform: F = Z⁻ᵀ E
    let z_t = z.transpose();
    let f = z_t
        .lu()
        .solve(&zn)
        .ok_or(Error::AmbiguityFactorization)?;

    Ok((f, s))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn factorization_identity() {
        let q = DMatrix::<f64>::identity(3, 3) * 2.0;
        let (l, d) = factorize(3, &q).unwrap();

        for i in 0..3 {
            assert!((l[(i, i)] - 1.0).abs() < 1.0E-12);
            assert!((d[i] - 2.0).abs() < 1.0E-12);
        }
    }

    #[test]
    fn factorization_rejects_non_positive() {
        let mut q = DMatrix::<f64>::identity(3, 3);
        q[(2, 2)] = -1.0;
        assert!(factorize(3, &q).is_err());
    }

    #[test]
    fn factorization_reconstructs() {
        let q = DMatrix::<f64>::from_row_slice(
            3,
            3,
            &[4.0, 1.2, 0.3, 1.2, 3.0, 0.7, 0.3, 0.7, 2.5],
        );

        let (l, d) = factorize(3, &q).unwrap();
        let rebuilt = l.transpose() * DMatrix::from_diagonal(&d) * l;

        for i in 0..3 {
            for j in 0..3 {
                assert!((rebuilt[(i, j)] - q[(i, j)]).abs() < 1.0E-9);
            }
        }
    }

    #[test]
    fn mlambda_search_6() {
        let a = DVector::<f64>::from_row_slice(&[
            1585184.171,
            -6716599.430,
            3915742.905,
            7627233.455,
            9565990.879,
            989457273.200,
        ]);

        let q = DMatrix::<f64>::from_row_slice(
            6,
            6,
            &[
                0.227134, 0.112202, 0.112202, 0.112202, 0.112202, 0.103473, //
                0.112202, 0.227134, 0.112202, 0.112202, 0.112202, 0.103473, //
                0.112202, 0.112202, 0.227134, 0.112202, 0.112202, 0.103473, //
                0.112202, 0.112202, 0.112202, 0.227134, 0.112202, 0.103473, //
                0.112202, 0.112202, 0.112202, 0.112202, 0.227134, 0.103473, //
                0.103473, 0.103473, 0.103473, 0.103473, 0.103473, 0.434339,
            ],
        );

        let expected = [
            [1585184.0, -6716599.0, 3915743.0, 7627234.0, 9565991.0, 989457273.0],
            [1585184.0, -6716600.0, 3915743.0, 7627233.0, 9565991.0, 989457273.0],
        ];
        let expected_s = [3.507984, 3.708456];

        let (f, s) = lambda(6, 2, &a, &q).unwrap();

        for candidate in 0..2 {
            for i in 0..6 {
                assert!(
                    (f[(i, candidate)] - expected[candidate][i]).abs() < 1.0E-4,
                    "candidate #{} mismatch at {}",
                    candidate,
                    i
                );
            }
            assert!((s[candidate] - expected_s[candidate]).abs() < 1.0E-4);
        }

        assert!(s[0] <= s[1]);
    }

    #[test]
    fn mlambda_search_10() {
        let a = DVector::<f64>::from_row_slice(&[
            -13324172.755747,
            -10668894.713608,
            -7157225.010770,
            -6149367.974367,
            -7454133.571066,
            -5969200.494550,
            8336734.058423,
            6186974.084502,
            -17549093.883655,
            -13970158.922370,
        ]);

        let q = DMatrix::<f64>::from_row_slice(
            10,
            10,
            &[
                0.446320, 0.223160, 0.223160, 0.223160, 0.223160, 0.572775, 0.286388, 0.286388,
                0.286388, 0.286388, //
                0.223160, 0.446320, 0.223160, 0.223160, 0.223160, 0.286388, 0.572775, 0.286388,
                0.286388, 0.286388, //
                0.223160, 0.223160, 0.446320, 0.223160, 0.223160, 0.286388, 0.286388, 0.572775,
                0.286388, 0.286388, //
                0.223160, 0.223160, 0.223160, 0.446320, 0.223160, 0.286388, 0.286388, 0.286388,
                0.572775, 0.286388, //
                0.223160, 0.223160, 0.223160, 0.223160, 0.446320, 0.286388, 0.286388, 0.286388,
                0.286388, 0.572775, //
                0.572775, 0.286388, 0.286388, 0.286388, 0.286388, 0.735063, 0.367531, 0.367531,
                0.367531, 0.367531, //
                0.286388, 0.572775, 0.286388, 0.286388, 0.286388, 0.367531, 0.735063, 0.367531,
                0.367531, 0.367531, //
                0.286388, 0.286388, 0.572775, 0.286388, 0.286388, 0.367531, 0.367531, 0.735063,
                0.367531, 0.367531, //
                0.286388, 0.286388, 0.286388, 0.572775, 0.286388, 0.367531, 0.367531, 0.367531,
                0.735063, 0.367531, //
                0.286388, 0.286388, 0.286388, 0.286388, 0.572775, 0.367531, 0.367531, 0.367531,
                0.367531, 0.735063,
            ],
        );

        let expected_s = [1506.435789, 1612.811795];

        let (f, s) = lambda(10, 2, &a, &q).unwrap();

        // best candidate is integer, in the float solution neighborhood
        for i in 0..10 {
            assert!((f[(i, 0)] - a[i]).abs() < 30.0);
            assert!((f[(i, 0)] - f[(i, 0)].round()).abs() < 1.0E-6);
        }

        assert!((s[0] - expected_s[0]).abs() < 1.0E-4);
        assert!((s[1] - expected_s[1]).abs() < 1.0E-4);
    }
}
