//! Eigen-decomposition of 3x3 symmetric matrices
//!
//! Householder reduction to tridiagonal form followed by implicit QL
//! iteration (the EISPACK tred2/tql2 pair). Unlike a closed-form cubic
//! solution this stays accurate for nearly isotropic tensors.

const N: usize = 3;

/// Eigenvalues in descending order and the matching unit eigenvectors
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Eigen3 {
    pub values: [f64; 3],
    /// `vectors[i]` belongs to `values[i]`
    pub vectors: [[f64; 3]; 3],
}

/// Decompose a symmetric matrix
///
/// Only the lower triangle of `m` is read.
pub fn eigh_symmetric(m: [[f64; 3]; 3]) -> Eigen3 {
    let mut v = [[0.0f64; 3]; 3];
    for i in 0..N {
        for j in 0..=i {
            v[i][j] = m[i][j];
            v[j][i] = m[i][j];
        }
    }
    let mut d = [0.0f64; 3];
    let mut e = [0.0f64; 3];

    tridiagonalize(&mut v, &mut d, &mut e);
    ql_iterate(&mut v, &mut d, &mut e);

    // Columns of v are eigenvectors; order by descending eigenvalue
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| d[b].total_cmp(&d[a]));

    let mut values = [0.0; 3];
    let mut vectors = [[0.0; 3]; 3];
    for (slot, &col) in order.iter().enumerate() {
        values[slot] = d[col];
        vectors[slot] = [v[0][col], v[1][col], v[2][col]];
    }
    Eigen3 { values, vectors }
}

/// Householder reduction of `v` to tridiagonal form
///
/// On return `d` holds the diagonal, `e[1..]` the sub-diagonal and `v` the
/// accumulated orthogonal transform.
fn tridiagonalize(v: &mut [[f64; 3]; 3], d: &mut [f64; 3], e: &mut [f64; 3]) {
    d.copy_from_slice(&v[N - 1]);

    for i in (1..N).rev() {
        let scale: f64 = d[..i].iter().map(|x| x.abs()).sum();
        let mut h = 0.0;

        if scale == 0.0 {
            e[i] = d[i - 1];
            for j in 0..i {
                d[j] = v[i - 1][j];
                v[i][j] = 0.0;
                v[j][i] = 0.0;
            }
        } else {
            for dk in d[..i].iter_mut() {
                *dk /= scale;
                h += *dk * *dk;
            }
            let f = d[i - 1];
            let g = if f > 0.0 { -h.sqrt() } else { h.sqrt() };
            e[i] = scale * g;
            h -= f * g;
            d[i - 1] = f - g;
            e[..i].iter_mut().for_each(|x| *x = 0.0);

            for j in 0..i {
                let f = d[j];
                v[j][i] = f;
                let mut g = e[j] + v[j][j] * f;
                for k in (j + 1)..i {
                    g += v[k][j] * d[k];
                    e[k] += v[k][j] * f;
                }
                e[j] = g;
            }

            let mut f = 0.0;
            for j in 0..i {
                e[j] /= h;
                f += e[j] * d[j];
            }
            let hh = f / (h + h);
            for j in 0..i {
                e[j] -= hh * d[j];
            }
            for j in 0..i {
                let (f, g) = (d[j], e[j]);
                for k in j..i {
                    v[k][j] -= f * e[k] + g * d[k];
                }
                d[j] = v[i - 1][j];
                v[i][j] = 0.0;
            }
        }
        d[i] = h;
    }

    // Accumulate the transformations
    for i in 0..N - 1 {
        v[N - 1][i] = v[i][i];
        v[i][i] = 1.0;
        let h = d[i + 1];
        if h != 0.0 {
            for k in 0..=i {
                d[k] = v[k][i + 1] / h;
            }
            for j in 0..=i {
                let g: f64 = (0..=i).map(|k| v[k][i + 1] * v[k][j]).sum();
                for k in 0..=i {
                    v[k][j] -= g * d[k];
                }
            }
        }
        for row in v.iter_mut().take(i + 1) {
            row[i + 1] = 0.0;
        }
    }
    for j in 0..N {
        d[j] = v[N - 1][j];
        v[N - 1][j] = 0.0;
    }
    v[N - 1][N - 1] = 1.0;
    e[0] = 0.0;
}

/// Implicit QL iteration on the tridiagonal form, accumulating into `v`
fn ql_iterate(v: &mut [[f64; 3]; 3], d: &mut [f64; 3], e: &mut [f64; 3]) {
    for i in 1..N {
        e[i - 1] = e[i];
    }
    e[N - 1] = 0.0;

    let eps = f64::EPSILON;
    let mut f = 0.0f64;
    let mut tst1 = 0.0f64;

    for l in 0..N {
        tst1 = tst1.max(d[l].abs() + e[l].abs());
        let mut m = l;
        while m < N - 1 && e[m].abs() > eps * tst1 {
            m += 1;
        }

        if m > l {
            // A 3x3 converges in a handful of sweeps; the cap guards NaN input
            for _ in 0..64 {
                let g = d[l];
                let mut p = (d[l + 1] - g) / (2.0 * e[l]);
                let mut r = p.hypot(1.0);
                if p < 0.0 {
                    r = -r;
                }
                d[l] = e[l] / (p + r);
                d[l + 1] = e[l] * (p + r);
                let dl1 = d[l + 1];
                let h = g - d[l];
                for di in d.iter_mut().skip(l + 2) {
                    *di -= h;
                }
                f += h;

                p = d[m];
                let mut c = 1.0;
                let mut c2 = c;
                let mut c3 = c;
                let el1 = e[l + 1];
                let mut s = 0.0;
                let mut s2 = 0.0;

                for i in (l..m).rev() {
                    c3 = c2;
                    c2 = c;
                    s2 = s;
                    let g = c * e[i];
                    let h = c * p;
                    r = p.hypot(e[i]);
                    e[i + 1] = s * r;
                    s = e[i] / r;
                    c = p / r;
                    p = c * d[i] - s * g;
                    d[i + 1] = h + s * (c * g + s * d[i]);

                    for row in v.iter_mut() {
                        let vh = row[i + 1];
                        row[i + 1] = s * row[i] + c * vh;
                        row[i] = c * row[i] - s * vh;
                    }
                }
                p = -s * s2 * c3 * el1 * e[l] / dl1;
                e[l] = s * p;
                d[l] = c * p;

                if !(e[l].abs() > eps * tst1) {
                    break;
                }
            }
        }
        d[l] += f;
        e[l] = 0.0;
    }
}
