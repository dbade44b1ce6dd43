//! Discrete unit-sphere sampling
//!
//! A geodesic sphere built by splitting each icosahedron face into a
//! triangular grid of `frequency²` sub-triangles and projecting the grid
//! points onto the unit sphere. Vertex count is `10 f² + 2`; frequency 6
//! gives the 362-vertex sampling used for peak extraction.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Unit vertices plus the edge graph used for local-maximum search
#[derive(Clone, Debug)]
pub struct Sphere {
    vertices: Vec<[f64; 3]>,
    edges: Vec<[usize; 2]>,
    faces: Vec<[usize; 3]>,
    neighbors: Vec<Vec<usize>>,
}

fn normalize(v: [f64; 3]) -> [f64; 3] {
    let n = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    [v[0] / n, v[1] / n, v[2] / n]
}

/// Quantized coordinates so shared face-edge points map to one vertex
fn vertex_key(v: [f64; 3]) -> [i64; 3] {
    const SCALE: f64 = 1e9;
    [
        (v[0] * SCALE).round() as i64,
        (v[1] * SCALE).round() as i64,
        (v[2] * SCALE).round() as i64,
    ]
}

fn icosahedron() -> (Vec<[f64; 3]>, Vec<[usize; 3]>) {
    let phi = (1.0 + 5.0_f64.sqrt()) / 2.0;

    let vertices: Vec<[f64; 3]> = [
        [-1.0, phi, 0.0], [1.0, phi, 0.0], [-1.0, -phi, 0.0], [1.0, -phi, 0.0],
        [0.0, -1.0, phi], [0.0, 1.0, phi], [0.0, -1.0, -phi], [0.0, 1.0, -phi],
        [phi, 0.0, -1.0], [phi, 0.0, 1.0], [-phi, 0.0, -1.0], [-phi, 0.0, 1.0],
    ]
    .into_iter()
    .map(normalize)
    .collect();

    let faces = vec![
        [0, 11, 5], [0, 5, 1], [0, 1, 7], [0, 7, 10], [0, 10, 11],
        [1, 5, 9], [5, 11, 4], [11, 10, 2], [10, 7, 6], [7, 1, 8],
        [3, 9, 4], [3, 4, 2], [3, 2, 6], [3, 6, 8], [3, 8, 9],
        [4, 9, 5], [2, 4, 11], [6, 2, 10], [8, 6, 7], [9, 8, 1],
    ];
    (vertices, faces)
}

impl Sphere {
    /// Geodesic sphere of the given frequency (1 = plain icosahedron)
    pub fn geodesic(frequency: usize) -> Result<Self> {
        if frequency == 0 {
            return Err(Error::invalid("sphere frequency must be at least 1"));
        }
        Ok(Self::build(frequency))
    }

    /// The 362-vertex symmetric sampling
    pub fn symmetric362() -> Self {
        Self::build(6)
    }

    fn build(f: usize) -> Self {
        let (ico_v, ico_f) = icosahedron();

        let mut vertices: Vec<[f64; 3]> = Vec::with_capacity(10 * f * f + 2);
        let mut lookup: HashMap<[i64; 3], usize> = HashMap::new();
        let mut faces: Vec<[usize; 3]> = Vec::with_capacity(20 * f * f);

        for &[a, b, c] in &ico_f {
            let (va, vb, vc) = (ico_v[a], ico_v[b], ico_v[c]);

            // Grid point (i, j): i steps from a toward b, j from a toward c
            let mut grid = vec![vec![0usize; f + 1]; f + 1];
            for i in 0..=f {
                for j in 0..=(f - i) {
                    let wa = (f - i - j) as f64;
                    let (wb, wc) = (i as f64, j as f64);
                    let p = normalize([
                        wa * va[0] + wb * vb[0] + wc * vc[0],
                        wa * va[1] + wb * vb[1] + wc * vc[1],
                        wa * va[2] + wb * vb[2] + wc * vc[2],
                    ]);
                    let id = *lookup.entry(vertex_key(p)).or_insert_with(|| {
                        vertices.push(p);
                        vertices.len() - 1
                    });
                    grid[i][j] = id;
                }
            }

            for i in 0..f {
                for j in 0..(f - i) {
                    faces.push([grid[i][j], grid[i + 1][j], grid[i][j + 1]]);
                    if i + j + 1 < f {
                        faces.push([grid[i + 1][j], grid[i + 1][j + 1], grid[i][j + 1]]);
                    }
                }
            }
        }

        Self::from_mesh(vertices, faces)
    }

    /// Build the edge graph from triangles
    fn from_mesh(vertices: Vec<[f64; 3]>, faces: Vec<[usize; 3]>) -> Self {
        let mut neighbors: Vec<Vec<usize>> = vec![Vec::new(); vertices.len()];
        let mut edges = Vec::new();
        for face in &faces {
            for k in 0..3 {
                let (u, v) = (face[k], face[(k + 1) % 3]);
                if !neighbors[u].contains(&v) {
                    neighbors[u].push(v);
                    neighbors[v].push(u);
                    edges.push([u.min(v), u.max(v)]);
                }
            }
        }
        for n in neighbors.iter_mut() {
            n.sort_unstable();
        }
        edges.sort_unstable();
        Self { vertices, edges, faces, neighbors }
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn vertices(&self) -> &[[f64; 3]] {
        &self.vertices
    }

    pub fn vertex(&self, i: usize) -> [f64; 3] {
        self.vertices[i]
    }

    pub fn edges(&self) -> &[[usize; 2]] {
        &self.edges
    }

    pub fn faces(&self) -> &[[usize; 3]] {
        &self.faces
    }

    pub fn neighbors(&self, i: usize) -> &[usize] {
        &self.neighbors[i]
    }

    /// Index of the vertex with the largest dot product with `v`
    pub fn find_closest(&self, v: [f64; 3]) -> usize {
        let mut best = 0;
        let mut best_dot = f64::NEG_INFINITY;
        for (i, u) in self.vertices.iter().enumerate() {
            let d = u[0] * v[0] + u[1] * v[1] + u[2] * v[2];
            if d > best_dot {
                best_dot = d;
                best = i;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_counts() {
        for f in 1..=6 {
            let s = Sphere::geodesic(f).unwrap();
            assert_eq!(s.len(), 10 * f * f + 2, "frequency {}", f);
            assert_eq!(s.faces().len(), 20 * f * f);
            // Euler: V - E + F = 2
            assert_eq!(s.len() + s.faces().len(), s.edges().len() + 2);
        }
        assert_eq!(Sphere::symmetric362().len(), 362);
    }

    #[test]
    fn test_vertices_unit_and_antipodal() {
        let s = Sphere::geodesic(4).unwrap();
        for &v in s.vertices() {
            let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
            assert!((norm - 1.0).abs() < 1e-12);
            let opposite = s.vertex(s.find_closest([-v[0], -v[1], -v[2]]));
            let dot = v[0] * opposite[0] + v[1] * opposite[1] + v[2] * opposite[2];
            assert!((dot + 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_axis_is_vertex_at_even_frequency() {
        let s = Sphere::symmetric362();
        let v = s.vertex(s.find_closest([1.0, 0.0, 0.0]));
        assert!((v[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_neighbors_are_symmetric() {
        let s = Sphere::geodesic(3).unwrap();
        for i in 0..s.len() {
            let n = s.neighbors(i);
            assert!(n.len() == 5 || n.len() == 6);
            for &j in n {
                assert!(s.neighbors(j).contains(&i));
            }
        }
    }

    #[test]
    fn test_zero_frequency_rejected() {
        assert!(Sphere::geodesic(0).is_err());
    }
}
