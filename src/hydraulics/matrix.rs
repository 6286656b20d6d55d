use faer::prelude::*;
use faer::sparse::{SparseColMat, SymbolicSparseColMat, SymbolicSparseColMatRef, Triplet};
use faer::{Mat, Side};

use crate::error::{EngineError, EngineResult};
use crate::model::network::Network;

/// Positions of a link's coefficients in the CSC value array
#[derive(Debug, Clone, Copy, Default)]
struct CscIndex {
  diag_u: Option<usize>,
  diag_v: Option<usize>,
  off_diag_uv: Option<usize>,
  off_diag_vu: Option<usize>,
}

/// Symmetric system A·H = F over the junction heads.
///
/// The sparsity pattern and the link -> coefficient map are built once per
/// topology; only the values are rewritten every trial.
#[derive(Debug, Clone)]
pub struct SparseSystem {
  node_to_row: Vec<Option<usize>>,
  row_to_node: Vec<usize>,
  symbolic: SymbolicSparseColMat<usize>,
  csc_index: Vec<CscIndex>,
  diag_index: Vec<usize>,
  values: Vec<f64>,
  rhs: Vec<f64>,
}

impl SparseSystem {
  pub fn new(network: &Network) -> EngineResult<Self> {
    // build global unknown-numbering map
    let mut row_to_node = Vec::new();
    let node_to_row: Vec<Option<usize>> = network
      .nodes
      .iter()
      .enumerate()
      .map(|(i, n)| {
        if n.is_junction() {
          row_to_node.push(i);
          Some(row_to_node.len() - 1)
        } else {
          None
        }
      })
      .collect();
    let n = row_to_node.len();

    // every junction gets a diagonal entry, even an isolated one
    let mut triplets: Vec<Triplet<usize, usize, f64>> = (0..n).map(|i| Triplet::new(i, i, 0.0)).collect();
    for link in network.links.iter() {
      if let (Some(i), Some(j)) = (node_to_row[link.start_node], node_to_row[link.end_node]) {
        triplets.push(Triplet::new(i, j, 0.0));
        triplets.push(Triplet::new(j, i, 0.0));
      }
    }
    let pattern = SparseColMat::<usize, f64>::try_new_from_triplets(n, n, &triplets)
      .map_err(|e| EngineError::invalid(format!("cannot build sparsity pattern: {e:?}")))?;
    let symbolic = pattern
      .symbolic()
      .to_owned()
      .map_err(|e| EngineError::invalid(format!("cannot build sparsity pattern: {e:?}")))?;

    let sym = symbolic.as_ref();
    let diag_index = (0..n).map(|i| find_csc_index(sym, i, i).unwrap_or(0)).collect();
    let csc_index = network
      .links
      .iter()
      .map(|link| {
        let u = node_to_row[link.start_node];
        let v = node_to_row[link.end_node];
        let mut index = CscIndex::default();
        if let Some(i) = u {
          index.diag_u = find_csc_index(sym, i, i);
        }
        if let Some(j) = v {
          index.diag_v = find_csc_index(sym, j, j);
        }
        if let (Some(i), Some(j)) = (u, v) {
          index.off_diag_uv = find_csc_index(sym, i, j);
          index.off_diag_vu = find_csc_index(sym, j, i);
        }
        index
      })
      .collect();

    let nnz = sym.row_idx().len();
    Ok(Self { node_to_row, row_to_node, symbolic, csc_index, diag_index, values: vec![0.0; nnz], rhs: vec![0.0; n] })
  }

  /// Number of unknown heads
  pub fn size(&self) -> usize {
    self.row_to_node.len()
  }

  pub fn row(&self, node: usize) -> Option<usize> {
    self.node_to_row[node]
  }

  pub fn node(&self, row: usize) -> usize {
    self.row_to_node[row]
  }

  pub fn clear(&mut self) {
    self.values.fill(0.0);
    self.rhs.fill(0.0);
  }

  /// Add to the diagonal of a node's row; fixed-grade nodes have no row
  pub fn add_diagonal(&mut self, node: usize, value: f64) {
    if let Some(i) = self.node_to_row[node] {
      self.values[self.diag_index[i]] += value;
    }
  }

  pub fn add_rhs(&mut self, node: usize, value: f64) {
    if let Some(i) = self.node_to_row[node] {
      self.rhs[i] += value;
    }
  }

  /// Add to the symmetric off-diagonal pair of a link joining two junctions
  pub fn add_off_diagonal(&mut self, link: usize, value: f64) {
    let index = self.csc_index[link];
    if let (Some(uv), Some(vu)) = (index.off_diag_uv, index.off_diag_vu) {
      self.values[uv] += value;
      self.values[vu] += value;
    }
  }

  pub fn diagonal(&self, node: usize) -> f64 {
    self.node_to_row[node].map_or(0.0, |i| self.values[self.diag_index[i]])
  }

  /// Solve for the junction heads, returned indexed by row. On a failed
  /// factorization the node of the weakest pivot row is returned.
  pub fn solve(&self) -> Result<Vec<f64>, usize> {
    let n = self.size();
    if n == 0 {
      return Ok(Vec::new());
    }
    let matrix = SparseColMat::new(self.symbolic.clone(), self.values.clone());
    let llt = matrix.sp_cholesky(Side::Lower).map_err(|_| self.weakest_pivot())?;
    let solution = llt.solve(&Mat::from_fn(n, 1, |r, _| self.rhs[r]));
    let heads: Vec<f64> = (0..n).map(|i| solution[(i, 0)]).collect();
    if heads.iter().any(|h| !h.is_finite()) {
      return Err(self.weakest_pivot());
    }
    Ok(heads)
  }

  /// Node whose row has the least diagonal dominance
  fn weakest_pivot(&self) -> usize {
    let sym = self.symbolic.as_ref();
    let mut dominance = vec![0.0; self.size()];
    for col in 0..self.size() {
      for k in sym.col_ptr()[col]..sym.col_ptr()[col + 1] {
        let row = sym.row_idx()[k];
        if row == col {
          dominance[row] += self.values[k];
        } else {
          dominance[row] -= self.values[k].abs();
        }
      }
    }
    let row = (0..self.size()).min_by(|&a, &b| dominance[a].total_cmp(&dominance[b])).unwrap_or(0);
    self.row_to_node[row]
  }
}

/// Helper function to find the CSC index for a given row and column
fn find_csc_index(sym: SymbolicSparseColMatRef<usize>, row: usize, col: usize) -> Option<usize> {
  let col_start = sym.col_ptr()[col];
  let col_end = sym.col_ptr()[col + 1];
  sym.row_idx()[col_start..col_end].iter().position(|&r| r == row).map(|pos| col_start + pos)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::link::Link;
  use crate::model::node::Node;
  use crate::model::pipe::Pipe;

  fn chain() -> Network {
    let mut network = Network::default();
    network.add_node(Node::reservoir("R", 100.0)).unwrap();
    network.add_node(Node::junction("A", 0.0, 0.0)).unwrap();
    network.add_node(Node::junction("B", 0.0, 0.0)).unwrap();
    network.add_link(Link::pipe("1", "R", "A", Pipe::new(1.0, 100.0, 100.0))).unwrap();
    network.add_link(Link::pipe("2", "A", "B", Pipe::new(1.0, 100.0, 100.0))).unwrap();
    network.finalize().unwrap();
    network
  }

  #[test]
  fn solves_small_spd_system() {
    let network = chain();
    let mut system = SparseSystem::new(&network).unwrap();
    assert_eq!(system.size(), 2);
    assert_eq!(system.row(0), None);
    // [2 -1; -1 1] h = [100; 0]  =>  h = [100, 100]
    system.add_diagonal(1, 2.0);
    system.add_diagonal(2, 1.0);
    system.add_off_diagonal(1, -1.0);
    system.add_rhs(1, 100.0);
    let h = system.solve().unwrap();
    assert!((h[0] - 100.0).abs() < 1e-9);
    assert!((h[1] - 100.0).abs() < 1e-9);
  }

  #[test]
  fn singular_row_is_reported() {
    let network = chain();
    let mut system = SparseSystem::new(&network).unwrap();
    system.add_diagonal(1, 1.0);
    system.add_rhs(1, 1.0);
    assert_eq!(system.solve(), Err(2));
  }
}
