//! Model inputs and the compiled lookup tables used by the solver.

use crate::events::EventList;
use crate::sparse::CscMatrix;
use crate::{PostTimeStepFn, PropensityFn};

/// A complete metapopulation model in flat-array form.
///
/// Compartment counts are laid out node-major: node `i` owns
/// `u0[i * n_compartments..][..n_compartments]`, and likewise for the
/// continuous state `v0` and the per-node parameter rows of `ldata`.
///
/// The caller is responsible for consistent dimensions; the accessors below
/// derive every buffer length from the five size fields.
#[derive(Clone, Debug)]
pub struct Model {
    /// Number of nodes.
    pub n_nodes: usize,
    /// Number of compartments per node.
    pub n_compartments: usize,
    /// Number of transitions per node.
    pub n_transitions: usize,
    /// Number of continuous state variables per node.
    pub n_continuous: usize,
    /// Number of local-parameter doubles per node.
    pub n_local: usize,

    /// Initial compartment counts, `n_nodes * n_compartments`.
    pub u0: Vec<i32>,
    /// Initial continuous state, `n_nodes * n_continuous`.
    pub v0: Vec<f64>,

    /// State-change matrix: `n_compartments x n_transitions`, column `t`
    /// lists the compartment deltas applied when transition `t` fires.
    pub state_change: CscMatrix,
    /// Dependency graph: `n_transitions x n_transitions` pattern, column `t`
    /// lists the transitions whose rate may change when `t` fires.
    pub dependencies: CscMatrix,
    /// Event select matrix: `n_compartments x n_select` pattern, column `s`
    /// lists the compartments eligible for sampling under selector `s`.
    pub select: CscMatrix,
    /// Shift matrix: `n_compartments x n_shift`, column `h` gives the signed
    /// compartment offset applied to moved individuals.
    pub shift: CscMatrix,

    /// Output time points, ascending.
    pub tspan: Vec<f64>,
    /// Local parameters, `n_nodes * n_local`.
    pub ldata: Vec<f64>,
    /// Global parameters shared by all nodes.
    pub gdata: Vec<f64>,

    /// Scheduled events, one-based on the boundary.
    pub events: EventList,

    /// One propensity function per transition.
    pub transitions: Vec<PropensityFn>,
    /// Hook invoked for every node at the end of each day.
    pub post_step: PostTimeStepFn,
}

impl Model {
    /// Compartment row of `node` within `u`.
    pub(crate) fn u_node<'a>(&self, u: &'a [i32], node: usize) -> &'a [i32] {
        &u[node * self.n_compartments..][..self.n_compartments]
    }

    /// Continuous-state row of `node` within `v`.
    pub(crate) fn v_node<'a>(&self, v: &'a [f64], node: usize) -> &'a [f64] {
        &v[node * self.n_continuous..][..self.n_continuous]
    }

    /// Local-parameter row of `node`.
    pub(crate) fn ldata_node(&self, node: usize) -> &[f64] {
        &self.ldata[node * self.n_local..][..self.n_local]
    }
}

/// One compartment delta of a transition's state-change column.
#[derive(Clone, Copy, Debug)]
pub(crate) struct CompartmentDelta {
    pub compartment: usize,
    pub delta: i32,
}

/// Solver-side lookup tables compiled from the sparse model descriptors.
#[derive(Clone, Debug)]
pub(crate) struct Tables {
    /// Per transition, the compartment deltas applied when it fires.
    pub transition_deltas: Vec<Vec<CompartmentDelta>>,
    /// Per transition, the transitions whose rate must be refreshed after
    /// it fires.
    pub dependencies: Vec<Vec<usize>>,
    /// Per selector column, the listed compartments in row order.
    pub select: Vec<Vec<usize>>,
    /// Dense column-major shift table, `n_compartments x n_shift`.
    pub shift: Vec<i32>,
}

impl Tables {
    pub fn compile(model: &Model) -> Self {
        let transition_deltas = (0..model.state_change.ncol)
            .map(|t| {
                model
                    .state_change
                    .col_entries(t)
                    .map(|(compartment, delta)| CompartmentDelta { compartment, delta })
                    .collect()
            })
            .collect();

        let dependencies = (0..model.dependencies.ncol)
            .map(|t| model.dependencies.col(t).to_vec())
            .collect();

        let select = (0..model.select.ncol)
            .map(|s| model.select.col(s).to_vec())
            .collect();

        Self {
            transition_deltas,
            dependencies,
            select,
            shift: model.shift.to_dense(),
        }
    }

    /// Signed offset applied to compartment `c` under shift column `h`.
    pub fn shift_offset(&self, n_compartments: usize, h: usize, c: usize) -> i32 {
        self.shift[h * n_compartments + c]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::no_post_step;

    fn two_compartment_model() -> Model {
        Model {
            n_nodes: 1,
            n_compartments: 2,
            n_transitions: 1,
            n_continuous: 0,
            n_local: 0,
            u0: vec![5, 0],
            v0: vec![],
            state_change: CscMatrix::with_values(2, &[&[(0, -1), (1, 1)]]),
            dependencies: CscMatrix::pattern(1, &[&[0]]),
            select: CscMatrix::pattern(2, &[&[0, 1]]),
            shift: CscMatrix::with_values(2, &[&[(0, 1)]]),
            tspan: vec![0.0, 1.0],
            ldata: vec![],
            gdata: vec![],
            events: EventList::default(),
            transitions: vec![|u, _, _, _, _| f64::from(u[0])],
            post_step: no_post_step,
        }
    }

    #[test]
    fn tables_mirror_the_sparse_columns() {
        let model = two_compartment_model();
        let tables = Tables::compile(&model);

        assert_eq!(tables.transition_deltas.len(), 1);
        assert_eq!(tables.transition_deltas[0][0].compartment, 0);
        assert_eq!(tables.transition_deltas[0][0].delta, -1);
        assert_eq!(tables.transition_deltas[0][1].compartment, 1);
        assert_eq!(tables.transition_deltas[0][1].delta, 1);

        assert_eq!(tables.dependencies, vec![vec![0]]);
        assert_eq!(tables.select, vec![vec![0, 1]]);
        assert_eq!(tables.shift_offset(2, 0, 0), 1);
        assert_eq!(tables.shift_offset(2, 0, 1), 0);
    }

    #[test]
    fn node_rows_are_node_major() {
        let mut model = two_compartment_model();
        model.n_nodes = 2;
        model.u0 = vec![1, 2, 3, 4];
        assert_eq!(model.u_node(&model.u0, 1), &[3, 4]);
    }
}
