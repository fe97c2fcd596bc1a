//! Trajectory buffers: dense or sparse snapshots of the simulated state.
//!
//! Snapshot column `k` holds the state after time `tspan[k]` has been
//! passed. Column 0 is pre-filled with the initial state before the day
//! loop starts, so a run over a single time point reproduces its input.

/// Sparse output skeleton: which state entries to record at each time point.
///
/// `jc` holds `tlen + 1` column pointers into `ir`; `ir[jc[k]..jc[k + 1]]`
/// are the flat state indices recorded at time point `k`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutputSkeleton {
    pub ir: Vec<usize>,
    pub jc: Vec<usize>,
}

/// Requested form of one trajectory (compartment or continuous state).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputRequest {
    /// Record the full state at every time point.
    #[default]
    Dense,
    /// Record only the entries named by the skeleton.
    Sparse(OutputSkeleton),
}

/// Recorded trajectory of one state vector.
#[derive(Clone, Debug, PartialEq)]
pub enum StateMatrix<T> {
    /// Column-major `stride x tlen`: column `k` is the full state after
    /// time point `k` was passed.
    Dense(Vec<T>),
    /// Values scattered under the requested skeleton.
    Sparse {
        ir: Vec<usize>,
        jc: Vec<usize>,
        values: Vec<T>,
    },
}

impl<T> StateMatrix<T> {
    /// Dense column `k`, or `None` for sparse output.
    pub fn dense_col(&self, stride: usize, k: usize) -> Option<&[T]> {
        match self {
            StateMatrix::Dense(values) => Some(&values[k * stride..][..stride]),
            StateMatrix::Sparse { .. } => None,
        }
    }
}

/// Simulated trajectories: compartment counts and continuous state.
#[derive(Clone, Debug, PartialEq)]
pub struct Trajectory {
    pub u: StateMatrix<i32>,
    pub v: StateMatrix<f64>,
}

/// Incremental writer for one trajectory.
pub(crate) struct TrajectoryWriter<T> {
    out: StateMatrix<T>,
    stride: usize,
    tlen: usize,
    it: usize,
}

impl<T: Copy + Default> TrajectoryWriter<T> {
    /// Allocate the output buffer and record the initial state as column 0.
    pub fn new(request: OutputRequest, stride: usize, tlen: usize, initial: &[T]) -> Self {
        let mut writer = match request {
            OutputRequest::Dense => Self {
                out: StateMatrix::Dense(vec![T::default(); stride * tlen]),
                stride,
                tlen,
                it: 0,
            },
            OutputRequest::Sparse(OutputSkeleton { ir, jc }) => {
                let values = vec![T::default(); ir.len()];
                Self {
                    out: StateMatrix::Sparse { ir, jc, values },
                    stride,
                    tlen,
                    it: 0,
                }
            }
        };
        if tlen > 0 {
            writer.write_col(initial);
        }
        writer
    }

    fn write_col(&mut self, state: &[T]) {
        match &mut self.out {
            StateMatrix::Dense(values) => {
                values[self.it * self.stride..][..self.stride].copy_from_slice(state);
            }
            StateMatrix::Sparse { ir, jc, values } => {
                for j in jc[self.it]..jc[self.it + 1] {
                    values[j] = state[ir[j]];
                }
            }
        }
        self.it += 1;
    }

    /// Record every time point strictly before `tt` that is still pending.
    pub fn store_passed(&mut self, tspan: &[f64], tt: f64, state: &[T]) {
        while self.it < self.tlen && tt > tspan[self.it] {
            self.write_col(state);
        }
    }

    pub fn done(&self) -> bool {
        self.it >= self.tlen
    }

    pub fn into_inner(self) -> StateMatrix<T> {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_writer_records_initial_column() {
        let writer = TrajectoryWriter::new(OutputRequest::Dense, 2, 3, &[7, 8]);
        assert!(!writer.done());
        let out = writer.into_inner();
        assert_eq!(out.dense_col(2, 0), Some(&[7, 8][..]));
    }

    #[test]
    fn dense_writer_uses_strict_comparison() {
        let mut writer = TrajectoryWriter::new(OutputRequest::Dense, 1, 3, &[0]);
        let tspan = [0.0, 1.0, 2.0];
        writer.store_passed(&tspan, 1.0, &[5]);
        // tt == tspan[1] is not yet past the time point.
        writer.store_passed(&tspan, 2.5, &[6]);
        assert!(writer.done());
        assert_eq!(
            writer.into_inner(),
            StateMatrix::Dense(vec![0, 6, 6])
        );
    }

    #[test]
    fn sparse_writer_scatters_selected_entries() {
        let skeleton = OutputSkeleton {
            ir: vec![1, 0, 1],
            jc: vec![0, 1, 3],
        };
        let mut writer = TrajectoryWriter::new(OutputRequest::Sparse(skeleton), 2, 2, &[10, 20]);
        writer.store_passed(&[0.0, 1.0], 2.0, &[30, 40]);
        match writer.into_inner() {
            StateMatrix::Sparse { values, .. } => assert_eq!(values, vec![20, 30, 40]),
            StateMatrix::Dense(_) => panic!("expected sparse output"),
        }
    }

    #[test]
    fn empty_tspan_is_immediately_done() {
        let writer = TrajectoryWriter::<i32>::new(OutputRequest::Dense, 4, 0, &[1, 2, 3, 4]);
        assert!(writer.done());
        assert_eq!(writer.into_inner(), StateMatrix::Dense(vec![]));
    }
}
