//! Built-in example models.
//!
//! These double as executable documentation of the callback contracts: each
//! model supplies its propensity functions, its post-time-step hook and a
//! constructor that assembles the sparse descriptors.

/// SISe3: susceptible-infected dynamics in three age categories with an
/// environmental infectious pressure.
///
/// Each node holds six compartments, `S` and `I` per age category.
/// Transmission runs through an environmental compartment `phi` carried as
/// the node's single continuous state variable: susceptibles are infected
/// at rate `upsilon_a * phi * S_a` and recover at rate `gamma_a * I_a`.
/// Once per day the post-time-step hook decays `phi` with a per-quarter
/// seasonal coefficient and adds shedding from the current prevalence.
pub mod sise3 {
    use crate::events::EventList;
    use crate::model::Model;
    use crate::sparse::CscMatrix;

    /// Compartments per node.
    pub const S_1: usize = 0;
    pub const I_1: usize = 1;
    pub const S_2: usize = 2;
    pub const I_2: usize = 3;
    pub const S_3: usize = 4;
    pub const I_3: usize = 5;
    pub const N_COMPARTMENTS: usize = 6;

    /// Offsets into a node's local-parameter row.
    pub const UPSILON_1: usize = 0;
    pub const UPSILON_2: usize = 1;
    pub const UPSILON_3: usize = 2;
    pub const GAMMA_1: usize = 3;
    pub const GAMMA_2: usize = 4;
    pub const GAMMA_3: usize = 5;
    pub const ALPHA: usize = 6;
    pub const BETA_Q1: usize = 7;
    pub const BETA_Q2: usize = 8;
    pub const BETA_Q3: usize = 9;
    pub const BETA_Q4: usize = 10;
    pub const EPSILON: usize = 11;
    pub const N_LOCAL: usize = 12;

    /// Index of the infectious pressure in a node's continuous state.
    pub const PHI: usize = 0;

    const DAYS_IN_YEAR: i64 = 365;
    const DAYS_IN_QUARTER: i64 = 91;

    /// Model parameters shared by every node.
    #[derive(Clone, Copy, Debug)]
    pub struct Params {
        /// Indirect transmission rate per age category.
        pub upsilon: [f64; 3],
        /// Recovery rate per age category.
        pub gamma: [f64; 3],
        /// Shedding rate of infected individuals.
        pub alpha: f64,
        /// Seasonal decay of the infectious pressure per quarter.
        pub beta: [f64; 4],
        /// Background contamination.
        pub epsilon: f64,
    }

    pub fn susceptible_1_to_infected_1(
        u: &[i32],
        v: &[f64],
        ldata: &[f64],
        _gdata: &[f64],
        _t: f64,
    ) -> f64 {
        ldata[UPSILON_1] * v[PHI] * f64::from(u[S_1])
    }

    pub fn infected_1_to_susceptible_1(
        u: &[i32],
        _v: &[f64],
        ldata: &[f64],
        _gdata: &[f64],
        _t: f64,
    ) -> f64 {
        ldata[GAMMA_1] * f64::from(u[I_1])
    }

    pub fn susceptible_2_to_infected_2(
        u: &[i32],
        v: &[f64],
        ldata: &[f64],
        _gdata: &[f64],
        _t: f64,
    ) -> f64 {
        ldata[UPSILON_2] * v[PHI] * f64::from(u[S_2])
    }

    pub fn infected_2_to_susceptible_2(
        u: &[i32],
        _v: &[f64],
        ldata: &[f64],
        _gdata: &[f64],
        _t: f64,
    ) -> f64 {
        ldata[GAMMA_2] * f64::from(u[I_2])
    }

    pub fn susceptible_3_to_infected_3(
        u: &[i32],
        v: &[f64],
        ldata: &[f64],
        _gdata: &[f64],
        _t: f64,
    ) -> f64 {
        ldata[UPSILON_3] * v[PHI] * f64::from(u[S_3])
    }

    pub fn infected_3_to_susceptible_3(
        u: &[i32],
        _v: &[f64],
        ldata: &[f64],
        _gdata: &[f64],
        _t: f64,
    ) -> f64 {
        ldata[GAMMA_3] * f64::from(u[I_3])
    }

    /// Decay the infectious pressure with the current quarter's coefficient
    /// and add shedding proportional to the prevalence.
    ///
    /// Returns 1 when `phi` changed so the solver refreshes the node's
    /// transition rates.
    pub fn post_time_step(
        v_new: &mut [f64],
        u: &[i32],
        v: &[f64],
        ldata: &[f64],
        _gdata: &[f64],
        _node: usize,
        t: f64,
    ) -> i32 {
        let phi = v[PHI];
        let s_n = f64::from(u[S_1] + u[S_2] + u[S_3]);
        let i_n = f64::from(u[I_1] + u[I_2] + u[I_3]);

        let beta = match ((t as i64).rem_euclid(DAYS_IN_YEAR)) / DAYS_IN_QUARTER {
            0 => ldata[BETA_Q1],
            1 => ldata[BETA_Q2],
            2 => ldata[BETA_Q3],
            _ => ldata[BETA_Q4],
        };
        let mut next = phi * (1.0 - beta);
        next += if s_n + i_n > 0.0 {
            ldata[ALPHA] * i_n / (i_n + s_n) + ldata[EPSILON]
        } else {
            ldata[EPSILON]
        };

        v_new[PHI] = next;
        i32::from(next != phi)
    }

    /// Assemble a SISe3 model over `n_nodes` nodes.
    ///
    /// `u0` holds six compartment counts per node, `phi0` one infectious
    /// pressure per node. The select matrix exposes four columns: enter
    /// into `S_1`, and one column per age category for sampling exits and
    /// transfers. The shift matrix's two columns age individuals into the
    /// next category.
    pub fn model(
        u0: Vec<i32>,
        phi0: Vec<f64>,
        params: Params,
        tspan: Vec<f64>,
        events: EventList,
    ) -> Model {
        let n_nodes = phi0.len();
        debug_assert_eq!(u0.len(), n_nodes * N_COMPARTMENTS);

        let mut ldata = Vec::with_capacity(n_nodes * N_LOCAL);
        for _ in 0..n_nodes {
            ldata.extend_from_slice(&[
                params.upsilon[0],
                params.upsilon[1],
                params.upsilon[2],
                params.gamma[0],
                params.gamma[1],
                params.gamma[2],
                params.alpha,
                params.beta[0],
                params.beta[1],
                params.beta[2],
                params.beta[3],
                params.epsilon,
            ]);
        }

        let state_change = CscMatrix::with_values(
            N_COMPARTMENTS,
            &[
                &[(S_1, -1), (I_1, 1)],
                &[(S_1, 1), (I_1, -1)],
                &[(S_2, -1), (I_2, 1)],
                &[(S_2, 1), (I_2, -1)],
                &[(S_3, -1), (I_3, 1)],
                &[(S_3, 1), (I_3, -1)],
            ],
        );
        // Both transitions of an age category read the compartments the
        // other one writes.
        let dependencies = CscMatrix::pattern(
            6,
            &[&[0, 1], &[0, 1], &[2, 3], &[2, 3], &[4, 5], &[4, 5]],
        );
        let select = CscMatrix::pattern(
            N_COMPARTMENTS,
            &[&[S_1], &[S_1, I_1], &[S_2, I_2], &[S_3, I_3]],
        );
        let shift = CscMatrix::with_values(
            N_COMPARTMENTS,
            &[&[(S_1, 2), (I_1, 2)], &[(S_2, 2), (I_2, 2)]],
        );

        Model {
            n_nodes,
            n_compartments: N_COMPARTMENTS,
            n_transitions: 6,
            n_continuous: 1,
            n_local: N_LOCAL,
            u0,
            v0: phi0,
            state_change,
            dependencies,
            select,
            shift,
            tspan,
            ldata,
            gdata: Vec::new(),
            events,
            transitions: vec![
                susceptible_1_to_infected_1,
                infected_1_to_susceptible_1,
                susceptible_2_to_infected_2,
                infected_2_to_susceptible_2,
                susceptible_3_to_infected_3,
                infected_3_to_susceptible_3,
            ],
            post_step: post_time_step,
        }
    }
}

/// SIR: mass-action susceptible-infected-recovered dynamics in a closed
/// population, no continuous state.
pub mod sir {
    use crate::events::EventList;
    use crate::model::Model;
    use crate::no_post_step;
    use crate::sparse::CscMatrix;

    pub const S: usize = 0;
    pub const I: usize = 1;
    pub const R: usize = 2;
    pub const N_COMPARTMENTS: usize = 3;

    /// Offsets into a node's local-parameter row.
    pub const BETA: usize = 0;
    pub const GAMMA: usize = 1;

    pub fn infect(u: &[i32], _v: &[f64], ldata: &[f64], _gdata: &[f64], _t: f64) -> f64 {
        let population = u[S] + u[I] + u[R];
        if population > 0 {
            ldata[BETA] * f64::from(u[S]) * f64::from(u[I]) / f64::from(population)
        } else {
            0.0
        }
    }

    pub fn recover(u: &[i32], _v: &[f64], ldata: &[f64], _gdata: &[f64], _t: f64) -> f64 {
        ldata[GAMMA] * f64::from(u[I])
    }

    /// Assemble an SIR model over the nodes described by `u0`.
    ///
    /// The select matrix exposes a column listing all compartments (for
    /// exits and transfers) and a column listing only `S` (for enters).
    pub fn model(
        u0: Vec<i32>,
        beta: f64,
        gamma: f64,
        tspan: Vec<f64>,
        events: EventList,
    ) -> Model {
        debug_assert_eq!(u0.len() % N_COMPARTMENTS, 0);
        let n_nodes = u0.len() / N_COMPARTMENTS;
        let ldata: Vec<f64> = (0..n_nodes).flat_map(|_| [beta, gamma]).collect();

        Model {
            n_nodes,
            n_compartments: N_COMPARTMENTS,
            n_transitions: 2,
            n_continuous: 0,
            n_local: 2,
            u0,
            v0: Vec::new(),
            state_change: CscMatrix::with_values(
                N_COMPARTMENTS,
                &[&[(S, -1), (I, 1)], &[(I, -1), (R, 1)]],
            ),
            dependencies: CscMatrix::pattern(2, &[&[0, 1], &[0, 1]]),
            select: CscMatrix::pattern(N_COMPARTMENTS, &[&[S, I, R], &[S]]),
            shift: CscMatrix::zero(N_COMPARTMENTS, 0),
            tspan,
            ldata,
            gdata: Vec::new(),
            events,
            transitions: vec![infect, recover],
            post_step: no_post_step,
        }
    }
}
