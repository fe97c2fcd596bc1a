//! The parallel solver: per-node Gillespie stepping, scheduled-event
//! processing, and the per-day synchronization protocol.
//!
//! Nodes are split into one partition per worker thread; the assignment is
//! fixed for the whole run. Each simulated day runs four phases:
//!
//! 1. every partition advances its nodes' Markov chains to the day boundary
//!    and drains its ripe intra-node events,
//! 2. the ripe inter-node transfers are applied under a single writer,
//! 3. every partition invokes the post-time-step hook on its nodes and
//!    refreshes the transition rates of nodes touched by events,
//! 4. the driver advances the day, snapshots the trajectory and swaps the
//!    continuous-state buffers.
//!
//! Within a phase, partitions touch disjoint node ranges of the shared
//! state, so the phases need no locks; the joins between them are the only
//! synchronization points. Each partition owns an independent random number
//! stream seeded from a master stream, which makes a run reproducible for a
//! fixed `(seed, threads)` pair.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::events::{EventKind, EventQueue, partition_range, split_events};
use crate::model::{Model, Tables};
use crate::output::{OutputRequest, Trajectory, TrajectoryWriter};
use crate::sampler::{sample_select, uniform_pos};
use crate::{SimError, Verbosity};

/// Run configuration.
#[derive(Clone, Debug)]
pub struct SimOptions {
    /// Number of worker threads, and equally the number of node partitions.
    pub threads: usize,
    /// Master random seed.
    pub seed: u64,
    /// Amount of feedback while the simulation runs.
    pub verbosity: Verbosity,
    /// Output form for the compartment trajectory.
    pub compartment_output: OutputRequest,
    /// Output form for the continuous-state trajectory.
    pub continuous_output: OutputRequest,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            seed: 0,
            verbosity: Verbosity::Silent,
            compartment_output: OutputRequest::Dense,
            continuous_output: OutputRequest::Dense,
        }
    }
}

/// Per-partition worker state.
///
/// Holds the partition's node range, its rate cache and node clocks, its
/// intra-node event queue, its random number stream and the sampling
/// scratch rows. The first failure ends the partition's work; the driver
/// collects the codes after each phase.
struct Partition {
    first_node: usize,
    n_nodes: usize,
    rng: ChaCha8Rng,
    /// Current propensities, node-major `n_nodes x n_transitions`.
    t_rate: Vec<f64>,
    /// Per-node sum of `t_rate`, maintained incrementally.
    sum_t_rate: Vec<f64>,
    /// Per-node local clock.
    t_time: Vec<f64>,
    e1: EventQueue,
    e1_index: usize,
    individuals: Vec<i32>,
    u_scratch: Vec<i32>,
    error: Option<SimError>,
}

impl Partition {
    /// Compute every node's transition rates from scratch against `v`.
    fn init_rates(&mut self, u: &[i32], v: &[f64], model: &Model, tt: f64) -> Result<(), SimError> {
        let nt = model.n_transitions;
        let nc = model.n_compartments;
        for local in 0..self.n_nodes {
            let global = self.first_node + local;
            let u_node = &u[local * nc..][..nc];
            let v_node = model.v_node(v, global);
            let ldata = model.ldata_node(global);
            let mut sum = 0.0;
            for (t, rate_fn) in model.transitions.iter().enumerate() {
                let rate = rate_fn(u_node, v_node, ldata, &model.gdata, tt);
                if !rate.is_finite() || rate < 0.0 {
                    return Err(SimError::InvalidRate);
                }
                self.t_rate[local * nt + t] = rate;
                sum += rate;
            }
            self.sum_t_rate[local] = sum;
            self.t_time[local] = tt;
        }
        Ok(())
    }

    /// Advance one node's Markov chain to the day boundary (direct method).
    fn advance_node(
        &mut self,
        local: usize,
        u: &mut [i32],
        v: &[f64],
        model: &Model,
        tables: &Tables,
        next_day: f64,
    ) -> Result<(), SimError> {
        let nt = model.n_transitions;
        let nc = model.n_compartments;
        let global = self.first_node + local;
        loop {
            // Time to the next transition is exponential in the total rate.
            if self.sum_t_rate[local] <= 0.0 {
                self.t_time[local] = next_day;
                return Ok(());
            }
            let tau = -uniform_pos(&mut self.rng).ln() / self.sum_t_rate[local];
            if self.t_time[local] + tau >= next_day {
                self.t_time[local] = next_day;
                return Ok(());
            }
            self.t_time[local] += tau;

            // Pick the transition whose rate prefix sum exceeds the draw.
            let r = uniform_pos(&mut self.rng) * self.sum_t_rate[local];
            let rates = &self.t_rate[local * nt..][..nt];
            let mut tr = 0;
            let mut cum = rates[0];
            while tr + 1 < nt && r > cum {
                tr += 1;
                cum += rates[tr];
            }

            // The incrementally maintained sum can drift from the true sum
            // by a few ulps and select a dead transition. Walk back to the
            // nearest non-zero rate; when none remains this is a nil event
            // and the node idles for the rest of the day.
            if rates[tr] == 0.0 {
                while tr > 0 && rates[tr] == 0.0 {
                    tr -= 1;
                }
                if rates[tr] == 0.0 {
                    self.sum_t_rate[local] = 0.0;
                    return Ok(());
                }
            }

            // Apply the state-change column.
            for d in &tables.transition_deltas[tr] {
                let cell = &mut u[local * nc + d.compartment];
                *cell += d.delta;
                if *cell < 0 {
                    return Err(SimError::NegativeState);
                }
            }

            // Refresh the rates the dependency graph marks as stale.
            let mut delta = 0.0;
            for &dep in &tables.dependencies[tr] {
                let old = self.t_rate[local * nt + dep];
                let rate = (model.transitions[dep])(
                    &u[local * nc..][..nc],
                    model.v_node(v, global),
                    model.ldata_node(global),
                    &model.gdata,
                    self.t_time[local],
                );
                if !rate.is_finite() || rate < 0.0 {
                    return Err(SimError::InvalidRate);
                }
                self.t_rate[local * nt + dep] = rate;
                delta += rate - old;
            }
            self.sum_t_rate[local] += delta;
        }
    }

    /// Apply the partition's ripe intra-node events.
    ///
    /// `u` and `update` are the partition's node-range slices.
    fn drain_e1(
        &mut self,
        u: &mut [i32],
        update: &mut [bool],
        tt: f64,
        model: &Model,
        tables: &Tables,
    ) -> Result<(), SimError> {
        let nc = model.n_compartments;
        while self.e1_index < self.e1.len() && f64::from(self.e1.time[self.e1_index]) <= tt {
            let j = self.e1_index;
            let node_local = self.e1.node[j] - self.first_node;
            let base = node_local * nc;
            let s = self.e1.select[j];
            match self.e1.event[j] {
                EventKind::Enter => {
                    // All individuals enter the first listed compartment;
                    // an empty select column makes the event a no-op.
                    if let Some(&c0) = tables.select[s].first() {
                        let cell = &mut u[base + c0];
                        *cell = cell.wrapping_add(self.e1.n[j]);
                        if *cell < 0 {
                            return Err(SimError::NegativeState);
                        }
                    }
                }
                EventKind::Exit => {
                    sample_select(
                        &tables.select[s],
                        &u[base..][..nc],
                        self.e1.n[j],
                        self.e1.proportion[j],
                        &mut self.individuals,
                        &mut self.u_scratch,
                        &mut self.rng,
                    )?;
                    for &c in &tables.select[s] {
                        let cell = &mut u[base + c];
                        *cell -= self.individuals[c];
                        if *cell < 0 {
                            return Err(SimError::NegativeState);
                        }
                    }
                }
                EventKind::InternalTransfer => {
                    sample_select(
                        &tables.select[s],
                        &u[base..][..nc],
                        self.e1.n[j],
                        self.e1.proportion[j],
                        &mut self.individuals,
                        &mut self.u_scratch,
                        &mut self.rng,
                    )?;
                    let h = self.e1.shift[j] as usize;
                    for &c in &tables.select[s] {
                        let offset = tables.shift_offset(nc, h, c);
                        let to = (base as i64 + c as i64 + i64::from(offset)) as usize;
                        let cell = &mut u[to];
                        *cell = cell.wrapping_add(self.individuals[c]);
                        if *cell < 0 {
                            return Err(SimError::NegativeState);
                        }
                        let cell = &mut u[base + c];
                        *cell -= self.individuals[c];
                        if *cell < 0 {
                            return Err(SimError::NegativeState);
                        }
                    }
                }
                EventKind::ExternalTransfer => {
                    unreachable!("inter-node transfers are routed to the inter-node queue")
                }
            }
            update[node_local] = true;
            self.e1_index += 1;
        }
        Ok(())
    }

    /// Run the post-time-step hook on every node of the partition and
    /// refresh the rates of nodes the hook or an event has touched.
    ///
    /// `u` and `v` span all nodes; `v_new` and `update` are the partition's
    /// node-range slices.
    fn post_step(
        &mut self,
        u: &[i32],
        v: &[f64],
        v_new: &mut [f64],
        update: &mut [bool],
        model: &Model,
        tt: f64,
    ) -> Result<(), SimError> {
        let nt = model.n_transitions;
        let nd = model.n_continuous;
        for local in 0..self.n_nodes {
            let global = self.first_node + local;
            let u_node = model.u_node(u, global);
            let v_node = model.v_node(v, global);
            let v_new_node = &mut v_new[local * nd..][..nd];
            let rc = (model.post_step)(
                v_new_node,
                u_node,
                v_node,
                model.ldata_node(global),
                &model.gdata,
                global,
                tt,
            );
            if rc < 0 {
                return Err(SimError::PostTimeStep(rc));
            }
            if rc > 0 || update[local] {
                // Full refresh against the day's new continuous state.
                let mut delta = 0.0;
                for (t, rate_fn) in model.transitions.iter().enumerate() {
                    let old = self.t_rate[local * nt + t];
                    let rate = rate_fn(u_node, v_new_node, model.ldata_node(global), &model.gdata, tt);
                    if !rate.is_finite() || rate < 0.0 {
                        return Err(SimError::InvalidRate);
                    }
                    self.t_rate[local * nt + t] = rate;
                    delta += rate - old;
                }
                self.sum_t_rate[local] += delta;
                update[local] = false;
            }
        }
        Ok(())
    }
}

/// Apply the ripe inter-node transfers.
///
/// Runs on the driver thread between the parallel phases, so it may write
/// to arbitrary nodes without racing anyone. Sampling draws from the first
/// partition's stream, which also owns the queue cursor scratch.
fn apply_e2(
    part: &mut Partition,
    e2: &EventQueue,
    cursor: &mut usize,
    u: &mut [i32],
    update: &mut [bool],
    tt: f64,
    model: &Model,
    tables: &Tables,
) -> Result<(), SimError> {
    let nc = model.n_compartments;
    while *cursor < e2.len() && f64::from(e2.time[*cursor]) <= tt {
        let j = *cursor;
        let node = e2.node[j];
        let dest = e2.dest[j] as usize;
        let s = e2.select[j];
        sample_select(
            &tables.select[s],
            &u[node * nc..][..nc],
            e2.n[j],
            e2.proportion[j],
            &mut part.individuals,
            &mut part.u_scratch,
            &mut part.rng,
        )?;
        for &c in &tables.select[s] {
            let offset = if e2.shift[j] < 0 {
                0
            } else {
                tables.shift_offset(nc, e2.shift[j] as usize, c)
            };
            let to = ((dest * nc + c) as i64 + i64::from(offset)) as usize;
            let cell = &mut u[to];
            *cell = cell.wrapping_add(part.individuals[c]);
            if *cell < 0 {
                return Err(SimError::NegativeState);
            }
            let cell = &mut u[node * nc + c];
            *cell -= part.individuals[c];
            if *cell < 0 {
                return Err(SimError::NegativeState);
            }
        }
        update[node] = true;
        update[dest] = true;
        *cursor += 1;
    }
    Ok(())
}

/// Zip each partition with the mutable node-range slices it owns.
fn partition_work<'a>(
    parts: &'a mut [Partition],
    u: &'a mut [i32],
    update: &'a mut [bool],
    nc: usize,
) -> Vec<(&'a mut Partition, &'a mut [i32], &'a mut [bool])> {
    let mut work = Vec::with_capacity(parts.len());
    let mut u_rest = u;
    let mut update_rest = update;
    for part in parts.iter_mut() {
        let (u_head, u_tail) = u_rest.split_at_mut(part.n_nodes * nc);
        let (update_head, update_tail) = update_rest.split_at_mut(part.n_nodes);
        u_rest = u_tail;
        update_rest = update_tail;
        work.push((part, u_head, update_head));
    }
    work
}

fn check_partitions(parts: &[Partition]) -> Result<(), SimError> {
    match parts.iter().find_map(|p| p.error) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Simulate `model` and return the recorded trajectories.
///
/// All working buffers are allocated up front; the day loop performs no
/// allocation. The run aborts with the first error any partition reports.
pub fn run(model: &Model, opts: &SimOptions) -> Result<Trajectory, SimError> {
    if opts.threads == 0 {
        return Err(SimError::UnsupportedParallelization);
    }

    let tlen = model.tspan.len();
    let nc = model.n_compartments;
    let nd = model.n_continuous;
    let tables = Tables::compile(model);

    let mut uu = model.u0.clone();
    let mut vv_cur = model.v0.clone();
    let mut vv_next = model.v0.clone();
    let mut update_node = vec![false; model.n_nodes];

    let mut u_writer = TrajectoryWriter::new(
        opts.compartment_output.clone(),
        model.n_nodes * nc,
        tlen,
        &uu,
    );
    let mut v_writer = TrajectoryWriter::new(
        opts.continuous_output.clone(),
        model.n_nodes * nd,
        tlen,
        &vv_cur,
    );

    let pool = ThreadPoolBuilder::new()
        .num_threads(opts.threads)
        .build()
        .map_err(|_| SimError::UnsupportedParallelization)?;

    let (mut e1_queues, e2_queue) = split_events(&model.events, model.n_nodes, opts.threads)?;

    let t0 = model.tspan.first().copied().unwrap_or(0.0);
    let mut master = ChaCha8Rng::seed_from_u64(opts.seed);
    let mut parts: Vec<Partition> = Vec::with_capacity(opts.threads);
    for (i, e1) in e1_queues.drain(..).enumerate() {
        let (start, end) = partition_range(i, model.n_nodes, opts.threads);
        let n_nodes = end - start;
        parts.push(Partition {
            first_node: start,
            n_nodes,
            rng: ChaCha8Rng::seed_from_u64(master.r#gen()),
            t_rate: vec![0.0; n_nodes * model.n_transitions],
            sum_t_rate: vec![0.0; n_nodes],
            t_time: vec![t0; n_nodes],
            e1,
            e1_index: 0,
            individuals: vec![0; nc],
            u_scratch: vec![0; nc],
            error: None,
        });
    }

    if tlen == 0 {
        return Ok(Trajectory {
            u: u_writer.into_inner(),
            v: v_writer.into_inner(),
        });
    }

    let t_end = model.tspan[tlen - 1];
    let mut tt = t0;
    let mut next_day = tt.floor() + 1.0;
    let mut e2_cursor = 0usize;

    // Every node's rates once before the main loop.
    {
        let work = partition_work(&mut parts, &mut uu, &mut update_node, nc);
        let vv = &vv_cur;
        pool.install(|| {
            work.into_par_iter().for_each(|(part, u, _)| {
                if let Err(err) = part.init_rates(u, vv, model, tt) {
                    part.error = Some(err);
                }
            });
        });
    }
    check_partitions(&parts)?;

    while !(u_writer.done() && v_writer.done()) {
        // Markov chains to the day boundary, then ripe intra-node events.
        {
            let work = partition_work(&mut parts, &mut uu, &mut update_node, nc);
            let vv = &vv_cur;
            let (tables, next_day, tt) = (&tables, next_day, tt);
            pool.install(|| {
                work.into_par_iter().for_each(|(part, u, update)| {
                    if part.error.is_some() {
                        return;
                    }
                    for local in 0..part.n_nodes {
                        if let Err(err) = part.advance_node(local, u, vv, model, tables, next_day)
                        {
                            part.error = Some(err);
                            return;
                        }
                    }
                    if let Err(err) = part.drain_e1(u, update, tt, model, tables) {
                        part.error = Some(err);
                    }
                });
            });
        }
        check_partitions(&parts)?;

        // Ripe inter-node transfers under a single writer.
        apply_e2(
            &mut parts[0],
            &e2_queue,
            &mut e2_cursor,
            &mut uu,
            &mut update_node,
            tt,
            model,
            &tables,
        )?;

        // Post-time-step hook, then refresh rates where needed.
        {
            let mut work = Vec::with_capacity(parts.len());
            let mut v_rest: &mut [f64] = &mut vv_next;
            let mut update_rest: &mut [bool] = &mut update_node;
            for part in parts.iter_mut() {
                let (v_head, v_tail) = v_rest.split_at_mut(part.n_nodes * nd);
                let (update_head, update_tail) = update_rest.split_at_mut(part.n_nodes);
                v_rest = v_tail;
                update_rest = update_tail;
                work.push((part, v_head, update_head));
            }
            let (uu_ref, vv_ref, tt_now) = (&uu, &vv_cur, tt);
            pool.install(|| {
                work.into_par_iter().for_each(|(part, v_new, update)| {
                    if part.error.is_some() {
                        return;
                    }
                    if let Err(err) = part.post_step(uu_ref, vv_ref, v_new, update, model, tt_now)
                    {
                        part.error = Some(err);
                    }
                });
            });
        }
        check_partitions(&parts)?;

        // The global time now equals the day boundary.
        tt = next_day;
        next_day += 1.0;

        // Record every output time the day has passed, then make the new
        // continuous state current.
        u_writer.store_passed(&model.tspan, tt, &uu);
        v_writer.store_passed(&model.tspan, tt, &vv_next);
        std::mem::swap(&mut vv_cur, &mut vv_next);

        if opts.verbosity >= Verbosity::Progress && t_end > t0 {
            let percent = ((tt - t0) / (t_end - t0) * 100.0) as i32;
            info!("{}% done", percent.min(100));
        }
        if opts.verbosity >= Verbosity::Debug {
            let e1_applied: usize = parts.iter().map(|p| p.e1_index).sum();
            debug!(day = tt, e1 = e1_applied, e2 = e2_cursor, "scheduled events applied");
        }
    }

    Ok(Trajectory {
        u: u_writer.into_inner(),
        v: v_writer.into_inner(),
    })
}
