//! Sampling individuals from a node's compartments.
//!
//! Scheduled events do not name the individuals they move; they name a
//! select column listing the compartments that are eligible. The sampler
//! draws a multiset of `n` individuals without replacement from those
//! compartments, weighted by the current counts.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Hypergeometric};

use crate::SimError;

/// Uniform draw on the open interval (0, 1).
///
/// A zero draw would select a compartment with zero remaining count in the
/// cumulative scans below, and would produce an infinite waiting time in the
/// solver, so it is rejected.
pub(crate) fn uniform_pos(rng: &mut ChaCha8Rng) -> f64 {
    loop {
        let x: f64 = rng.r#gen();
        if x > 0.0 {
            return x;
        }
    }
}

/// Sample individuals from the compartments listed in `compartments`.
///
/// `u_node` is the node's compartment row. When `n` is zero the sample size
/// is `round(proportion * total)` over the listed compartments. The drawn
/// multiset is written into `individuals`, indexed over all compartments
/// with non-listed entries zero. `u_scratch` is a caller-provided scratch
/// row of the same length.
///
/// Fails with [`SimError::SampleSelect`] when there are no compartments to
/// sample from, or the requested size is negative or exceeds the number of
/// eligible individuals.
pub(crate) fn sample_select(
    compartments: &[usize],
    u_node: &[i32],
    n: i32,
    proportion: f64,
    individuals: &mut [i32],
    u_scratch: &mut [i32],
    rng: &mut ChaCha8Rng,
) -> Result<(), SimError> {
    individuals.fill(0);

    let mut n_individuals: i32 = 0;
    let mut n_kinds = 0;
    for &c in compartments {
        if u_node[c] > 0 {
            n_kinds += 1;
        }
        n_individuals += u_node[c];
    }

    let n_states = compartments.len();
    let mut n = n;
    if n == 0 {
        n = (proportion * f64::from(n_individuals)).round() as i32;
    }

    if n_states == 0 || n > n_individuals || n < 0 {
        return Err(SimError::SampleSelect);
    }

    // Deterministic cases first.
    if n == 0 {
        return Ok(());
    } else if n == n_individuals {
        for &c in compartments {
            individuals[c] = u_node[c];
        }
        return Ok(());
    } else if n_states == 1 {
        individuals[compartments[0]] = n;
        return Ok(());
    } else if n_kinds == 1 {
        for &c in compartments {
            if u_node[c] > 0 {
                individuals[c] = n;
                break;
            }
        }
        return Ok(());
    }

    if n_states == 2 {
        // Urn with two kinds: the first compartment's share is
        // hypergeometric, the second gets the remainder.
        let (c0, c1) = (compartments[0], compartments[1]);
        let hyper = Hypergeometric::new(
            (u_node[c0] + u_node[c1]) as u64,
            u_node[c0] as u64,
            n as u64,
        )
        .map_err(|_| SimError::SampleSelect)?;
        individuals[c0] = hyper.sample(rng) as i32;
        individuals[c1] = n - individuals[c0];
    } else {
        // Sequential categorical draws without replacement.
        u_scratch.copy_from_slice(u_node);
        let mut remaining = n_individuals;
        let mut left = n;
        while left > 0 {
            let r = uniform_pos(rng) * f64::from(remaining);
            let mut chosen = compartments[0];
            let mut cum = f64::from(u_scratch[chosen]);
            for &c in &compartments[1..] {
                if r <= cum {
                    break;
                }
                chosen = c;
                cum += f64::from(u_scratch[c]);
            }
            u_scratch[chosen] -= 1;
            individuals[chosen] += 1;
            remaining -= 1;
            left -= 1;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;

    fn draw(
        compartments: &[usize],
        u_node: &[i32],
        n: i32,
        proportion: f64,
        seed: u64,
    ) -> Result<Vec<i32>, SimError> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut individuals = vec![0; u_node.len()];
        let mut scratch = vec![0; u_node.len()];
        sample_select(
            compartments,
            u_node,
            n,
            proportion,
            &mut individuals,
            &mut scratch,
            &mut rng,
        )
        .map(|_| individuals)
    }

    #[test]
    fn all_individuals_is_deterministic() {
        // Asking for every eligible individual copies the listed counts.
        assert_eq!(draw(&[0, 1], &[7, 3, 0], 10, 0.0, 1).unwrap(), vec![7, 3, 0]);
    }

    #[test]
    fn zero_sample_is_empty() {
        assert_eq!(draw(&[0, 1], &[7, 3, 0], 0, 0.0, 1).unwrap(), vec![0, 0, 0]);
    }

    #[test]
    fn proportion_resolves_sample_size() {
        let individuals = draw(&[0, 1], &[6, 4, 0], 0, 0.5, 7).unwrap();
        assert_eq!(individuals.iter().sum::<i32>(), 5);
    }

    #[test]
    fn proportion_one_takes_everything() {
        assert_eq!(draw(&[0, 2], &[4, 9, 2], 0, 1.0, 3).unwrap(), vec![4, 0, 2]);
    }

    #[test]
    fn single_listed_compartment_takes_all() {
        assert_eq!(draw(&[1], &[5, 8, 1], 3, 0.0, 2).unwrap(), vec![0, 3, 0]);
    }

    #[test]
    fn single_nonempty_compartment_takes_all() {
        // Two listed compartments, but only one holds individuals.
        assert_eq!(draw(&[0, 1], &[0, 6, 0], 4, 0.0, 2).unwrap(), vec![0, 4, 0]);
    }

    #[test]
    fn hypergeometric_with_one_zero_urn() {
        // Both compartments listed and non-zero total, one urn empty: the
        // one-kind fast path answers before any random draw.
        assert_eq!(draw(&[0, 1], &[9, 0, 0], 2, 0.0, 5).unwrap(), vec![2, 0, 0]);
    }

    #[test]
    fn oversized_request_fails() {
        assert_eq!(
            draw(&[0, 1], &[2, 1, 0], 5, 0.0, 1).unwrap_err(),
            SimError::SampleSelect
        );
    }

    #[test]
    fn negative_request_fails() {
        assert_eq!(
            draw(&[0, 1], &[2, 1, 0], -1, 0.0, 1).unwrap_err(),
            SimError::SampleSelect
        );
    }

    #[test]
    fn empty_selection_fails() {
        assert_eq!(draw(&[], &[2, 1], 1, 0.0, 1).unwrap_err(), SimError::SampleSelect);
    }

    #[test]
    fn two_state_split_covers_the_sample() {
        let u = [40, 60, 0];
        for seed in 0..20 {
            let individuals = draw(&[0, 1], &u, 30, 0.0, seed).unwrap();
            assert_eq!(individuals.iter().sum::<i32>(), 30);
            assert!(individuals[0] <= u[0] && individuals[1] <= u[1]);
        }
    }

    proptest! {
        /// A successful draw sums to the requested size and never exceeds
        /// any compartment's available count.
        #[test]
        fn sample_sums_and_bounds(
            counts in prop::collection::vec(0..50i32, 3..6),
            frac in 0.0..1.0f64,
            seed in 0..u64::MAX,
        ) {
            let compartments: Vec<usize> = (0..counts.len()).collect();
            let total: i32 = counts.iter().sum();
            let n = (frac * f64::from(total)) as i32;
            let individuals = draw(&compartments, &counts, n, 0.0, seed).unwrap();
            let drawn: i32 = individuals.iter().sum();
            if n == 0 {
                // n == 0 falls back to the proportion, which is zero here.
                prop_assert_eq!(drawn, 0);
            } else {
                prop_assert_eq!(drawn, n);
            }
            for (c, &k) in individuals.iter().enumerate() {
                prop_assert!(k >= 0 && k <= counts[c]);
            }
        }
    }
}
