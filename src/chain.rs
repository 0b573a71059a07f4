//! Finite discrete-time Markov chain representation.
//!
//! A [`ChainModel`] holds an ordered state space, an initial distribution,
//! and a transition matrix, all validated at construction. Models are
//! immutable after construction; a changed model is a new instance.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;

use approx::abs_diff_eq;
use log::{debug, trace};
use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;

use crate::error::{MarkovError, Result};

/// Tolerance used when checking that a probability distribution sums to 1.
pub const PROBABILITY_TOLERANCE: f64 = 1e-9;

/// Default convergence tolerance for [`ChainModel::stationary_distribution`].
pub const STATIONARY_TOLERANCE: f64 = 1e-10;

/// Default iteration cap for [`ChainModel::stationary_distribution`].
pub const STATIONARY_MAX_ITERATIONS: usize = 10_000;

/// A validated discrete-time Markov chain over a finite state space.
///
/// The state-space order defines internal index positions and the tie-break
/// order used elsewhere in the crate; it carries no probabilistic meaning.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use markov::ChainModel;
///
/// let chain = ChainModel::new(
///     vec!["Sunny", "Rainy"],
///     HashMap::from([("Sunny", 2.0 / 3.0), ("Rainy", 1.0 / 3.0)]),
///     HashMap::from([
///         ("Sunny", HashMap::from([("Sunny", 0.8), ("Rainy", 0.2)])),
///         ("Rainy", HashMap::from([("Sunny", 0.4), ("Rainy", 0.6)])),
///     ]),
/// )
/// .unwrap();
///
/// assert_eq!(chain.transition_probability(&"Rainy", &"Sunny").unwrap(), 0.4);
/// ```
#[derive(Debug, Clone)]
pub struct ChainModel<S> {
    states: Vec<S>,
    index: HashMap<S, usize>,
    initial: Array1<f64>,
    transitions: Array2<f64>,
}

impl<S> ChainModel<S>
where
    S: Clone + Eq + Hash + Display,
{
    /// Builds a chain from a state space, an initial distribution, and a
    /// transition mapping, validating every invariant up front.
    ///
    /// The initial distribution must carry an entry for every state (entries
    /// may be 0). A transition row is required for every source state;
    /// destinations omitted from a row are taken as probability 0, and each
    /// row must still sum to 1.
    ///
    /// # Errors
    ///
    /// Returns [`MarkovError::Validation`] if the state space is empty or
    /// contains duplicates, if any referenced label is outside the state
    /// space, if any probability falls outside [0, 1], or if the initial
    /// distribution or any transition row does not sum to 1 within
    /// [`PROBABILITY_TOLERANCE`].
    pub fn new(
        states: Vec<S>,
        initial: HashMap<S, f64>,
        transitions: HashMap<S, HashMap<S, f64>>,
    ) -> Result<Self> {
        if states.is_empty() {
            return Err(MarkovError::validation("state space is empty"));
        }

        let mut index = HashMap::with_capacity(states.len());
        for (i, state) in states.iter().enumerate() {
            if index.insert(state.clone(), i).is_some() {
                return Err(MarkovError::validation(format!(
                    "duplicate state label `{state}`"
                )));
            }
        }

        let pi = build_distribution(&states, &index, &initial, "initial distribution", true)?;
        let sum = pi.sum();
        if !abs_diff_eq!(sum, 1.0, epsilon = PROBABILITY_TOLERANCE) {
            return Err(MarkovError::validation(format!(
                "initial probabilities sum to {sum}, expected 1"
            )));
        }

        for source in transitions.keys() {
            if !index.contains_key(source) {
                return Err(MarkovError::validation(format!(
                    "transition matrix references unknown state `{source}`"
                )));
            }
        }

        let n = states.len();
        let mut q = Array2::zeros((n, n));
        for (i, state) in states.iter().enumerate() {
            let row = transitions.get(state).ok_or_else(|| {
                MarkovError::validation(format!("missing transition row for state `{state}`"))
            })?;
            let labelled = format!("transition row for state `{state}`");
            let row = build_distribution(&states, &index, row, &labelled, false)?;
            let sum = row.sum();
            if !abs_diff_eq!(sum, 1.0, epsilon = PROBABILITY_TOLERANCE) {
                return Err(MarkovError::validation(format!(
                    "{labelled} sums to {sum}, expected 1"
                )));
            }
            for (j, &p) in row.iter().enumerate() {
                q[[i, j]] = p;
            }
        }

        Ok(Self {
            states,
            index,
            initial: pi,
            transitions: q,
        })
    }

    /// The ordered state space.
    pub fn states(&self) -> &[S] {
        &self.states
    }

    /// Number of states in the chain.
    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    /// Returns P(`to` | `from`), the one-step transition probability.
    ///
    /// # Errors
    ///
    /// Returns [`MarkovError::UnknownState`] if either label is outside the
    /// state space.
    pub fn transition_probability(&self, from: &S, to: &S) -> Result<f64> {
        let i = self.state_index(from)?;
        let j = self.state_index(to)?;
        Ok(self.transitions[[i, j]])
    }

    /// Returns π(`state`), the probability of starting in `state`.
    ///
    /// # Errors
    ///
    /// Returns [`MarkovError::UnknownState`] if the label is outside the
    /// state space.
    pub fn initial_probability(&self, state: &S) -> Result<f64> {
        let i = self.state_index(state)?;
        Ok(self.initial[i])
    }

    /// Computes the stationary distribution by power iteration with the
    /// default tolerance and iteration cap.
    ///
    /// Equivalent to
    /// `stationary_distribution_with(STATIONARY_MAX_ITERATIONS, STATIONARY_TOLERANCE)`.
    ///
    /// # Errors
    ///
    /// Returns [`MarkovError::NonConvergence`] if the iteration cap is hit
    /// before the L1 change between successive iterates drops below the
    /// tolerance.
    pub fn stationary_distribution(&self) -> Result<Vec<f64>> {
        self.stationary_distribution_with(STATIONARY_MAX_ITERATIONS, STATIONARY_TOLERANCE)
    }

    /// Computes the stationary distribution by power iteration.
    ///
    /// Starting from the uniform vector, repeatedly applies `d ← d · Q`
    /// until the L1 change between successive iterates drops below
    /// `tolerance` or `max_iterations` is reached. The result is aligned
    /// with [`ChainModel::states`] order and normalized to sum to 1; it
    /// satisfies the fixed-point property `d ≈ d · Q`.
    ///
    /// The cap is an iteration count rather than wall-clock time, so the
    /// computation stays deterministic.
    ///
    /// # Errors
    ///
    /// Returns [`MarkovError::NonConvergence`] carrying the iteration count
    /// and last residual if the cap is hit first. Callers may retry with a
    /// relaxed tolerance or a higher cap.
    pub fn stationary_distribution_with(
        &self,
        max_iterations: usize,
        tolerance: f64,
    ) -> Result<Vec<f64>> {
        let n = self.states.len();
        let mut dist = Array1::from_elem(n, 1.0 / n as f64);
        let mut residual = f64::INFINITY;

        for iteration in 1..=max_iterations {
            let next = dist.dot(&self.transitions);
            residual = next
                .iter()
                .zip(dist.iter())
                .map(|(a, b)| (a - b).abs())
                .sum();
            trace!("power iteration {iteration}: L1 change {residual:e}");
            dist = next;
            if residual < tolerance {
                let total = dist.sum();
                dist.mapv_inplace(|p| p / total);
                debug!("stationary distribution converged after {iteration} iterations");
                return Ok(dist.to_vec());
            }
        }

        Err(MarkovError::NonConvergence {
            iterations: max_iterations,
            residual,
        })
    }

    /// Samples a state path of length `steps` from the chain.
    ///
    /// The first state is drawn from π, each successor from the current
    /// state's transition row. A length of 0 yields an empty path. The walk
    /// is deterministic under a seeded rng.
    pub fn simulate<R: Rng>(&self, steps: usize, rng: &mut R) -> Vec<S> {
        let mut path = Vec::with_capacity(steps);
        if steps == 0 {
            return path;
        }
        let mut current = sample_index(self.initial.view(), rng);
        path.push(self.states[current].clone());
        for _ in 1..steps {
            current = sample_index(self.transitions.row(current), rng);
            path.push(self.states[current].clone());
        }
        path
    }

    pub(crate) fn state_index(&self, label: &S) -> Result<usize> {
        self.index
            .get(label)
            .copied()
            .ok_or_else(|| MarkovError::unknown_state(label))
    }

    pub(crate) fn initial_vector(&self) -> &Array1<f64> {
        &self.initial
    }

    pub(crate) fn transition_matrix(&self) -> &Array2<f64> {
        &self.transitions
    }
}

/// Converts a label-keyed probability mapping into a dense vector aligned
/// with the state-space order, rejecting foreign labels and out-of-range
/// probabilities. With `require_all`, every state must have an entry;
/// otherwise missing entries are taken as probability 0.
fn build_distribution<S>(
    states: &[S],
    index: &HashMap<S, usize>,
    mapping: &HashMap<S, f64>,
    what: &str,
    require_all: bool,
) -> Result<Array1<f64>>
where
    S: Clone + Eq + Hash + Display,
{
    for label in mapping.keys() {
        if !index.contains_key(label) {
            return Err(MarkovError::validation(format!(
                "{what} references unknown state `{label}`"
            )));
        }
    }
    let mut dense = Array1::zeros(states.len());
    for (i, state) in states.iter().enumerate() {
        let p = match mapping.get(state) {
            Some(&p) => p,
            None if require_all => {
                return Err(MarkovError::validation(format!(
                    "{what} is missing state `{state}`"
                )));
            }
            None => 0.0,
        };
        if !(0.0..=1.0).contains(&p) {
            return Err(MarkovError::validation(format!(
                "{what} has probability {p} for state `{state}`, outside [0, 1]"
            )));
        }
        dense[i] = p;
    }
    Ok(dense)
}

/// Draws an index from a probability row by inverse-CDF sampling.
fn sample_index<R: Rng>(weights: ArrayView1<'_, f64>, rng: &mut R) -> usize {
    let draw: f64 = rng.gen();
    let mut cumulative = 0.0;
    for (i, &w) in weights.iter().enumerate() {
        cumulative += w;
        if draw < cumulative {
            return i;
        }
    }
    // Float slop can leave the cumulative sum a hair under 1.0.
    weights.len() - 1
}
