//! Maximum-likelihood hidden-state decoding for hidden Markov models.
//!
//! A [`HiddenMarkovDecoder`] pairs a [`ChainModel`] over hidden states with
//! an emission model mapping each hidden state to a distribution over
//! observation symbols, and recovers the most likely hidden-state sequence
//! for an observed emission sequence by dynamic programming.
//!
//! Two decoding policies are provided:
//!
//! - [`HiddenMarkovDecoder::decode`] picks the best hidden state
//!   independently at each step (the argmax of that step's score vector).
//!   The reported path is not guaranteed to be globally consistent with a
//!   single maximum-probability trajectory through the transition graph.
//! - [`HiddenMarkovDecoder::decode_viterbi`] stores backpointers during the
//!   forward pass and backtracks from the best final state, yielding a
//!   globally consistent trajectory (classical Viterbi).
//!
//! Both share the same recurrence and return identical score vectors. Scores
//! are chained products in the linear probability domain; for very long
//! observation sequences they underflow toward zero, so this decoder is
//! suited to short-to-moderate sequences.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;

use approx::abs_diff_eq;
use log::debug;
use ndarray::Array2;

use crate::chain::{ChainModel, PROBABILITY_TOLERANCE};
use crate::error::{MarkovError, Result};

/// Result of decoding an observation sequence.
///
/// `path` and `scores` have the same length as the observation sequence.
/// `scores[t]` holds the joint likelihood of each hidden state at step `t`,
/// in state-space order, retained for diagnostics and tabular display.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeResult<S> {
    /// Reported hidden-state label at each step.
    pub path: Vec<S>,
    /// Per-step score vector, one entry per hidden state.
    pub scores: Vec<Vec<f64>>,
}

/// Decodes observation sequences against a hidden-state chain and an
/// emission model. Immutable after construction; `decode` is a pure
/// function of its inputs, so one decoder can serve concurrent callers.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use markov::{ChainModel, HiddenMarkovDecoder};
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
/// let decoder = HiddenMarkovDecoder::new(
///     chain,
///     HashMap::from([
///         ("Sunny", HashMap::from([("Happy", 0.8), ("Grumpy", 0.2)])),
///         ("Rainy", HashMap::from([("Happy", 0.4), ("Grumpy", 0.6)])),
///     ]),
/// )
/// .unwrap();
///
/// let result = decoder.decode(&["Happy", "Grumpy"]).unwrap();
/// assert_eq!(result.path, vec!["Sunny", "Sunny"]);
/// ```
#[derive(Debug, Clone)]
pub struct HiddenMarkovDecoder<S, O> {
    chain: ChainModel<S>,
    symbols: Vec<O>,
    symbol_index: HashMap<O, usize>,
    emissions: Array2<f64>,
}

impl<S, O> HiddenMarkovDecoder<S, O>
where
    S: Clone + Eq + Hash + Display,
    O: Clone + Eq + Hash + Display,
{
    /// Builds a decoder from a hidden-state chain and an emission model.
    ///
    /// The emission model's keys must be exactly the chain's state space.
    /// The observation alphabet is the union of symbols across all rows; a
    /// symbol absent from one state's row has probability 0 for that state,
    /// but every row must still sum to 1.
    ///
    /// # Errors
    ///
    /// Returns [`MarkovError::Validation`] if the emission model's keys are
    /// not exactly the chain's state space, if any emission probability is
    /// outside [0, 1], or if any emission row does not sum to 1 within
    /// [`PROBABILITY_TOLERANCE`].
    pub fn new(chain: ChainModel<S>, emissions: HashMap<S, HashMap<O, f64>>) -> Result<Self> {
        for state in emissions.keys() {
            if chain.state_index(state).is_err() {
                return Err(MarkovError::validation(format!(
                    "emission model references unknown hidden state `{state}`"
                )));
            }
        }

        let mut symbols: Vec<O> = Vec::new();
        let mut symbol_index: HashMap<O, usize> = HashMap::new();
        for state in chain.states() {
            let row = emissions.get(state).ok_or_else(|| {
                MarkovError::validation(format!(
                    "emission model is missing hidden state `{state}`"
                ))
            })?;
            for symbol in row.keys() {
                if !symbol_index.contains_key(symbol) {
                    symbol_index.insert(symbol.clone(), symbols.len());
                    symbols.push(symbol.clone());
                }
            }
        }

        let n = chain.num_states();
        let mut matrix = Array2::zeros((n, symbols.len()));
        for (i, state) in chain.states().iter().enumerate() {
            let row = &emissions[state];
            let mut sum = 0.0;
            for (symbol, &p) in row {
                if !(0.0..=1.0).contains(&p) {
                    return Err(MarkovError::validation(format!(
                        "emission row for state `{state}` has probability {p} for symbol \
                         `{symbol}`, outside [0, 1]"
                    )));
                }
                matrix[[i, symbol_index[symbol]]] = p;
                sum += p;
            }
            if !abs_diff_eq!(sum, 1.0, epsilon = PROBABILITY_TOLERANCE) {
                return Err(MarkovError::validation(format!(
                    "emission row for state `{state}` sums to {sum}, expected 1"
                )));
            }
        }

        Ok(Self {
            chain,
            symbols,
            symbol_index,
            emissions: matrix,
        })
    }

    /// The hidden-state chain this decoder wraps.
    pub fn chain(&self) -> &ChainModel<S> {
        &self.chain
    }

    /// The observation alphabet (union of all emission-row symbols).
    pub fn symbols(&self) -> &[O] {
        &self.symbols
    }

    /// Decodes an observation sequence, reporting at each step the hidden
    /// state with the maximum score at that step.
    ///
    /// Step 0 scores each state as `π(s) · b(s, o₀)`; step t scores it as
    /// `max_p [score(p, t−1) · q(p, s)] · b(s, oₜ)`. The reported state at
    /// each step is the per-step argmax, ties broken by state-space order.
    /// Because each step is chosen independently, the path may disagree with
    /// the globally best trajectory; use [`decode_viterbi`] when global
    /// consistency matters.
    ///
    /// Deterministic given identical inputs.
    ///
    /// # Errors
    ///
    /// - [`MarkovError::Validation`] if `observations` is empty.
    /// - [`MarkovError::UnknownSymbol`] if any observation is outside the
    ///   alphabet; the whole input is checked before any scoring, so no
    ///   partial output is produced.
    /// - [`MarkovError::DegenerateSequence`] if every hidden state scores
    ///   zero at some step, i.e. the sequence is impossible under this model.
    ///
    /// [`decode_viterbi`]: HiddenMarkovDecoder::decode_viterbi
    pub fn decode(&self, observations: &[O]) -> Result<DecodeResult<S>> {
        let obs = self.index_observations(observations)?;
        let (scores, _) = self.forward_scores(&obs)?;
        let path = scores
            .iter()
            .map(|row| self.chain.states()[argmax(row)].clone())
            .collect();
        debug!(
            "decoded {} observations over {} hidden states (per-step argmax)",
            observations.len(),
            self.chain.num_states()
        );
        Ok(DecodeResult { path, scores })
    }

    /// Decodes an observation sequence with classical Viterbi backtracking.
    ///
    /// Runs the same recurrence as [`decode`](HiddenMarkovDecoder::decode)
    /// but retains, for each state at each step, the predecessor that
    /// achieved the max, then reconstructs the path backwards from the best
    /// final state. The returned score vectors are identical to `decode`'s;
    /// only the path can differ.
    ///
    /// # Errors
    ///
    /// Same conditions as [`decode`](HiddenMarkovDecoder::decode).
    pub fn decode_viterbi(&self, observations: &[O]) -> Result<DecodeResult<S>> {
        let obs = self.index_observations(observations)?;
        let (scores, predecessors) = self.forward_scores(&obs)?;

        let last = scores.len() - 1;
        let mut indices = vec![0_usize; scores.len()];
        indices[last] = argmax(&scores[last]);
        for t in (1..=last).rev() {
            indices[t - 1] = predecessors[t][indices[t]];
        }

        let path = indices
            .iter()
            .map(|&i| self.chain.states()[i].clone())
            .collect();
        debug!(
            "decoded {} observations over {} hidden states (viterbi backtrace)",
            observations.len(),
            self.chain.num_states()
        );
        Ok(DecodeResult { path, scores })
    }

    /// Maps observation symbols to alphabet indices, rejecting empty input
    /// and unrecognized symbols before any scoring happens.
    fn index_observations(&self, observations: &[O]) -> Result<Vec<usize>> {
        if observations.is_empty() {
            return Err(MarkovError::validation("observation sequence is empty"));
        }
        observations
            .iter()
            .enumerate()
            .map(|(position, symbol)| {
                self.symbol_index.get(symbol).copied().ok_or_else(|| {
                    MarkovError::UnknownSymbol {
                        symbol: symbol.to_string(),
                        position,
                    }
                })
            })
            .collect()
    }

    /// Forward pass shared by both decoding policies. Returns the per-step
    /// score vectors and, for each state at each step, the predecessor that
    /// achieved the max (step 0 has no predecessors and stores zeros).
    fn forward_scores(&self, obs: &[usize]) -> Result<(Vec<Vec<f64>>, Vec<Vec<usize>>)> {
        let n = self.chain.num_states();
        let pi = self.chain.initial_vector();
        let q = self.chain.transition_matrix();

        let mut scores: Vec<Vec<f64>> = Vec::with_capacity(obs.len());
        let mut predecessors: Vec<Vec<usize>> = Vec::with_capacity(obs.len());

        let mut first = vec![0.0; n];
        for (s, score) in first.iter_mut().enumerate() {
            *score = pi[s] * self.emissions[[s, obs[0]]];
        }
        check_not_degenerate(&first, 0)?;
        scores.push(first);
        predecessors.push(vec![0; n]);

        for (t, &symbol) in obs.iter().enumerate().skip(1) {
            let prev = &scores[t - 1];
            let mut next = vec![0.0; n];
            let mut back = vec![0_usize; n];
            for (s, (score, from)) in next.iter_mut().zip(back.iter_mut()).enumerate() {
                // Strict > keeps the first predecessor in state order on ties.
                let mut best = f64::NEG_INFINITY;
                let mut best_prev = 0;
                for (p, &prev_score) in prev.iter().enumerate() {
                    let candidate = prev_score * q[[p, s]];
                    if candidate > best {
                        best = candidate;
                        best_prev = p;
                    }
                }
                *score = best * self.emissions[[s, symbol]];
                *from = best_prev;
            }
            check_not_degenerate(&next, t)?;
            scores.push(next);
            predecessors.push(back);
        }

        Ok((scores, predecessors))
    }
}

/// Index of the maximum entry, first index on ties.
fn argmax(row: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate().skip(1) {
        if v > row[best] {
            best = i;
        }
    }
    best
}

/// Rejects an all-zero score row so zeros do not propagate silently.
fn check_not_degenerate(row: &[f64], step: usize) -> Result<()> {
    if row.iter().all(|&p| p == 0.0) {
        return Err(MarkovError::DegenerateSequence { step });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn weather_decoder() -> HiddenMarkovDecoder<&'static str, &'static str> {
        let chain = ChainModel::new(
            vec!["Sunny", "Rainy"],
            HashMap::from([("Sunny", 2.0 / 3.0), ("Rainy", 1.0 / 3.0)]),
            HashMap::from([
                ("Sunny", HashMap::from([("Sunny", 0.8), ("Rainy", 0.2)])),
                ("Rainy", HashMap::from([("Sunny", 0.4), ("Rainy", 0.6)])),
            ]),
        )
        .unwrap();
        HiddenMarkovDecoder::new(
            chain,
            HashMap::from([
                ("Sunny", HashMap::from([("Happy", 0.8), ("Grumpy", 0.2)])),
                ("Rainy", HashMap::from([("Happy", 0.4), ("Grumpy", 0.6)])),
            ]),
        )
        .unwrap()
    }

    const WEATHER_OBS: [&str; 6] = ["Happy", "Happy", "Grumpy", "Grumpy", "Grumpy", "Happy"];

    // Hand-computed joint likelihoods for WEATHER_OBS, (Sunny, Rainy) per step.
    const WEATHER_SCORES: [[f64; 2]; 6] = [
        [0.533_333_333_333_333_3, 0.133_333_333_333_333_33],
        [0.341_333_333_333_333_3, 0.042_666_666_666_666_665],
        [0.054_613_333_333_333_33, 0.040_96],
        [0.008_738_133_333_333_334, 0.014_745_6],
        [0.001_398_101_333_333_333_3, 0.005_308_416],
        [0.001_698_693_12, 0.001_274_019_84],
    ];

    #[test]
    fn weather_example_scores_and_path() {
        let decoder = weather_decoder();
        let result = decoder.decode(&WEATHER_OBS).unwrap();

        assert_eq!(
            result.path,
            vec!["Sunny", "Sunny", "Sunny", "Rainy", "Rainy", "Sunny"]
        );
        assert_eq!(result.scores.len(), 6);
        for (step, expected) in WEATHER_SCORES.iter().enumerate() {
            for (state, &value) in expected.iter().enumerate() {
                assert_abs_diff_eq!(result.scores[step][state], value, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn viterbi_backtrace_diverges_from_per_step_argmax() {
        // The per-step argmax reports Sunny at step 2, but the globally best
        // trajectory passes through Rainy there.
        let decoder = weather_decoder();
        let greedy = decoder.decode(&WEATHER_OBS).unwrap();
        let viterbi = decoder.decode_viterbi(&WEATHER_OBS).unwrap();

        assert_eq!(
            viterbi.path,
            vec!["Sunny", "Sunny", "Rainy", "Rainy", "Rainy", "Sunny"]
        );
        assert_eq!(greedy.scores, viterbi.scores);
        assert_ne!(greedy.path, viterbi.path);
    }

    #[test]
    fn decode_is_deterministic() {
        let decoder = weather_decoder();
        let a = decoder.decode(&WEATHER_OBS).unwrap();
        let b = decoder.decode(&WEATHER_OBS).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn length_one_sequence_reduces_to_step_zero() {
        let decoder = weather_decoder();
        let result = decoder.decode(&["Happy"]).unwrap();
        assert_eq!(result.path, vec!["Sunny"]);
        assert_eq!(result.scores.len(), 1);
        assert_abs_diff_eq!(result.scores[0][0], 2.0 / 3.0 * 0.8, epsilon = 1e-9);
        assert_abs_diff_eq!(result.scores[0][1], 1.0 / 3.0 * 0.4, epsilon = 1e-9);
    }

    #[test]
    fn unknown_symbol_is_rejected_before_scoring() {
        let decoder = weather_decoder();
        let result = decoder.decode(&["Happy", "Confused"]);
        match result {
            Err(MarkovError::UnknownSymbol { symbol, position }) => {
                assert_eq!(symbol, "Confused");
                assert_eq!(position, 1);
            }
            other => panic!("expected UnknownSymbol, got {other:?}"),
        }
    }

    #[test]
    fn empty_sequence_is_rejected() {
        let decoder = weather_decoder();
        let empty: [&str; 0] = [];
        assert!(matches!(
            decoder.decode(&empty),
            Err(MarkovError::Validation(_))
        ));
    }

    #[test]
    fn all_zero_score_row_is_degenerate() {
        // "Meh" is a recognized symbol but has probability 0 everywhere.
        let chain = ChainModel::new(
            vec!["A", "B"],
            HashMap::from([("A", 0.5), ("B", 0.5)]),
            HashMap::from([
                ("A", HashMap::from([("A", 0.5), ("B", 0.5)])),
                ("B", HashMap::from([("A", 0.5), ("B", 0.5)])),
            ]),
        )
        .unwrap();
        let decoder = HiddenMarkovDecoder::new(
            chain,
            HashMap::from([
                ("A", HashMap::from([("x", 1.0), ("Meh", 0.0)])),
                ("B", HashMap::from([("y", 1.0), ("Meh", 0.0)])),
            ]),
        )
        .unwrap();

        match decoder.decode(&["x", "Meh"]) {
            Err(MarkovError::DegenerateSequence { step }) => assert_eq!(step, 1),
            other => panic!("expected DegenerateSequence, got {other:?}"),
        }
        match decoder.decode(&["Meh"]) {
            Err(MarkovError::DegenerateSequence { step }) => assert_eq!(step, 0),
            other => panic!("expected DegenerateSequence, got {other:?}"),
        }
        // Viterbi hits the same wall.
        assert!(matches!(
            decoder.decode_viterbi(&["x", "Meh"]),
            Err(MarkovError::DegenerateSequence { step: 1 })
        ));
    }

    #[test]
    fn ties_break_toward_the_first_state() {
        let chain = ChainModel::new(
            vec!["A", "B"],
            HashMap::from([("A", 0.5), ("B", 0.5)]),
            HashMap::from([
                ("A", HashMap::from([("A", 0.5), ("B", 0.5)])),
                ("B", HashMap::from([("A", 0.5), ("B", 0.5)])),
            ]),
        )
        .unwrap();
        let decoder = HiddenMarkovDecoder::new(
            chain,
            HashMap::from([
                ("A", HashMap::from([("x", 1.0)])),
                ("B", HashMap::from([("x", 1.0)])),
            ]),
        )
        .unwrap();

        let result = decoder.decode(&["x", "x"]).unwrap();
        assert_eq!(result.path, vec!["A", "A"]);
        let result = decoder.decode_viterbi(&["x", "x"]).unwrap();
        assert_eq!(result.path, vec!["A", "A"]);
    }

    #[test]
    fn construction_requires_exact_state_coverage() {
        let chain = || {
            ChainModel::new(
                vec!["A", "B"],
                HashMap::from([("A", 0.5), ("B", 0.5)]),
                HashMap::from([
                    ("A", HashMap::from([("A", 1.0)])),
                    ("B", HashMap::from([("B", 1.0)])),
                ]),
            )
            .unwrap()
        };

        // Missing row for B.
        let result = HiddenMarkovDecoder::new(
            chain(),
            HashMap::from([("A", HashMap::from([("x", 1.0)]))]),
        );
        assert!(matches!(result, Err(MarkovError::Validation(_))));

        // Foreign hidden state.
        let result = HiddenMarkovDecoder::new(
            chain(),
            HashMap::from([
                ("A", HashMap::from([("x", 1.0)])),
                ("B", HashMap::from([("x", 1.0)])),
                ("Z", HashMap::from([("x", 1.0)])),
            ]),
        );
        assert!(matches!(result, Err(MarkovError::Validation(_))));

        // Emission row that does not sum to 1.
        let result = HiddenMarkovDecoder::new(
            chain(),
            HashMap::from([
                ("A", HashMap::from([("x", 0.5)])),
                ("B", HashMap::from([("x", 1.0)])),
            ]),
        );
        assert!(matches!(result, Err(MarkovError::Validation(_))));
    }

    #[test]
    fn alphabet_is_the_union_of_emission_rows() {
        let chain = ChainModel::new(
            vec!["A", "B"],
            HashMap::from([("A", 0.5), ("B", 0.5)]),
            HashMap::from([
                ("A", HashMap::from([("A", 0.5), ("B", 0.5)])),
                ("B", HashMap::from([("A", 0.5), ("B", 0.5)])),
            ]),
        )
        .unwrap();
        let decoder = HiddenMarkovDecoder::new(
            chain,
            HashMap::from([
                ("A", HashMap::from([("x", 1.0)])),
                ("B", HashMap::from([("y", 1.0)])),
            ]),
        )
        .unwrap();

        assert_eq!(decoder.symbols().len(), 2);
        // "y" is impossible under A but recognized; decoding succeeds.
        let result = decoder.decode(&["y"]).unwrap();
        assert_eq!(result.path, vec!["B"]);
    }
}
