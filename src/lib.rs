//! Discrete-time Markov chains and hidden Markov model decoding.
//!
//! [`ChainModel`] represents a validated finite Markov chain (state space,
//! initial distribution, transition matrix). [`HiddenMarkovDecoder`] wraps a
//! chain over hidden states together with an emission model and recovers the
//! maximum-likelihood hidden-state sequence for an observation sequence.

pub mod chain;
pub mod error;
pub mod hmm;

pub use chain::ChainModel;
pub use error::{MarkovError, Result};
pub use hmm::{DecodeResult, HiddenMarkovDecoder};
