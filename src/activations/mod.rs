//! # Activation Functions Module
//!
//! The non-linearities the policy network needs:
//!
//! - **ELU**: `x` for `x > 0`, `e^x - 1` otherwise. Used after every encoder convolution.
//! - **ReLU**, **Tanh**, **Sigmoid**: available to the dense head and the cells.
//! - **Linear**: identity, used by the logits and value projections.
//!
//! [`softmax`] turns a row of logits into a categorical distribution for action sampling.

pub mod functions;

pub use functions::{sigmoid, softmax, Activation};
