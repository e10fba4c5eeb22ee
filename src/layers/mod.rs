pub mod batch_norm;
pub mod conv;
pub mod dense;
pub mod gru;
pub mod initialization;
pub mod lstm;
pub mod traits;

pub use batch_norm::{BatchNormLayer, BatchNormUpdate};
pub use conv::Conv2DLayer;
pub use dense::DenseLayer;
pub use gru::GRUCell;
pub use initialization::WeightInit;
pub use lstm::LSTMCell;
pub use traits::{CellKind, CellState, RecurrentCell};

use rand::Rng;

impl CellKind {
    /// Build a cell of this kind.
    pub fn build<R: Rng + ?Sized>(&self, input_size: usize, units: usize, rng: &mut R) -> Box<dyn RecurrentCell> {
        match self {
            CellKind::BasicLstm => Box::new(LSTMCell::new(input_size, units, rng)),
            CellKind::Gru => Box::new(GRUCell::new(input_size, units, rng)),
        }
    }
}
