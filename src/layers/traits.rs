use ndarray::{Array2, ArrayView2};
use serde::{Serialize, Deserialize};

use crate::error::{PolicyError, Result};
use crate::params::Parameterized;

/// Which recurrent cell a layer is built from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    /// Four-gate LSTM carrying `(c, h)`
    #[default]
    BasicLstm,
    /// Gated recurrent unit carrying `h`
    Gru,
}

impl CellKind {
    /// Names of the state components, in flattening order.
    pub fn component_names(&self) -> &'static [&'static str] {
        match self {
            CellKind::BasicLstm => &["c", "h"],
            CellKind::Gru => &["h"],
        }
    }

    /// Number of tensors in one state of this cell.
    pub fn state_arity(&self) -> usize {
        self.component_names().len()
    }
}

/// Hidden state of a single recurrent layer. Every component is `[batch, units]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CellState {
    Lstm { c: Array2<f32>, h: Array2<f32> },
    Gru { h: Array2<f32> },
}

impl CellState {
    pub fn zeros(kind: CellKind, batch_size: usize, units: usize) -> Self {
        match kind {
            CellKind::BasicLstm => CellState::Lstm {
                c: Array2::zeros((batch_size, units)),
                h: Array2::zeros((batch_size, units)),
            },
            CellKind::Gru => CellState::Gru { h: Array2::zeros((batch_size, units)) },
        }
    }

    pub fn kind(&self) -> CellKind {
        match self {
            CellState::Lstm { .. } => CellKind::BasicLstm,
            CellState::Gru { .. } => CellKind::Gru,
        }
    }

    /// The output-state component.
    pub fn h(&self) -> &Array2<f32> {
        match self {
            CellState::Lstm { h, .. } | CellState::Gru { h } => h,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.h().nrows()
    }

    pub fn units(&self) -> usize {
        self.h().ncols()
    }

    /// Components in flattening order (`[c, h]` or `[h]`).
    pub fn components(&self) -> Vec<&Array2<f32>> {
        match self {
            CellState::Lstm { c, h } => vec![c, h],
            CellState::Gru { h } => vec![h],
        }
    }

    pub fn components_mut(&mut self) -> Vec<&mut Array2<f32>> {
        match self {
            CellState::Lstm { c, h } => vec![c, h],
            CellState::Gru { h } => vec![h],
        }
    }

    pub fn into_components(self) -> Vec<Array2<f32>> {
        match self {
            CellState::Lstm { c, h } => vec![c, h],
            CellState::Gru { h } => vec![h],
        }
    }

    /// Rebuild a state from its flattened components.
    pub fn from_components(kind: CellKind, components: Vec<Array2<f32>>) -> Result<Self> {
        let count = components.len();
        let mut it = components.into_iter();
        let state = match (kind, it.next(), it.next(), it.next()) {
            (CellKind::BasicLstm, Some(c), Some(h), None) => CellState::Lstm { c, h },
            (CellKind::Gru, Some(h), None, None) => CellState::Gru { h },
            _ => {
                return Err(PolicyError::dimension_mismatch(
                    format!("{} state tensors for {:?}", kind.state_arity(), kind),
                    format!("{}", count),
                ))
            }
        };
        if state.components().iter().any(|t| t.dim() != state.h().dim()) {
            return Err(PolicyError::dimension_mismatch(
                format!("equal component shapes {:?}", state.h().dim()),
                format!("{:?}", state.components().iter().map(|t| t.dim()).collect::<Vec<_>>()),
            ));
        }
        Ok(state)
    }

    /// Check the state fits a layer of `units` over `batch_size` rows.
    pub fn validate(&self, kind: CellKind, batch_size: usize, units: usize) -> Result<()> {
        if self.kind() != kind {
            return Err(PolicyError::dimension_mismatch(
                format!("{:?} state", kind),
                format!("{:?} state", self.kind()),
            ));
        }
        for component in self.components() {
            if component.dim() != (batch_size, units) {
                return Err(PolicyError::dimension_mismatch(
                    format!("[{}, {}]", batch_size, units),
                    format!("{:?}", component.shape()),
                ));
            }
        }
        Ok(())
    }
}

/// A recurrent cell advancing one time step at a time.
pub trait RecurrentCell: Parameterized + Send + Sync {
    fn kind(&self) -> CellKind;

    fn input_size(&self) -> usize;

    /// Number of units, i.e. the width of every state component and of the output.
    fn units(&self) -> usize;

    /// Advance one step: `input` is `[batch, input_size]`, returns `([batch, units], next state)`.
    fn step(&self, input: ArrayView2<f32>, state: &CellState) -> Result<(Array2<f32>, CellState)>;

    fn zero_state(&self, batch_size: usize) -> CellState {
        CellState::zeros(self.kind(), batch_size, self.units())
    }

    /// Clone the cell into a boxed trait object
    fn clone_box(&self) -> Box<dyn RecurrentCell>;
}

impl Clone for Box<dyn RecurrentCell> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}
