use ndarray::{Array1, Array2, ArrayView2, ArrayViewD, ArrayViewMutD, Axis};
use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::activations::sigmoid;
use crate::error::{PolicyError, Result};
use crate::params::{scoped, Parameterized, VariableKind};
use super::initialization::WeightInit;
use super::traits::{CellKind, CellState, RecurrentCell};

/// LSTM (Long Short-Term Memory) cell
///
/// Carries a cell state `c` and an output state `h`, both `[batch, hidden_size]`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LSTMCell {
    /// Input size
    pub input_size: usize,
    /// Hidden size (number of LSTM units)
    pub hidden_size: usize,

    // Input gate
    pub w_ii: Array2<f32>, // Input to input gate
    pub w_hi: Array2<f32>, // Hidden to input gate
    pub b_i: Array1<f32>,

    // Forget gate
    pub w_if: Array2<f32>,
    pub w_hf: Array2<f32>,
    pub b_f: Array1<f32>,

    // Cell gate (candidate values)
    pub w_ig: Array2<f32>,
    pub w_hg: Array2<f32>,
    pub b_g: Array1<f32>,

    // Output gate
    pub w_io: Array2<f32>,
    pub w_ho: Array2<f32>,
    pub b_o: Array1<f32>,
}

impl LSTMCell {
    /// Create a new LSTM cell
    pub fn new<R: Rng + ?Sized>(input_size: usize, hidden_size: usize, rng: &mut R) -> Self {
        let init = WeightInit::Uniform { limit: (1.0 / (input_size + hidden_size).max(1) as f32).sqrt() };
        let x_to_h = (input_size, hidden_size);
        let h_to_h = (hidden_size, hidden_size);

        Self {
            input_size,
            hidden_size,

            w_ii: init.matrix(x_to_h, rng),
            w_hi: init.matrix(h_to_h, rng),
            b_i: Array1::zeros(hidden_size),

            w_if: init.matrix(x_to_h, rng),
            w_hf: init.matrix(h_to_h, rng),
            b_f: Array1::ones(hidden_size), // Forget gate starts open

            w_ig: init.matrix(x_to_h, rng),
            w_hg: init.matrix(h_to_h, rng),
            b_g: Array1::zeros(hidden_size),

            w_io: init.matrix(x_to_h, rng),
            w_ho: init.matrix(h_to_h, rng),
            b_o: Array1::zeros(hidden_size),
        }
    }

    fn gate(x_t: &ArrayView2<f32>, h: &Array2<f32>, w_x: &Array2<f32>, w_h: &Array2<f32>, b: &Array1<f32>) -> Array2<f32> {
        x_t.dot(w_x) + h.dot(w_h) + &b.view().insert_axis(Axis(0))
    }

    fn named(&self) -> [(&'static str, ArrayViewD<'_, f32>); 12] {
        [
            ("w_ii", self.w_ii.view().into_dyn()), ("w_hi", self.w_hi.view().into_dyn()), ("b_i", self.b_i.view().into_dyn()),
            ("w_if", self.w_if.view().into_dyn()), ("w_hf", self.w_hf.view().into_dyn()), ("b_f", self.b_f.view().into_dyn()),
            ("w_ig", self.w_ig.view().into_dyn()), ("w_hg", self.w_hg.view().into_dyn()), ("b_g", self.b_g.view().into_dyn()),
            ("w_io", self.w_io.view().into_dyn()), ("w_ho", self.w_ho.view().into_dyn()), ("b_o", self.b_o.view().into_dyn()),
        ]
    }

    fn named_mut(&mut self) -> [(&'static str, ArrayViewMutD<'_, f32>); 12] {
        [
            ("w_ii", self.w_ii.view_mut().into_dyn()), ("w_hi", self.w_hi.view_mut().into_dyn()), ("b_i", self.b_i.view_mut().into_dyn()),
            ("w_if", self.w_if.view_mut().into_dyn()), ("w_hf", self.w_hf.view_mut().into_dyn()), ("b_f", self.b_f.view_mut().into_dyn()),
            ("w_ig", self.w_ig.view_mut().into_dyn()), ("w_hg", self.w_hg.view_mut().into_dyn()), ("b_g", self.b_g.view_mut().into_dyn()),
            ("w_io", self.w_io.view_mut().into_dyn()), ("w_ho", self.w_ho.view_mut().into_dyn()), ("b_o", self.b_o.view_mut().into_dyn()),
        ]
    }
}

impl RecurrentCell for LSTMCell {
    fn kind(&self) -> CellKind {
        CellKind::BasicLstm
    }

    fn input_size(&self) -> usize {
        self.input_size
    }

    fn units(&self) -> usize {
        self.hidden_size
    }

    fn step(&self, x_t: ArrayView2<f32>, state: &CellState) -> Result<(Array2<f32>, CellState)> {
        let (c_prev, h_prev) = match state {
            CellState::Lstm { c, h } => (c, h),
            other => {
                return Err(PolicyError::dimension_mismatch(
                    "BasicLstm state".to_string(),
                    format!("{:?} state", other.kind()),
                ))
            }
        };
        if x_t.ncols() != self.input_size {
            return Err(PolicyError::dimension_mismatch(
                format!("[*, {}]", self.input_size),
                format!("{:?}", x_t.shape()),
            ));
        }

        // i_t = sigmoid(W_ii x_t + W_hi h_{t-1} + b_i)
        let i_t = Self::gate(&x_t, h_prev, &self.w_ii, &self.w_hi, &self.b_i).mapv(sigmoid);
        // f_t = sigmoid(W_if x_t + W_hf h_{t-1} + b_f)
        let f_t = Self::gate(&x_t, h_prev, &self.w_if, &self.w_hf, &self.b_f).mapv(sigmoid);
        // g_t = tanh(W_ig x_t + W_hg h_{t-1} + b_g)
        let g_t = Self::gate(&x_t, h_prev, &self.w_ig, &self.w_hg, &self.b_g).mapv(f32::tanh);
        // o_t = sigmoid(W_io x_t + W_ho h_{t-1} + b_o)
        let o_t = Self::gate(&x_t, h_prev, &self.w_io, &self.w_ho, &self.b_o).mapv(sigmoid);

        // c_t = f_t * c_{t-1} + i_t * g_t
        let c_t = &f_t * c_prev + &i_t * &g_t;
        // h_t = o_t * tanh(c_t)
        let h_t = &o_t * &c_t.mapv(f32::tanh);

        Ok((h_t.clone(), CellState::Lstm { c: c_t, h: h_t }))
    }

    fn clone_box(&self) -> Box<dyn RecurrentCell> {
        Box::new(self.clone())
    }
}

impl Parameterized for LSTMCell {
    fn visit(&self, scope: &str, f: &mut dyn FnMut(String, VariableKind, ArrayViewD<f32>)) {
        for (name, value) in self.named() {
            f(scoped(scope, name), VariableKind::Trainable, value);
        }
    }

    fn visit_mut(&mut self, scope: &str, f: &mut dyn FnMut(String, VariableKind, ArrayViewMutD<f32>)) {
        for (name, value) in self.named_mut() {
            f(scoped(scope, name), VariableKind::Trainable, value);
        }
    }
}
