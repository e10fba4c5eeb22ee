use ndarray::{Array1, Array2, ArrayView2, ArrayViewD, ArrayViewMutD, Axis};
use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::activations::sigmoid;
use crate::error::{PolicyError, Result};
use crate::params::{scoped, Parameterized, VariableKind};
use super::initialization::WeightInit;
use super::traits::{CellKind, CellState, RecurrentCell};

/// GRU (Gated Recurrent Unit) cell
///
/// A lighter gated alternative to the LSTM: a single state `h`, with the
/// forget and input gates merged into an update gate.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GRUCell {
    pub input_size: usize,
    pub hidden_size: usize,

    // Reset gate
    pub w_ir: Array2<f32>,
    pub w_hr: Array2<f32>,
    pub b_r: Array1<f32>,

    // Update gate
    pub w_iz: Array2<f32>,
    pub w_hz: Array2<f32>,
    pub b_z: Array1<f32>,

    // New gate (candidate hidden state)
    pub w_in: Array2<f32>,
    pub w_hn: Array2<f32>,
    pub b_n: Array1<f32>,
}

impl GRUCell {
    pub fn new<R: Rng + ?Sized>(input_size: usize, hidden_size: usize, rng: &mut R) -> Self {
        let init = WeightInit::Uniform { limit: (1.0 / (input_size + hidden_size).max(1) as f32).sqrt() };
        let x_to_h = (input_size, hidden_size);
        let h_to_h = (hidden_size, hidden_size);

        Self {
            input_size,
            hidden_size,

            w_ir: init.matrix(x_to_h, rng),
            w_hr: init.matrix(h_to_h, rng),
            b_r: Array1::zeros(hidden_size),

            w_iz: init.matrix(x_to_h, rng),
            w_hz: init.matrix(h_to_h, rng),
            b_z: Array1::zeros(hidden_size),

            w_in: init.matrix(x_to_h, rng),
            w_hn: init.matrix(h_to_h, rng),
            b_n: Array1::zeros(hidden_size),
        }
    }

    fn named(&self) -> [(&'static str, ArrayViewD<'_, f32>); 9] {
        [
            ("w_ir", self.w_ir.view().into_dyn()), ("w_hr", self.w_hr.view().into_dyn()), ("b_r", self.b_r.view().into_dyn()),
            ("w_iz", self.w_iz.view().into_dyn()), ("w_hz", self.w_hz.view().into_dyn()), ("b_z", self.b_z.view().into_dyn()),
            ("w_in", self.w_in.view().into_dyn()), ("w_hn", self.w_hn.view().into_dyn()), ("b_n", self.b_n.view().into_dyn()),
        ]
    }

    fn named_mut(&mut self) -> [(&'static str, ArrayViewMutD<'_, f32>); 9] {
        [
            ("w_ir", self.w_ir.view_mut().into_dyn()), ("w_hr", self.w_hr.view_mut().into_dyn()), ("b_r", self.b_r.view_mut().into_dyn()),
            ("w_iz", self.w_iz.view_mut().into_dyn()), ("w_hz", self.w_hz.view_mut().into_dyn()), ("b_z", self.b_z.view_mut().into_dyn()),
            ("w_in", self.w_in.view_mut().into_dyn()), ("w_hn", self.w_hn.view_mut().into_dyn()), ("b_n", self.b_n.view_mut().into_dyn()),
        ]
    }
}

impl RecurrentCell for GRUCell {
    fn kind(&self) -> CellKind {
        CellKind::Gru
    }

    fn input_size(&self) -> usize {
        self.input_size
    }

    fn units(&self) -> usize {
        self.hidden_size
    }

    fn step(&self, x_t: ArrayView2<f32>, state: &CellState) -> Result<(Array2<f32>, CellState)> {
        let h_prev = match state {
            CellState::Gru { h } => h,
            other => {
                return Err(PolicyError::dimension_mismatch(
                    "Gru state".to_string(),
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

        // r_t = sigmoid(W_ir x_t + W_hr h_{t-1} + b_r)
        let r_t = (x_t.dot(&self.w_ir) + h_prev.dot(&self.w_hr) + &self.b_r.view().insert_axis(Axis(0))).mapv(sigmoid);
        // z_t = sigmoid(W_iz x_t + W_hz h_{t-1} + b_z)
        let z_t = (x_t.dot(&self.w_iz) + h_prev.dot(&self.w_hz) + &self.b_z.view().insert_axis(Axis(0))).mapv(sigmoid);
        // n_t = tanh(W_in x_t + W_hn (r_t * h_{t-1}) + b_n)
        let n_t = (x_t.dot(&self.w_in) + (&r_t * h_prev).dot(&self.w_hn) + &self.b_n.view().insert_axis(Axis(0)))
            .mapv(f32::tanh);

        // h_t = (1 - z_t) * n_t + z_t * h_{t-1}
        let h_t = &z_t.mapv(|z| 1.0 - z) * &n_t + &z_t * h_prev;

        Ok((h_t.clone(), CellState::Gru { h: h_t }))
    }

    fn clone_box(&self) -> Box<dyn RecurrentCell> {
        Box::new(self.clone())
    }
}

impl Parameterized for GRUCell {
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
