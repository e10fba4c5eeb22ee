//! Stacked recurrent core.
//!
//! Two recurrent layers in series. Layer 1 reads the stage-1 concatenation;
//! layer 2 reads its own output concatenated with the stage-2 extras. Each layer
//! has its own cell, unit count and state. The caller owns the
//! [`StackedState`] and feeds a chunk's final state back as the next chunk's
//! initial state.

use log::{trace, warn};
use ndarray::{s, Array2, Array3, ArrayView3, ArrayViewD, ArrayViewMutD};
use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::concat::concat_features;
use crate::error::{PolicyError, Result};
use crate::inputs::{DType, PlaceholderSpec};
use crate::layers::{CellKind, CellState, RecurrentCell};
use crate::params::{scoped, Parameterized, VariableKind};

/// One recurrent layer run over the time axis.
#[derive(Clone)]
pub struct RecurrentLayer {
    name: String,
    cell: Box<dyn RecurrentCell>,
}

/// Result of running a layer over a `[batch, time, feature]` chunk.
#[derive(Clone, Debug)]
pub struct RecurrentOutput {
    /// `[batch, time, units]`
    pub outputs: Array3<f32>,
    pub final_state: CellState,
}

impl RecurrentLayer {
    pub fn new<R: Rng + ?Sized>(name: &str, kind: CellKind, input_size: usize, units: usize, rng: &mut R) -> Self {
        RecurrentLayer {
            name: name.to_string(),
            cell: kind.build(input_size, units, rng),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CellKind {
        self.cell.kind()
    }

    pub fn units(&self) -> usize {
        self.cell.units()
    }

    pub fn input_size(&self) -> usize {
        self.cell.input_size()
    }

    pub fn zero_state(&self, batch_size: usize) -> CellState {
        self.cell.zero_state(batch_size)
    }

    /// Flattened initial-state slots of this layer, `[*, units]` each.
    pub fn state_placeholders(&self) -> Vec<PlaceholderSpec> {
        self.kind()
            .component_names()
            .iter()
            .map(|component| PlaceholderSpec::new(
                format!("{}/state_in/{}", self.name, component),
                DType::F32,
                vec![None, Some(self.units())],
            ))
            .collect()
    }

    /// Run the layer over `input`, starting from `initial`.
    ///
    /// With `sequence_lengths`, row `b` only advances for its first
    /// `sequence_lengths[b]` steps. Later steps emit zeros and carry the
    /// state through unchanged.
    pub fn forward(
        &self,
        input: ArrayView3<f32>,
        initial: &CellState,
        sequence_lengths: Option<&[usize]>,
    ) -> Result<RecurrentOutput> {
        let (batch_size, time_length, width) = input.dim();
        if width != self.input_size() {
            return Err(PolicyError::dimension_mismatch(
                format!("{} input [*, *, {}]", self.name, self.input_size()),
                format!("{:?}", input.shape()),
            ));
        }
        initial.validate(self.kind(), batch_size, self.units()).map_err(|err| match err {
            PolicyError::DimensionMismatch { expected, actual } => PolicyError::dimension_mismatch(
                format!("{} initial state {}", self.name, expected),
                actual,
            ),
            other => other,
        })?;
        if let Some(lengths) = sequence_lengths {
            validate_lengths(lengths, batch_size, time_length)?;
        }
        trace!("{}: batch {} x time {} x {} -> {}", self.name, batch_size, time_length, width, self.units());

        let mut outputs = Array3::zeros((batch_size, time_length, self.units()));
        let mut state = initial.clone();

        for t in 0..time_length {
            let x_t = input.slice(s![.., t, ..]);
            let (mut y_t, mut next) = self.cell.step(x_t, &state)?;

            if let Some(lengths) = sequence_lengths {
                for (row, _) in lengths.iter().enumerate().filter(|&(_, &len)| t >= len) {
                    y_t.row_mut(row).fill(0.0);
                    for (new, old) in next.components_mut().into_iter().zip(state.components()) {
                        new.row_mut(row).assign(&old.row(row));
                    }
                }
            }

            outputs.slice_mut(s![.., t, ..]).assign(&y_t);
            state = next;
        }

        Ok(RecurrentOutput { outputs, final_state: state })
    }
}

fn validate_lengths(lengths: &[usize], batch_size: usize, time_length: usize) -> Result<()> {
    if lengths.len() != batch_size {
        return Err(PolicyError::dimension_mismatch(
            format!("{} sequence lengths", batch_size),
            format!("{}", lengths.len()),
        ));
    }
    if let Some(&too_long) = lengths.iter().find(|&&len| len > time_length) {
        return Err(PolicyError::shape_contract(
            "sequence lengths".to_string(),
            format!("length {} exceeds time length {}", too_long, time_length),
        ));
    }
    if lengths.iter().any(|&len| len == 0) {
        warn!("sequence lengths contain an empty row; its state passes through unchanged");
    }
    Ok(())
}

impl Parameterized for RecurrentLayer {
    fn visit(&self, scope: &str, f: &mut dyn FnMut(String, VariableKind, ArrayViewD<f32>)) {
        self.cell.visit(&scoped(scope, &self.name), f);
    }

    fn visit_mut(&mut self, scope: &str, f: &mut dyn FnMut(String, VariableKind, ArrayViewMutD<f32>)) {
        let scope = scoped(scope, &self.name);
        self.cell.visit_mut(&scope, f);
    }
}

/// Ordered pair of per-layer states, the unit saved and restored at episode boundaries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StackedState(pub CellState, pub CellState);

impl StackedState {
    pub fn lstm_1(&self) -> &CellState {
        &self.0
    }

    pub fn lstm_2(&self) -> &CellState {
        &self.1
    }

    pub fn batch_size(&self) -> usize {
        self.0.batch_size()
    }

    /// Layer-1 components followed by layer-2 components.
    pub fn flatten(&self) -> Vec<Array2<f32>> {
        self.0
            .components()
            .into_iter()
            .chain(self.1.components())
            .cloned()
            .collect()
    }

    /// Split a flat list at the layer boundary and rebuild both states.
    pub fn from_flat(flat: Vec<Array2<f32>>, kinds: (CellKind, CellKind)) -> Result<Self> {
        let boundary = kinds.0.state_arity();
        let expected = boundary + kinds.1.state_arity();
        if flat.len() != expected {
            return Err(PolicyError::dimension_mismatch(
                format!("{} state tensors", expected),
                format!("{}", flat.len()),
            ));
        }
        let mut first = flat;
        let second = first.split_off(boundary);
        Ok(StackedState(
            CellState::from_components(kinds.0, first)?,
            CellState::from_components(kinds.1, second)?,
        ))
    }
}

/// Output of the two-layer core.
#[derive(Clone, Debug)]
pub struct StackedOutput {
    /// Layer-1 output sequence `[batch, time, units_1]`
    pub lstm_1_outputs: Array3<f32>,
    /// Layer-2 output sequence `[batch, time, units_2]`
    pub outputs: Array3<f32>,
    pub final_state: StackedState,
}

/// Two recurrent layers in series with independent states.
#[derive(Clone)]
pub struct StackedRecurrentCore {
    lstm_1: RecurrentLayer,
    lstm_2: RecurrentLayer,
}

impl StackedRecurrentCore {
    /// Build the core. `stage_2_extra_width` is the width of everything concatenated
    /// after the layer-1 output in stage 2.
    pub fn new<R: Rng + ?Sized>(
        kind: CellKind,
        units: (usize, usize),
        stage_1_width: usize,
        stage_2_extra_width: usize,
        rng: &mut R,
    ) -> Self {
        let lstm_1 = RecurrentLayer::new("lstm_1", kind, stage_1_width, units.0, rng);
        let lstm_2 = RecurrentLayer::new("lstm_2", kind, units.0 + stage_2_extra_width, units.1, rng);
        StackedRecurrentCore { lstm_1, lstm_2 }
    }

    pub fn lstm_1(&self) -> &RecurrentLayer {
        &self.lstm_1
    }

    pub fn lstm_2(&self) -> &RecurrentLayer {
        &self.lstm_2
    }

    pub fn kinds(&self) -> (CellKind, CellKind) {
        (self.lstm_1.kind(), self.lstm_2.kind())
    }

    pub fn zero_state(&self, batch_size: usize) -> StackedState {
        StackedState(self.lstm_1.zero_state(batch_size), self.lstm_2.zero_state(batch_size))
    }

    /// Layer-1 slots followed by layer-2 slots.
    pub fn state_placeholders(&self) -> Vec<PlaceholderSpec> {
        let mut specs = self.lstm_1.state_placeholders();
        specs.extend(self.lstm_2.state_placeholders());
        specs
    }

    /// Run both layers. Stage 2 is `[lstm_1 output] ++ stage_2_extra`.
    pub fn forward(
        &self,
        stage_1: ArrayView3<f32>,
        stage_2_extra: &[(&str, ArrayView3<f32>)],
        initial: &StackedState,
        sequence_lengths: Option<&[usize]>,
    ) -> Result<StackedOutput> {
        let first = self.lstm_1.forward(stage_1, &initial.0, sequence_lengths)?;

        let mut stage_2_inputs = Vec::with_capacity(stage_2_extra.len() + 1);
        stage_2_inputs.push((self.lstm_1.name(), first.outputs.view()));
        stage_2_inputs.extend(stage_2_extra.iter().map(|(name, x)| (*name, x.view())));
        let stage_2 = concat_features(&stage_2_inputs)?;

        let second = self.lstm_2.forward(stage_2.view(), &initial.1, sequence_lengths)?;

        Ok(StackedOutput {
            lstm_1_outputs: first.outputs,
            outputs: second.outputs,
            final_state: StackedState(first.final_state, second.final_state),
        })
    }
}

impl Parameterized for StackedRecurrentCore {
    fn visit(&self, scope: &str, f: &mut dyn FnMut(String, VariableKind, ArrayViewD<f32>)) {
        self.lstm_1.visit(scope, f);
        self.lstm_2.visit(scope, f);
    }

    fn visit_mut(&mut self, scope: &str, f: &mut dyn FnMut(String, VariableKind, ArrayViewMutD<f32>)) {
        self.lstm_1.visit_mut(scope, f);
        self.lstm_2.visit_mut(scope, f);
    }
}
