//! Explicit variable registry.
//!
//! Every component that owns tensors implements [`Parameterized`] and reports
//! them under its own scope. Parents walk their children, so the persisted
//! variable list is assembled from the component tree instead of being looked up
//! by name pattern.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD};
use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, Result};

/// How a variable participates in training.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableKind {
    /// Updated by the optimizer.
    Trainable,
    /// Batch-norm running mean / variance.
    MovingAverage,
    /// Batch-renorm running mean / stddev.
    Renorm,
}

/// Descriptor of one persisted variable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub name: String,
    pub kind: VariableKind,
    pub shape: Vec<usize>,
}

/// Components owning named tensors.
pub trait Parameterized {
    /// Visit every tensor under `scope`.
    fn visit(&self, scope: &str, f: &mut dyn FnMut(String, VariableKind, ArrayViewD<f32>));

    /// Visit every tensor under `scope` mutably.
    fn visit_mut(&mut self, scope: &str, f: &mut dyn FnMut(String, VariableKind, ArrayViewMutD<f32>));

    /// Descriptors of all variables under `scope`, in visiting order.
    fn variables(&self, scope: &str) -> Vec<VariableInfo> {
        let mut out = Vec::new();
        self.visit(scope, &mut |name, kind, value| {
            out.push(VariableInfo { name, kind, shape: value.shape().to_vec() });
        });
        out
    }

    /// Total number of scalars, all kinds included.
    fn num_parameters(&self) -> usize {
        let mut total = 0;
        self.visit("", &mut |_, _, value| total += value.len());
        total
    }
}

/// Join a scope and a local name with `/`.
pub fn scoped(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", scope, name)
    }
}

/// One captured variable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub kind: VariableKind,
    pub value: ArrayD<f32>,
}

/// Values of every persisted variable, keyed by full name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableSnapshot {
    pub entries: BTreeMap<String, SnapshotEntry>,
}

impl VariableSnapshot {
    /// Capture all variables of `component` under `scope`.
    pub fn capture<P: Parameterized + ?Sized>(component: &P, scope: &str) -> Self {
        let mut entries = BTreeMap::new();
        component.visit(scope, &mut |name, kind, value| {
            entries.insert(name, SnapshotEntry { kind, value: value.to_owned() });
        });
        VariableSnapshot { entries }
    }

    /// Write the snapshot back into `component`.
    ///
    /// Names, kinds and shapes are checked for every variable before anything is
    /// written, so a mismatching snapshot leaves the component untouched.
    pub fn restore_into<P: Parameterized + ?Sized>(&self, component: &mut P, scope: &str) -> Result<()> {
        let expected = component.variables(scope);
        if expected.len() != self.entries.len() {
            let known: Vec<&str> = expected.iter().map(|v| v.name.as_str()).collect();
            let extra: Vec<&String> = self
                .entries
                .keys()
                .filter(|k| !known.contains(&k.as_str()))
                .collect();
            return Err(PolicyError::SnapshotMismatch(format!(
                "network has {} variables, snapshot has {} (unknown: {:?})",
                expected.len(),
                self.entries.len(),
                extra
            )));
        }
        for info in &expected {
            let entry = self
                .entries
                .get(&info.name)
                .ok_or_else(|| PolicyError::SnapshotMismatch(format!("missing variable {}", info.name)))?;
            if entry.kind != info.kind {
                return Err(PolicyError::SnapshotMismatch(format!(
                    "{} is {:?} in the network but {:?} in the snapshot",
                    info.name, info.kind, entry.kind
                )));
            }
            if entry.value.shape() != info.shape.as_slice() {
                return Err(PolicyError::dimension_mismatch(
                    format!("{} with shape {:?}", info.name, info.shape),
                    format!("{:?}", entry.value.shape()),
                ));
            }
        }

        component.visit_mut(scope, &mut |name, _, mut value| {
            if let Some(entry) = self.entries.get(&name) {
                value.assign(&entry.value);
            }
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.entries.get(name).map(|e| &e.value)
    }

    /// Save the snapshot to a file with bincode.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    /// Load a snapshot previously written by [`VariableSnapshot::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(bincode::deserialize_from(reader)?)
    }
}
