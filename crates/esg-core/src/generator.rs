//! Generator evaluation.
//!
//! A string generator yields one output, `name`. A hashed generator yields
//! two: the raw value as `name` and its PBKDF2 digest as `name.hashed`.
//! Evaluation is pure apart from drawing entropy.

use tracing::{debug, warn};

use crate::error::{GeneratorError, ReconcileError};
use crate::hash;
use crate::random;
use crate::secret::SecretValue;
use crate::spec::{GeneratorKind, GeneratorSpec};

/// Named generator outputs in the order they were produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedValues {
    entries: Vec<(String, SecretValue)>,
}

impl GeneratedValues {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an output. A later output with the same name shadows an
    /// earlier one on lookup.
    pub fn insert(&mut self, name: impl Into<String>, value: SecretValue) {
        self.entries.push((name.into(), value));
    }

    /// Look up an output by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SecretValue> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Outputs in production order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SecretValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn extend(&mut self, other: Self) {
        self.entries.extend(other.entries);
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for GeneratedValues {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        let mut values = Self::new();
        for (name, value) in iter {
            values.insert(name, SecretValue::from(value));
        }
        values
    }
}

/// Evaluate one generator.
///
/// # Errors
///
/// - [`GeneratorError::Random`] if drawing the raw value fails.
/// - [`GeneratorError::Hash`] if the digest cannot be built or computed.
pub fn evaluate(spec: &GeneratorSpec) -> Result<GeneratedValues, GeneratorError> {
    let raw = random::generate(spec.length, spec.charset()).map_err(|source| {
        GeneratorError::Random {
            generator: spec.name.clone(),
            source,
        }
    })?;

    let mut outputs = GeneratedValues::new();
    match &spec.kind {
        GeneratorKind::String => {
            outputs.insert(spec.name.clone(), raw);
        }
        GeneratorKind::Hashed(options) => {
            let params = options.resolve();
            let digest = hash::hash(raw.expose().as_bytes(), &params).map_err(|source| {
                GeneratorError::Hash {
                    generator: spec.name.clone(),
                    source,
                }
            })?;
            outputs.insert(spec.name.clone(), raw);
            outputs.insert(spec.hashed_output_name(), SecretValue::new(digest));
        }
    }

    debug!(
        generator = %spec.name,
        kind = spec.kind.as_str(),
        length = spec.length,
        outputs = outputs.len(),
        "generator evaluated"
    );
    Ok(outputs)
}

/// Result of evaluating every generator of a spec.
#[derive(Debug, Default)]
pub struct Evaluation {
    /// Outputs of the generators that succeeded, in declaration order.
    pub outputs: GeneratedValues,
    /// Failures of the generators that did not.
    pub failures: Vec<GeneratorError>,
}

/// Evaluate generators in declaration order, continuing past failures.
///
/// A failed generator's outputs are simply absent; placeholders that name
/// them stay unresolved downstream. The pass only fails when generators were
/// declared and none of them produced anything.
///
/// # Errors
///
/// Returns [`ReconcileError::NoUsableOutputs`] carrying every failure when no
/// generator succeeded.
pub fn evaluate_all(generators: &[GeneratorSpec]) -> Result<Evaluation, ReconcileError> {
    let mut evaluation = Evaluation::default();
    for spec in generators {
        match evaluate(spec) {
            Ok(outputs) => evaluation.outputs.extend(outputs),
            Err(e) => {
                warn!(
                    generator = %e.generator(),
                    error = %e,
                    "generator failed, its outputs will be absent"
                );
                evaluation.failures.push(e);
            }
        }
    }

    if !generators.is_empty() && evaluation.outputs.is_empty() {
        return Err(ReconcileError::NoUsableOutputs {
            failures: evaluation.failures,
        });
    }
    Ok(evaluation)
}
