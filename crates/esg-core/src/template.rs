//! Template rendering and secret payload composition.
//!
//! A placeholder is the exact text `{{ ` + output name + ` }}`, single spaces
//! included. Each template is scanned once left to right: known placeholders
//! are replaced by their output, unknown ones are copied verbatim, and
//! inserted values are never scanned again. There is no escape syntax.
//!
//! This differs from replacing one output after another in declaration order:
//! there, a value containing `{{ later }}` would be expanded by the later
//! replacement. Here it is inserted as is, so a generated value can never
//! pull another secret into the output.

use std::collections::{BTreeMap, HashMap};

use crate::generator::GeneratedValues;
use crate::secret::SecretValue;
use crate::spec::{GeneratorSpec, KeyTemplate};

const OPEN: &str = "{{ ";
const CLOSE: &str = " }}";

/// Substitute every known placeholder in `template`.
#[must_use]
pub fn render_template(template: &str, lookup: &HashMap<&str, &SecretValue>) -> SecretValue {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];
        let resolved = after_open.find(CLOSE).and_then(|end| {
            let name = &after_open[..end];
            lookup
                .get(name)
                .map(|value| (value, end + CLOSE.len()))
        });
        match resolved {
            Some((value, consumed)) => {
                out.push_str(value.expose());
                rest = &after_open[consumed..];
            }
            None => {
                out.push_str(OPEN);
                rest = after_open;
            }
        }
    }
    out.push_str(rest);
    SecretValue::new(out)
}

fn lookup_table(outputs: &GeneratedValues) -> HashMap<&str, &SecretValue> {
    // Later entries overwrite earlier ones, matching `GeneratedValues::get`.
    outputs.iter().collect()
}

/// Render every template against `outputs`.
///
/// Templates are applied in declaration order, so for a repeated key the last
/// template wins. A template without placeholders passes through unchanged.
#[must_use]
pub fn render(outputs: &GeneratedValues, templates: &[KeyTemplate]) -> BTreeMap<String, SecretValue> {
    let lookup = lookup_table(outputs);
    let mut data = BTreeMap::new();
    for template in templates {
        data.insert(
            template.key.clone(),
            render_template(&template.template_string, &lookup),
        );
    }
    data
}

/// Build the full secret payload: direct generator keys, then templates.
///
/// A generator's `key` receives its raw value and, for hashed generators, its
/// hash key receives the digest. Generators whose outputs are missing are
/// skipped. Templates are applied afterwards and win on key collisions.
#[must_use]
pub fn compose(
    generators: &[GeneratorSpec],
    outputs: &GeneratedValues,
    templates: &[KeyTemplate],
) -> BTreeMap<String, SecretValue> {
    let mut data = BTreeMap::new();
    for generator in generators {
        if let (Some(key), Some(value)) = (&generator.key, outputs.get(&generator.name)) {
            data.insert(key.clone(), value.clone());
        }
        if let (Some(hash_key), Some(digest)) = (
            generator.hash_key(),
            outputs.get(&generator.hashed_output_name()),
        ) {
            data.insert(hash_key.into_owned(), digest.clone());
        }
    }
    data.extend(render(outputs, templates));
    data
}
