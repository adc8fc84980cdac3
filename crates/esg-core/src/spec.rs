//! Declarative spec types.
//!
//! A [`SecretSynthesis`] names a target secret, a list of generators, and a
//! list of key templates. The core reads it and never mutates it: every
//! default (charset, hash parameters, hash key) is resolved by an accessor.
//!
//! Generator `type` strings are decoded once into [`GeneratorKind`]; an
//! unknown type fails decoding with [`SpecError::UnsupportedGeneratorType`]
//! naming the offending generator.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SpecError;
use crate::hash::{HashParams, HashVariant};
use crate::random::DEFAULT_CHARSET;
use crate::secret::OwnerReference;

/// Kind name recorded in owner references.
pub const KIND: &str = "SecretSynthesis";

/// Upper bound on a generator's `length`.
pub const MAX_LENGTH: usize = 4096;

/// Suffix of the digest output of a hashed generator.
pub const HASHED_SUFFIX: &str = ".hashed";

/// Suffix of the default direct key for a hashed generator's digest.
pub const DEFAULT_HASH_KEY_SUFFIX: &str = "_HASHED";

/// Namespaced identity of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    #[must_use]
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Metadata of a declared spec object.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    /// Assigned by the store on first apply; empty until then.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// The declared object: metadata plus the synthesis spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSynthesis {
    pub metadata: ObjectMeta,
    pub spec: SecretSynthesisSpec,
}

/// What to generate and where to put it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretSynthesisSpec {
    /// Identity and labels of the materialized secret.
    pub secret: SecretTarget,
    /// Generators in declaration order.
    #[serde(default)]
    pub generators: Vec<GeneratorSpec>,
    /// Target keys in declaration order.
    #[serde(default)]
    pub templates: Vec<KeyTemplate>,
}

/// Identity of the materialized secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretTarget {
    pub name: String,
    /// Defaults to the spec object's own namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Copied onto the materialized secret.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// One target key built from a template string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyTemplate {
    pub key: String,
    pub template_string: String,
}

/// Optional PBKDF2 overrides of a hashed generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HashOptions {
    pub iterations: Option<u32>,
    pub salt_length: Option<usize>,
    pub variant: Option<HashVariant>,
}

impl HashOptions {
    /// Fill unset options from [`HashParams::default`].
    #[must_use]
    pub fn resolve(&self) -> HashParams {
        let defaults = HashParams::default();
        HashParams {
            iterations: self.iterations.unwrap_or(defaults.iterations),
            salt_length: self.salt_length.unwrap_or(defaults.salt_length),
            variant: self.variant.unwrap_or(defaults.variant),
        }
    }

    fn is_empty(&self) -> bool {
        self.iterations.is_none() && self.salt_length.is_none() && self.variant.is_none()
    }
}

/// How a generator produces its outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorKind {
    /// One random string.
    String,
    /// A random string and its PBKDF2 digest.
    Hashed(HashOptions),
}

impl GeneratorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Hashed(_) => "hashed",
        }
    }
}

/// One named value-generation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawGeneratorSpec", into = "RawGeneratorSpec")]
pub struct GeneratorSpec {
    pub name: String,
    pub kind: GeneratorKind,
    pub length: usize,
    pub charset: Option<String>,
    /// Secret key that receives the raw value directly.
    pub key: Option<String>,
    /// Secret key that receives the digest directly (hashed generators only).
    pub hash_key: Option<String>,
}

impl GeneratorSpec {
    /// A plain string generator with the default charset.
    #[must_use]
    pub fn string(name: &str, length: usize) -> Self {
        Self {
            name: name.to_owned(),
            kind: GeneratorKind::String,
            length,
            charset: None,
            key: None,
            hash_key: None,
        }
    }

    /// A hashed generator with default hash parameters.
    #[must_use]
    pub fn hashed(name: &str, length: usize) -> Self {
        Self {
            kind: GeneratorKind::Hashed(HashOptions::default()),
            ..Self::string(name, length)
        }
    }

    /// The charset to draw from.
    #[must_use]
    pub fn charset(&self) -> &str {
        self.charset.as_deref().unwrap_or(DEFAULT_CHARSET)
    }

    /// Output name of the digest for hashed generators.
    #[must_use]
    pub fn hashed_output_name(&self) -> String {
        format!("{}{HASHED_SUFFIX}", self.name)
    }

    /// Direct secret key for the digest: `hashKey`, else `key` + `_HASHED`.
    ///
    /// `None` for string generators and for hashed generators without `key`
    /// or `hashKey`.
    #[must_use]
    pub fn hash_key(&self) -> Option<Cow<'_, str>> {
        if !matches!(self.kind, GeneratorKind::Hashed(_)) {
            return None;
        }
        match (&self.hash_key, &self.key) {
            (Some(hash_key), _) => Some(Cow::Borrowed(hash_key.as_str())),
            (None, Some(key)) => Some(Cow::Owned(format!("{key}{DEFAULT_HASH_KEY_SUFFIX}"))),
            (None, None) => None,
        }
    }

    /// Check the invariants of a single generator.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::InvalidGenerator`] describing the first violation.
    pub fn validate(&self) -> Result<(), SpecError> {
        let invalid = |reason: String| SpecError::InvalidGenerator {
            generator: self.name.clone(),
            reason,
        };

        if self.name.is_empty() {
            return Err(invalid("name must not be empty".to_owned()));
        }
        if !self
            .name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(invalid(
                "name may only contain alphanumeric characters, '_' and '-'".to_owned(),
            ));
        }
        if !(1..=MAX_LENGTH).contains(&self.length) {
            return Err(invalid(format!(
                "length {} outside 1..={MAX_LENGTH}",
                self.length
            )));
        }
        if let Some(charset) = &self.charset {
            if charset.is_empty() {
                return Err(invalid("charset must not be empty".to_owned()));
            }
            let mut seen = HashSet::new();
            if let Some(dup) = charset.chars().find(|c| !seen.insert(*c)) {
                return Err(invalid(format!("charset repeats character '{dup}'")));
            }
        }
        if let Some(key) = &self.key {
            validate_data_key(key).map_err(|reason| invalid(format!("key: {reason}")))?;
        }
        match &self.kind {
            GeneratorKind::String => {
                if self.hash_key.is_some() {
                    return Err(invalid("hashKey requires type 'hashed'".to_owned()));
                }
            }
            GeneratorKind::Hashed(options) => {
                if let Some(hash_key) = &self.hash_key {
                    validate_data_key(hash_key)
                        .map_err(|reason| invalid(format!("hashKey: {reason}")))?;
                }
                options
                    .resolve()
                    .check()
                    .map_err(|e| invalid(e.to_string()))?;
            }
        }
        Ok(())
    }
}

/// Wire form of [`GeneratorSpec`] with a free-form `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGeneratorSpec {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    charset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hash_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iterations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    salt_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    variant: Option<HashVariant>,
}

impl TryFrom<RawGeneratorSpec> for GeneratorSpec {
    type Error = SpecError;

    fn try_from(raw: RawGeneratorSpec) -> Result<Self, Self::Error> {
        let options = HashOptions {
            iterations: raw.iterations,
            salt_length: raw.salt_length,
            variant: raw.variant,
        };
        let kind = match raw.kind.as_str() {
            "string" => {
                if !options.is_empty() {
                    return Err(SpecError::InvalidGenerator {
                        generator: raw.name,
                        reason: "hash options require type 'hashed'".to_owned(),
                    });
                }
                GeneratorKind::String
            }
            "hashed" | "authelia-hash" => GeneratorKind::Hashed(options),
            other => {
                return Err(SpecError::UnsupportedGeneratorType {
                    generator: raw.name,
                    kind: other.to_owned(),
                });
            }
        };

        let spec = Self {
            name: raw.name,
            kind,
            length: raw.length,
            charset: raw.charset.filter(|c| !c.is_empty()),
            key: raw.key,
            hash_key: raw.hash_key,
        };
        spec.validate()?;
        Ok(spec)
    }
}

impl From<GeneratorSpec> for RawGeneratorSpec {
    fn from(spec: GeneratorSpec) -> Self {
        let options = match spec.kind {
            GeneratorKind::Hashed(options) => options,
            GeneratorKind::String => HashOptions::default(),
        };
        Self {
            kind: spec.kind.as_str().to_owned(),
            name: spec.name,
            length: spec.length,
            charset: spec.charset,
            key: spec.key,
            hash_key: spec.hash_key,
            iterations: options.iterations,
            salt_length: options.salt_length,
            variant: options.variant,
        }
    }
}

impl SecretSynthesis {
    /// Identity of the spec object itself.
    #[must_use]
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(&self.metadata.namespace, &self.metadata.name)
    }

    /// Identity of the secret this spec materializes.
    #[must_use]
    pub fn target_ref(&self) -> ObjectRef {
        let namespace = self
            .spec
            .secret
            .namespace
            .as_deref()
            .unwrap_or(&self.metadata.namespace);
        ObjectRef::new(namespace, &self.spec.secret.name)
    }

    /// Controlling owner reference pointing back at this spec.
    #[must_use]
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            kind: KIND.to_owned(),
            name: self.metadata.name.clone(),
            namespace: self.metadata.namespace.clone(),
            uid: self.metadata.uid.clone(),
            controller: true,
        }
    }

    /// Check every invariant of the object.
    ///
    /// # Errors
    ///
    /// Returns the first [`SpecError`] found.
    pub fn validate(&self) -> Result<(), SpecError> {
        validate_object_name(&self.metadata.name)
            .map_err(|reason| SpecError::InvalidMetadata {
                reason: format!("name: {reason}"),
            })?;
        validate_object_name(&self.metadata.namespace).map_err(|reason| {
            SpecError::InvalidMetadata {
                reason: format!("namespace: {reason}"),
            }
        })?;
        self.spec.validate()
    }
}

impl SecretSynthesisSpec {
    /// Check the target, every generator, and every template.
    ///
    /// Duplicate template keys are allowed; the last one wins when rendering.
    ///
    /// # Errors
    ///
    /// Returns the first [`SpecError`] found.
    pub fn validate(&self) -> Result<(), SpecError> {
        validate_object_name(&self.secret.name).map_err(|reason| SpecError::InvalidTarget {
            reason: format!("name: {reason}"),
        })?;
        if let Some(namespace) = &self.secret.namespace {
            validate_object_name(namespace).map_err(|reason| SpecError::InvalidTarget {
                reason: format!("namespace: {reason}"),
            })?;
        }

        let mut names = HashSet::new();
        for generator in &self.generators {
            generator.validate()?;
            if !names.insert(generator.name.as_str()) {
                return Err(SpecError::DuplicateGenerator {
                    generator: generator.name.clone(),
                });
            }
        }

        for (index, template) in self.templates.iter().enumerate() {
            validate_data_key(&template.key)
                .map_err(|reason| SpecError::InvalidTemplate { index, reason })?;
        }
        Ok(())
    }
}

/// Object names: 1-253 chars of lowercase alphanumerics, `-` and `.`,
/// starting and ending alphanumeric.
fn validate_object_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > 253 {
        return Err("must be 1-253 characters".to_owned());
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.')
    {
        return Err(format!(
            "'{name}' may only contain lowercase alphanumerics, '-' and '.'"
        ));
    }
    let edge_ok = |b: Option<u8>| b.is_some_and(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
    if !edge_ok(name.bytes().next()) || !edge_ok(name.bytes().last()) {
        return Err(format!("'{name}' must start and end with an alphanumeric"));
    }
    Ok(())
}

/// Secret data keys: 1-253 chars of alphanumerics, `-`, `_` and `.`.
fn validate_data_key(key: &str) -> Result<(), String> {
    if key.is_empty() || key.len() > 253 {
        return Err("must be 1-253 characters".to_owned());
    }
    if !key
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
    {
        return Err(format!(
            "'{key}' may only contain alphanumerics, '-', '_' and '.'"
        ));
    }
    Ok(())
}
