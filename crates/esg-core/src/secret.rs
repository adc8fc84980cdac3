//! Secret value containers and the materialized secret resource.
//!
//! [`SecretValue`] holds generated material in memory and zeroizes it on drop.
//! [`MaterializedSecret`] is the persisted key → bytes resource, owned by the
//! spec that produced it. Neither type ever prints its values in `Debug`.

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::spec::ObjectRef;

/// A generated secret string that is zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretValue(String);

impl SecretValue {
    /// Wrap an owned string.
    #[must_use]
    pub fn new(value: String) -> Self {
        Self(value)
    }

    /// Borrow the value.
    ///
    /// The caller must not log or persist these bytes
    /// outside a materialized secret.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Length of the value in characters.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.0.chars().count()
    }
}

impl From<&str> for SecretValue {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SecretValue").field(&"[REDACTED]").finish()
    }
}

/// Back-reference from a materialized secret to the spec that owns it.
///
/// Deleting the owner deletes every secret whose controlling reference points
/// at the owner's uid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    /// Owner kind, always `SecretSynthesis` for secrets created here.
    pub kind: String,
    /// Owner name.
    pub name: String,
    /// Owner namespace.
    pub namespace: String,
    /// Owner uid, assigned by the store when the spec was first applied.
    pub uid: String,
    /// Whether the owner is the managing controller of this object.
    #[serde(default)]
    pub controller: bool,
}

/// Metadata of a materialized secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
    pub created_at: DateTime<Utc>,
}

/// The persisted key → opaque bytes resource.
///
/// Treated as immutable once created: the controller only checks presence.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedSecret {
    pub metadata: SecretMeta,
    #[serde(
        serialize_with = "serialize_data",
        deserialize_with = "deserialize_data"
    )]
    pub data: BTreeMap<String, Vec<u8>>,
}

impl MaterializedSecret {
    /// Identity of this secret.
    #[must_use]
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(&self.metadata.namespace, &self.metadata.name)
    }

    /// The owner reference flagged as controller, if any.
    #[must_use]
    pub fn controller_owner(&self) -> Option<&OwnerReference> {
        self.metadata.owner_references.iter().find(|o| o.controller)
    }

    /// Key names in order, without values.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }
}

impl fmt::Debug for MaterializedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterializedSecret")
            .field("metadata", &self.metadata)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn serialize_data<S: Serializer>(
    data: &BTreeMap<String, Vec<u8>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(data.iter().map(|(k, v)| (k, STANDARD.encode(v))))
}

fn deserialize_data<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
    let encoded = BTreeMap::<String, String>::deserialize(deserializer)?;
    encoded
        .into_iter()
        .map(|(k, v)| {
            STANDARD
                .decode(v.as_bytes())
                .map(|bytes| (k, bytes))
                .map_err(serde::de::Error::custom)
        })
        .collect()
}
