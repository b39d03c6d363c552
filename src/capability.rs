//! a single capability grant: one resource key plus its operation set.

use std::fmt;

use minicbor::{Decode, Encode};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::registry::OperationRegistry;

/// the wildcard operation sentinel.
///
/// a capability whose set is exactly `["any"]` permits every operation,
/// including operations added to the registry after the capability was built.
pub const ANY: &str = "any";

/// a resource key paired with its permitted operations.
///
/// the operation set is insertion-ordered and duplicate-free. whenever a
/// mutation leaves the set covering the registry's full vocabulary it is
/// collapsed to the `["any"]` sentinel, so "all operations spelled out" and
/// "any" are observably identical to every membership query.
///
/// compact syntax is `key:op,op` (bare `key` means any):
///
/// ```
/// use capgrants::{Capability, OperationRegistry};
///
/// let registry = OperationRegistry::new();
/// let cap = Capability::parse("posts:read,write", &registry).unwrap();
/// assert!(cap.has("read"));
/// assert!(!cap.has("delete"));
/// assert_eq!(cap.to_compact(), "posts:read,write");
/// ```
#[derive(Debug, Clone, Encode, Decode)]
#[cbor(map)]
pub struct Capability {
    /// resource key. opaque, non-empty, free of `:`, `,` and whitespace.
    #[n(0)]
    key: String,

    /// permitted operations, or the `["any"]` sentinel.
    #[n(1)]
    operations: Vec<String>,
}

// equality is (key, operations-as-set): operation order is a rendering
// detail, not part of the value.
impl PartialEq for Capability {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.operations.len() == other.operations.len()
            && self
                .operations
                .iter()
                .all(|op| other.operations.contains(op))
    }
}

impl Eq for Capability {}

impl Capability {
    /// create a capability with an empty operation set.
    pub fn empty(key: impl Into<String>, registry: &OperationRegistry) -> Result<Self> {
        let key = key.into();
        validate_key(&key, registry)?;
        Ok(Self {
            key,
            operations: vec![],
        })
    }

    /// create a capability from a key and a list of operation names.
    ///
    /// the names are validated against the registry and the result is
    /// any-collapsed if they cover the full vocabulary.
    pub fn with_operations<I, S>(
        key: impl Into<String>,
        operations: I,
        registry: &OperationRegistry,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut capability = Self::empty(key, registry)?;
        let operations: Vec<String> = operations.into_iter().map(Into::into).collect();
        let refs: Vec<&str> = operations.iter().map(String::as_str).collect();
        capability.merge(&refs, registry)?;
        Ok(capability)
    }

    /// parse the compact syntax `key` or `key:op,op,...`.
    ///
    /// a bare key means "any". operator tokens must each be a registry
    /// operation or the `any` sentinel; anything else fails with
    /// [`Error::InvalidSyntax`]. a token list covering the full vocabulary
    /// collapses to `["any"]` at parse time.
    pub fn parse(input: &str, registry: &OperationRegistry) -> Result<Self> {
        Self::parse_inner(input, None, registry)
    }

    /// like [`parse`](Self::parse), but a bare key adopts `defaults`
    /// verbatim instead of "any".
    ///
    /// defaults are trusted and not validated against the registry.
    pub fn parse_with_defaults<I, S>(
        input: &str,
        defaults: I,
        registry: &OperationRegistry,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let defaults = defaults.into_iter().map(Into::into).collect();
        Self::parse_inner(input, Some(defaults), registry)
    }

    fn parse_inner(
        input: &str,
        defaults: Option<Vec<String>>,
        registry: &OperationRegistry,
    ) -> Result<Self> {
        let (key, suffix) = match input.split_once(':') {
            Some((key, rest)) => (key, Some(rest)),
            None => (input, None),
        };
        validate_key(key, registry).map_err(|_| Error::InvalidSyntax {
            input: input.to_string(),
            valid: registry.operations().to_vec(),
        })?;

        let operations = match suffix {
            // bare key: caller-supplied defaults, or the any sentinel
            None => match defaults {
                Some(defaults) => defaults,
                None => vec![ANY.to_string()],
            },
            // trailing ":" with nothing after it is the empty set
            Some("") => vec![],
            Some(rest) => {
                let mut operations: Vec<String> = Vec::new();
                let mut any = false;
                for token in rest.split(',') {
                    if token == ANY {
                        any = true;
                    } else if registry.is_valid(token) {
                        if !operations.iter().any(|op| op == token) {
                            operations.push(token.to_string());
                        }
                    } else {
                        return Err(Error::InvalidSyntax {
                            input: input.to_string(),
                            valid: registry.operations().to_vec(),
                        });
                    }
                }
                if any || registry.has_all(&operations) {
                    vec![ANY.to_string()]
                } else {
                    operations
                }
            }
        };

        Ok(Self {
            key: key.to_string(),
            operations,
        })
    }

    /// the resource key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// the operation set in internal iteration order, or `["any"]`.
    pub fn operations(&self) -> &[String] {
        &self.operations
    }

    /// exact string equality on the resource key.
    pub fn is_key(&self, key: &str) -> bool {
        self.key == key
    }

    /// true if this capability allows any operation.
    pub fn is_any(&self) -> bool {
        self.operations.len() == 1 && self.operations[0] == ANY
    }

    /// true if `operation` is permitted.
    pub fn has(&self, operation: &str) -> bool {
        self.is_any() || self.operations.iter().any(|op| op == operation)
    }

    /// true if at least one of `operations` is permitted.
    pub fn has_any(&self, operations: &[&str]) -> bool {
        self.is_any() || operations.iter().any(|op| self.operations.iter().any(|o| o == op))
    }

    /// true if every one of `operations` is permitted.
    pub fn has_all(&self, operations: &[&str]) -> bool {
        self.is_any() || operations.iter().all(|op| self.operations.iter().any(|o| o == op))
    }

    /// union `operations` into the set.
    ///
    /// fails with [`Error::AnyAlreadyAllowed`] if the set is already
    /// `["any"]` - adding on top of "any" is ambiguous, so callers must
    /// [`disallow_any`](Self::disallow_any) first or use
    /// [`insert`](Self::insert). already-present names are ignored.
    pub fn add(&mut self, operations: &[&str], registry: &OperationRegistry) -> Result<()> {
        if self.is_any() {
            return Err(Error::AnyAlreadyAllowed {
                key: self.key.clone(),
            });
        }
        validate_operations(operations, registry)?;
        self.union(operations);
        self.collapse_if_full(registry);
        Ok(())
    }

    /// union `operations` into the set, replacing "any" if present.
    ///
    /// unlike [`add`](Self::add) this never rejects on the any flag: an
    /// any-capability is silently cleared first, leaving exactly the
    /// requested subset.
    pub fn insert(&mut self, operations: &[&str], registry: &OperationRegistry) -> Result<()> {
        validate_operations(operations, registry)?;
        if self.is_any() {
            self.operations.clear();
        }
        self.union(operations);
        self.collapse_if_full(registry);
        Ok(())
    }

    /// unconditional union, bypassing the any-flag guard that
    /// [`add`](Self::add) enforces.
    ///
    /// an any-capability stays "any". used by collection-level merge.
    pub fn merge(&mut self, operations: &[&str], registry: &OperationRegistry) -> Result<()> {
        validate_operations(operations, registry)?;
        if !self.is_any() {
            self.union(operations);
            self.collapse_if_full(registry);
        }
        Ok(())
    }

    /// remove `operations` from the set.
    ///
    /// removing from an any-capability materialises the complement: the
    /// result is the registry vocabulary (in registry order) minus the
    /// requested operations.
    pub fn remove(&mut self, operations: &[&str], registry: &OperationRegistry) -> Result<()> {
        validate_operations(operations, registry)?;
        if self.is_any() {
            self.operations = registry
                .operations()
                .iter()
                .filter(|op| !operations.contains(&op.as_str()))
                .cloned()
                .collect();
        } else {
            self.operations.retain(|op| !operations.contains(&op.as_str()));
        }
        self.collapse_if_full(registry);
        Ok(())
    }

    /// force the set to `["any"]`, bypassing validation.
    pub fn allow_any(&mut self) {
        self.operations = vec![ANY.to_string()];
    }

    /// force the set to empty, bypassing validation.
    pub fn disallow_any(&mut self) {
        self.operations.clear();
    }

    /// render the compact form `key:op,op` (empty set renders `key:`).
    pub fn to_compact(&self) -> String {
        format!("{}:{}", self.key, self.operations.join(","))
    }

    /// encode the single-entry `{key: [ops...]}` mapping as json.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::MalformedPayload(e.to_string()))
    }

    /// decode from the json form produced by [`to_json`](Self::to_json).
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::MalformedPayload(e.to_string()))
    }

    /// encode to an opaque byte blob (cbor).
    ///
    /// round-trip-only: consumers must not assume cross-language portability
    /// of this form.
    pub fn to_blob(&self) -> Result<Vec<u8>> {
        minicbor::to_vec(self).map_err(|e| Error::MalformedPayload(e.to_string()))
    }

    /// decode from a blob produced by [`to_blob`](Self::to_blob).
    pub fn from_blob(bytes: &[u8]) -> Result<Self> {
        minicbor::decode(bytes).map_err(|e| Error::MalformedPayload(e.to_string()))
    }

    // used by the collection's structured deserialiser; payload forms are
    // round-trip-only and trusted
    pub(crate) fn from_raw_parts(key: String, operations: Vec<String>) -> Self {
        Self { key, operations }
    }

    fn union(&mut self, operations: &[&str]) {
        for op in operations {
            if !self.operations.iter().any(|o| o == op) {
                self.operations.push((*op).to_string());
            }
        }
    }

    // any-collapse invariant: a set covering the full vocabulary becomes
    // exactly ["any"]
    fn collapse_if_full(&mut self, registry: &OperationRegistry) {
        if !self.is_any() && registry.has_all(&self.operations) {
            self.operations = vec![ANY.to_string()];
        }
    }
}

fn validate_key(key: &str, registry: &OperationRegistry) -> Result<()> {
    if key.is_empty()
        || key.contains(':')
        || key.contains(',')
        || key.chars().any(char::is_whitespace)
    {
        return Err(Error::InvalidSyntax {
            input: key.to_string(),
            valid: registry.operations().to_vec(),
        });
    }
    Ok(())
}

fn validate_operations(operations: &[&str], registry: &OperationRegistry) -> Result<()> {
    if let Some(bad) = registry.first_invalid(operations) {
        return Err(Error::InvalidOperation {
            operation: bad.to_string(),
            valid: registry.operations().to_vec(),
        });
    }
    Ok(())
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_compact())
    }
}

// serde: the structured form is a single-entry mapping {key: [ops...]}
impl Serialize for Capability {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.key, &self.operations)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Capability {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct CapabilityVisitor;

        impl<'de> Visitor<'de> for CapabilityVisitor {
            type Value = Capability;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a single-entry mapping of key to operation list")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Capability, A::Error>
            where
                A: MapAccess<'de>,
            {
                let (key, operations): (String, Vec<String>) = map
                    .next_entry()?
                    .ok_or_else(|| de::Error::custom("expected one key"))?;
                if map.next_entry::<String, Vec<String>>()?.is_some() {
                    return Err(de::Error::custom("expected exactly one key"));
                }
                Ok(Capability { key, operations })
            }
        }

        deserializer.deserialize_map(CapabilityVisitor)
    }
}
