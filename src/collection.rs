//! an ordered collection of capabilities keyed by resource.

use std::fmt;
use std::slice;

use minicbor::{Decode, Encode};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::trace;

use crate::capability::Capability;
use crate::error::{Error, Result};
use crate::registry::OperationRegistry;

/// an insertion-ordered collection of [`Capability`] entries.
///
/// the collection keeps list semantics: [`add`](Self::add) never
/// deduplicates by key, lookups return the first match, and
/// [`remove`](Self::remove) drops every same-key entry. the structured
/// mapping export is lossy under duplicate keys (later entries win on
/// re-import); the compact string form is not.
///
/// ```
/// use capgrants::{Capabilities, OperationRegistry};
///
/// let registry = OperationRegistry::new();
/// let caps = Capabilities::parse("posts:read,write comments:read", &registry).unwrap();
/// assert!(caps.get("posts").unwrap().has("write"));
/// assert!(caps.get("pages").is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
#[cbor(transparent)]
pub struct Capabilities {
    #[n(0)]
    entries: Vec<Capability>,
}

impl Capabilities {
    /// create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// parse a whitespace-delimited sequence of compact capability forms.
    ///
    /// empty input yields an empty collection.
    pub fn parse(input: &str, registry: &OperationRegistry) -> Result<Self> {
        let mut capabilities = Self::new();
        for part in input.split_whitespace() {
            capabilities.entries.push(Capability::parse(part, registry)?);
        }
        Ok(capabilities)
    }

    /// append a capability.
    ///
    /// no key-uniqueness check is made; an entry with a duplicate key is
    /// appended as-is and the earlier one keeps winning lookups.
    pub fn add(&mut self, capability: Capability) {
        self.entries.push(capability);
    }

    /// parse a compact form and append it.
    pub fn add_parsed(&mut self, input: &str, registry: &OperationRegistry) -> Result<()> {
        self.entries.push(Capability::parse(input, registry)?);
        Ok(())
    }

    /// the first entry with the given key, if present.
    pub fn get(&self, key: &str) -> Option<&Capability> {
        self.entries.iter().find(|cap| cap.is_key(key))
    }

    /// mutable access to the first entry with the given key.
    ///
    /// this is the live-reference mutation path: changes made through it are
    /// visible to every later lookup and serialisation.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Capability> {
        self.entries.iter_mut().find(|cap| cap.is_key(key))
    }

    /// ordered keys of all entries, duplicates included.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|cap| cap.key()).collect()
    }

    /// ordered view of all entries.
    pub fn entries(&self) -> &[Capability] {
        &self.entries
    }

    /// iterate over entries in insertion order.
    pub fn iter(&self) -> slice::Iter<'_, Capability> {
        self.entries.iter()
    }

    /// number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// true if the collection has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// merge another collection into this one.
    ///
    /// for each foreign entry: a same-keyed local entry absorbs its
    /// operations (an any-foreign makes the local entry "any"); otherwise
    /// the foreign entry is appended.
    pub fn merge(&mut self, other: &Capabilities, registry: &OperationRegistry) -> Result<()> {
        for foreign in &other.entries {
            match self.position(foreign.key()) {
                Some(idx) => {
                    if foreign.is_any() {
                        self.entries[idx].allow_any();
                    } else {
                        let ops: Vec<&str> =
                            foreign.operations().iter().map(String::as_str).collect();
                        self.entries[idx].merge(&ops, registry)?;
                    }
                }
                None => self.entries.push(foreign.clone()),
            }
            trace!(key = foreign.key(), "merged capability");
        }
        Ok(())
    }

    /// remove all entries with the given key, duplicates included.
    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|cap| !cap.is_key(key));
    }

    /// subtract another collection from this one.
    ///
    /// for each foreign entry: a missing local entry is a no-op; an
    /// any-foreign drops the local entry entirely; otherwise the foreign
    /// operations are subtracted, and a local entry whose set becomes empty
    /// is dropped.
    pub fn remove_many(&mut self, other: &Capabilities, registry: &OperationRegistry) -> Result<()> {
        for foreign in &other.entries {
            let Some(idx) = self.position(foreign.key()) else {
                continue;
            };
            if foreign.is_any() {
                trace!(key = foreign.key(), "removing capability entirely");
                self.remove(foreign.key());
                continue;
            }
            let ops: Vec<&str> = foreign.operations().iter().map(String::as_str).collect();
            self.entries[idx].remove(&ops, registry)?;
            if self.entries[idx].operations().is_empty() {
                self.remove(foreign.key());
            }
        }
        Ok(())
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|cap| cap.is_key(key))
    }

    /// containment test against another collection.
    ///
    /// true iff for every entry in `other` a same-keyed local entry exists,
    /// the two agree on whether "any" is allowed, and (when not "any") the
    /// local set is a superset of the foreign set. extra local-only keys do
    /// not break a match.
    pub fn is_matching(&self, other: &Capabilities) -> bool {
        other.entries.iter().all(|foreign| match self.get(foreign.key()) {
            Some(local) => {
                local.is_any() == foreign.is_any() && {
                    let ops: Vec<&str> =
                        foreign.operations().iter().map(String::as_str).collect();
                    local.has_all(&ops)
                }
            }
            None => false,
        })
    }

    /// true if the entry for `key` permits at least one of `operations`.
    ///
    /// fails with [`Error::MissingArguments`] when `operations` is empty; a
    /// missing key is `Ok(false)`, not an error.
    pub fn is_any_allowed(&self, key: &str, operations: &[&str]) -> Result<bool> {
        if operations.is_empty() {
            return Err(Error::MissingArguments);
        }
        Ok(self.get(key).is_some_and(|cap| cap.has_any(operations)))
    }

    /// true if the entry for `key` permits every one of `operations`.
    ///
    /// fails with [`Error::MissingArguments`] when `operations` is empty; a
    /// missing key is `Ok(false)`, not an error.
    pub fn is_all_allowed(&self, key: &str, operations: &[&str]) -> Result<bool> {
        if operations.is_empty() {
            return Err(Error::MissingArguments);
        }
        Ok(self.get(key).is_some_and(|cap| cap.has_all(operations)))
    }

    /// render the space-delimited compact form.
    ///
    /// entries with an empty operation set are filtered from the string form
    /// only; they stay in the collection.
    pub fn to_compact(&self) -> String {
        self.entries
            .iter()
            .filter(|cap| !cap.operations().is_empty())
            .map(Capability::to_compact)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// encode the ordered `key → [ops...]` mapping as json.
    ///
    /// duplicate keys are emitted as-is, which most json consumers collapse
    /// (last entry wins).
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::MalformedPayload(e.to_string()))
    }

    /// decode from the json form produced by [`to_json`](Self::to_json).
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::MalformedPayload(e.to_string()))
    }

    /// encode to an opaque byte blob (cbor), preserving entry order and
    /// duplicates.
    pub fn to_blob(&self) -> Result<Vec<u8>> {
        minicbor::to_vec(self).map_err(|e| Error::MalformedPayload(e.to_string()))
    }

    /// decode from a blob produced by [`to_blob`](Self::to_blob).
    pub fn from_blob(bytes: &[u8]) -> Result<Self> {
        minicbor::decode(bytes).map_err(|e| Error::MalformedPayload(e.to_string()))
    }
}

impl<'a> IntoIterator for &'a Capabilities {
    type Item = &'a Capability;
    type IntoIter = slice::Iter<'a, Capability>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_compact())
    }
}

// serde: the structured form is an ordered mapping {key: [ops...], ...}
impl Serialize for Capabilities {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for cap in &self.entries {
            map.serialize_entry(cap.key(), cap.operations())?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Capabilities {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct CapabilitiesVisitor;

        impl<'de> Visitor<'de> for CapabilitiesVisitor {
            type Value = Capabilities;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of keys to operation lists")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Capabilities, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut capabilities = Capabilities::new();
                while let Some((key, operations)) = map.next_entry::<String, Vec<String>>()? {
                    let cap = Capability::from_raw_parts(key, operations);
                    // mapping semantics: a repeated key overwrites in place
                    match capabilities.position(cap.key()) {
                        Some(idx) => capabilities.entries[idx] = cap,
                        None => capabilities.entries.push(cap),
                    }
                }
                Ok(capabilities)
            }
        }

        deserializer.deserialize_map(CapabilitiesVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> OperationRegistry {
        OperationRegistry::new()
    }

    fn caps(input: &str) -> Capabilities {
        Capabilities::parse(input, &registry()).unwrap()
    }

    #[test]
    fn test_parse_multiple() {
        let caps = caps("posts:read,write comments:read pages");
        assert_eq!(caps.len(), 3);
        assert_eq!(caps.keys(), ["posts", "comments", "pages"]);
        assert!(caps.get("pages").unwrap().is_any());
    }

    #[test]
    fn test_parse_empty_input() {
        assert!(caps("").is_empty());
        assert!(caps("   ").is_empty());
    }

    #[test]
    fn test_parse_bad_entry_fails() {
        let result = Capabilities::parse("posts:read comments:fly", &registry());
        assert!(matches!(result.unwrap_err(), Error::InvalidSyntax { .. }));
    }

    #[test]
    fn test_get_is_first_match() {
        let reg = registry();
        let mut collection = Capabilities::new();
        collection.add(Capability::with_operations("posts", ["read"], &reg).unwrap());
        collection.add(Capability::with_operations("posts", ["write"], &reg).unwrap());
        assert_eq!(collection.len(), 2);
        assert_eq!(collection.get("posts").unwrap().operations(), ["read"]);
    }

    #[test]
    fn test_get_missing_is_none() {
        assert!(caps("posts:read").get("comments").is_none());
    }

    #[test]
    fn test_get_mut_is_live() {
        let reg = registry();
        let mut collection = caps("posts:read");
        collection
            .get_mut("posts")
            .unwrap()
            .add(&["write"], &reg)
            .unwrap();
        assert!(collection.get("posts").unwrap().has("write"));
    }

    #[test]
    fn test_add_parsed() {
        let reg = registry();
        let mut collection = Capabilities::new();
        collection.add_parsed("posts:read", &reg).unwrap();
        assert!(collection.add_parsed("posts:fly", &reg).is_err());
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn test_merge_unions_and_appends() {
        let reg = registry();
        let mut a = caps("posts:read comments:read");
        let b = caps("posts:write pages:read");
        a.merge(&b, &reg).unwrap();
        assert_eq!(a.keys(), ["posts", "comments", "pages"]);
        assert_eq!(a.get("posts").unwrap().operations(), ["read", "write"]);
        assert_eq!(a.get("comments").unwrap().operations(), ["read"]);
    }

    #[test]
    fn test_merge_any_wins() {
        let reg = registry();
        let mut a = caps("posts:read");
        let b = caps("posts");
        a.merge(&b, &reg).unwrap();
        assert!(a.get("posts").unwrap().is_any());
    }

    #[test]
    fn test_merge_collapses_to_any() {
        let reg = registry();
        let mut a = caps("posts:read,write");
        let b = caps("posts:delete,destroy");
        a.merge(&b, &reg).unwrap();
        assert!(a.get("posts").unwrap().is_any());
    }

    #[test]
    fn test_remove_drops_all_duplicates() {
        let reg = registry();
        let mut collection = Capabilities::new();
        collection.add(Capability::with_operations("posts", ["read"], &reg).unwrap());
        collection.add(Capability::with_operations("comments", ["read"], &reg).unwrap());
        collection.add(Capability::with_operations("posts", ["write"], &reg).unwrap());
        collection.remove("posts");
        assert_eq!(collection.keys(), ["comments"]);
    }

    #[test]
    fn test_remove_many_worked_example() {
        let reg = registry();
        let mut local = caps("manage_options:read,write posts:read,write,delete");
        let foreign = caps("manage_options:write comments");
        local.remove_many(&foreign, &reg).unwrap();
        assert_eq!(local.keys(), ["manage_options", "posts"]);
        assert_eq!(local.get("manage_options").unwrap().operations(), ["read"]);
        assert_eq!(
            local.get("posts").unwrap().operations(),
            ["read", "write", "delete"]
        );
    }

    #[test]
    fn test_remove_many_any_drops_entry() {
        let reg = registry();
        let mut local = caps("posts:read comments:read");
        let foreign = caps("posts");
        local.remove_many(&foreign, &reg).unwrap();
        assert_eq!(local.keys(), ["comments"]);
    }

    #[test]
    fn test_remove_many_drops_emptied_entry() {
        let reg = registry();
        let mut local = caps("posts:read,write");
        let foreign = caps("posts:read,write");
        local.remove_many(&foreign, &reg).unwrap();
        assert!(local.get("posts").is_none());
    }

    #[test]
    fn test_is_matching_equal_sets() {
        let a = caps("posts:read,write,delete comments:read");
        let b = caps("posts:read,write,delete comments:read");
        assert!(a.is_matching(&b));
    }

    #[test]
    fn test_is_matching_fails_on_foreign_superset() {
        let a = caps("posts:read,write,delete comments:read");
        let b = caps("posts:read,write,delete comments:read,write");
        assert!(!a.is_matching(&b));
    }

    #[test]
    fn test_is_matching_ignores_local_only_keys() {
        let a = caps("posts:read comments:read");
        let b = caps("posts:read");
        assert!(a.is_matching(&b));
        // but a missing local key fails
        assert!(!b.is_matching(&a));
    }

    #[test]
    fn test_is_matching_any_flag_is_symmetric() {
        let any = caps("posts");
        let all_spelled_out = caps("posts:read,write,delete,destroy");
        let partial = caps("posts:read");
        // full-vocabulary sets collapse to any at parse time, so they agree
        assert!(any.is_matching(&all_spelled_out));
        assert!(all_spelled_out.is_matching(&any));
        // a mismatch in either direction fails
        assert!(!partial.is_matching(&any));
        assert!(!any.is_matching(&partial));
    }

    #[test]
    fn test_is_allowed_queries() {
        let collection = caps("posts:read,write");
        assert!(collection.is_any_allowed("posts", &["read", "destroy"]).unwrap());
        assert!(!collection.is_any_allowed("posts", &["destroy"]).unwrap());
        assert!(collection.is_all_allowed("posts", &["read", "write"]).unwrap());
        assert!(!collection.is_all_allowed("posts", &["read", "destroy"]).unwrap());
        // missing key is false, not an error
        assert!(!collection.is_any_allowed("pages", &["read"]).unwrap());
    }

    #[test]
    fn test_is_allowed_requires_operations() {
        let collection = caps("posts:read");
        assert!(matches!(
            collection.is_any_allowed("posts", &[]).unwrap_err(),
            Error::MissingArguments
        ));
        assert!(matches!(
            collection.is_all_allowed("posts", &[]).unwrap_err(),
            Error::MissingArguments
        ));
    }

    #[test]
    fn test_compact_roundtrip() {
        let reg = registry();
        let collection = caps("posts:read,write comments:read pages");
        let reparsed = Capabilities::parse(&collection.to_compact(), &reg).unwrap();
        assert_eq!(reparsed, collection);
    }

    #[test]
    fn test_compact_filters_empty_entries() {
        let reg = registry();
        let mut collection = caps("posts:read");
        collection.add(Capability::empty("comments", &reg).unwrap());
        assert_eq!(collection.to_compact(), "posts:read");
        // the entry itself stays in the collection
        assert_eq!(collection.len(), 2);
    }

    #[test]
    fn test_json_roundtrip_preserves_order() {
        let collection = caps("posts:read,write comments:read");
        let json = collection.to_json().unwrap();
        assert_eq!(json, r#"{"posts":["read","write"],"comments":["read"]}"#);
        let parsed = Capabilities::from_json(&json).unwrap();
        assert_eq!(parsed, collection);
    }

    #[test]
    fn test_from_json_malformed() {
        for input in ["[1,2]", "{", r#"{"posts":"read"}"#] {
            let result = Capabilities::from_json(input);
            assert!(
                matches!(result.unwrap_err(), Error::MalformedPayload(_)),
                "expected malformed payload for {input:?}"
            );
        }
    }

    #[test]
    fn test_json_duplicate_keys_are_lossy() {
        let reg = registry();
        let mut collection = Capabilities::new();
        collection.add(Capability::with_operations("posts", ["read"], &reg).unwrap());
        collection.add(Capability::with_operations("posts", ["write"], &reg).unwrap());
        let json = collection.to_json().unwrap();
        let parsed = Capabilities::from_json(&json).unwrap();
        // json consumers collapse duplicates; the last entry wins
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed.get("posts").unwrap().operations(), ["write"]);
    }

    #[test]
    fn test_blob_roundtrip_keeps_duplicates() {
        let reg = registry();
        let mut collection = Capabilities::new();
        collection.add(Capability::with_operations("posts", ["read"], &reg).unwrap());
        collection.add(Capability::with_operations("posts", ["write"], &reg).unwrap());
        let blob = collection.to_blob().unwrap();
        let decoded = Capabilities::from_blob(&blob).unwrap();
        assert_eq!(decoded, collection);
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn test_iteration_reflects_live_state() {
        let mut collection = caps("posts:read comments:read");
        collection.remove("posts");
        let keys: Vec<&str> = collection.iter().map(Capability::key).collect();
        assert_eq!(keys, ["comments"]);
    }

    #[test]
    fn test_display_is_compact_form() {
        let collection = caps("posts:read comments");
        assert_eq!(collection.to_string(), "posts:read comments:any");
    }
}
