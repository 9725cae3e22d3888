//! Per-kind field ownership: which side is authoritative for each field.
//!
//! A field must never be written from both directions within one pass, so a
//! table lists each field path exactly once. Annotation entries use the form
//! `metadata.annotations[<key>]`.
//!
//! The engine reads two things from a table: the physical-owned annotation
//! keys, which the metadata merge never overwrites, and its validity, checked
//! when a syncer is registered. `PhysicalOnce` and `VirtualIncreaseOnly`
//! describe rules each syncer applies in its own translate functions.

use thiserror::Error;

/// Direction a field flows in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// Copied down, virtual → physical.
    Virtual,
    /// Copied up, physical → virtual.
    Physical,
    /// Virtual until the physical object reaches the named state, physical afterwards.
    PhysicalOnce(&'static str),
    /// Virtual, but the physical value may only grow.
    VirtualIncreaseOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OwnershipError {
    #[error("field {field} declared twice ({first:?} and {second:?})")]
    DuplicateField { field: &'static str, first: Authority, second: Authority },
    #[error("malformed annotation field {0}; expected metadata.annotations[<key>]")]
    MalformedAnnotation(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRule {
    pub field: &'static str,
    pub authority: Authority,
}

impl FieldRule {
    pub const fn new(field: &'static str, authority: Authority) -> Self {
        Self { field, authority }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnershipTable {
    rules: Vec<FieldRule>,
}

const ANNOTATION_PREFIX: &str = "metadata.annotations[";

impl OwnershipTable {
    pub fn new(rules: Vec<FieldRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }

    pub fn authority(&self, field: &str) -> Option<Authority> {
        self.rules.iter().find(|r| r.field == field).map(|r| r.authority)
    }

    /// Annotation keys the host dictates; the forward merge never touches them.
    pub fn physical_annotation_keys(&self) -> Vec<&'static str> {
        self.rules
            .iter()
            .filter(|r| r.authority == Authority::Physical)
            .filter_map(|r| r.field.strip_prefix(ANNOTATION_PREFIX).and_then(|s| s.strip_suffix(']')))
            .collect()
    }

    /// Reject tables that name the same field more than once or carry an
    /// unterminated annotation entry.
    pub fn validate(&self) -> Result<(), OwnershipError> {
        for (i, a) in self.rules.iter().enumerate() {
            if a.field.starts_with(ANNOTATION_PREFIX) && (!a.field.ends_with(']') || a.field.len() == ANNOTATION_PREFIX.len() + 1) {
                return Err(OwnershipError::MalformedAnnotation(a.field));
            }
            if let Some(b) = self.rules[i + 1..].iter().find(|b| b.field == a.field) {
                return Err(OwnershipError::DuplicateField { field: a.field, first: a.authority, second: b.authority });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_annotation_keys_are_extracted() {
        let t = OwnershipTable::new(vec![
            FieldRule::new("metadata.annotations[a.io/x]", Authority::Physical),
            FieldRule::new("metadata.annotations[a.io/y]", Authority::Virtual),
            FieldRule::new("spec.storageClassName", Authority::PhysicalOnce("Bound")),
        ]);
        assert_eq!(t.physical_annotation_keys(), vec!["a.io/x"]);
        assert_eq!(t.authority("spec.storageClassName"), Some(Authority::PhysicalOnce("Bound")));
        assert!(t.validate().is_ok());
    }

    #[test]
    fn duplicate_fields_are_rejected() {
        let t = OwnershipTable::new(vec![
            FieldRule::new("status", Authority::Physical),
            FieldRule::new("status", Authority::Virtual),
        ]);
        assert_eq!(
            t.validate().unwrap_err(),
            OwnershipError::DuplicateField { field: "status", first: Authority::Physical, second: Authority::Virtual }
        );
    }

    #[test]
    fn unterminated_annotation_fields_are_rejected() {
        for field in ["metadata.annotations[a.io/x", "metadata.annotations[]"] {
            let t = OwnershipTable::new(vec![FieldRule::new(field, Authority::Physical)]);
            assert_eq!(t.validate().unwrap_err(), OwnershipError::MalformedAnnotation(field));
        }
    }
}
