//! Ownership marker and metadata comparison.
//!
//! Every resource this operator creates or updates carries
//! `owner=cnwan-operator` in its metadata (labels for namespaces). Anything
//! without that exact pair is foreign and is never mutated or deleted.
//! The marker itself is ignored when comparing desired and remote metadata.

use cnwan_core::Metadata;

pub const OWNER_KEY: &str = cnwan_core::types::OWNER_KEY;
pub const OWNER_VALUE: &str = "cnwan-operator";

/// Whether a remote resource belongs to this operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Owned,
    Foreign,
}

impl Ownership {
    pub fn of(metadata: &Metadata) -> Self {
        if is_owned(metadata) {
            Ownership::Owned
        } else {
            Ownership::Foreign
        }
    }

    pub fn is_owned(self) -> bool {
        self == Ownership::Owned
    }
}

/// Uniform ownership capability of remote namespaces, services and endpoints.
pub trait Owned {
    /// Labels or metadata holding the ownership marker.
    fn marker_source(&self) -> &Metadata;

    fn ownership_tag(&self) -> Ownership {
        Ownership::of(self.marker_source())
    }

    fn is_owned(&self) -> bool {
        self.ownership_tag().is_owned()
    }
}

/// True iff `metadata["owner"] == "cnwan-operator"`.
pub fn is_owned(metadata: &Metadata) -> bool {
    metadata.get(OWNER_KEY).map(String::as_str) == Some(OWNER_VALUE)
}

fn is_marker(key: &str, value: &str) -> bool {
    key == OWNER_KEY && value == OWNER_VALUE
}

/// Compare two metadata sets with the exact `owner=cnwan-operator` pair
/// removed from both. An `owner` key with any other value still counts.
pub fn metadata_equivalent(a: &Metadata, b: &Metadata) -> bool {
    fn strip(m: &Metadata) -> Vec<(&str, &str)> {
        m.iter()
            .filter(|(k, v)| !is_marker(k, v))
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }
    strip(a) == strip(b)
}

/// Copy of `metadata` with the ownership marker set.
pub fn with_owner_tag(metadata: &Metadata) -> Metadata {
    let mut tagged = metadata.clone();
    tagged.insert(OWNER_KEY.to_string(), OWNER_VALUE.to_string());
    tagged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md(pairs: &[(&str, &str)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn owned_requires_exact_value() {
        assert!(is_owned(&md(&[("owner", "cnwan-operator")])));
        assert!(!is_owned(&md(&[("owner", "someone-else")])));
        assert!(!is_owned(&md(&[])));
        assert!(!is_owned(&md(&[("Owner", "cnwan-operator")])));
    }

    #[test]
    fn marker_is_ignored_on_either_side() {
        let tagged = md(&[("a", "1"), ("owner", "cnwan-operator")]);
        let plain = md(&[("a", "1")]);
        assert!(metadata_equivalent(&tagged, &plain));
        assert!(metadata_equivalent(&plain, &tagged));
    }

    #[test]
    fn other_owner_values_are_compared() {
        let foreign = md(&[("a", "1"), ("owner", "someone-else")]);
        let plain = md(&[("a", "1")]);
        assert!(!metadata_equivalent(&foreign, &plain));
        assert!(!metadata_equivalent(&plain, &foreign));
    }

    #[test]
    fn equivalence_is_reflexive_and_detects_value_changes() {
        let a = md(&[("a", "1"), ("b", "2")]);
        assert!(metadata_equivalent(&a, &a));
        assert!(!metadata_equivalent(&a, &md(&[("a", "1"), ("b", "3")])));
        assert!(!metadata_equivalent(&a, &md(&[("a", "1")])));
    }

    #[test]
    fn comparison_does_not_mutate_inputs() {
        let a = md(&[("a", "1"), ("owner", "cnwan-operator")]);
        let b = md(&[("a", "1")]);
        let (a_before, b_before) = (a.clone(), b.clone());
        metadata_equivalent(&a, &b);
        assert_eq!(a, a_before);
        assert_eq!(b, b_before);
    }

    #[test]
    fn with_owner_tag_overrides_foreign_owner() {
        let tagged = with_owner_tag(&md(&[("owner", "someone-else"), ("x", "y")]));
        assert!(is_owned(&tagged));
        assert_eq!(tagged.get("x").map(String::as_str), Some("y"));
    }
}
