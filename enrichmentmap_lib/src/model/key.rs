use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Identifies one comparison between two gene sets under an edge type.
///
/// Equality and hashing ignore the order of the two names: `A (t) B` and
/// `B (t) A` are the same comparison. The edge type and the optional data
/// set name are part of the identity, so edges of different kinds between
/// the same two names never collide. Orientation only matters for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityKey {
    name_a: String,
    edge_type: String,
    name_b: String,
    data_set: Option<String>,
}

impl SimilarityKey {
    pub fn new(name_a: impl Into<String>, edge_type: impl Into<String>, name_b: impl Into<String>) -> Self {
        SimilarityKey {
            name_a: name_a.into(),
            edge_type: edge_type.into(),
            name_b: name_b.into(),
            data_set: None,
        }
    }

    pub fn with_data_set(
        name_a: impl Into<String>,
        edge_type: impl Into<String>,
        name_b: impl Into<String>,
        data_set: impl Into<String>,
    ) -> Self {
        SimilarityKey {
            data_set: Some(data_set.into()),
            ..SimilarityKey::new(name_a, edge_type, name_b)
        }
    }

    pub fn name_a(&self) -> &str {
        &self.name_a
    }

    pub fn name_b(&self) -> &str {
        &self.name_b
    }

    pub fn edge_type(&self) -> &str {
        &self.edge_type
    }

    pub fn data_set(&self) -> Option<&str> {
        self.data_set.as_deref()
    }

    /// Same key with the two names exchanged.
    pub fn swap(&self) -> SimilarityKey {
        SimilarityKey {
            name_a: self.name_b.clone(),
            edge_type: self.edge_type.clone(),
            name_b: self.name_a.clone(),
            data_set: self.data_set.clone(),
        }
    }

    /// Same key with the names in lexicographic order.
    pub fn normalized(self) -> SimilarityKey {
        if self.name_a <= self.name_b {
            self
        } else {
            self.swap()
        }
    }

    fn ordered_names(&self) -> (&str, &str) {
        if self.name_a <= self.name_b {
            (&self.name_a, &self.name_b)
        } else {
            (&self.name_b, &self.name_a)
        }
    }
}

impl PartialEq for SimilarityKey {
    fn eq(&self, other: &Self) -> bool {
        self.edge_type == other.edge_type
            && self.data_set == other.data_set
            && self.ordered_names() == other.ordered_names()
    }
}

impl Eq for SimilarityKey {}

impl Hash for SimilarityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ordered_names().hash(state);
        self.edge_type.hash(state);
        self.data_set.hash(state);
    }
}

impl fmt::Display for SimilarityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data_set {
            Some(data_set) => write!(
                f,
                "{} ({}_{}) {}",
                self.name_a, self.edge_type, data_set, self.name_b
            ),
            None => write!(f, "{} ({}) {}", self.name_a, self.edge_type, self.name_b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashSet;

    #[test]
    fn swapped_keys_are_equal() {
        let key = SimilarityKey::new("A", "Geneset_Overlap", "B");
        let swapped = key.swap();
        assert_eq!(key, swapped);
        assert_eq!(swapped.name_a(), "B");
        let mut seen = AHashSet::new();
        seen.insert(key);
        assert!(seen.contains(&swapped));
    }

    #[test]
    fn edge_type_and_data_set_are_identity() {
        let enr = SimilarityKey::new("A", "Geneset_Overlap", "B");
        let sig = SimilarityKey::new("A", "sig", "B");
        assert_ne!(enr, sig);
        let ds1 = SimilarityKey::with_data_set("A", "sig", "B", "DS1");
        let ds2 = SimilarityKey::with_data_set("A", "sig", "B", "DS2");
        assert_ne!(ds1, ds2);
        assert_ne!(ds1, sig);
    }

    #[test]
    fn display() {
        assert_eq!(SimilarityKey::new("A", "pp", "B").to_string(), "A (pp) B");
        assert_eq!(
            SimilarityKey::with_data_set("HUB", "sig", "B", "DS1").to_string(),
            "HUB (sig_DS1) B"
        );
        assert_eq!(SimilarityKey::new("b", "pp", "a").normalized().to_string(), "a (pp) b");
    }
}
