//! Equality key pairs between the probe and the build table.

use std::fmt;

/// One equality condition: `probe.<probe> == build.<build>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPair {
    pub probe: String,
    pub build: String,
}

impl KeyPair {
    pub fn new(probe: impl Into<String>, build: impl Into<String>) -> Self {
        Self {
            probe: probe.into(),
            build: build.into(),
        }
    }

    /// Whether both sides use the same column name.
    #[must_use]
    pub fn is_shared(&self) -> bool {
        self.probe == self.build
    }

    #[must_use]
    pub fn swapped(&self) -> Self {
        Self {
            probe: self.build.clone(),
            build: self.probe.clone(),
        }
    }
}

impl fmt::Display for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_shared() {
            f.write_str(&self.probe)
        } else {
            write!(f, "{}=={}", self.probe, self.build)
        }
    }
}

/// Ordered list of key pairs. Emptiness is only legal for cross joins and is
/// rejected at plan time otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySpec {
    pairs: Vec<KeyPair>,
}

impl KeySpec {
    /// Pairs of `(probe column, build column)`.
    pub fn new<I, P, B>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (P, B)>,
        P: Into<String>,
        B: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(p, b)| KeyPair::new(p, b))
                .collect(),
        }
    }

    /// Columns with the same name on both sides.
    pub fn same<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(names.into_iter().map(|n| {
            let n = n.as_ref().to_owned();
            (n.clone(), n)
        }))
    }

    #[must_use]
    pub fn pairs(&self) -> &[KeyPair] {
        &self.pairs
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    #[must_use]
    pub fn probe_columns(&self) -> Vec<&str> {
        self.pairs.iter().map(|p| p.probe.as_str()).collect()
    }

    #[must_use]
    pub fn build_columns(&self) -> Vec<&str> {
        self.pairs.iter().map(|p| p.build.as_str()).collect()
    }

    /// Same conditions with the roles of the two tables exchanged.
    #[must_use]
    pub fn swapped(&self) -> Self {
        Self {
            pairs: self.pairs.iter().map(KeyPair::swapped).collect(),
        }
    }

    /// Index of the pair whose probe or build column is `name`.
    #[must_use]
    pub fn pair_for(&self, name: &str) -> Option<usize> {
        self.pairs
            .iter()
            .position(|p| p.probe == name || p.build == name)
    }

    #[must_use]
    pub fn is_probe_key(&self, name: &str) -> bool {
        self.pairs.iter().any(|p| p.probe == name)
    }

    #[must_use]
    pub fn is_build_key(&self, name: &str) -> bool {
        self.pairs.iter().any(|p| p.build == name)
    }
}

impl<P: Into<String>, B: Into<String>> FromIterator<(P, B)> for KeySpec {
    fn from_iter<T: IntoIterator<Item = (P, B)>>(iter: T) -> Self {
        Self::new(iter)
    }
}
