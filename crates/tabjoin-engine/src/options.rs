//! Per-invocation join configuration.

use serde::{Deserialize, Serialize};
use tabjoin_store::index::DEFAULT_PARALLEL_BUILD_THRESHOLD;
use tabjoin_store::{BuildOptions, IndexKind};

/// Which build matches of a probe row are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mult {
    /// Every match, in build order.
    #[default]
    All,
    /// Only the first match.
    First,
    /// Only the last match.
    Last,
}

impl Mult {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::First => "first",
            Self::Last => "last",
        }
    }

    /// Narrow a match list.
    #[must_use]
    pub fn apply(self, rows: &[usize]) -> &[usize] {
        match self {
            Self::All => rows,
            Self::First => &rows[..rows.len().min(1)],
            Self::Last => &rows[rows.len().saturating_sub(1)..],
        }
    }

    /// Length [`Mult::apply`] leaves of a list of `len` matches.
    #[must_use]
    pub fn narrowed_len(self, len: usize) -> usize {
        match self {
            Self::All => len,
            Self::First | Self::Last => len.min(1),
        }
    }
}

/// How a match map is turned into output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JoinMode {
    /// Every probe row; unmatched rows are null-filled on the build side.
    #[default]
    Plain,
    /// Matched pairs only.
    Inner,
    /// Probe rows without a match.
    Anti,
    /// Probe rows with at least one match, once each.
    Semi,
    /// One row per probe row, reducing its build matches.
    EachGroup,
    /// In-place assignment into the probe table.
    Update,
    /// Plain plus the build rows no probe row matched.
    Full,
    /// Every probe row paired with every build row. Takes no keys.
    Cross,
}

impl JoinMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Inner => "inner",
            Self::Anti => "anti",
            Self::Semi => "semi",
            Self::EachGroup => "each_group",
            Self::Update => "update",
            Self::Full => "full",
            Self::Cross => "cross",
        }
    }

    /// Modes whose output may hold build columns row by row.
    #[must_use]
    pub const fn exposes_build_rows(self) -> bool {
        matches!(
            self,
            Self::Plain | Self::Inner | Self::Update | Self::Full | Self::Cross
        )
    }

    /// Whether the cartesian guard applies.
    #[must_use]
    pub const fn is_guarded(self) -> bool {
        matches!(
            self,
            Self::Plain | Self::Inner | Self::Update | Self::Full | Self::Cross
        )
    }
}

/// Options passed explicitly to every join call.
///
/// Deserializes with every missing field at its default, so a partial JSON
/// object such as `{"allow_cartesian": true}` is a valid configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinOptions {
    /// Skip the cartesian guard.
    pub allow_cartesian: bool,
    pub mult: Mult,
    /// Whether a null key component matches another null.
    pub null_keys_match: bool,
    /// Layout of indexes built on the fly.
    pub index_kind: IndexKind,
    /// Hash partitions for on-the-fly builds; 1 disables partitioning.
    pub build_partitions: usize,
    /// Build rows needed before partitions are built on separate threads.
    pub parallel_build_threshold: usize,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self::strict()
    }
}

impl JoinOptions {
    /// Guarded, all matches, nulls never match, single-threaded hash builds.
    #[must_use]
    pub const fn strict() -> Self {
        Self {
            allow_cartesian: false,
            mult: Mult::All,
            null_keys_match: false,
            index_kind: IndexKind::Hash,
            build_partitions: 1,
            parallel_build_threshold: DEFAULT_PARALLEL_BUILD_THRESHOLD,
        }
    }

    #[must_use]
    pub const fn with_cartesian(mut self, allow: bool) -> Self {
        self.allow_cartesian = allow;
        self
    }

    #[must_use]
    pub const fn with_mult(mut self, mult: Mult) -> Self {
        self.mult = mult;
        self
    }

    #[must_use]
    pub const fn with_null_keys_match(mut self, yes: bool) -> Self {
        self.null_keys_match = yes;
        self
    }

    #[must_use]
    pub const fn with_index_kind(mut self, kind: IndexKind) -> Self {
        self.index_kind = kind;
        self
    }

    #[must_use]
    pub const fn with_build_partitions(mut self, partitions: usize, threshold: usize) -> Self {
        self.build_partitions = partitions;
        self.parallel_build_threshold = threshold;
        self
    }

    #[must_use]
    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            kind: self.index_kind,
            partitions: self.build_partitions.max(1),
            parallel_threshold: self.parallel_build_threshold,
        }
    }
}
