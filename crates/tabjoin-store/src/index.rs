//! Key indexes over one or more columns of a table.
//!
//! Two layouts are supported:
//! - **Hash**: `key -> rows` maps, optionally split into partitions by key
//!   hash so that several threads can build disjoint partitions at once.
//! - **Sorted**: a stable sort order of the rows plus one group per distinct
//!   key. Supports exact, key-prefix and range lookups.
//!
//! In both layouts the rows sharing a key are listed in their original
//! relative order. An index never rebuilds itself: it records the storage
//! version of each indexed column and [`KeyIndex::is_valid_for`] reports
//! whether the table has moved on since.

use std::hash::BuildHasher;
use std::ops::Bound;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tabjoin_error::{JoinError, Result, Side};
use tabjoin_types::{KeyTuple, KeyValue};
use tracing::debug;
use xxhash_rust::xxh3::Xxh3Builder;

use crate::column::Column;
use crate::table::Table;

/// Minimum row count before a hash build is split across threads.
pub const DEFAULT_PARALLEL_BUILD_THRESHOLD: usize = 65_536;

/// Index layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    #[default]
    Hash,
    Sorted,
}

impl IndexKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hash => "hash",
            Self::Sorted => "sorted",
        }
    }
}

/// Knobs for index construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    pub kind: IndexKind,
    /// Number of hash partitions; values below 2 build a single map.
    pub partitions: usize,
    /// Rows required before partitions are built on separate threads.
    pub parallel_threshold: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            kind: IndexKind::Hash,
            partitions: 1,
            parallel_threshold: DEFAULT_PARALLEL_BUILD_THRESHOLD,
        }
    }
}

impl BuildOptions {
    #[must_use]
    pub fn sorted() -> Self {
        Self {
            kind: IndexKind::Sorted,
            ..Self::default()
        }
    }
}

type RowList = SmallVec<[usize; 1]>;
type Partition = HashMap<KeyTuple, RowList, Xxh3Builder>;

#[derive(Debug)]
struct HashBody {
    /// Never empty; every partition uses the same seedless hasher.
    partitions: Vec<Partition>,
}

impl HashBody {
    fn partition_of(&self, key: &[KeyValue]) -> usize {
        if self.partitions.len() <= 1 {
            return 0;
        }
        let hash = self.partitions[0].hasher().hash_one(key);
        partition_for(hash, self.partitions.len())
    }
}

/// Partition routing uses the upper half of the hash; the map itself buckets
/// on the lower bits, so routing on those would cluster each partition.
fn partition_for(hash: u64, partitions: usize) -> usize {
    if partitions <= 1 {
        0
    } else {
        ((hash >> 32) % partitions as u64) as usize
    }
}

#[derive(Debug)]
struct Group {
    key: KeyTuple,
    start: usize,
    end: usize,
}

impl Group {
    /// The first `width` key components, or the whole key if shorter.
    fn leading(&self, width: usize) -> &[KeyValue] {
        &self.key[..width.min(self.key.len())]
    }
}

#[derive(Debug)]
struct SortedBody {
    order: Vec<usize>,
    groups: Vec<Group>,
}

#[derive(Debug)]
enum IndexBody {
    Hash(HashBody),
    Sorted(SortedBody),
}

/// Read-only index from composite key to row positions.
#[derive(Debug)]
pub struct KeyIndex {
    columns: Vec<String>,
    versions: Vec<u64>,
    rows: usize,
    body: IndexBody,
}

impl KeyIndex {
    /// Build an index over `columns` of `table`.
    pub fn build<S: AsRef<str>>(
        table: &Table,
        columns: &[S],
        options: &BuildOptions,
    ) -> Result<Self> {
        let mut key_columns: Vec<&Column> = Vec::with_capacity(columns.len());
        let mut versions = Vec::with_capacity(columns.len());
        for name in columns {
            let name = name.as_ref();
            let column = table
                .column(name)
                .map_err(|_| JoinError::unknown_column(name, Side::Build))?;
            key_columns.push(column);
            versions.push(table.column_version(name).unwrap_or_default());
        }
        if key_columns.is_empty() {
            return Err(JoinError::EmptyKeySpec);
        }

        let rows = table.len();
        let keys: Vec<KeyTuple> = (0..rows)
            .map(|row| key_columns.iter().map(|c| c.key_at(row)).collect())
            .collect();

        let body = match options.kind {
            IndexKind::Hash => IndexBody::Hash(build_hash(keys, options)),
            IndexKind::Sorted => IndexBody::Sorted(build_sorted(keys)),
        };
        let index = Self {
            columns: columns.iter().map(|c| c.as_ref().to_owned()).collect(),
            versions,
            rows,
            body,
        };
        debug!(
            columns = ?index.columns,
            kind = index.kind().as_str(),
            rows,
            groups = index.group_count(),
            "key index built"
        );
        Ok(index)
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub const fn kind(&self) -> IndexKind {
        match self.body {
            IndexBody::Hash(_) => IndexKind::Hash,
            IndexBody::Sorted(_) => IndexKind::Sorted,
        }
    }

    /// Number of rows indexed.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn group_count(&self) -> usize {
        match &self.body {
            IndexBody::Hash(h) => h.partitions.iter().map(HashMap::len).sum(),
            IndexBody::Sorted(s) => s.groups.len(),
        }
    }

    /// Number of hash partitions (1 for sorted indexes).
    #[must_use]
    pub fn partition_count(&self) -> usize {
        match &self.body {
            IndexBody::Hash(h) => h.partitions.len(),
            IndexBody::Sorted(_) => 1,
        }
    }

    /// Whether every key occurs at most once.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.group_count() == self.rows
    }

    /// Whether the index still describes `table`: same row count and every
    /// indexed column unchanged since the build.
    #[must_use]
    pub fn is_valid_for(&self, table: &Table) -> bool {
        self.rows == table.len()
            && self
                .columns
                .iter()
                .zip(&self.versions)
                .all(|(name, version)| table.column_version(name) == Some(*version))
    }

    /// Sorted row order, for sorted indexes.
    #[must_use]
    pub fn order(&self) -> Option<&[usize]> {
        match &self.body {
            IndexBody::Sorted(s) => Some(&s.order),
            IndexBody::Hash(_) => None,
        }
    }

    /// Whether the table is already physically in key order.
    #[must_use]
    pub fn is_identity_order(&self) -> bool {
        self.order()
            .is_some_and(|order| order.iter().enumerate().all(|(i, &r)| i == r))
    }

    /// Rows whose key equals `key`, in original relative order.
    ///
    /// `key` must have one component per indexed column; a shorter key is
    /// treated as a prefix on sorted indexes and matches nothing on hash
    /// indexes.
    #[must_use]
    pub fn lookup(&self, key: &[KeyValue]) -> &[usize] {
        match &self.body {
            IndexBody::Hash(h) => {
                let part = &h.partitions[h.partition_of(key)];
                part.get(key).map_or(&[], SmallVec::as_slice)
            }
            IndexBody::Sorted(s) if key.len() == self.columns.len() => s
                .groups
                .binary_search_by(|g| g.key.as_slice().cmp(key))
                .map_or(&[], |pos| {
                    let g = &s.groups[pos];
                    &s.order[g.start..g.end]
                }),
            IndexBody::Sorted(_) => self.lookup_prefix(key).unwrap_or_default(),
        }
    }

    /// Rows whose leading key components equal `prefix`, in index order.
    /// `None` for hash indexes.
    #[must_use]
    pub fn lookup_prefix(&self, prefix: &[KeyValue]) -> Option<&[usize]> {
        let IndexBody::Sorted(s) = &self.body else {
            return None;
        };
        let width = prefix.len().min(self.columns.len());
        let lo = s
            .groups
            .partition_point(|g| &g.key[..width] < &prefix[..width]);
        let hi = s
            .groups
            .partition_point(|g| &g.key[..width] <= &prefix[..width]);
        Some(s.slice_groups(lo, hi))
    }

    /// Rows whose key lies within the given bounds, in key order. Bounds may
    /// be key prefixes. `None` for hash indexes.
    #[must_use]
    pub fn lookup_range(
        &self,
        lower: Bound<&[KeyValue]>,
        upper: Bound<&[KeyValue]>,
    ) -> Option<&[usize]> {
        let IndexBody::Sorted(s) = &self.body else {
            return None;
        };
        let lo = match lower {
            Bound::Unbounded => 0,
            Bound::Included(b) => s
                .groups
                .partition_point(|g| g.leading(b.len()) < b),
            Bound::Excluded(b) => s
                .groups
                .partition_point(|g| g.leading(b.len()) <= b),
        };
        let hi = match upper {
            Bound::Unbounded => s.groups.len(),
            Bound::Included(b) => s
                .groups
                .partition_point(|g| g.leading(b.len()) <= b),
            Bound::Excluded(b) => s
                .groups
                .partition_point(|g| g.leading(b.len()) < b),
        };
        Some(s.slice_groups(lo, hi.max(lo)))
    }
}

impl SortedBody {
    /// Groups are laid out back to back in `order`, so any run of groups is
    /// one contiguous slice.
    fn slice_groups(&self, lo: usize, hi: usize) -> &[usize] {
        if lo >= hi {
            return &[];
        }
        &self.order[self.groups[lo].start..self.groups[hi - 1].end]
    }
}

fn build_sorted(keys: Vec<KeyTuple>) -> SortedBody {
    let mut order: Vec<usize> = (0..keys.len()).collect();
    // Stable: equal keys keep their original relative order.
    order.sort_by(|&a, &b| keys[a].cmp(&keys[b]));

    let mut groups: Vec<Group> = Vec::new();
    for (pos, &row) in order.iter().enumerate() {
        match groups.last_mut() {
            Some(last) if last.key == keys[row] => last.end = pos + 1,
            _ => groups.push(Group {
                key: keys[row].clone(),
                start: pos,
                end: pos + 1,
            }),
        }
    }
    SortedBody { order, groups }
}

fn build_hash(keys: Vec<KeyTuple>, options: &BuildOptions) -> HashBody {
    let hasher = Xxh3Builder::new();
    let partitions = options.partitions.max(1);

    if partitions == 1 {
        let mut map = Partition::with_capacity_and_hasher(keys.len(), hasher);
        for (row, key) in keys.into_iter().enumerate() {
            map.entry(key).or_default().push(row);
        }
        return HashBody {
            partitions: vec![map],
        };
    }

    let hashes: Vec<u64> = keys.iter().map(|k| hasher.hash_one(k)).collect();
    let fill = |part: usize| -> Partition {
        let mut map = Partition::with_hasher(hasher);
        for (row, key) in keys.iter().enumerate() {
            if partition_for(hashes[row], partitions) == part {
                map.entry(key.clone()).or_default().push(row);
            }
        }
        map
    };

    let maps: Vec<Partition> = if keys.len() >= options.parallel_threshold {
        debug!(rows = keys.len(), partitions, "building hash partitions in parallel");
        let fill = &fill;
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..partitions)
                .map(|part| scope.spawn(move || fill(part)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|p| std::panic::resume_unwind(p)))
                .collect()
        })
    } else {
        (0..partitions).map(fill).collect()
    };

    HashBody { partitions: maps }
}
