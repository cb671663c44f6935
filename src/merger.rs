use serde::Serialize;
use std::collections::HashMap;

use crate::index::{is_placeholder_name, GameIndex};
use crate::providers::MetadataRecord;

/// One displayed search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultRecord {
    pub id: String,
    pub name: String,
    pub supported: bool,
    pub has_fix: bool,
    pub is_placeholder_name: bool,
}

impl ResultRecord {
    /// Build a record with flags taken from the index, never from the source
    /// of the name.
    pub fn from_index(id: &str, name: &str, index: &GameIndex) -> Self {
        let flags = index.flags(id);
        Self {
            id: id.to_string(),
            name: name.to_string(),
            supported: flags.supported,
            has_fix: flags.has_fix,
            is_placeholder_name: is_placeholder_name(name, id),
        }
    }
}

/// Ordered, id-unique result list for the current query.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    records: Vec<ResultRecord>,
    positions: HashMap<String, usize>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<ResultRecord>) -> Self {
        let mut set = Self::new();
        for record in records {
            set.push_unique(record);
        }
        set
    }

    pub fn records(&self) -> &[ResultRecord] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&ResultRecord> {
        self.positions.get(id).map(|&i| &self.records[i])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.positions.clear();
    }

    pub fn placeholder_ids(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.is_placeholder_name)
            .map(|r| r.id.clone())
            .collect()
    }

    fn push_unique(&mut self, record: ResultRecord) -> bool {
        if self.positions.contains_key(&record.id) {
            return false;
        }
        self.positions.insert(record.id.clone(), self.records.len());
        self.records.push(record);
        true
    }

    /// Fold incoming provider records into the set.
    ///
    /// An existing record is only rewritten while its name is still a
    /// placeholder, so resolved names are never downgraded. Unknown ids are
    /// appended in arrival order. Flags of every touched record are
    /// recomputed from `index`. Returns whether anything changed; merging the
    /// same batch twice reports `false` the second time.
    pub fn merge(&mut self, incoming: &[MetadataRecord], index: &GameIndex) -> bool {
        let mut changed = false;

        for rec in incoming {
            if rec.id.is_empty() {
                continue;
            }
            let flags = index.flags(&rec.id);

            match self.positions.get(&rec.id) {
                Some(&pos) => {
                    let existing = &mut self.records[pos];
                    if existing.is_placeholder_name && !is_placeholder_name(&rec.name, &rec.id) {
                        existing.name = rec.name.clone();
                        existing.is_placeholder_name = false;
                        changed = true;
                    }
                    if existing.supported != flags.supported || existing.has_fix != flags.has_fix {
                        existing.supported = flags.supported;
                        existing.has_fix = flags.has_fix;
                        changed = true;
                    }
                }
                None => {
                    changed |= self.push_unique(ResultRecord::from_index(&rec.id, &rec.name, index));
                }
            }
        }

        changed
    }
}

/// Functional form of [`ResultSet::merge`].
pub fn merge(
    existing: &[ResultRecord],
    incoming: &[MetadataRecord],
    index: &GameIndex,
) -> (Vec<ResultRecord>, bool) {
    let mut set = ResultSet::from_records(existing.to_vec());
    let changed = set.merge(incoming, index);
    (set.records, changed)
}
