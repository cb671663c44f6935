use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use crate::index::GameIndex;
use crate::merger::ResultRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// All items.
    #[default]
    Patcher,
    /// Only items with a fix available.
    FixOnly,
    /// Only items installed in a destination directory. Never goes remote.
    Library,
}

impl SearchMode {
    pub fn uses_remote(&self) -> bool {
        !matches!(self, SearchMode::Library)
    }
}

/// Synchronous match over the index snapshot.
pub struct LocalMatcher {
    cap: usize,
}

impl LocalMatcher {
    pub fn new(cap: usize) -> Self {
        Self { cap }
    }

    /// Case-insensitive substring match on name, or exact id match.
    /// `installed` is only consulted in [`SearchMode::Library`].
    pub fn search(
        &self,
        query: &str,
        index: &GameIndex,
        mode: SearchMode,
        installed: &[String],
    ) -> Vec<ResultRecord> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }
        let needle = query.to_lowercase();

        if mode == SearchMode::Library {
            return installed
                .iter()
                .filter(|id| {
                    id.as_str() == query
                        || index
                            .get(id)
                            .map(|item| item.name.to_lowercase().contains(&needle))
                            .unwrap_or(false)
                })
                .take(self.cap)
                .map(|id| library_record(id, index))
                .collect();
        }

        index
            .items()
            .iter()
            .filter(|item| mode != SearchMode::FixOnly || item.has_fix)
            .filter(|item| item.id == query || item.name.to_lowercase().contains(&needle))
            .take(self.cap)
            .map(|item| ResultRecord::from_index(&item.id, &item.name, index))
            .collect()
    }

    /// What to show for an empty query.
    pub fn browse(
        &self,
        index: &GameIndex,
        mode: SearchMode,
        installed: &[String],
        random_count: usize,
    ) -> Vec<ResultRecord> {
        match mode {
            SearchMode::Patcher => {
                let mut rng = rand::rng();
                index
                    .items()
                    .choose_multiple(&mut rng, random_count.min(self.cap))
                    .map(|item| ResultRecord::from_index(&item.id, &item.name, index))
                    .collect()
            }
            SearchMode::FixOnly => index
                .items()
                .iter()
                .filter(|item| item.has_fix)
                .take(self.cap)
                .map(|item| ResultRecord::from_index(&item.id, &item.name, index))
                .collect(),
            SearchMode::Library => installed
                .iter()
                .take(self.cap)
                .map(|id| library_record(id, index))
                .collect(),
        }
    }
}

fn library_record(id: &str, index: &GameIndex) -> ResultRecord {
    let name = index.get(id).map(|item| item.name.as_str()).unwrap_or("");
    ResultRecord::from_index(id, name, index)
}
