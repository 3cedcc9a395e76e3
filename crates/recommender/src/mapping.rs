//! Dense ID mapping
//!
//! Maps sparse external identifiers onto contiguous indices `1..=N` so they can
//! address rows of an embedding table. Index 0 is the padding row and is never
//! assigned. Assignment follows the total order of the identifier type, so the
//! same input always yields the same mapping.

use crate::error::{RecommenderError, Result};
use crate::types::{Interaction, MovieId, UserId};
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

/// Bijection between external IDs and dense indices `1..=len()`
#[derive(Debug, Clone)]
pub struct IdMapper<K> {
    to_index: HashMap<K, usize>,
    /// `ids[i - 1]` is the external ID of dense index `i`
    ids: Vec<K>,
}

impl<K> IdMapper<K>
where
    K: Ord + Hash + Clone,
{
    /// Build a mapper from any collection of IDs; duplicates collapse
    pub fn from_ids<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = K>,
    {
        let ordered: BTreeSet<K> = ids.into_iter().collect();
        let ids: Vec<K> = ordered.into_iter().collect();
        let to_index = ids
            .iter()
            .enumerate()
            .map(|(pos, id)| (id.clone(), pos + 1))
            .collect();

        Self { to_index, ids }
    }

    pub fn index_of(&self, id: &K) -> Option<usize> {
        self.to_index.get(id).copied()
    }

    /// Inverse lookup; `None` for the padding index and anything past `len()`
    pub fn id_of(&self, index: usize) -> Option<&K> {
        index.checked_sub(1).and_then(|pos| self.ids.get(pos))
    }

    pub fn contains(&self, id: &K) -> bool {
        self.to_index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// `(index, id)` pairs in ascending index order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &K)> {
        self.ids.iter().enumerate().map(|(pos, id)| (pos + 1, id))
    }
}

/// User and movie mappers built from one interaction snapshot
#[derive(Debug, Clone)]
pub struct IdMappings {
    pub users: IdMapper<UserId>,
    pub movies: IdMapper<MovieId>,
}

impl IdMappings {
    /// # Errors
    ///
    /// `NoTrainableData` when `interactions` is empty.
    pub fn from_interactions(interactions: &[Interaction]) -> Result<Self> {
        if interactions.is_empty() {
            return Err(RecommenderError::NoTrainableData);
        }

        Ok(Self {
            users: IdMapper::from_ids(interactions.iter().map(|i| i.user_id)),
            movies: IdMapper::from_ids(interactions.iter().map(|i| i.movie_id)),
        })
    }

    pub fn num_users(&self) -> usize {
        self.users.len()
    }

    pub fn num_movies(&self) -> usize {
        self.movies.len()
    }
}
