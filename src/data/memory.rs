//! In-memory document store
//!
//! Holds the `users` and `health_records` collections and evaluates the two
//! queries the cache fronts: the users/health_records weight aggregation and the
//! per-user health record listing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::source::{DocumentSource, FetchError};
use super::{Record, ResultSet, Scalar};

/// Field on `users` that `health_records.user_id` refers to
const USER_ID_FIELD: &str = "_id";

/// Foreign key field on `health_records`
const OWNER_FIELD: &str = "user_id";

/// Field on `users` the aggregation groups by
const GROUP_FIELD: &str = "gender";

/// Field on `health_records` the aggregation averages
const WEIGHT_FIELD: &str = "weight";

/// Name of the averaged column in aggregation rows
const AVERAGE_FIELD: &str = "avgWeight";

/// The two collections the queries run against
///
/// This is also the on-disk fixture format read by [`super::JsonFileSource`]:
/// `{"users": [...], "health_records": [...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Collections {
    #[serde(default)]
    pub users: Vec<Record>,
    #[serde(default)]
    pub health_records: Vec<Record>,
}

/// Running sum for one aggregation group
struct GroupAccumulator {
    key: Scalar,
    sum: f64,
    count: u64,
}

impl Collections {
    /// Left-joins users to their health records, unwinds, and averages weight per gender
    ///
    /// A user with no health records contributes an empty row to its group, so the
    /// group still appears. Missing or non-numeric weights are skipped by the
    /// average; a group with nothing to average reports null. Groups are listed in
    /// the order their first member appears in `users`.
    pub fn average_weight_by_gender(&self) -> ResultSet {
        let mut groups: Vec<GroupAccumulator> = Vec::new();

        for user in &self.users {
            let key = field_or_null(user, GROUP_FIELD);
            let idx = match groups.iter().position(|g| g.key == key) {
                Some(idx) => idx,
                None => {
                    groups.push(GroupAccumulator {
                        key,
                        sum: 0.0,
                        count: 0,
                    });
                    groups.len() - 1
                }
            };

            let user_id = field_or_null(user, USER_ID_FIELD);
            for record in self.records_owned_by(&user_id) {
                if let Some(weight) = record.get(WEIGHT_FIELD).and_then(Scalar::as_f64) {
                    groups[idx].sum += weight;
                    groups[idx].count += 1;
                }
            }
        }

        groups
            .into_iter()
            .map(|g| {
                let average = (g.count > 0).then(|| g.sum / g.count as f64);
                Record::from([(GROUP_FIELD, g.key), (AVERAGE_FIELD, Scalar::from(average))])
            })
            .collect()
    }

    /// Returns the health records whose owner matches `user_id`
    ///
    /// Owner ids stored as numbers match their decimal string form.
    pub fn health_records_for_user(&self, user_id: &str) -> ResultSet {
        self.health_records
            .iter()
            .filter(|r| {
                r.get(OWNER_FIELD)
                    .is_some_and(|owner| !owner.is_null() && owner.to_string() == user_id)
            })
            .cloned()
            .collect()
    }

    fn records_owned_by<'a>(&'a self, user_id: &'a Scalar) -> impl Iterator<Item = &'a Record> {
        self.health_records
            .iter()
            .filter(move |r| field_or_null(r, OWNER_FIELD).matches(user_id))
    }
}

/// Missing fields join and group like explicit nulls
fn field_or_null(record: &Record, field: &str) -> Scalar {
    record.get(field).cloned().unwrap_or(Scalar::Null)
}

/// Document store backed by collections held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    collections: Collections,
}

impl MemoryDocumentStore {
    pub fn new(collections: Collections) -> Self {
        Self { collections }
    }

    pub fn collections(&self) -> &Collections {
        &self.collections
    }
}

#[async_trait]
impl DocumentSource for MemoryDocumentStore {
    async fn average_weight_by_gender(&self) -> Result<ResultSet, FetchError> {
        Ok(self.collections.average_weight_by_gender())
    }

    async fn health_records_for_user(&self, user_id: &str) -> Result<ResultSet, FetchError> {
        Ok(self.collections.health_records_for_user(user_id))
    }
}
