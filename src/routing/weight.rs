//! Weighted route groups.
//!
//! Routes that share a group name split traffic by weight. One member of each
//! group is drawn per request before any predicate runs; the other members
//! of that group sit out the request, while routes outside every group are
//! unaffected.

use std::collections::{BTreeMap, HashMap};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::routing::route::Route;

/// Membership of a route in a weight group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteWeight {
    pub group: String,
    pub weight: u32,
}

/// Members of every weight group, in registration order.
#[derive(Debug, Clone, Default)]
pub struct WeightGroups {
    groups: BTreeMap<String, Vec<(String, u32)>>,
}

impl WeightGroups {
    pub fn insert(&mut self, route_id: &str, weight: &RouteWeight) {
        self.groups
            .entry(weight.group.clone())
            .or_default()
            .push((route_id.to_string(), weight.weight));
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Draw one member per group. A group whose weights sum to zero has no
    /// member chosen, so none of its routes can match.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> WeightSelection {
        let mut chosen = HashMap::with_capacity(self.groups.len());
        for (group, members) in &self.groups {
            let total: u64 = members.iter().map(|(_, w)| u64::from(*w)).sum();
            if total == 0 {
                continue;
            }
            let mut point = rng.gen_range(0..total);
            for (route_id, weight) in members {
                let weight = u64::from(*weight);
                if point < weight {
                    chosen.insert(group.clone(), route_id.clone());
                    break;
                }
                point -= weight;
            }
        }
        WeightSelection(chosen)
    }
}

/// The member drawn for each weight group, for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightSelection(HashMap<String, String>);

impl WeightSelection {
    /// Pin `group` to `route_id`.
    pub fn with(mut self, group: impl Into<String>, route_id: impl Into<String>) -> Self {
        self.0.insert(group.into(), route_id.into());
        self
    }

    pub fn chosen(&self, group: &str) -> Option<&str> {
        self.0.get(group).map(String::as_str)
    }

    /// Whether `route` takes part in matching under this selection.
    pub fn admits(&self, route: &Route) -> bool {
        match route.weight() {
            None => true,
            Some(weight) => self.chosen(&weight.group) == Some(route.id()),
        }
    }
}
