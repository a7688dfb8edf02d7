//! Route table with atomic snapshot swap.
//!
//! # Responsibilities
//! - Store routes ordered by (priority, registration sequence)
//! - Reject duplicate route ids
//! - Publish new snapshots atomically on add and reload
//!
//! # Design Decisions
//! - Readers load an `Arc<RouteSnapshot>` once per request and never observe
//!   a partially updated table
//! - Writers build a fresh snapshot and swap it in; in-flight requests keep
//!   the snapshot they captured
//! - Lower priority value wins; ties go to the earliest registered route
//! - Weight groups are drawn once per lookup; a route in a group only
//!   competes when it was the member drawn

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use rand::Rng;

use crate::error::{GatewayError, GatewayResult};
use crate::http::request::RequestDescriptor;
use crate::routing::route::Route;
use crate::routing::weight::{WeightGroups, WeightSelection};

/// Immutable, versioned view of the route table.
#[derive(Debug, Default)]
pub struct RouteSnapshot {
    version: u64,
    /// Sorted by (priority, registration sequence).
    routes: Vec<(u64, Arc<Route>)>,
    next_seq: u64,
    weights: WeightGroups,
}

impl RouteSnapshot {
    fn from_routes(version: u64, routes: Vec<Arc<Route>>) -> GatewayResult<Self> {
        let mut seen = HashSet::new();
        for route in &routes {
            if !seen.insert(route.id().to_string()) {
                return Err(GatewayError::DuplicateRoute(route.id().to_string()));
            }
        }

        let mut weights = WeightGroups::default();
        for route in &routes {
            if let Some(weight) = route.weight() {
                weights.insert(route.id(), weight);
            }
        }

        let next_seq = routes.len() as u64;
        let mut routes: Vec<(u64, Arc<Route>)> = routes
            .into_iter()
            .enumerate()
            .map(|(seq, r)| (seq as u64, r))
            .collect();
        routes.sort_by_key(|(seq, r)| (r.priority(), *seq));

        Ok(Self {
            version,
            routes,
            next_seq,
            weights,
        })
    }

    fn with_route(&self, route: Arc<Route>) -> GatewayResult<Self> {
        if self.routes.iter().any(|(_, r)| r.id() == route.id()) {
            return Err(GatewayError::DuplicateRoute(route.id().to_string()));
        }
        let mut weights = self.weights.clone();
        if let Some(weight) = route.weight() {
            weights.insert(route.id(), weight);
        }
        let mut routes = self.routes.clone();
        let key = (route.priority(), self.next_seq);
        let pos = routes.partition_point(|(seq, r)| (r.priority(), *seq) < key);
        routes.insert(pos, (self.next_seq, route));

        Ok(Self {
            version: self.version + 1,
            routes,
            next_seq: self.next_seq + 1,
            weights,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Routes in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Route>> {
        self.routes.iter().map(|(_, r)| r)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Route>> {
        self.iter().find(|r| r.id() == id)
    }

    /// First route whose predicates all match, in evaluation order, with
    /// weight groups drawn from the thread-local RNG.
    pub fn lookup(&self, req: &RequestDescriptor) -> Option<&Arc<Route>> {
        if self.weights.is_empty() {
            return self.iter().find(|r| r.matches(req));
        }
        let selection = self.choose_weights(&mut rand::thread_rng());
        self.lookup_with(req, &selection)
    }

    /// Draw one member per weight group.
    pub fn choose_weights<R: Rng + ?Sized>(&self, rng: &mut R) -> WeightSelection {
        self.weights.choose(rng)
    }

    /// First admitted route whose predicates all match.
    pub fn lookup_with(&self, req: &RequestDescriptor, selection: &WeightSelection) -> Option<&Arc<Route>> {
        self.iter().find(|r| selection.admits(r) && r.matches(req))
    }
}

/// The live route table.
#[derive(Debug)]
pub struct RouteTable {
    current: ArcSwap<RouteSnapshot>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RouteSnapshot::default()),
        }
    }

    /// Build a table from an initial set of routes.
    pub fn with_routes(routes: Vec<Route>) -> GatewayResult<Self> {
        let snapshot = RouteSnapshot::from_routes(1, routes.into_iter().map(Arc::new).collect())?;
        Ok(Self {
            current: ArcSwap::from_pointee(snapshot),
        })
    }

    /// Register one more route. Fails on a duplicate id.
    pub fn add_route(&self, route: Route) -> GatewayResult<()> {
        let route = Arc::new(route);
        let mut result = Ok(());
        self.current.rcu(|current| match current.with_route(route.clone()) {
            Ok(next) => {
                result = Ok(());
                Arc::new(next)
            }
            Err(e) => {
                result = Err(e);
                current.clone()
            }
        });
        if result.is_ok() {
            tracing::info!(route_id = %route.id(), priority = route.priority(), "Route added");
        }
        result
    }

    /// Routes in evaluation order, from the current snapshot.
    pub fn routes(&self) -> Vec<Arc<Route>> {
        self.current.load().iter().cloned().collect()
    }

    /// Capture the current snapshot.
    pub fn snapshot(&self) -> Arc<RouteSnapshot> {
        self.current.load_full()
    }

    /// Replace every route at once. Returns the new snapshot version.
    pub fn reload(&self, routes: Vec<Route>) -> GatewayResult<u64> {
        let routes: Vec<Arc<Route>> = routes.into_iter().map(Arc::new).collect();
        let mut result = Ok(0);
        self.current.rcu(|current| match RouteSnapshot::from_routes(current.version + 1, routes.clone()) {
            Ok(next) => {
                result = Ok(next.version);
                Arc::new(next)
            }
            Err(e) => {
                result = Err(e);
                current.clone()
            }
        });
        if let Ok(version) = result {
            tracing::info!(version, routes = routes.len(), "Route table reloaded");
        }
        result
    }
}
