//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path, headers, query)
//!     → router.rs (capture table snapshot)
//!     → table.rs (routes by priority, then registration order)
//!     → weight.rs (draw one member per weight group)
//!     → matcher.rs / path.rs (evaluate predicates, capture variables)
//!     → Return: matched Route or NoRouteMatched
//!
//! Route Compilation (at startup and on reload):
//!     RouteConfig[]
//!     → config::compile (predicates, filters, policies)
//!     → RouteTable::reload (atomic snapshot swap)
//! ```
//!
//! # Design Decisions
//! - Routes are immutable; the table swaps whole snapshots
//! - Deterministic: same input and weight draw always match the same route
//! - First match wins (ordered by priority)

pub mod matcher;
pub mod path;
pub mod route;
pub mod router;
pub mod table;
pub mod weight;

pub use matcher::{
    AndMatcher, HeaderMatcher, HostMatcher, Matcher, MethodMatcher, NotMatcher, OrMatcher, PathMatcher, QueryMatcher,
};
pub use path::PathPattern;
pub use route::{Route, RouteBuilder};
pub use router::{GatewayRouter, GatewayRouterBuilder, InboundContext};
pub use table::{RouteSnapshot, RouteTable};
pub use weight::{RouteWeight, WeightSelection};
