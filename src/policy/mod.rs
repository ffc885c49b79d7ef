//! Cache policy engine: route classification and serving strategies.

mod engine;
mod plan;
mod route;

pub use engine::{PolicyEngine, Served, ServedFrom};
pub use plan::{Fallback, Plan, Step};
pub use route::{Route, RouteTable};
