//! Issue-list filters and their address-bar representation.

mod codec;
mod controller;
mod route;

pub use codec::{decode, encode, FilterState, WORKFLOW_STATUSES};
pub use controller::{AddressBar, FilterController};
pub use route::{is_issue_key, split_location, Route};
