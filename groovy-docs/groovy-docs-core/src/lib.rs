pub mod access;
pub mod auth;
pub mod dashboard;
pub mod error;
pub mod events;
pub mod links;
pub mod model;
pub mod storage;

pub use access::{AccessContext, AccessResolver, Action, OrgRole, Role};
pub use error::{HubError, Result};
pub use storage::Store;
