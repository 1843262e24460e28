// Application layer: services that enforce the ledger rules on top of a
// Store, and the Ledger facade that clients talk to.

mod account_service;
mod config;
mod error;
mod ledger;
mod locks;
mod transaction_service;
mod user_service;

pub use account_service::*;
pub use config::*;
pub use error::*;
pub use ledger::*;
pub use locks::*;
pub use transaction_service::*;
pub use user_service::*;
