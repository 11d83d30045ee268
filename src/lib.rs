pub mod amount;
pub mod catalog;
pub mod config;
pub mod csv;
pub mod engine;
pub mod ledger;
pub mod model;
pub mod pricing;
pub mod profile;
pub mod rank;
pub mod retry;

pub use amount::Amount;
pub use engine::{EngineError, PromoEngine};
pub use model::{Command, Promotion, Target, UserId, VoucherId};
