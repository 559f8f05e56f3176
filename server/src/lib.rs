pub mod dispatch;
pub mod ledger;
pub mod settings;
pub mod snapshot;
