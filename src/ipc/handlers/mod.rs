pub mod academic;
pub mod backup;
pub mod core;
pub mod reconcile;
pub mod records;
pub mod setup;
