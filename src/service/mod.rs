pub mod audit_service;
pub mod background_jobs;
pub mod billing;
pub mod commission;
pub mod error;
pub mod freeze_window;
pub mod repair_service;
pub mod settlement_service;
pub mod settlement_writer;
pub mod unlock_sweeper;
pub mod wallet_ledger;

#[cfg(test)]
pub(crate) mod fixtures;
