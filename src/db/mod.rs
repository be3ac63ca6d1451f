pub mod auditdb;
pub mod db;
pub mod dispatchdb;
pub mod memory;
pub mod settlementdb;
pub mod walletdb;

pub use auditdb::AuditExt;
pub use db::{DBClient, LedgerStore, StoreTx};
pub use dispatchdb::DispatchExt;
pub use settlementdb::SettlementExt;
pub use walletdb::WalletExt;
