pub mod auditmodel;
pub mod dispatchmodel;
pub mod settlementmodel;
pub mod walletmodels;
