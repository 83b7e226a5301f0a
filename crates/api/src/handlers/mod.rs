pub mod backup;
pub mod legacy;
pub mod migration;
pub mod records;
