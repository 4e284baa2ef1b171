pub mod marketplace_item;
pub mod marketplace_transaction;
pub mod municipality;
pub mod user;
