// Collaborators consumed by the marketplace
pub mod catalog;
pub mod storage;

// Resident marketplace
pub mod marketplace;
