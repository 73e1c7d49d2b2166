pub mod audit;
pub mod debt_consolidator;
pub mod generator;
pub mod movements;
pub mod schedule;
pub mod templates;
