pub mod actions;
pub mod config;
pub mod contract;
pub mod opts;

mod zkdvrf_contract;
