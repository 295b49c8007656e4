#[macro_use]
extern crate log;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate lazy_static;

pub mod browser_controller;
pub mod capture;
pub mod pool;
pub mod prechecker;
pub mod rate_limiter;
pub mod retry;
pub mod runner;
pub mod snapshotter;
pub mod types;
pub mod utils;
