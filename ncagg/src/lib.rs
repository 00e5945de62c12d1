#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

pub mod config;
pub mod coord;
pub mod data;
pub mod dimcache;
pub mod error;
pub mod loader;
pub mod location;
pub mod member;
pub mod model;
pub mod netcdf_source;
pub mod overlay;
pub mod planner;
pub mod pool;
pub mod presentation;
pub mod scan;
pub mod tree;
pub mod varray;
pub mod vgrid;
pub mod xml;

pub use error::{AggError, AggResult};
