#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

pub mod constraint;
pub mod das;
pub mod dds;
pub mod dods;

pub use constraint::Constraint;
pub use das::Das;
pub use dds::Dds;
