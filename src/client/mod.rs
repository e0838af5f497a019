//! Client entry points: a single-session [`Driver`] and a [`Pool`] of drivers.

pub mod driver;
pub mod pool;

pub use driver::Driver;
pub use pool::{Pool, PoolStatus, PooledDriver};
