//! Query execution and result handling.
//!
//! The query module is organized into:
//! - `options` - per-call attributes and cancel hooks
//! - `results` - result set completion and row access
//! - `prepared` - prepared statement handling for parameterized queries
//!
//! # Example
//!
//! ```no_run
//! # use exadriver::{Driver, DriverConfig};
//! # async fn example(config: DriverConfig) -> Result<(), Box<dyn std::error::Error>> {
//! let driver = Driver::new(config);
//! driver.connect().await?;
//!
//! let result = driver.query("SELECT * FROM users WHERE age > 18").await?;
//! for row in result.row_maps() {
//!     println!("{:?}", row);
//! }
//! # Ok(())
//! # }
//! ```

pub mod options;
pub mod prepared;
pub mod results;

pub use options::{CancelHook, QueryOptions};
pub use prepared::{Parameter, Statement};
pub use results::{fetch_remaining, FetchLimits, QueryResult};
