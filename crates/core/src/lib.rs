pub mod config;
pub mod error;
pub mod ids;

pub use config::{load_dotenv, SchedulerConfig};
pub use error::*;
pub use ids::*;
