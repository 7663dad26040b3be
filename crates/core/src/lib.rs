pub mod config;
pub mod entity;
pub mod error;
pub mod table_config;
pub mod value;

pub use config::Config;
pub use entity::*;
pub use error::*;
pub use table_config::*;
pub use value::{Value, ValueType};
