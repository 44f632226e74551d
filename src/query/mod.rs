pub mod commands;
pub mod formatters;
pub mod service;

pub use formatters::{OutputFormat, TransferRecord};
pub use service::{DEFAULT_LIMIT, QueryService, parse_address, parse_addresses, parse_pagination};
