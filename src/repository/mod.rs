pub mod database;
pub mod models;
pub mod token_repository;
pub mod transfer_repository;

pub use database::Database;
pub use models::{Pagination, Transfer, TransfersFilter, WriteSummary};
pub use token_repository::TokenRepository;
pub use transfer_repository::TransferRepository;
