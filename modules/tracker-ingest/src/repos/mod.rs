pub mod dlq_repo;
pub mod mirror_repo;
