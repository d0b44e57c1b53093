pub mod audit;
pub mod fee_generation;
pub mod fee_status;
pub mod financial_statement;
pub mod member_score;
pub mod payments;
pub mod periods;
pub mod scheduler;
