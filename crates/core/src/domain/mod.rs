pub mod approval;
pub mod execution;
pub mod operation;
pub mod rollback;
