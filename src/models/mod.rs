pub mod chat;
pub mod criteria;
pub mod job;
