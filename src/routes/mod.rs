pub mod health;
pub mod history;
pub mod search;
pub mod ws;
