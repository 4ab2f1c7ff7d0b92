pub mod envelope;
pub mod search_dto;
