pub mod aggregator_service;
pub mod extractor_service;
pub mod history_service;
pub mod refresh_service;
pub mod scoring_service;
pub mod search_service;
pub mod session_service;
pub mod source_service;
