pub mod analyze;
pub mod completions;
pub mod discover;
pub mod match_cmd;
