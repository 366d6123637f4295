pub mod document;
pub mod requirement;
