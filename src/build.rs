pub mod cache;
pub mod document;
pub mod index;
pub mod manager;
pub mod pipeline;
pub mod runner;
