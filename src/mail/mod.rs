pub mod graph;
pub mod service;
