pub mod batch;
pub mod context;
pub mod engine;
pub mod heuristic;
pub mod selector;
pub mod semantic;
pub mod temporal;
pub mod tokenization;
