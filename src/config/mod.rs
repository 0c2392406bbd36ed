pub mod config;
pub mod lexicon;
