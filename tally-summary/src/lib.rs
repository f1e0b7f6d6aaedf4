pub mod config;
pub mod cutoff;
pub mod markup;
pub mod partition;
pub mod pipeline;
pub mod sql;
pub mod stage;
pub mod summarizer;
pub mod tables;
pub mod tags;
pub mod worker;

pub use summarizer::{Summarizer, SummaryReport};
