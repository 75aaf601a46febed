pub mod outcome;
pub mod service;

pub use outcome::{JobOutcome, KindOutcome};
pub use service::IngestionService;
