//! Reduces collected items into trend, question and engagement output.

pub mod questions;
pub mod report;
pub mod text;
pub mod trends;

pub use questions::{QuestionExtraction, QuestionExtractor};
pub use report::ReportAssembler;
pub use text::Tokenizer;
pub use trends::TrendAnalyzer;
