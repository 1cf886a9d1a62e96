pub mod engine;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod report;
pub mod store;

pub use engine::SegmentEngine;
pub use models::{
    CreatedSegment, HistoryEntry, HistoryOperation, NewSegment, SegmentAddition, UserSegments,
    YearMonth,
};
pub use report::ReportWriter;
pub use store::SegmentStore;
