//! Local tools bound to sub-agents: report editing and chart work.

mod charts;
mod editor;
mod locks;

pub use charts::{BringAndInsertChartTool, ChartToolset, GenerateChartTool, ReadDocumentLinesTool};
pub use editor::{ReplaceTextTool, WriteSummaryConclusionTool};
pub use locks::DraftLocks;
