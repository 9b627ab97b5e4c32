mod result_set;
mod row;

pub use result_set::{ExecSummary, ResultSet};
pub use row::DbRow;
