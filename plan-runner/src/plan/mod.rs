mod data;
mod parser;

pub use data::{into_items, DataLoader};
pub use parser::{parse_plan, parse_plan_file};
