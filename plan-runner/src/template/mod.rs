mod context;
mod engine;
pub mod filters;

pub use context::{TemplateContext, TASK_ID};
pub use engine::TemplateEngine;
pub use filters::{is_truthy, stringify, FilterFn, FilterRegistry};
