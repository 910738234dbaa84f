pub mod core;
pub mod groups;
pub mod instances;
pub mod progress;
pub mod results;
pub mod templates;
