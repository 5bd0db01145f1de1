pub mod stages;

pub use stages::build_stage_prompt;
