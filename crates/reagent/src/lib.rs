pub mod agent;
pub mod errors;
pub mod executor;
pub mod meta_tools;
pub mod models;
pub mod plugins;
pub mod prompt_template;
pub mod providers;
pub mod registry;
pub mod settings;
pub mod summarizer;
pub mod token_counter;
