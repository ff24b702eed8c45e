pub mod db;
pub mod llm;
pub mod pipeline;
pub mod reddit;
pub mod schema;
pub mod settings;
pub mod similarity;
pub mod utils;
