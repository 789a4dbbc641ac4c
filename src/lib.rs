pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod interactive;
pub mod jobs;
pub mod llm;
pub mod pipeline;
pub mod progress;
pub mod script;
pub mod server;
pub mod text;
pub mod tts;

pub use config::Config;
pub use error::{Result, ScriptcastError};
pub use pipeline::{
    print_summary, run_pipeline, PipelineRequest, PipelineResult, PipelineStats, Services,
};
