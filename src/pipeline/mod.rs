mod backends;
mod config;
mod prompts;
mod refine;
mod runner;
mod trace;
mod verify;

pub use backends::{LocalAnswerer, LocalTranslator};
pub use config::{init_default_config, PipelineConfig, CONFIG_ENV_VAR, CONFIG_FILENAME};
pub use prompts::PromptSet;
pub use refine::{best_attempt, refine_translation, RefineOptions, RefineOutcome};
pub use runner::{LocalPipeline, TranslationQaPipeline};
pub use trace::TraceWriter;
pub use verify::{verify_answer, Verification, VerifyPolicy};
