use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::{find_default_config, load_config, resolve_backend, AppConfig, ResolvedBackend};

use super::prompts::{default_prompt_files, PromptSet, DEFAULT_PROMPTS_DIR};
use super::refine::RefineOptions;
use super::verify::VerifyPolicy;

pub const CONFIG_FILENAME: &str = "roundtrip-qa.toml";
pub const CONFIG_ENV_VAR: &str = "ROUNDTRIP_QA_CONFIG";

const DEFAULT_TRANSLATE_BACKEND: &str = "translategemma_4b";
const DEFAULT_QA_BACKEND: &str = "gemma3_4b";

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub workdir: PathBuf,
    pub config_path: PathBuf,

    pub max_iterations: usize,
    pub similarity_threshold: f32,
    pub confidence_threshold: f32,
    pub answer_f1_threshold: f32,

    pub translate_backend: ResolvedBackend,
    pub qa_backend: ResolvedBackend,

    pub threads: i32,
    pub gpu_layers: i32,

    pub trace_dir: PathBuf,
    pub trace_prompts: bool,

    pub prompts: PromptSet,
}

impl PipelineConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn from_paths_and_args(
        workdir: &Path,
        config_path: Option<PathBuf>,
        translate_backend: Option<String>,
        qa_backend: Option<String>,
        translate_model: Option<PathBuf>,
        qa_model: Option<PathBuf>,
        max_iterations: Option<usize>,
        similarity_threshold: Option<f32>,
        threads: Option<i32>,
        gpu_layers: Option<i32>,
        ctx_translate: Option<u32>,
        ctx_qa: Option<u32>,
    ) -> anyhow::Result<Self> {
        let workdir = workdir.canonicalize().unwrap_or_else(|_| workdir.to_path_buf());

        let cfg_file = config_path
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from))
            .or_else(|| find_default_config(&workdir, CONFIG_FILENAME));

        let mut file_cfg = AppConfig::default();
        let mut have_file = false;
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
                have_file = true;
            }
        }
        let cfg_path = cfg_file.unwrap_or_else(|| workdir.join(CONFIG_FILENAME));

        let max_iterations = max_iterations
            .or(file_cfg.pipeline.max_iterations)
            .unwrap_or(3)
            .max(1);
        let similarity_threshold = similarity_threshold
            .or(file_cfg.pipeline.similarity_threshold)
            .unwrap_or(0.85)
            .clamp(0.0, 1.0);
        let confidence_threshold = file_cfg
            .pipeline
            .confidence_threshold
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);
        let answer_f1_threshold = file_cfg
            .pipeline
            .answer_f1_threshold
            .unwrap_or(0.8)
            .clamp(0.0, 1.0);

        let translate_backend_name = translate_backend
            .or_else(|| file_cfg.pipeline.translate_backend.clone())
            .unwrap_or_else(|| DEFAULT_TRANSLATE_BACKEND.to_string());
        let qa_backend_name = qa_backend
            .or_else(|| file_cfg.pipeline.qa_backend.clone())
            .unwrap_or_else(|| DEFAULT_QA_BACKEND.to_string());

        let threads = threads.or(file_cfg.pipeline.threads).unwrap_or(-1);
        let gpu_layers = gpu_layers.or(file_cfg.pipeline.gpu_layers).unwrap_or(-1);

        let trace_dir = file_cfg
            .pipeline
            .trace_dir
            .clone()
            .unwrap_or_else(|| "_trace".to_string());
        let trace_dir = if Path::new(&trace_dir).is_absolute() {
            PathBuf::from(trace_dir)
        } else {
            workdir.join(trace_dir)
        };
        let trace_prompts = file_cfg.pipeline.trace_prompts.unwrap_or(true);

        let resolve_with_override =
            |name: &str, override_path: Option<PathBuf>, ctx_override: Option<u32>, default_ctx| {
                let mut backend = match override_path {
                    Some(p) => ResolvedBackend {
                        name: name.to_string(),
                        model_path: p,
                        template_hint: None,
                        ctx_size: default_ctx,
                        threads: None,
                        gpu_layers: None,
                        batch_size: None,
                        ubatch_size: None,
                        offload_kqv: None,
                    },
                    None => resolve_backend(&file_cfg, &cfg_path, name, default_ctx)?,
                };
                if let Some(ctx) = ctx_override {
                    backend.ctx_size = ctx;
                }
                Ok::<ResolvedBackend, anyhow::Error>(backend)
            };

        let translate_backend =
            resolve_with_override(&translate_backend_name, translate_model, ctx_translate, 8192)?;
        let qa_backend = resolve_with_override(&qa_backend_name, qa_model, ctx_qa, 8192)?;

        let prompts = if have_file {
            PromptSet::load(&cfg_path, &file_cfg).context("load prompts")?
        } else {
            PromptSet::builtin()
        };

        Ok(Self {
            workdir,
            config_path: cfg_path,
            max_iterations,
            similarity_threshold,
            confidence_threshold,
            answer_f1_threshold,
            translate_backend,
            qa_backend,
            threads,
            gpu_layers,
            trace_dir,
            trace_prompts,
            prompts,
        })
    }

    #[must_use]
    pub fn refine_options(&self) -> RefineOptions {
        RefineOptions {
            max_iterations: self.max_iterations,
            similarity_threshold: self.similarity_threshold,
        }
    }

    #[must_use]
    pub fn verify_policy(&self) -> VerifyPolicy {
        VerifyPolicy {
            confidence_threshold: self.confidence_threshold,
            answer_f1_threshold: self.answer_f1_threshold,
        }
    }
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILENAME);

    let prompts_dir = dir.join(DEFAULT_PROMPTS_DIR);
    std::fs::create_dir_all(&prompts_dir)
        .with_context(|| format!("create prompts dir: {}", prompts_dir.display()))?;

    for (fname, body) in default_prompt_files() {
        let p = prompts_dir.join(fname);
        if p.exists() && !force {
            continue;
        }
        std::fs::write(&p, body).with_context(|| format!("write prompt: {}", p.display()))?;
    }

    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }

    let cfg_text = r#"[pipeline]
max_iterations = 3
similarity_threshold = 0.85
confidence_threshold = 0.5
answer_f1_threshold = 0.8

translate_backend = "translategemma_4b"
qa_backend = "gemma3_4b"

threads = -1
gpu_layers = -1

trace_dir = "_trace"
trace_prompts = true

[prompts]
translate_forward = "prompts/translate_forward.txt"
translate_backward = "prompts/translate_backward.txt"
translate_repair = "prompts/translate_repair.txt"
answer = "prompts/answer.json.txt"
json_repair = "prompts/json_repair.txt"

[models]
model_dir = "."

[models.backends.translategemma_4b]
path = "translategemma-4b-it.i1-Q5_K_S.gguf"
template_hint = "gemma"
ctx_size = 8192
gpu_layers = -1
batch_size = 512
ubatch_size = 512
offload_kqv = true

[models.backends.gemma3_4b]
path = "gemma-3-4b-it.Q6_K.gguf"
template_hint = "gemma"
ctx_size = 8192
gpu_layers = -1
batch_size = 512
ubatch_size = 512
offload_kqv = true
"#;

    std::fs::write(&cfg_path, cfg_text)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}
