use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use serde::Deserialize;

use crate::models::native::find_file_upwards;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub prompts: PromptsSection,
    #[serde(default)]
    pub models: ModelsSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PipelineSection {
    /// Maximum refinement iterations (translate -> back-translate -> score).
    #[serde(default)]
    pub max_iterations: Option<usize>,
    /// Round-trip similarity at which refinement stops early.
    #[serde(default)]
    pub similarity_threshold: Option<f32>,
    /// Minimum QA confidence for a verdict without a reference answer.
    #[serde(default)]
    pub confidence_threshold: Option<f32>,
    /// Minimum answer F1 for a verdict against a reference answer.
    #[serde(default)]
    pub answer_f1_threshold: Option<f32>,

    #[serde(default)]
    pub translate_backend: Option<String>,
    #[serde(default)]
    pub qa_backend: Option<String>,

    #[serde(default)]
    pub threads: Option<i32>,
    #[serde(default)]
    pub gpu_layers: Option<i32>,

    #[serde(default)]
    pub trace_dir: Option<String>,
    #[serde(default)]
    pub trace_prompts: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PromptsSection {
    #[serde(default)]
    pub translate_forward: Option<String>,
    #[serde(default)]
    pub translate_backward: Option<String>,
    #[serde(default)]
    pub translate_repair: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub json_repair: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ModelsSection {
    #[serde(default)]
    pub backends: HashMap<String, ModelBackend>,

    /// Preferred directory for backend paths that are relative.
    /// Can be absolute (recommended) or relative to the config file directory.
    #[serde(default)]
    pub model_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ModelBackend {
    pub path: PathBuf,
    #[serde(default)]
    pub template_hint: Option<String>,
    #[serde(default)]
    pub ctx_size: Option<u32>,
    #[serde(default)]
    pub threads: Option<i32>,
    #[serde(default)]
    pub gpu_layers: Option<i32>,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub ubatch_size: Option<u32>,
    #[serde(default)]
    pub offload_kqv: Option<bool>,
}

#[derive(Clone, Debug)]
pub struct ResolvedBackend {
    pub name: String,
    pub model_path: PathBuf,
    pub template_hint: Option<String>,
    pub ctx_size: u32,
    pub threads: Option<i32>,
    pub gpu_layers: Option<i32>,
    pub batch_size: Option<u32>,
    pub ubatch_size: Option<u32>,
    pub offload_kqv: Option<bool>,
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}

pub fn resolve_backend(
    cfg: &AppConfig,
    config_path: &Path,
    name: &str,
    default_ctx: u32,
) -> anyhow::Result<ResolvedBackend> {
    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));

    let mut search_dirs: Vec<PathBuf> = Vec::new();
    if let Some(md) = cfg.models.model_dir.as_ref() {
        let mut p = md.clone();
        if p.is_relative() {
            p = config_dir.join(&p);
        }
        search_dirs.push(p);
    }
    if let Ok(cwd) = std::env::current_dir() {
        search_dirs.push(cwd);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            search_dirs.push(dir.to_path_buf());
        }
    }
    search_dirs.push(config_dir.to_path_buf());

    let mut seen: std::collections::HashSet<PathBuf> = std::collections::HashSet::new();
    search_dirs.retain(|d| d.is_dir() && seen.insert(d.clone()));

    let backend = cfg
        .models
        .backends
        .get(name)
        .ok_or_else(|| anyhow!("backend not configured: {name} (config={})", config_path.display()))?;

    let mut path = backend.path.clone();
    if path.is_relative() {
        let mut resolved: Option<PathBuf> = None;
        for dir in &search_dirs {
            let cand = dir.join(&path);
            if cand.exists() {
                resolved = Some(cand);
                break;
            }
        }
        path = resolved.ok_or_else(|| {
            anyhow!(
                "backend {} model not found: {} (searched: {}) (config={})",
                name,
                backend.path.display(),
                search_dirs
                    .iter()
                    .map(|d| d.display().to_string())
                    .collect::<Vec<_>>()
                    .join("; "),
                config_path.display()
            )
        })?;
    } else if !path.exists() {
        return Err(anyhow!(
            "backend {} model not found: {} (config={})",
            name,
            path.display(),
            config_path.display()
        ));
    }

    Ok(ResolvedBackend {
        name: name.to_string(),
        model_path: path,
        template_hint: backend
            .template_hint
            .as_deref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        ctx_size: backend.ctx_size.unwrap_or(default_ctx),
        threads: backend.threads,
        gpu_layers: backend.gpu_layers,
        batch_size: backend.batch_size,
        ubatch_size: backend.ubatch_size,
        offload_kqv: backend.offload_kqv,
    })
}

#[cfg(test)]
mod tests {
    use super::AppConfig;

    #[test]
    fn empty_config_parses_with_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("parse empty toml");
        assert!(cfg.pipeline.max_iterations.is_none());
        assert!(cfg.models.backends.is_empty());
    }

    #[test]
    fn pipeline_and_backend_sections_parse() {
        let text = r#"
[pipeline]
max_iterations = 5
similarity_threshold = 0.9
translate_backend = "translategemma_4b"
qa_backend = "gemma3_4b"

[models.backends.translategemma_4b]
path = "translategemma-4b-it.Q5_K_S.gguf"
ctx_size = 8192
"#;
        let cfg: AppConfig = toml::from_str(text).expect("parse toml");
        assert_eq!(cfg.pipeline.max_iterations, Some(5));
        assert_eq!(cfg.pipeline.translate_backend.as_deref(), Some("translategemma_4b"));
        let backend = cfg.models.backends.get("translategemma_4b").expect("backend");
        assert_eq!(backend.ctx_size, Some(8192));
    }
}
