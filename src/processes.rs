use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::errors::Error;

/// A process definition loaded from the plugins directory.
///
/// Each definition is a JSON document describing the process metadata,
/// the container runtime it executes on, and its declared inputs/outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Process {
    pub info: ProcessInfo,
    pub runtime: Runtime,
    #[serde(default)]
    pub inputs: Vec<InputDef>,
    #[serde(default)]
    pub outputs: Vec<OutputDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "jobControlOptions")]
    pub job_control_options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runtime {
    pub image: String,
    #[serde(default = "default_tag")]
    pub tag: String,
    #[serde(default)]
    pub entrypoint: Option<String>,
    #[serde(rename = "envVars", default)]
    pub env_vars: HashMap<String, String>,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub provider: Option<Provider>,
    #[serde(default)]
    pub resources: Option<ResourceRequest>,
}

fn default_tag() -> String {
    "latest".to_string()
}

/// Cloud provider binding for asynchronous execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "jobDefinition")]
    pub job_definition: String,
    #[serde(rename = "jobQueue")]
    pub job_queue: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceRequest {
    #[serde(default)]
    pub cpus: f32,
    #[serde(default)]
    pub memory: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDef {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "minOccurs", default = "default_min_occurs")]
    pub min_occurs: u32,
}

fn default_min_occurs() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDef {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

/// Summary shape returned by `GET /processes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSummary {
    pub id: String,
    pub version: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "jobControlOptions")]
    pub job_control_options: Vec<String>,
}

impl Process {
    /// Full image reference, `image:tag`.
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.runtime.image, self.runtime.tag)
    }

    /// Check the submitted inputs against the declared input schema.
    ///
    /// Every input with `minOccurs >= 1` must be present.
    pub fn verify_inputs(&self, inputs: &Map<String, Value>) -> Result<(), Error> {
        for def in &self.inputs {
            if def.min_occurs > 0 && !inputs.contains_key(&def.id) {
                return Err(Error::Validation(format!(
                    "required input '{}' is missing",
                    def.id
                )));
            }
        }
        Ok(())
    }

    pub fn summary(&self) -> ProcessSummary {
        ProcessSummary {
            id: self.info.id.clone(),
            version: self.info.version.clone(),
            title: self.info.title.clone(),
            description: self.info.description.clone(),
            job_control_options: self.info.job_control_options.clone(),
        }
    }

    /// Process description for `GET /processes/{processID}`.
    ///
    /// The runtime block is an implementation detail and is not exposed.
    pub fn describe(&self) -> Value {
        json!({
            "id": self.info.id,
            "version": self.info.version,
            "title": self.info.title,
            "description": self.info.description,
            "jobControlOptions": self.info.job_control_options,
            "inputs": self.inputs,
            "outputs": self.outputs,
        })
    }
}

/// All process definitions known to the server.
///
/// Loaded once at startup; read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct ProcessList {
    processes: Vec<Process>,
}

impl ProcessList {
    pub fn new(processes: Vec<Process>) -> Self {
        Self { processes }
    }

    pub fn get(&self, process_id: &str) -> Option<&Process> {
        self.processes.iter().find(|p| p.info.id == process_id)
    }

    pub fn list(&self) -> Vec<ProcessSummary> {
        let mut summaries: Vec<ProcessSummary> =
            self.processes.iter().map(Process::summary).collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

/// Load process definitions from the plugins directory.
///
/// Accepts `<dir>/*.json` as well as `<dir>/<name>/process.json`.
/// Malformed documents are skipped with a warning; duplicate process ids
/// abort the load.
pub async fn load_processes(dir: &Path) -> Result<ProcessList, Error> {
    if !dir.is_dir() {
        return Err(Error::Storage(format!(
            "plugins directory not found: {}",
            dir.display()
        )));
    }

    let mut processes: Vec<Process> = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let candidate = if path.is_dir() {
            let nested = path.join("process.json");
            if !nested.is_file() {
                continue;
            }
            nested
        } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
            path
        } else {
            continue;
        };

        let content = tokio::fs::read_to_string(&candidate).await?;
        match serde_json::from_str::<Process>(&content) {
            Ok(process) => {
                if processes.iter().any(|p| p.info.id == process.info.id) {
                    return Err(Error::Validation(format!(
                        "duplicate process id '{}' in {}",
                        process.info.id,
                        candidate.display()
                    )));
                }
                tracing::info!("Loaded process '{}' from {}", process.info.id, candidate.display());
                processes.push(process);
            }
            Err(e) => {
                tracing::warn!("Skipping malformed process definition {:?}: {}", candidate, e);
            }
        }
    }

    Ok(ProcessList { processes })
}
