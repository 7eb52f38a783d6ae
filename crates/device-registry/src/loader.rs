use crate::types::{CommandDefinition, PayloadTypeDefinition};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Persistence collaborator that yields the active dictionaries, in storage order.
pub trait DictionarySource: Send + Sync {
    fn load_commands(&self) -> anyhow::Result<Vec<CommandDefinition>>;

    fn load_payload_types(&self) -> anyhow::Result<Vec<PayloadTypeDefinition>>;

    /// Both collections from one consistent read. Sources backed by a single document
    /// should override this so a refresh never mixes two versions.
    fn load_all(&self) -> anyhow::Result<DictionaryFile> {
        Ok(DictionaryFile {
            commands: self.load_commands().context("loading commands")?,
            payload_types: self.load_payload_types().context("loading payload types")?,
        })
    }
}

/// On-disk dictionary layout (YAML or JSON).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DictionaryFile {
    #[serde(default)]
    pub commands: Vec<CommandDefinition>,
    #[serde(default, alias = "payloadTypes")]
    pub payload_types: Vec<PayloadTypeDefinition>,
}

pub fn parse_dictionary(raw: &str, origin: &str) -> anyhow::Result<DictionaryFile> {
    let val: Value = serde_yaml::from_str(raw).with_context(|| format!("parsing yaml: {origin}"))?;
    let dict: DictionaryFile = serde_yaml::from_value(val)
        .with_context(|| format!("decoding dictionary: {origin}"))?;
    Ok(dict)
}

pub fn load_dictionary_file(path: impl AsRef<Path>) -> anyhow::Result<DictionaryFile> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading dictionary: {}", path.display()))?;
    parse_dictionary(&raw, &path.display().to_string())
}

/// Reads the dictionary file on every load, so edits on disk are picked up by the next
/// refresh. A refresh parses the file once.
#[derive(Debug, Clone)]
pub struct FileDictionarySource {
    path: PathBuf,
}

impl FileDictionarySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DictionarySource for FileDictionarySource {
    fn load_commands(&self) -> anyhow::Result<Vec<CommandDefinition>> {
        Ok(load_dictionary_file(&self.path)?.commands)
    }

    fn load_payload_types(&self) -> anyhow::Result<Vec<PayloadTypeDefinition>> {
        Ok(load_dictionary_file(&self.path)?.payload_types)
    }

    fn load_all(&self) -> anyhow::Result<DictionaryFile> {
        load_dictionary_file(&self.path)
    }
}
