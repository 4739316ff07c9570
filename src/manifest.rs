//! Run manifests.
//!
//! Every emitted artifact gets a sibling manifest tying it to the run that
//! produced it: tool version, run id and phase, the effective configuration,
//! and a SHA-256 over the artifact bytes so replays can be verified.

use crate::error::Error;
use chrono::{SecondsFormat, Utc};
use data_encoding::HEXLOWER;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Manifest format version.
const MANIFEST_VERSION: u32 = 1;

/// Identity of the producing tool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolInfo {
    /// Tool name.
    pub name: String,
    /// Crate version.
    pub version: String,
}

/// Identity of one run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunInfo {
    /// Random run identifier.
    pub id: String,
    /// RFC 3339 start timestamp.
    pub timestamp: String,
    /// Pipeline phase (`infer`, `generate`, `validate`, `mutate`).
    pub phase: String,
}

/// One content-addressed artifact reference.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Path as written.
    pub path: String,
    /// Hex SHA-256 over the file bytes.
    pub sha256: String,
    /// File size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// The manifest written beside every output file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunManifest {
    /// Manifest format version.
    pub version: u32,
    /// Producing tool.
    pub tool: ToolInfo,
    /// Run identity.
    pub run: RunInfo,
    /// Effective configuration of the run.
    pub config: serde_json::Value,
    /// Artifacts produced by the run.
    pub artifacts: Vec<ArtifactRef>,
    /// Run metrics, when the phase produces any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<serde_json::Value>,
}

impl RunManifest {
    /// Starts a manifest for `phase` with the run's effective config.
    pub fn new(phase: &str, config: serde_json::Value) -> Self {
        let mut id = [0u8; 8];
        rand::rngs::OsRng.fill_bytes(&mut id);
        RunManifest {
            version: MANIFEST_VERSION,
            tool: ToolInfo {
                name: env!("CARGO_PKG_NAME").to_owned(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
            },
            run: RunInfo {
                id: HEXLOWER.encode(&id),
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                phase: phase.to_owned(),
            },
            config,
            artifacts: Vec::new(),
            metrics: None,
        }
    }

    /// Hashes an emitted file and records it.
    pub fn add_artifact(&mut self, path: &Path) -> Result<(), Error> {
        let bytes = fs::read(path).map_err(|source| Error::Io {
            action: "hash artifact",
            path: path.to_owned(),
            source,
        })?;
        self.artifacts.push(ArtifactRef {
            path: path.display().to_string(),
            sha256: HEXLOWER.encode(&Sha256::digest(&bytes)),
            size: Some(bytes.len() as u64),
        });
        Ok(())
    }

    /// Attaches serialized run metrics.
    pub fn set_metrics<M: Serialize>(&mut self, metrics: &M) -> Result<(), Error> {
        self.metrics = Some(serde_json::to_value(metrics).map_err(|source| Error::Artifact {
            what: "run metrics",
            source,
        })?);
        Ok(())
    }

    /// Writes the manifest beside `artifact` as `<artifact>.manifest.json`.
    pub fn write_beside(&self, artifact: &Path) -> Result<PathBuf, Error> {
        let mut name = artifact.file_name().unwrap_or_default().to_os_string();
        name.push(".manifest.json");
        let path = artifact.with_file_name(name);
        let rendered =
            serde_json::to_string_pretty(self).map_err(|source| Error::Artifact {
                what: "run manifest",
                source,
            })?;
        fs::write(&path, rendered.as_bytes()).map_err(|source| Error::Io {
            action: "write manifest",
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn manifest_hashes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("out.ndjson");
        fs::write(&artifact, b"{\"a\":1}\n").unwrap();

        let mut manifest = RunManifest::new("generate", json!({"count": 1}));
        manifest.add_artifact(&artifact).unwrap();
        let written = manifest.write_beside(&artifact).unwrap();
        assert_eq!(written.file_name().unwrap(), "out.ndjson.manifest.json");

        let back: RunManifest =
            serde_json::from_slice(&fs::read(&written).unwrap()).unwrap();
        assert_eq!(back.version, MANIFEST_VERSION);
        assert_eq!(back.run.phase, "generate");
        assert_eq!(back.artifacts.len(), 1);
        assert_eq!(back.artifacts[0].size, Some(8));
        // SHA-256 of the exact bytes written above.
        assert_eq!(back.artifacts[0].sha256.len(), 64);
    }

    #[test]
    fn identical_content_hashes_identically() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.json");
        fs::write(&a, b"same bytes").unwrap();
        fs::write(&b, b"same bytes").unwrap();

        let mut manifest = RunManifest::new("generate", json!({}));
        manifest.add_artifact(&a).unwrap();
        manifest.add_artifact(&b).unwrap();
        assert_eq!(manifest.artifacts[0].sha256, manifest.artifacts[1].sha256);
    }
}
