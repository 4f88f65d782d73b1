//! Directory-backed provider.
//!
//! Content keys are `/`-separated paths relative to the root and load as the
//! file's bytes (`Vec<u8>`). A label is a sub-directory: it resolves to the
//! files directly inside it. Scene keys name TOML manifests under
//! `scenes/<key>.toml`.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use depot_abstraction::{
    Payload, ProgressSink, ProviderError, ResourceLocation, ResourceProvider, SceneLoadMode,
    SceneProvider, TypeTag,
};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tracing::debug;

const READ_CHUNK: usize = 16 * 1024;
const SCENE_DIR: &str = "scenes";

/// A scene manifest: a display name and the content keys the scene uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneManifest {
    pub name: String,
    #[serde(default)]
    pub contents: Vec<String>,
}

/// Serves content and scenes from files under one root directory.
#[derive(Debug, Clone)]
pub struct FsProvider {
    root: PathBuf,
}

impl FsProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Maps a key to a path under the root, refusing anything that would
    /// leave it.
    fn resolve(&self, key: &str) -> Result<PathBuf, ProviderError> {
        let relative = Path::new(key);
        if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(ProviderError::LoadFailed {
                key: key.to_string(),
                message: "key must be a relative path inside the root".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

fn io_error(key: &str, err: &std::io::Error) -> ProviderError {
    if err.kind() == ErrorKind::NotFound {
        ProviderError::NotFound {
            key: key.to_string(),
        }
    } else {
        ProviderError::LoadFailed {
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}

fn unsupported(key: &str, type_tag: TypeTag) -> ProviderError {
    ProviderError::LoadFailed {
        key: key.to_string(),
        message: format!("unsupported payload type {type_tag}"),
    }
}

#[async_trait]
impl ResourceProvider for FsProvider {
    async fn locate(
        &self,
        key: &str,
        _type_tag: TypeTag,
    ) -> Result<Vec<ResourceLocation>, ProviderError> {
        let path = self.resolve(key)?;
        let metadata = tokio::fs::metadata(&path).await.map_err(|e| io_error(key, &e))?;
        if !metadata.is_dir() {
            return Ok(vec![ResourceLocation::new(key)]);
        }

        let mut names = Vec::new();
        let mut dir = tokio::fs::read_dir(&path).await.map_err(|e| io_error(key, &e))?;
        while let Some(entry) = dir.next_entry().await.map_err(|e| io_error(key, &e))? {
            let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
            if is_file {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();

        let label = key.trim_end_matches('/');
        Ok(names
            .into_iter()
            .map(|name| ResourceLocation::new(format!("{label}/{name}")))
            .collect())
    }

    async fn load(
        &self,
        key: &str,
        type_tag: TypeTag,
        progress: ProgressSink,
    ) -> Result<Payload, ProviderError> {
        if !type_tag.is::<Vec<u8>>() {
            return Err(unsupported(key, type_tag));
        }
        let path = self.resolve(key)?;
        let mut file = tokio::fs::File::open(&path).await.map_err(|e| io_error(key, &e))?;
        let total = file.metadata().await.map_err(|e| io_error(key, &e))?.len();

        let mut bytes = Vec::with_capacity(usize::try_from(total).unwrap_or_default());
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let read = file.read(&mut chunk).await.map_err(|e| io_error(key, &e))?;
            if read == 0 {
                break;
            }
            bytes.extend_from_slice(&chunk[..read]);
            if total > 0 {
                progress.report(bytes.len() as f32 / total as f32);
            }
        }

        debug!(key = %key, bytes = bytes.len(), "Read content file");
        Ok(Payload::new(bytes))
    }

    fn release(&self, key: &str, _payload: &Payload) -> Result<(), ProviderError> {
        debug!(key = %key, "Released content file");
        Ok(())
    }
}

#[async_trait]
impl SceneProvider for FsProvider {
    async fn load_scene(
        &self,
        key: &str,
        type_tag: TypeTag,
        mode: SceneLoadMode,
        progress: ProgressSink,
    ) -> Result<Payload, ProviderError> {
        if !type_tag.is::<SceneManifest>() {
            return Err(unsupported(key, type_tag));
        }
        let path = self.resolve(&format!("{SCENE_DIR}/{key}.toml"))?;
        let text = tokio::fs::read_to_string(&path).await.map_err(|e| io_error(key, &e))?;
        progress.report(0.5);

        let manifest: SceneManifest = toml::from_str(&text).map_err(|e| ProviderError::LoadFailed {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        debug!(
            key = %key,
            mode = ?mode,
            contents = manifest.contents.len(),
            "Parsed scene manifest"
        );
        Ok(Payload::new(manifest))
    }

    async fn unload_scene(&self, key: &str, _scene: &Payload) -> Result<(), ProviderError> {
        debug!(key = %key, "Unloaded scene");
        Ok(())
    }
}
