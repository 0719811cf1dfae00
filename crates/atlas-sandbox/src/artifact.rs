//! Input artifacts staged into a sandbox.

use std::path::PathBuf;
use std::time::Duration;

use crate::errors::BackendError;

/// Where an artifact's bytes come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArtifactSource {
    Url(String),
    Path(PathBuf),
}

impl ArtifactSource {
    /// Classify a registry entry. `http://` and `https://` prefixes are URLs,
    /// everything else is a local path.
    pub fn parse(source: &str) -> Self {
        if source.starts_with("http://") || source.starts_with("https://") {
            ArtifactSource::Url(source.to_string())
        } else {
            ArtifactSource::Path(PathBuf::from(source))
        }
    }

    pub async fn resolve(
        &self,
        name: &str,
        client: &reqwest::Client,
        fetch_timeout: Duration,
    ) -> Result<ResolvedArtifact, BackendError> {
        let fail = |reason: String| BackendError::Artifact {
            name: name.to_string(),
            reason,
        };
        let bytes = match self {
            ArtifactSource::Url(url) => {
                let fetch = async {
                    let response = client.get(url).send().await?.error_for_status()?;
                    response.bytes().await
                };
                tokio::time::timeout(fetch_timeout, fetch)
                    .await
                    .map_err(|_| fail(format!("fetching {url} timed out")))?
                    .map_err(|err| fail(err.to_string()))?
                    .to_vec()
            }
            ArtifactSource::Path(path) => tokio::fs::read(path)
                .await
                .map_err(|err| fail(format!("{}: {err}", path.display())))?,
        };
        Ok(ResolvedArtifact {
            name: name.to_string(),
            bytes,
        })
    }
}

/// Artifact bytes ready to be written under `name` inside the sandbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub name: String,
    pub bytes: Vec<u8>,
}
