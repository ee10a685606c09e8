//! Reads a profile from disk and turns it into the pass list the
//! orchestrator consumes. Relative `source` and texture paths resolve against
//! the directory holding the profile file.
//!
//! Types:
//!
//! - `ProfileError` classifies missing files, TOML errors, validation issues
//!   and unreadable pass sources.
//! - `LoadedProfile` stores the resolved root directory and parsed `Profile`.
//!
//! Functions:
//!
//! - `LoadedProfile::load` reads and validates the TOML file.
//! - `LoadedProfile::document` reads every enabled pass source and returns
//!   `DocumentPass` values in declaration order.
//! - `LoadedProfile::texture_paths` lists the catalog in index order.
use std::fs;
use std::path::{Path, PathBuf};

use multipass::{DocumentPass, PassId};
use thiserror::Error;

use crate::manifest::Profile;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile not found at {0}")]
    Missing(PathBuf),

    #[error("failed to parse profile: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("profile validation failed: {0:?}")]
    Validation(Vec<String>),

    #[error("failed to read pass source {path}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct LoadedProfile {
    root: PathBuf,
    profile: Profile,
}

impl LoadedProfile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProfileError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ProfileError::Missing(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path)?;
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::from_str_in(&raw, root)
    }

    /// Parses `raw` as if it had been read from a file inside `root`.
    pub fn from_str_in(raw: &str, root: impl Into<PathBuf>) -> Result<Self, ProfileError> {
        let profile: Profile = toml::from_str(raw)?;
        let issues = profile.validate();
        if !issues.is_empty() {
            return Err(ProfileError::Validation(issues));
        }
        let root = root.into();
        tracing::debug!(
            root = %root.display(),
            passes = profile.passes.len(),
            textures = profile.textures.len(),
            "loaded profile"
        );
        Ok(Self { root, profile })
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    pub fn texture_paths(&self) -> Vec<PathBuf> {
        self.profile
            .textures
            .iter()
            .map(|entry| self.resolve(entry.path()))
            .collect()
    }

    /// Enabled passes with their sources read. An inline `common` string
    /// becomes a Common pass ahead of everything else. Entries without code
    /// or source yield an empty source, which disables that pass.
    pub fn document(&self) -> Result<Vec<DocumentPass>, ProfileError> {
        let mut passes = Vec::with_capacity(self.profile.passes.len() + 1);
        if let Some(common) = &self.profile.common {
            passes.push(DocumentPass::new(
                PassId::Common,
                common.clone(),
                Default::default(),
            ));
        }

        for entry in self.profile.passes.iter().filter(|entry| entry.enabled) {
            let pass = entry
                .pass_id()
                .map_err(|err| ProfileError::Validation(vec![err.to_string()]))?;
            let channels = if pass == PassId::Common {
                Default::default()
            } else {
                entry
                    .bindings()
                    .map_err(|err| ProfileError::Validation(vec![format!("pass '{pass}': {err}")]))?
            };
            let source = match (&entry.code, &entry.source) {
                (Some(code), _) => code.clone(),
                (None, Some(relative)) => {
                    let path = self.resolve(relative);
                    fs::read_to_string(&path)
                        .map_err(|source| ProfileError::Source { path, source })?
                }
                (None, None) => String::new(),
            };
            passes.push(DocumentPass::new(pass, source, channels));
        }
        Ok(passes)
    }
}
