//! Generic config file loader, the format chosen by file extension.

use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use serde::{de::DeserializeOwned, Serialize};

/// json5 errors carry a location, but their `Display` does not show
/// it.
#[derive(Debug, thiserror::Error)]
pub struct Json5Error(pub json5::Error);

impl Display for Json5Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            json5::Error::Message { msg, location } => {
                if let Some(json5::Location { line, column }) = location {
                    write!(f, "{msg} at line:column {line}:{column}")
                } else {
                    write!(f, "{msg}")
                }
            }
        }
    }
}

pub fn json5_from_str<T: DeserializeOwned>(s: &str) -> Result<T, Json5Error> {
    json5::from_str(s).map_err(Json5Error)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigBackend {
    Json5,
    Yaml,
    Hcl,
}

impl ConfigBackend {
    pub fn from_str_of_type<T: DeserializeOwned>(self, s: &str, path: &Path) -> Result<T> {
        match self {
            ConfigBackend::Json5 => json5_from_str(s)
                .with_context(|| anyhow!("decoding JSON5 from config file {path:?}")),
            ConfigBackend::Yaml => serde_yml::from_str(s)
                .with_context(|| anyhow!("decoding YAML from config file {path:?}")),
            ConfigBackend::Hcl => {
                hcl::from_str(s).with_context(|| anyhow!("decoding HCL from config file {path:?}"))
            }
        }
    }

    pub fn load_config_file<T: DeserializeOwned>(self, path: &Path) -> Result<T> {
        let s = std::fs::read_to_string(path)
            .with_context(|| anyhow!("loading config file from {path:?}"))?;
        self.from_str_of_type(&s, path)
    }

    pub fn save_config_file<T: Serialize>(self, path: &Path, value: &T) -> Result<()> {
        let s = match self {
            ConfigBackend::Json5 => {
                json5::to_string(value).with_context(|| anyhow!("encoding config as JSON5"))?
            }
            ConfigBackend::Yaml => {
                serde_yml::to_string(value).with_context(|| anyhow!("encoding config as YAML"))?
            }
            ConfigBackend::Hcl => {
                hcl::to_string(value).with_context(|| anyhow!("encoding config as HCL"))?
            }
        };
        std::fs::write(path, s).with_context(|| anyhow!("writing config file to {path:?}"))
    }
}

pub const FILE_EXTENSIONS: &[(&str, ConfigBackend)] = &[
    ("json5", ConfigBackend::Json5),
    ("json", ConfigBackend::Json5),
    ("yml", ConfigBackend::Yaml),
    ("yaml", ConfigBackend::Yaml),
    ("hcl", ConfigBackend::Hcl),
];

pub fn supported_formats() -> Vec<String> {
    FILE_EXTENSIONS
        .iter()
        .map(|(ext, backend)| format!(".{ext}\t{backend:?}"))
        .collect()
}

pub fn backend_from_path(path: &Path) -> Result<ConfigBackend> {
    let ext = path.extension().ok_or_else(|| {
        anyhow!("given file path does not have an extension for determining the file type: {path:?}")
    })?;
    let ext = ext
        .to_str()
        .ok_or_else(|| anyhow!("given file path has an extension that is not unicode: {path:?}"))?;
    if let Some((_, backend)) = FILE_EXTENSIONS.iter().find(|(e, _)| *e == ext) {
        Ok(*backend)
    } else {
        bail!("given file path has an unknown extension {ext:?}: {path:?}")
    }
}

pub fn save_config_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let backend = backend_from_path(path)?;
    backend.save_config_file(path, value)
}

fn with_extension_appended(path: &Path, extension: &str) -> Result<PathBuf> {
    let mut file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("path is missing a file name: {path:?}"))?
        .to_owned();
    file_name.push(".");
    file_name.push(extension);
    Ok(path.with_file_name(file_name))
}

pub trait LoadConfigFile: DeserializeOwned {
    /// Every supported extension is appended in turn to find the file
    fn default_config_path_without_suffix() -> Result<Option<PathBuf>>;

    /// If `path` is given, the file must exist or an error is
    /// returned. Otherwise the default location is checked with each
    /// of the supported extensions; exactly one match is loaded,
    /// several are an error, and if none exists `or_else` is called
    /// with a message saying what was tried.
    fn load_config<P: AsRef<Path>>(
        path: Option<P>,
        or_else: impl FnOnce(String) -> Result<Self>,
    ) -> Result<Self> {
        if let Some(path) = path {
            let path = path.as_ref();
            let backend = backend_from_path(path)?;
            return backend.load_config_file(path);
        }
        let Some(base) = Self::default_config_path_without_suffix()? else {
            return or_else(
                "no path was given and there is no default config location for this type".into(),
            );
        };
        let mut tried = Vec::new();
        let mut found = Vec::new();
        for (extension, backend) in FILE_EXTENSIONS {
            let path = with_extension_appended(&base, extension)?;
            if path.exists() {
                found.push((path.clone(), *backend));
            }
            tried.push(path);
        }
        match found.as_slice() {
            [] => or_else(format!("tried the default paths: {tried:?}")),
            [(path, backend)] => backend.load_config_file(path),
            _ => {
                let paths: Vec<_> = found.iter().map(|(path, _)| path).collect();
                bail!("multiple config file paths found, leading to ambiguity: {paths:?}")
            }
        }
    }
}
