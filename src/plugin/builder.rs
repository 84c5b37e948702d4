//! Building the native allocator plugin.

use super::source::{LIBRARY_NAME, NCCL_ALLOCATOR_SOURCE, artifact_file_name};
use crate::config::PluginConfig;
use crate::error::{Error, Result};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Compiles [`NCCL_ALLOCATOR_SOURCE`] into a shared library.
///
/// The artifact lives at `<build_dir>/nccl_allocator.<ext>` and is reused
/// whenever that file exists. Its contents are not checked against the
/// embedded source, so a stale artifact from an older build is loaded as-is;
/// point `build_dir` somewhere fresh after changing the source.
///
/// Builds go to a temporary file in the build directory and are renamed
/// into place, so ranks starting concurrently never observe a partial file.
#[derive(Debug, Clone)]
pub struct PluginBuilder {
    build_dir: PathBuf,
    compiler: String,
    nccl_home: Option<PathBuf>,
    cuda_home: Option<PathBuf>,
    verbose: bool,
}

impl PluginBuilder {
    /// Create a builder from configuration.
    pub fn from_config(config: &PluginConfig) -> Self {
        Self {
            build_dir: config.resolved_build_dir(),
            compiler: config.compiler.clone(),
            nccl_home: config.nccl_home.clone(),
            cuda_home: config.cuda_home.clone(),
            verbose: config.verbose,
        }
    }

    /// Directory the artifact is built into.
    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// Path of the built plugin.
    pub fn artifact_path(&self) -> PathBuf {
        self.build_dir.join(artifact_file_name())
    }

    /// Whether a previously built artifact is present.
    pub fn is_cached(&self) -> bool {
        self.artifact_path().is_file()
    }

    /// Return the artifact path, building it first if it is absent.
    pub fn ensure_built(&self) -> Result<PathBuf> {
        let artifact = self.artifact_path();
        if artifact.is_file() {
            tracing::debug!(path = %artifact.display(), "reusing cached allocator plugin");
            return Ok(artifact);
        }
        self.build()
    }

    /// Build the artifact unconditionally, replacing any existing one.
    pub fn build(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.build_dir)?;

        let mut source = tempfile::Builder::new()
            .prefix(LIBRARY_NAME)
            .suffix(".cpp")
            .tempfile_in(&self.build_dir)?;
        source.write_all(NCCL_ALLOCATOR_SOURCE.as_bytes())?;
        source.flush()?;

        let output = tempfile::Builder::new()
            .prefix(LIBRARY_NAME)
            .suffix(&format!(".{}", std::env::consts::DLL_EXTENSION))
            .tempfile_in(&self.build_dir)?;

        let args = self.compiler_args(source.path(), output.path());
        if self.verbose {
            tracing::info!(
                compiler = %self.compiler,
                args = ?args,
                "building allocator plugin"
            );
        }

        let result = Command::new(&self.compiler)
            .args(&args)
            .output()
            .map_err(|e| Error::PluginBuild(format!("failed to run '{}': {}", self.compiler, e)))?;

        if self.verbose {
            let stdout = String::from_utf8_lossy(&result.stdout);
            let stderr = String::from_utf8_lossy(&result.stderr);
            if !stdout.trim().is_empty() {
                tracing::info!(output = %stdout.trim(), "compiler stdout");
            }
            if !stderr.trim().is_empty() {
                tracing::info!(output = %stderr.trim(), "compiler stderr");
            }
        }

        if !result.status.success() {
            return Err(Error::PluginBuild(format!(
                "'{}' exited with {}: {}",
                self.compiler,
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }

        let artifact = self.artifact_path();
        output
            .persist(&artifact)
            .map_err(|e| Error::PluginBuild(format!("failed to install plugin: {}", e.error)))?;

        tracing::info!(path = %artifact.display(), "allocator plugin built");
        Ok(artifact)
    }

    /// Compiler command line for building `source` into `output`.
    pub fn compiler_args(&self, source: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-shared".into(), "-fPIC".into(), "-O2".into()];

        for home in [&self.nccl_home, &self.cuda_home].into_iter().flatten() {
            let mut include = OsString::from("-I");
            include.push(home.join("include"));
            args.push(include);
        }
        for home in [&self.nccl_home, &self.cuda_home].into_iter().flatten() {
            for lib in ["lib", "lib64"] {
                let dir = home.join(lib);
                if dir.is_dir() {
                    let mut link = OsString::from("-L");
                    link.push(&dir);
                    args.push(link);
                }
            }
        }

        args.push(source.as_os_str().to_owned());
        args.push("-o".into());
        args.push(output.as_os_str().to_owned());
        args.push("-lnccl".into());
        args
    }
}
