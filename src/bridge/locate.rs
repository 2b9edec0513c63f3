//! Finding the bridge tool on disk.

use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variables naming an SDK installation root.
const SDK_ENV_VARS: &[&str] = &["ANDROID_SDK_ROOT", "ANDROID_HOME"];

fn executable_name(name: &str) -> String {
    let suffix = std::env::consts::EXE_SUFFIX;
    if suffix.is_empty() || name.ends_with(suffix) {
        name.to_string()
    } else {
        format!("{}{}", name, suffix)
    }
}

/// Conventional SDK install locations for the current user.
fn conventional_sdk_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Some(home) = dirs::home_dir() {
        roots.push(home.join("Library").join("Android").join("sdk"));
        roots.push(home.join("Android").join("Sdk"));
    }
    if let Some(local) = dirs::data_local_dir() {
        roots.push(local.join("Android").join("Sdk"));
    }
    roots
}

/// Ordered list of SDK roots to search: environment, then configured, then
/// conventional locations.
pub fn sdk_search_roots(configured: &[PathBuf]) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = SDK_ENV_VARS
        .iter()
        .filter_map(|var| std::env::var_os(var))
        .map(PathBuf::from)
        .collect();
    roots.extend(configured.iter().cloned());
    roots.extend(conventional_sdk_roots());
    roots
}

/// Locate the bridge executable.
///
/// An explicit path in `name` wins. Otherwise the `platform-tools` directory
/// of each SDK root is checked before walking `PATH`.
pub fn locate_executable(name: &str, sdk_roots: &[PathBuf]) -> Option<PathBuf> {
    let explicit = Path::new(name);
    if explicit.components().count() > 1 || explicit.is_absolute() {
        return explicit.is_file().then(|| explicit.to_path_buf());
    }

    let file_name = executable_name(name);

    for root in sdk_search_roots(sdk_roots) {
        let candidate = root.join("platform-tools").join(&file_name);
        if candidate.is_file() {
            debug!(path = %candidate.display(), "Found bridge tool in SDK");
            return Some(candidate);
        }
    }

    let path_var = std::env::var_os("PATH")?;
    let found = std::env::split_paths(&path_var)
        .map(|dir| dir.join(&file_name))
        .find(|candidate| candidate.is_file());
    if let Some(path) = &found {
        debug!(path = %path.display(), "Found bridge tool on PATH");
    }
    found
}
