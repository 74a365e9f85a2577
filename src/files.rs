//! Ambient file reads shared by configuration and billing loaders.

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};

/// Reads a UTF-8 file by opening its parent directory with ambient
/// authority.
///
/// # Errors
///
/// Returns a human-readable message when the directory cannot be opened or
/// the file cannot be read.
pub(crate) fn read_to_string_ambient(path: &Utf8Path) -> Result<String, String> {
    let parent = path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| String::from("path is missing a file name"))?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_name).map_err(|err| err.to_string())
}
