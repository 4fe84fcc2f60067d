use std::fs;
use std::io;
use std::path::Path;

/// Whether two paths resolve to the same file. Comparison happens on the
/// absolute forms so relative spellings of the same destination are caught;
/// neither path is required to exist.
pub fn is_same_path(a: &Path, b: &Path) -> io::Result<bool> {
    let abs_a = std::path::absolute(a)?;
    let abs_b = std::path::absolute(b)?;
    Ok(abs_a == abs_b)
}

pub fn path_exists(path: &Path) -> io::Result<bool> {
    path.try_exists()
}

/// Create the parent directory of `path` (and any missing ancestors).
pub fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub fn copy_file(src: &Path, dest: &Path) -> io::Result<u64> {
    ensure_parent_dir(dest)?;
    fs::copy(src, dest)
}
