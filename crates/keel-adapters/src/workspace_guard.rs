use anyhow::{bail, Context, Result};
use std::path::{Component, Path, PathBuf};

/// Bytes inspected when sniffing for binary content
const SNIFF_LEN: usize = 8192;

/// Confines tool paths to one workspace directory.
///
/// Every file tool resolves caller paths through here, both when executing
/// and when reporting mutation targets to the dispatcher, so checkpoints and
/// writes always agree on the absolute path.
pub struct WorkspaceGuard {
    root: PathBuf,
    max_file_size: u64,
}

impl WorkspaceGuard {
    pub fn new(root: PathBuf, max_file_size_mb: u64) -> Result<Self> {
        let root = root
            .canonicalize()
            .context(format!("Workspace root not found: {:?}", root))?;
        Ok(Self {
            root,
            max_file_size: max_file_size_mb * 1024 * 1024,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for `input`, relative to the root unless already absolute.
    ///
    /// Symlinks are followed for the deepest existing ancestor, so a link
    /// pointing outside the workspace is rejected just like `..`.
    pub fn resolve(&self, input: &str) -> Result<PathBuf> {
        if input.trim().is_empty() {
            bail!("Empty path");
        }
        let resolved = absolute_path(&self.root, Path::new(input));

        if !resolved.starts_with(&self.root) {
            bail!(
                "Path outside workspace: {:?} (workspace is {:?})",
                input,
                self.root
            );
        }
        Ok(resolved)
    }

    /// Like `resolve`, but the file must already exist
    pub fn resolve_existing(&self, input: &str) -> Result<PathBuf> {
        let path = self.resolve(input)?;
        if !path.is_file() {
            bail!("File not found: {}", input);
        }
        Ok(path)
    }

    /// Workspace-relative form for tool output
    pub fn display(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    pub async fn check_size(&self, path: &Path) -> Result<u64> {
        let len = tokio::fs::metadata(path)
            .await
            .context("Failed to read file metadata")?
            .len();
        self.check_len(len)?;
        Ok(len)
    }

    pub fn check_len(&self, len: u64) -> Result<()> {
        if len > self.max_file_size {
            bail!(
                "File too large: {} bytes (max {} MB)",
                len,
                self.max_file_size / (1024 * 1024)
            );
        }
        Ok(())
    }

    /// Decode file bytes as text, rejecting binary and non-UTF-8 content
    pub fn decode_text(bytes: Vec<u8>, label: &str) -> Result<String> {
        if looks_binary(&bytes) {
            bail!("Binary file detected, cannot read: {}", label);
        }
        String::from_utf8(bytes).context(format!("File is not valid UTF-8: {}", label))
    }
}

/// NUL byte in the leading chunk
pub fn looks_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(SNIFF_LEN)].contains(&0)
}

/// `input` joined onto `base`, with `.`/`..` removed and the deepest
/// existing ancestor canonicalized. Matches the paths recorded in checkpoints.
pub fn absolute_path(base: &Path, input: &Path) -> PathBuf {
    canonical_prefix(&normalize(&base.join(input)))
}

/// Lexically drop `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<Component> = Vec::new();
    for c in path.components() {
        match c {
            Component::ParentDir => {
                if matches!(parts.last(), Some(Component::Normal(_))) {
                    parts.pop();
                }
            }
            Component::CurDir => {}
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}

/// Canonicalize the longest existing ancestor and re-append the rest
fn canonical_prefix(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut tail: Vec<&std::ffi::OsStr> = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut out = canonical;
            for part in tail.iter().rev() {
                out.push(part);
            }
            return out;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name);
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}
