//! Loader for schedule payloads saved to disk (portal responses, saved pages).

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::models::{PayloadKind, RawPayload};

/// Read one or more files as a payload of `kind`. Every JSON file becomes one
/// page; for HTML only the first file is used.
pub fn load_payload(paths: &[PathBuf], kind: PayloadKind) -> Result<RawPayload> {
    if paths.is_empty() {
        bail!("no input files given");
    }

    match kind {
        PayloadKind::Json => {
            let mut pages = Vec::with_capacity(paths.len());
            for path in paths {
                pages.push(load_json(path)?);
            }
            info!("{} JSON page(s) loaded", pages.len());
            Ok(RawPayload::Json { pages })
        }
        PayloadKind::Html => {
            if paths.len() > 1 {
                warn!("{} HTML files given, only {:?} is read", paths.len(), paths[0]);
            }
            let html = read_text(&paths[0])?;
            debug!("{:?}: {} bytes of HTML", paths[0], html.len());
            Ok(RawPayload::Html(html))
        }
    }
}

fn load_json(path: &Path) -> Result<Value> {
    let text = read_text(path)?;
    serde_json::from_str(&text).with_context(|| format!("{:?} is not valid JSON", path))
}

fn read_text(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    let text = String::from_utf8_lossy(&bytes);
    // Saved pages often start with a BOM
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

/// Files in `dir` with extension `ext`, sorted by name.
pub fn discover_payload_files(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(ext))
            .unwrap_or(false);
        if path.is_file() && matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Replace directories in `inputs` by the payload files they contain.
pub fn expand_inputs(inputs: &[PathBuf], kind: PayloadKind) -> Result<Vec<PathBuf>> {
    let ext = match kind {
        PayloadKind::Json => "json",
        PayloadKind::Html => "html",
    };

    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let found = discover_payload_files(input, ext)?;
            debug!("{:?}: {} .{} file(s)", input, found.len(), ext);
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}
