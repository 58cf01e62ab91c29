//! Filesystem tools: read, write, list, glob, search, diff, checksum.

use super::{clip, require_str, str_arg, Tool, ToolContext};
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

const MAX_ENTRIES: usize = 500;
const MAX_MATCHES: usize = 200;

pub struct ReadFile;

impl Tool for ReadFile {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn usage(&self) -> &'static str {
        "read a text file; args: {\"path\": \"...\"}"
    }

    fn invoke(&self, args: &Value, ctx: &ToolContext) -> Result<String, String> {
        let path = require_str(args, "path")?;
        let content =
            fs::read_to_string(path).map_err(|e| format!("cannot read {}: {}", path, e))?;
        Ok(clip(content, ctx.shell.max_output_bytes))
    }
}

pub struct WriteFile;

impl Tool for WriteFile {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn usage(&self) -> &'static str {
        "write a text file; args: {\"path\": \"...\", \"content\": \"...\"}"
    }

    fn side_effects(&self) -> bool {
        true
    }

    fn invoke(&self, args: &Value, _ctx: &ToolContext) -> Result<String, String> {
        let path = require_str(args, "path")?;
        let content = require_str(args, "content")?;
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
            }
        }
        fs::write(path, content).map_err(|e| format!("cannot write {}: {}", path, e))?;
        Ok(format!("wrote {} bytes to {}", content.len(), path))
    }
}

pub struct ListDir;

impl Tool for ListDir {
    fn name(&self) -> &'static str {
        "list_dir"
    }

    fn usage(&self) -> &'static str {
        "list directory entries; args: {\"path\": \".\", \"depth\": 2}"
    }

    fn invoke(&self, args: &Value, _ctx: &ToolContext) -> Result<String, String> {
        let path = str_arg(args, "path").unwrap_or(".");
        let depth = args.get("depth").and_then(|v| v.as_u64()).unwrap_or(2) as usize;

        let mut entries = Vec::new();
        for entry in WalkDir::new(path)
            .min_depth(1)
            .max_depth(depth.max(1))
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let suffix = if entry.file_type().is_dir() { "/" } else { "" };
            entries.push(format!("{}{}", entry.path().display(), suffix));
            if entries.len() >= MAX_ENTRIES {
                entries.push("... (listing truncated)".to_string());
                break;
            }
        }
        if entries.is_empty() {
            return Ok(format!("{} is empty or missing", path));
        }
        Ok(entries.join("\n"))
    }
}

pub struct GlobFiles;

impl Tool for GlobFiles {
    fn name(&self) -> &'static str {
        "glob_files"
    }

    fn usage(&self) -> &'static str {
        "match files by glob; args: {\"pattern\": \"src/**/*.rs\"}"
    }

    fn invoke(&self, args: &Value, _ctx: &ToolContext) -> Result<String, String> {
        let pattern = require_str(args, "pattern")?;
        let paths = glob::glob(pattern).map_err(|e| format!("bad glob pattern: {}", e))?;

        let mut matches = Vec::new();
        for path in paths.filter_map(|p| p.ok()) {
            matches.push(path.display().to_string());
            if matches.len() >= MAX_ENTRIES {
                matches.push("... (matches truncated)".to_string());
                break;
            }
        }
        if matches.is_empty() {
            return Ok(format!("no files match {}", pattern));
        }
        Ok(matches.join("\n"))
    }
}

pub struct SearchFiles;

impl Tool for SearchFiles {
    fn name(&self) -> &'static str {
        "search_files"
    }

    fn usage(&self) -> &'static str {
        "regex search in files; args: {\"pattern\": \"...\", \"path\": \".\"}"
    }

    fn invoke(&self, args: &Value, ctx: &ToolContext) -> Result<String, String> {
        let pattern = require_str(args, "pattern")?;
        let root = str_arg(args, "path").unwrap_or(".");
        let regex = Regex::new(pattern).map_err(|e| format!("bad regex: {}", e))?;

        let mut matches = Vec::new();
        'walk: for entry in WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue; // binary or unreadable
            };
            for (lineno, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(format!(
                        "{}:{}: {}",
                        entry.path().display(),
                        lineno + 1,
                        line.trim_end()
                    ));
                    if matches.len() >= MAX_MATCHES {
                        matches.push("... (matches truncated)".to_string());
                        break 'walk;
                    }
                }
            }
        }
        if matches.is_empty() {
            return Ok(format!("no matches for {} under {}", pattern, root));
        }
        Ok(clip(matches.join("\n"), ctx.shell.max_output_bytes))
    }
}

pub struct FileDiff;

impl Tool for FileDiff {
    fn name(&self) -> &'static str {
        "file_diff"
    }

    fn usage(&self) -> &'static str {
        "unified diff of two files; args: {\"path_a\": \"...\", \"path_b\": \"...\"}"
    }

    fn invoke(&self, args: &Value, ctx: &ToolContext) -> Result<String, String> {
        let path_a = require_str(args, "path_a")?;
        let path_b = require_str(args, "path_b")?;
        let a = fs::read_to_string(path_a).map_err(|e| format!("cannot read {}: {}", path_a, e))?;
        let b = fs::read_to_string(path_b).map_err(|e| format!("cannot read {}: {}", path_b, e))?;
        let patch = diffy::create_patch(&a, &b);
        Ok(clip(patch.to_string(), ctx.shell.max_output_bytes))
    }
}

pub struct Checksum;

impl Tool for Checksum {
    fn name(&self) -> &'static str {
        "checksum"
    }

    fn usage(&self) -> &'static str {
        "SHA-256 of a file; args: {\"path\": \"...\"}"
    }

    fn invoke(&self, args: &Value, _ctx: &ToolContext) -> Result<String, String> {
        let path = require_str(args, "path")?;
        let bytes = fs::read(path).map_err(|e| format!("cannot read {}: {}", path, e))?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        Ok(format!("sha256 {}  {}", hex, path))
    }
}
