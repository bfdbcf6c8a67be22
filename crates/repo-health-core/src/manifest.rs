//! Dependency-manifest parsing.
//!
//! Recognised manifests and the ecosystem they report under:
//!
//! | File | Ecosystem | Entries |
//! |------|-----------|---------|
//! | `requirements.txt` | `Python` | package names, version specifiers stripped |
//! | `package.json` | `JavaScript/Node` | `dependencies` + `devDependencies` keys |
//! | `go.mod` | `Go` | module paths from `require` lines and blocks |
//! | `Cargo.toml` | `Rust` | keys of the dependency tables |
//! | `pom.xml` | `Java (Maven)` | `<artifactId>` of each `<dependency>` |
//!
//! Parsing is purely textual; nothing here touches the filesystem.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

/// File names treated as dependency manifests.
pub const MANIFEST_FILES: &[&str] = &[
    "requirements.txt",
    "package.json",
    "go.mod",
    "Cargo.toml",
    "pom.xml",
];

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("invalid package.json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid Cargo.toml: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid pom.xml: {0}")]
    Xml(String),
}

/// Whether the final path component names a recognised manifest.
pub fn is_manifest(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    MANIFEST_FILES.contains(&name)
}

/// Parse one manifest. Returns `Ok(None)` when `path` is not a manifest.
pub fn parse_manifest(
    path: &str,
    content: &str,
) -> Result<Option<(&'static str, Vec<String>)>, ManifestError> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let parsed = match name {
        "requirements.txt" => ("Python", parse_requirements(content)),
        "package.json" => ("JavaScript/Node", parse_package_json(content)?),
        "go.mod" => ("Go", parse_go_mod(content)),
        "Cargo.toml" => ("Rust", parse_cargo_toml(content)?),
        "pom.xml" => ("Java (Maven)", parse_pom(content)?),
        _ => return Ok(None),
    };
    Ok(Some(parsed))
}

/// Merge every manifest among `files` into `ecosystem → sorted, deduplicated names`.
///
/// Manifests that fail to parse are skipped.
pub fn collect_dependencies<'a>(
    files: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> BTreeMap<String, Vec<String>> {
    let mut merged: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (path, content) in files {
        if let Ok(Some((ecosystem, deps))) = parse_manifest(path, content) {
            merged.entry(ecosystem.to_string()).or_default().extend(deps);
        }
    }
    merged
        .into_iter()
        .map(|(k, v)| (k, v.into_iter().collect()))
        .collect()
}

fn parse_requirements(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('-'))
        .filter_map(|l| {
            let end = l
                .find(|c: char| "=<>~!;[ @".contains(c))
                .unwrap_or(l.len());
            let name = l[..end].trim();
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}

fn parse_package_json(content: &str) -> Result<Vec<String>, ManifestError> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    let mut deps = Vec::new();
    for section in ["dependencies", "devDependencies"] {
        if let Some(map) = value.get(section).and_then(|v| v.as_object()) {
            deps.extend(map.keys().cloned());
        }
    }
    Ok(deps)
}

fn parse_go_mod(content: &str) -> Vec<String> {
    let mut deps = Vec::new();
    let mut in_block = false;
    for raw in content.lines() {
        let line = raw.split("//").next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        if in_block {
            if line == ")" {
                in_block = false;
            } else if let Some(module) = line.split_whitespace().next() {
                deps.push(module.to_string());
            }
        } else if let Some(rest) = line.strip_prefix("require") {
            let rest = rest.trim();
            if rest == "(" {
                in_block = true;
            } else if let Some(module) = rest.split_whitespace().next() {
                deps.push(module.to_string());
            }
        }
    }
    deps
}

fn parse_cargo_toml(content: &str) -> Result<Vec<String>, ManifestError> {
    let value: toml::Value = toml::from_str(content)?;
    let mut deps = Vec::new();
    for section in ["dependencies", "dev-dependencies", "build-dependencies"] {
        if let Some(table) = value.get(section).and_then(|v| v.as_table()) {
            deps.extend(table.keys().cloned());
        }
    }
    if let Some(table) = value
        .get("workspace")
        .and_then(|w| w.get("dependencies"))
        .and_then(|v| v.as_table())
    {
        deps.extend(table.keys().cloned());
    }
    Ok(deps)
}

fn parse_pom(content: &str) -> Result<Vec<String>, ManifestError> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<String> = Vec::new();
    let mut deps = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                stack.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Text(t)) => {
                let n = stack.len();
                if n >= 2 && stack[n - 1] == "artifactId" && stack[n - 2] == "dependency" {
                    let text = t.unescape().map_err(|e| ManifestError::Xml(e.to_string()))?;
                    deps.push(text.into_owned());
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ManifestError::Xml(e.to_string())),
        }
    }
    Ok(deps)
}
