//! Extension → language mapping.
//!
//! Every ingested file carries a short language tag (used as chunk
//! metadata and in prompts) and contributes to a histogram keyed by a
//! human-readable display name.

use std::collections::BTreeMap;

/// `(extension, tag, display name)`
const LANGUAGES: &[(&str, &str, &str)] = &[
    (".py", "python", "Python"),
    (".js", "javascript", "JavaScript"),
    (".ts", "typescript", "TypeScript"),
    (".jsx", "javascript", "JavaScript (React)"),
    (".tsx", "typescript", "TypeScript (React)"),
    (".java", "java", "Java"),
    (".go", "go", "Go"),
    (".rs", "rust", "Rust"),
    (".cpp", "cpp", "C++"),
    (".c", "c", "C"),
    (".h", "c", "C/C++ Header"),
    (".hpp", "cpp", "C++ Header"),
    (".cs", "csharp", "C#"),
    (".rb", "ruby", "Ruby"),
    (".php", "php", "PHP"),
    (".swift", "swift", "Swift"),
    (".kt", "kotlin", "Kotlin"),
    (".sh", "shell", "Shell"),
    (".bash", "shell", "Shell"),
    (".sql", "sql", "SQL"),
    (".html", "html", "HTML"),
    (".css", "css", "CSS"),
];

/// Tags for data/document formats that have no display name of their own.
const FORMATS: &[(&str, &str)] = &[
    (".md", "markdown"),
    (".txt", "text"),
    (".json", "json"),
    (".yaml", "yaml"),
    (".yml", "yaml"),
    (".xml", "xml"),
    (".toml", "toml"),
    (".mod", "gomod"),
];

/// Lowercased extension of `path` including the dot, or `""` if none.
///
/// Dotfiles such as `.env` have no extension.
pub fn extension_of(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(0) | None => String::new(),
        Some(i) => name[i..].to_lowercase(),
    }
}

/// Short language tag for an extension; `"text"` when unknown.
pub fn language_tag(ext: &str) -> &'static str {
    LANGUAGES
        .iter()
        .find(|(e, _, _)| *e == ext)
        .map(|(_, tag, _)| *tag)
        .or_else(|| FORMATS.iter().find(|(e, _)| *e == ext).map(|(_, t)| *t))
        .unwrap_or("text")
}

/// Display name used in the language histogram, e.g. `"Rust"` or `"Other (.md)"`.
pub fn display_name(ext: &str) -> String {
    match LANGUAGES.iter().find(|(e, _, _)| *e == ext) {
        Some((_, _, name)) => name.to_string(),
        None if ext.is_empty() => "Other (no extension)".to_string(),
        None => format!("Other ({})", ext),
    }
}

/// Count files per display name.
pub fn histogram<'a>(extensions: impl IntoIterator<Item = &'a str>) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for ext in extensions {
        *counts.entry(display_name(ext)).or_insert(0) += 1;
    }
    counts
}
