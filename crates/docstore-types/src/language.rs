//! Closed vocabulary for code-block and document language tags.
//!
//! Extractors emit whatever fence label the author wrote (`js`, `C++`,
//! `py3`, ...). Everything is folded onto the canonical names below; labels
//! outside the vocabulary become `text`.

/// Canonical language names accepted in stored rows.
pub const LANGUAGE_VOCABULARY: &[&str] = &[
    "bash", "c", "cpp", "csharp", "css", "dart", "dockerfile", "elixir", "go", "graphql", "html",
    "java", "javascript", "json", "kotlin", "lua", "markdown", "php", "python", "r", "ruby",
    "rust", "scala", "sql", "swift", "text", "toml", "typescript", "xml", "yaml",
];

/// Fallback for unknown or empty labels.
pub const UNKNOWN_LANGUAGE: &str = "text";

/// Normalize a free-form language label onto [`LANGUAGE_VOCABULARY`].
pub fn normalize_language(label: &str) -> &'static str {
    let folded = label.trim().to_lowercase();
    let alias = match folded.as_str() {
        "sh" | "shell" | "zsh" | "console" | "shell-session" => "bash",
        "c++" | "cc" | "cxx" | "hpp" => "cpp",
        "cs" | "c#" => "csharp",
        "golang" => "go",
        "js" | "jsx" | "mjs" | "cjs" | "node" => "javascript",
        "ts" | "tsx" => "typescript",
        "py" | "py3" | "python3" => "python",
        "rs" => "rust",
        "rb" => "ruby",
        "kt" | "kts" => "kotlin",
        "md" | "mdx" => "markdown",
        "yml" => "yaml",
        "docker" => "dockerfile",
        "ex" | "exs" => "elixir",
        "gql" => "graphql",
        "htm" | "xhtml" => "html",
        "plaintext" | "txt" | "plain" | "" => UNKNOWN_LANGUAGE,
        other => other,
    };

    LANGUAGE_VOCABULARY
        .iter()
        .find(|lang| **lang == alias)
        .copied()
        .unwrap_or(UNKNOWN_LANGUAGE)
}
