use std::sync::LazyLock;

use regex::Regex;

static SLUG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").unwrap());
static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[_\s]+").unwrap());
static CLEAN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9-]").unwrap());
static DASHES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-+").unwrap());

/// Whether `input` has slug shape: lowercase alphanumeric words joined by single dashes.
pub fn is_slug(input: &str) -> bool {
    SLUG.is_match(input)
}

/// Turns a display name such as `"Chicken_Tenders (3 pc)"` into `"chicken-tenders-3-pc"`.
pub fn slugify(input: &str) -> String {
    let lowered = input.trim().to_lowercase();
    let dashed = SEPARATORS.replace_all(&lowered, "-");
    let cleaned = CLEAN.replace_all(&dashed, "");

    DASHES
        .replace_all(&cleaned, "-")
        .trim_matches('-')
        .to_string()
}
