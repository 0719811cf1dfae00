//! Fenced code-block extraction.

use once_cell::sync::Lazy;
use regex::Regex;

static PYTHON: Lazy<CodeFence> =
    Lazy::new(|| CodeFence::new("python").expect("python fence pattern must compile"));

static PYTHON_OR_BARE: Lazy<CodeFence> = Lazy::new(|| {
    CodeFence::allow_untagged("python").expect("python fence pattern must compile")
});

/// Matches markdown fences tagged with one language. The tag is compared
/// case-insensitively; a block whose body is blank counts as absent.
#[derive(Clone, Debug)]
pub struct CodeFence {
    pattern: Regex,
}

impl CodeFence {
    pub fn new(language: &str) -> Result<Self, regex::Error> {
        let tag = regex::escape(language);
        Self::compile(&format!(r"(?is)```[ \t]*{tag}[ \t]*\r?\n(.*?)```"))
    }

    /// Like [`CodeFence::new`] but also accepts fences with no tag at all.
    pub fn allow_untagged(language: &str) -> Result<Self, regex::Error> {
        let tag = regex::escape(language);
        Self::compile(&format!(r"(?is)```(?:[ \t]*{tag})?[ \t]*\r?\n(.*?)```"))
    }

    fn compile(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn python() -> &'static CodeFence {
        &PYTHON
    }

    pub fn python_or_bare() -> &'static CodeFence {
        &PYTHON_OR_BARE
    }

    /// Trimmed body of the first non-empty block.
    pub fn first<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.bodies(text).next()
    }

    /// Trimmed bodies of every non-empty block, in document order.
    pub fn all<'a>(&self, text: &'a str) -> Vec<&'a str> {
        self.bodies(text).collect()
    }

    fn bodies<'t>(&self, text: &'t str) -> impl Iterator<Item = &'t str> {
        self.pattern
            .captures_iter(text)
            .filter_map(|captures| captures.get(1))
            .map(|body| body.as_str().trim())
            .filter(|body| !body.is_empty())
    }
}
