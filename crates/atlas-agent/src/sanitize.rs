use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

static INLINE_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"!\[([^\]]*)\]\(data:image/[A-Za-z0-9.+-]+;base64,[A-Za-z0-9+/=\s]*\)")
        .expect("inline image pattern must compile")
});

/// Replace inline base64 image markup with `[Chart generated: <alt>]`.
///
/// Applied only to the copy of tool output that goes back to the model; the
/// client always receives the original text.
pub fn strip_inline_images(text: &str) -> Cow<'_, str> {
    INLINE_IMAGE.replace_all(text, "[Chart generated: $1]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_without_images_is_borrowed_unchanged() {
        let text = "mean pts: 11.0\n![logo](https://example.com/a.png)";
        let stripped = strip_inline_images(text);
        assert!(matches!(stripped, Cow::Borrowed(_)));
        assert_eq!(stripped, text);
    }

    #[test]
    fn single_chart_becomes_placeholder() {
        let image = "![chart](data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAA+/=)";
        assert_eq!(strip_inline_images(image), "[Chart generated: chart]");

        let text = format!("before\n{image}\nafter");
        assert_eq!(
            strip_inline_images(&text),
            "before\n[Chart generated: chart]\nafter"
        );
    }

    #[test]
    fn every_image_is_replaced_and_stripping_is_idempotent() {
        let text = "![a](data:image/png;base64,AAAA) and ![b](data:image/svg+xml;base64,BBBB)";
        let once = strip_inline_images(text).into_owned();
        assert_eq!(once, "[Chart generated: a] and [Chart generated: b]");
        assert_eq!(strip_inline_images(&once), once);
    }
}
