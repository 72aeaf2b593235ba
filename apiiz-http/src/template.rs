use apiiz_core::Dictionary;
use regex::{Captures, Regex};
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}]+)\}").expect("placeholder pattern is valid"));

/// Substitute `{name}` placeholders in `template` with values from `params`.
///
/// A placeholder without a matching param becomes an empty string. Braces
/// that do not form a non-empty `{...}` pair without nested braces are kept
/// as written.
pub fn render(template: &str, params: &Dictionary) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            params.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}
