//! Extraction rules: regex-based heuristics finding displayed text in source files.

use std::{borrow::Cow, collections::BTreeSet, sync::LazyLock};

use regex::{Captures, Regex};

use super::FileKind;

/// What a rule extracts from the text it is applied to.
#[derive(Debug, Clone, Copy)]
enum Extract {
    /// Chars of the first capture group of every match.
    Group,
    /// Chars between matches.
    Between,
    /// Like `Group`, with `${..}` expressions removed.
    Template,
    /// Bodies of string literals inside the first capture group.
    QuotedArgs,
}

/// Heuristic finding displayed text in a file of a certain kind.
#[derive(Debug)]
pub struct ExtractionRule {
    name: &'static str,
    context: FileKind,
    pattern: Regex,
    extract: Extract,
}

static TEMPLATE_EXPRESSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{.*?\}").expect("invalid built-in pattern"));
static QUOTED_ARG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""(.*?)"|'(.*?)'"#).expect("invalid built-in pattern"));

static RULES: LazyLock<Vec<ExtractionRule>> = LazyLock::new(|| {
    use self::Extract::{Between, Group, QuotedArgs, Template};
    use super::FileKind::{Markup, Script};

    [
        ("text", Markup, r"<[^>]+>", Between),
        (
            "attributes",
            Markup,
            r#"(?i)(?:alt|title|placeholder|aria-label|data-content)\s*=\s*["']([^"']+)["']"#,
            Group,
        ),
        (
            "style-content",
            Markup,
            r#"(?i)style\s*=\s*["'][^"']*content:\s*["'](.*?)["']"#,
            Group,
        ),
        ("double-quoted", Script, r#"(?s)"(.*?)""#, Group),
        ("single-quoted", Script, r"(?s)'(.*?)'", Group),
        ("template", Script, r"(?s)`(.*?)`", Template),
        ("jsx-text", Script, r"[>}]\t*([^<{]+?)\t*[<{]", Group),
        (
            "console",
            Script,
            r"console\.(?:log|warn|error|info)\(([^)]+)\)",
            QuotedArgs,
        ),
    ]
    .into_iter()
    .map(|(name, context, pattern, extract)| ExtractionRule {
        name,
        context,
        pattern: Regex::new(pattern).expect("invalid built-in pattern"),
        extract,
    })
    .collect()
});

impl ExtractionRule {
    /// Returns built-in rules for the specified file kind, in the application order.
    pub fn for_kind(kind: FileKind) -> impl Iterator<Item = &'static Self> {
        RULES.iter().filter(move |rule| rule.context == kind)
    }

    /// Returns the rule name, such as `attributes`.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the kind of files this rule is applied to.
    pub fn context(&self) -> FileKind {
        self.context
    }

    /// Applies this rule to `text`, adding found chars to `chars`.
    pub fn apply(&self, text: &str, chars: &mut BTreeSet<char>) {
        match self.extract {
            Extract::Between => {
                for fragment in self.pattern.split(text) {
                    chars.extend(fragment.chars());
                }
            }
            Extract::Group => {
                for captures in self.pattern.captures_iter(text) {
                    chars.extend(group(&captures).chars());
                }
            }
            Extract::Template => {
                for captures in self.pattern.captures_iter(text) {
                    let body = TEMPLATE_EXPRESSION.replace_all(group(&captures), "");
                    chars.extend(body.chars());
                }
            }
            Extract::QuotedArgs => {
                for captures in self.pattern.captures_iter(text) {
                    for literal in QUOTED_ARG.captures_iter(group(&captures)) {
                        chars.extend(group(&literal).chars());
                    }
                }
            }
        }
    }
}

/// Returns the first participating capture group.
fn group<'t>(captures: &Captures<'t>) -> &'t str {
    captures
        .iter()
        .skip(1)
        .flatten()
        .next()
        .map_or("", |group| group.as_str())
}

/// Elements whose contents are never rendered.
const NON_RENDERING_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "meta"];

static NON_RENDERING_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<(script|style|noscript|meta)(?:[\s/][^>]*)?>")
        .expect("invalid built-in pattern")
});

/// Removes non-rendering elements (`script`, `style`, `noscript`, `meta`) together with their
/// contents. Each element is removed up to *its own* closing tag; an element without
/// a closing tag (e.g., a void `meta`) only has its start tag removed.
pub(super) fn strip_non_rendering(markup: &str) -> Cow<'_, str> {
    // ASCII lowercasing retains byte offsets
    let lowercase = markup.to_ascii_lowercase();
    let mut output = String::new();
    let mut copied_until = 0;
    let mut search_from = 0;

    while let Some(captures) = NON_RENDERING_START.captures_at(markup, search_from) {
        let (Some(start_tag), Some(name)) = (captures.get(0), captures.get(1)) else {
            break;
        };
        let name = name.as_str().to_ascii_lowercase();
        debug_assert!(NON_RENDERING_ELEMENTS.contains(&name.as_str()));
        let is_void = name == "meta" || start_tag.as_str().ends_with("/>");

        let element_end = if is_void {
            start_tag.end()
        } else {
            find_end_tag(&lowercase, &name, start_tag.end()).unwrap_or(start_tag.end())
        };
        output.push_str(&markup[copied_until..start_tag.start()]);
        copied_until = element_end;
        search_from = element_end;
    }

    if copied_until == 0 {
        Cow::Borrowed(markup)
    } else {
        output.push_str(&markup[copied_until..]);
        Cow::Owned(output)
    }
}

/// Finds the end of the `</name>` tag (allowing whitespace before `>`) in lowercased markup.
fn find_end_tag(lowercase: &str, name: &str, from: usize) -> Option<usize> {
    let needle = format!("</{name}");
    let mut pos = from;
    while let Some(idx) = lowercase[pos..].find(&needle) {
        let after_name = pos + idx + needle.len();
        let rest = &lowercase[after_name..];
        let trimmed = rest.trim_start();
        if trimmed.starts_with('>') {
            return Some(after_name + (rest.len() - trimmed.len()) + 1);
        }
        pos = after_name;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str) -> &'static ExtractionRule {
        RULES.iter().find(|rule| rule.name() == name).unwrap()
    }

    fn apply(name: &str, text: &str) -> String {
        let mut chars = BTreeSet::new();
        rule(name).apply(text, &mut chars);
        chars.into_iter().collect()
    }

    #[test]
    fn rules_are_partitioned_by_kind() {
        let markup: Vec<_> = ExtractionRule::for_kind(FileKind::Markup)
            .map(ExtractionRule::name)
            .collect();
        assert_eq!(markup, ["text", "attributes", "style-content"]);
        let script: Vec<_> = ExtractionRule::for_kind(FileKind::Script)
            .map(ExtractionRule::name)
            .collect();
        assert_eq!(
            script,
            ["double-quoted", "single-quoted", "template", "jsx-text", "console"]
        );
    }

    #[test]
    fn markup_text_rule() {
        assert_eq!(apply("text", "<p class=\"x\">ab</p><b>c</b>"), "abc");
        assert_eq!(apply("text", "<div>\u{4e16}<br/>\u{754c}</div>"), "\u{4e16}\u{754c}");
    }

    #[test]
    fn attributes_rule() {
        let markup = r#"<img alt="Ünïcode" src="x.png"><input PLACEHOLDER='Q?' value="zzz">"#;
        assert_eq!(apply("attributes", markup), "?QcdenoÜï");
    }

    #[test]
    fn style_content_rule() {
        let markup = r#"<span style="color: red; content: '★'">x</span>"#;
        assert_eq!(apply("style-content", markup), "★");
    }

    #[test]
    fn string_literal_rules() {
        let script = r#"const a = "ab"; const b = 'cd';"#;
        assert_eq!(apply("double-quoted", script), "ab");
        assert_eq!(apply("single-quoted", script), "cd");
        // Literals may span multiple lines
        assert_eq!(apply("double-quoted", "\"x\ny\""), "\nxy");
    }

    #[test]
    fn template_rule_skips_expressions() {
        let script = "const msg = `Hi ${user.name}, ok`;";
        assert_eq!(apply("template", script), " ,Hiko");
    }

    #[test]
    fn jsx_text_rule() {
        let script = "return <div>Привет{name}</div>;";
        assert_eq!(apply("jsx-text", script), "Пвеирт");
    }

    #[test]
    fn console_rule() {
        let script = r#"console.warn("a" + x, 'b'); log("c");"#;
        assert_eq!(apply("console", script), "ab");
    }

    #[test]
    fn stripping_script_element() {
        let markup = "<p>A</p><SCRIPT type=\"module\">let x = 'Z';</script ><p>B</p>";
        assert_eq!(strip_non_rendering(markup), "<p>A</p><p>B</p>");
    }

    #[test]
    fn style_is_removed_up_to_its_own_end_tag() {
        let markup = "<style>p { color: red }</style><p>Text</p><script>var q = 1;</script>";
        assert_eq!(strip_non_rendering(markup), "<p>Text</p>");
    }

    #[test]
    fn void_and_unclosed_elements_only_lose_start_tag() {
        let markup = r#"<meta charset="utf-8"><p>One</p><noscript/><p>Two</p>"#;
        assert_eq!(strip_non_rendering(markup), "<p>One</p><p>Two</p>");

        let markup = "<p>A</p><style>B";
        assert_eq!(strip_non_rendering(markup), "<p>A</p>B");
    }

    #[test]
    fn markup_without_non_rendering_elements_is_borrowed() {
        let markup = "<p>Scripts are not <b>here</b></p>";
        assert!(matches!(strip_non_rendering(markup), Cow::Borrowed(_)));
    }
}
