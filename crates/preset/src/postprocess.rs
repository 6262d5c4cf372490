//! Regex post-processing of model replies.
//!
//! A preset's rules live as one JSON file per rule under
//! `<presets>/regex/<preset>/`, in the SillyTavern script format:
//!
//! ```json
//! {"scriptName": "hide thinking", "findRegex": "/<thinking>.*?<\\/thinking>/gs",
//!  "replaceString": "", "disabled": false, "substituteRegex": 0}
//! ```
//!
//! Files are read in file-name order and rules run in that order, each one
//! feeding the next. Patterns the `regex` engine rejects, such as lookaround
//! or backreferences, are retried with `fancy-regex`. Disabled rules never compile. A rule that fails to parse
//! or compile is skipped with a warning and the rest still run.
//!
//! Applying a pipeline twice is only a no-op when every rule is a deletion or
//! normalisation filter. A rule like `a` → `aa` grows text on every pass, and
//! that is an allowed configuration, not an error.

use regex::RegexBuilder;
use rustedtavern_core::error::RegexRuleError;
use rustedtavern_core::placeholder::Placeholders;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::Path;
use tracing::{debug, warn};

// ── Rule files ────────────────────────────────────────────────────────────

/// One regex rule as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegexRule {
    #[serde(default)]
    pub script_name: String,

    #[serde(default)]
    pub find_regex: String,

    #[serde(default)]
    pub replace_string: String,

    #[serde(default)]
    pub disabled: bool,

    /// 0: pattern used as-is. 1: placeholders substituted raw.
    /// 2: placeholders substituted regex-escaped.
    #[serde(default)]
    pub substitute_regex: u8,
}

impl RegexRule {
    pub fn new(find_regex: impl Into<String>, replace_string: impl Into<String>) -> Self {
        Self {
            script_name: String::new(),
            find_regex: find_regex.into(),
            replace_string: replace_string.into(),
            disabled: false,
            substitute_regex: 0,
        }
    }

    fn label(&self) -> &str {
        if self.script_name.is_empty() {
            &self.find_regex
        } else {
            &self.script_name
        }
    }
}

/// The rules shipped with one preset, plus files that could not be read.
#[derive(Debug, Clone, Default)]
pub struct RegexBundle {
    pub rules: Vec<RegexRule>,
    pub errors: Vec<RegexRuleError>,
}

impl RegexBundle {
    pub fn from_rules(rules: Vec<RegexRule>) -> Self {
        Self {
            rules,
            errors: Vec::new(),
        }
    }

    /// Load every `*.json` rule file in `dir`, sorted by file name.
    ///
    /// A missing directory is an empty bundle.
    pub fn load_dir(dir: &Path) -> Self {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "No regex rules for preset");
                return Self::default();
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Cannot list regex rules");
                return Self::default();
            }
        };

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut bundle = Self::default();
        for path in paths {
            let parsed = std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|content| {
                    serde_json::from_str::<RegexRule>(&content).map_err(|e| e.to_string())
                });

            match parsed {
                Ok(mut rule) => {
                    if rule.script_name.is_empty() {
                        rule.script_name = path
                            .file_stem()
                            .map(|s| s.to_string_lossy().into_owned())
                            .unwrap_or_default();
                    }
                    bundle.rules.push(rule);
                }
                Err(reason) => {
                    warn!(path = %path.display(), %reason, "Skipping unreadable regex rule");
                    bundle.errors.push(RegexRuleError::Parse { path, reason });
                }
            }
        }
        bundle
    }
}

// ── Flags ─────────────────────────────────────────────────────────────────

/// Matching flags for a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegexFlags {
    pub case_insensitive: bool,
    pub multi_line: bool,
    pub dot_all: bool,
}

impl Default for RegexFlags {
    fn default() -> Self {
        Self {
            case_insensitive: true,
            multi_line: true,
            dot_all: true,
        }
    }
}

impl RegexFlags {
    /// The flags as an inline group, e.g. `(?is)`. Empty when none are set.
    fn inline_prefix(&self) -> String {
        let flags: String = [
            (self.case_insensitive, 'i'),
            (self.multi_line, 'm'),
            (self.dot_all, 's'),
        ]
        .into_iter()
        .filter_map(|(on, flag)| on.then_some(flag))
        .collect();
        if flags.is_empty() {
            String::new()
        } else {
            format!("(?{flags})")
        }
    }
}

/// Split a `/body/flags` literal. Bare patterns keep the defaults.
fn split_literal(raw: &str, defaults: RegexFlags) -> (&str, RegexFlags) {
    if let Some(inner) = raw.strip_prefix('/') {
        if let Some(end) = inner.rfind('/') {
            let (body, flags) = (&inner[..end], &inner[end + 1..]);
            if flags.chars().all(|c| c.is_ascii_alphabetic()) {
                return (
                    body,
                    RegexFlags {
                        case_insensitive: flags.contains('i'),
                        multi_line: flags.contains('m'),
                        dot_all: flags.contains('s'),
                    },
                );
            }
        }
    }
    (raw, defaults)
}

/// Capture groups a compiled pattern defines.
#[derive(Debug, Clone, Default)]
struct CaptureGroups {
    /// Number of groups, not counting the whole match
    count: usize,
    names: Vec<String>,
}

impl CaptureGroups {
    fn from_names<'a>(names: impl Iterator<Item = Option<&'a str>>) -> Self {
        let mut groups = Self::default();
        for name in names.skip(1) {
            groups.count += 1;
            if let Some(name) = name {
                groups.names.push(name.to_string());
            }
        }
        groups
    }

    fn has_index(&self, index: usize) -> bool {
        (1..=self.count).contains(&index)
    }

    fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

/// Rewrite a JavaScript replacement string into `regex` replacement syntax.
///
/// `$1` → `${1}`, `$&` and `{{match}}` → `${0}`, `$<name>` → `${name}`,
/// `$$` stays a literal dollar. References to groups the pattern does not
/// define are kept as literal text, and so is any other `$`.
fn translate_replacement(js: &str, groups: &CaptureGroups) -> String {
    const MATCH_TOKEN: &str = "{{match}}";

    let mut out = String::with_capacity(js.len() + 8);
    let mut rest = js;

    while let Some(c) = rest.chars().next() {
        if rest.len() >= MATCH_TOKEN.len()
            && rest.as_bytes()[..MATCH_TOKEN.len()].eq_ignore_ascii_case(MATCH_TOKEN.as_bytes())
        {
            out.push_str("${0}");
            rest = &rest[MATCH_TOKEN.len()..];
            continue;
        }

        if c != '$' {
            out.push(c);
            rest = &rest[c.len_utf8()..];
            continue;
        }

        let after = &rest[1..];
        if after.starts_with('$') {
            out.push_str("$$");
            rest = &after[1..];
        } else if after.starts_with('&') {
            out.push_str("${0}");
            rest = &after[1..];
        } else if let Some((name, tail)) = after
            .strip_prefix('<')
            .and_then(|s| s.find('>').map(|end| (&s[..end], &s[end + 1..])))
        {
            if groups.has_name(name) {
                out.push_str("${");
                out.push_str(name);
                out.push('}');
            } else {
                out.push_str("$$<");
                out.push_str(name);
                out.push('>');
            }
            rest = tail;
        } else {
            // `$nn` takes two digits only when that group exists, like JS.
            let digits: String = after.chars().take(2).take_while(char::is_ascii_digit).collect();
            let width = [2, 1].into_iter().find(|&w| {
                digits.len() >= w && digits[..w].parse::<usize>().is_ok_and(|i| groups.has_index(i))
            });
            match width {
                Some(w) => {
                    out.push_str("${");
                    out.push_str(&after[..w]);
                    out.push('}');
                    rest = &after[w..];
                }
                None => {
                    out.push_str("$$");
                    rest = after;
                }
            }
        }
    }
    out
}

// ── Pipeline ──────────────────────────────────────────────────────────────

/// A compiled pattern from whichever engine accepted it.
#[derive(Debug, Clone)]
enum Matcher {
    Plain(regex::Regex),
    /// Lookaround and backreferences
    Fancy(fancy_regex::Regex),
}

impl Matcher {
    fn build(pattern: &str, flags: RegexFlags) -> Result<Self, String> {
        let plain = RegexBuilder::new(pattern)
            .case_insensitive(flags.case_insensitive)
            .multi_line(flags.multi_line)
            .dot_matches_new_line(flags.dot_all)
            .build();
        let plain_err = match plain {
            Ok(regex) => return Ok(Matcher::Plain(regex)),
            Err(e) => e,
        };

        fancy_regex::Regex::new(&format!("{}{pattern}", flags.inline_prefix()))
            .map(Matcher::Fancy)
            .map_err(|_| plain_err.to_string())
    }

    fn groups(&self) -> CaptureGroups {
        match self {
            Matcher::Plain(regex) => CaptureGroups::from_names(regex.capture_names()),
            Matcher::Fancy(regex) => CaptureGroups::from_names(regex.capture_names()),
        }
    }

    fn replace_all<'t>(&self, text: &'t str, replacement: &str) -> Result<Cow<'t, str>, String> {
        match self {
            Matcher::Plain(regex) => Ok(regex.replace_all(text, replacement)),
            Matcher::Fancy(regex) => regex
                .try_replacen(text, 0, replacement)
                .map_err(|e| e.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    name: String,
    matcher: Matcher,
    replacement: String,
}

/// Ordered, compiled rules for one session.
#[derive(Debug, Clone, Default)]
pub struct RegexPipeline {
    rules: Vec<CompiledRule>,
    skipped: Vec<RegexRuleError>,
}

impl RegexPipeline {
    /// A pipeline that only trims.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile `bundle` for one session. Placeholders feed `substituteRegex`
    /// and the replacement strings.
    pub fn compile(bundle: &RegexBundle, defaults: RegexFlags, placeholders: &Placeholders) -> Self {
        let mut skipped = bundle.errors.clone();
        let mut rules = Vec::with_capacity(bundle.rules.len());

        // Names go into replacement strings, where `$` is special.
        let replacement_names = Placeholders::new(
            &placeholders.user().replace('$', "$$"),
            &placeholders.character().replace('$', "$$"),
        );

        for rule in bundle.rules.iter().filter(|r| !r.disabled) {
            match Self::compile_rule(rule, defaults, placeholders, &replacement_names) {
                Ok(compiled) => rules.push(compiled),
                Err(e) => {
                    warn!(rule = %rule.label(), error = %e, "Skipping malformed regex rule");
                    skipped.push(e);
                }
            }
        }

        debug!(
            rules = rules.len(),
            skipped = skipped.len(),
            "Regex pipeline compiled"
        );

        Self { rules, skipped }
    }

    fn compile_rule(
        rule: &RegexRule,
        defaults: RegexFlags,
        placeholders: &Placeholders,
        replacement_names: &Placeholders,
    ) -> Result<CompiledRule, RegexRuleError> {
        let (body, flags) = split_literal(&rule.find_regex, defaults);

        let pattern = match rule.substitute_regex {
            1 => placeholders.substitute(body),
            2 => Placeholders::new(
                &regex::escape(placeholders.user()),
                &regex::escape(placeholders.character()),
            )
            .substitute(body),
            _ => body.to_string(),
        };

        if pattern.is_empty() {
            return Err(RegexRuleError::EmptyPattern(rule.label().to_string()));
        }

        let matcher =
            Matcher::build(&pattern, flags).map_err(|reason| RegexRuleError::InvalidPattern {
                rule: rule.label().to_string(),
                reason,
            })?;
        let replacement = translate_replacement(&rule.replace_string, &matcher.groups());

        Ok(CompiledRule {
            name: rule.label().to_string(),
            replacement: replacement_names.substitute(&replacement),
            matcher,
        })
    }

    /// Apply every rule in order, then trim surrounding whitespace.
    pub fn process(&self, text: &str) -> String {
        let mut current = text.to_string();
        for rule in &self.rules {
            match rule.matcher.replace_all(&current, &rule.replacement) {
                Ok(Cow::Owned(changed)) => {
                    debug!(rule = %rule.name, "Regex rule rewrote reply");
                    current = changed;
                }
                Ok(Cow::Borrowed(_)) => {}
                Err(e) => warn!(rule = %rule.name, error = %e, "Regex rule failed at match time"),
            }
        }
        current.trim().to_string()
    }

    /// Number of active rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules left out because they could not be read or compiled.
    pub fn skipped(&self) -> &[RegexRuleError] {
        &self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Placeholders {
        Placeholders::new("Sam", "Nia")
    }

    fn pipeline(rules: Vec<RegexRule>) -> RegexPipeline {
        RegexPipeline::compile(&RegexBundle::from_rules(rules), RegexFlags::default(), &names())
    }

    fn disabled(find: &str, replace: &str) -> RegexRule {
        RegexRule {
            disabled: true,
            ..RegexRule::new(find, replace)
        }
    }

    #[test]
    fn collapses_double_spaces_and_ignores_disabled_rules() {
        let p = pipeline(vec![
            disabled("Hello", "Goodbye"),
            RegexRule::new(" {2,}", " "),
            disabled("world", "moon"),
        ]);
        assert_eq!(p.len(), 1);

        let once = p.process("  Hello    brave  world  ");
        assert_eq!(once, "Hello brave world");
        assert_eq!(p.process(&once), once);
    }

    #[test]
    fn rules_apply_sequentially() {
        let p = pipeline(vec![RegexRule::new("cat", "dog"), RegexRule::new("dog", "wolf")]);
        assert_eq!(p.process("cat"), "wolf");
    }

    #[test]
    fn invalid_rule_is_skipped_not_fatal() {
        let p = pipeline(vec![
            RegexRule::new("(unclosed", ""),
            RegexRule::new("<thinking>.*?</thinking>", ""),
        ]);
        assert_eq!(p.len(), 1);
        assert_eq!(p.skipped().len(), 1);
        assert!(matches!(p.skipped()[0], RegexRuleError::InvalidPattern { .. }));
        assert_eq!(p.process("<thinking>\nplan\n</thinking>\nHi!"), "Hi!");
    }

    #[test]
    fn empty_pattern_is_skipped() {
        let p = pipeline(vec![RegexRule::new("", "x")]);
        assert!(p.is_empty());
        assert!(matches!(p.skipped()[0], RegexRuleError::EmptyPattern(_)));
    }

    #[test]
    fn deletion_rules_are_idempotent() {
        let p = pipeline(vec![
            RegexRule::new("<disclaimer>.*?</disclaimer>", ""),
            RegexRule::new(r"\*\*", ""),
            RegexRule::new("『|』", ""),
            RegexRule::new(r"\n{3,}", "\n\n"),
        ]);
        let samples = [
            "『Hi』 **there**\n\n\n\n<disclaimer>\nlegal\n</disclaimer>  ",
            "plain",
            "   ",
            "**『**』**",
        ];
        for sample in samples {
            let once = p.process(sample);
            assert_eq!(p.process(&once), once, "not idempotent on {sample:?}");
        }
    }

    #[test]
    fn growing_rule_is_not_idempotent() {
        // Allowed configuration; re-applying keeps changing the text.
        let p = pipeline(vec![RegexRule::new("a", "aa")]);
        let once = p.process("a");
        let twice = p.process(&once);
        assert_eq!(once, "aa");
        assert_eq!(twice, "aaaa");
        assert_ne!(once, twice);
    }

    #[test]
    fn default_flags_are_case_insensitive_dotall_multiline() {
        let p = pipeline(vec![
            RegexRule::new("<THINKING>.*</thinking>", ""),
            RegexRule::new(r"^note:[^\n]*\n", ""),
        ]);
        assert_eq!(p.process("<thinking>a\nb</thinking>\nNOTE: x\nreply"), "reply");
    }

    #[test]
    fn slash_literal_sets_its_own_flags() {
        let p = pipeline(vec![RegexRule::new("/abc/g", "X")]);
        assert_eq!(p.process("abc ABC"), "X ABC");

        let p = pipeline(vec![RegexRule::new("/abc/gi", "X")]);
        assert_eq!(p.process("abc ABC"), "X X");
    }

    #[test]
    fn js_replacement_syntax_is_translated() {
        let groups = CaptureGroups {
            count: 2,
            names: vec!["word".into()],
        };
        assert_eq!(translate_replacement("$1x", &groups), "${1}x");
        assert_eq!(translate_replacement("[$&]", &groups), "[${0}]");
        assert_eq!(translate_replacement("<{{match}}>", &groups), "<${0}>");
        assert_eq!(translate_replacement("$<word>!", &groups), "${word}!");
        assert_eq!(translate_replacement("cost: $$5 or $", &groups), "cost: $$5 or $$");

        let p = pipeline(vec![RegexRule::new(r"(\w+)@(\w+)", "$2 at $1")]);
        assert_eq!(p.process("nia@home"), "home at nia");
    }

    #[test]
    fn placeholders_substitute_into_patterns_and_replacements() {
        let raw = RegexRule {
            substitute_regex: 1,
            ..RegexRule::new("^{{char}}:\\s*", "")
        };
        let p = pipeline(vec![raw, RegexRule::new("you", "{{user}}")]);
        assert_eq!(p.process("Nia: hello you"), "hello Sam");
    }

    #[test]
    fn escaped_substitution_treats_names_literally() {
        let names = Placeholders::new("S.m", "N+a");
        let rule = RegexRule {
            substitute_regex: 2,
            ..RegexRule::new("{{user}}", "U")
        };
        let p = RegexPipeline::compile(
            &RegexBundle::from_rules(vec![rule]),
            RegexFlags::default(),
            &names,
        );
        assert_eq!(p.process("Sam S.m"), "Sam U");
    }

    #[test]
    fn dollar_in_name_stays_literal_in_replacement() {
        let names = Placeholders::new("$1", "Nia");
        let p = RegexPipeline::compile(
            &RegexBundle::from_rules(vec![RegexRule::new("(you)", "{{user}}")]),
            RegexFlags::default(),
            &names,
        );
        assert_eq!(p.process("you"), "$1");
    }

    #[test]
    fn loads_rule_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b_second.json"),
            r#"{"findRegex": "dog", "replaceString": "wolf"}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a_first.json"),
            r#"{"scriptName": "cat to dog", "findRegex": "cat", "replaceString": "dog"}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("c_broken.json"), "{nope").unwrap();
        std::fs::write(dir.path().join("readme.txt"), "ignored").unwrap();

        let bundle = RegexBundle::load_dir(dir.path());
        assert_eq!(bundle.rules.len(), 2);
        assert_eq!(bundle.rules[0].script_name, "cat to dog");
        assert_eq!(bundle.rules[1].script_name, "b_second");
        assert_eq!(bundle.errors.len(), 1);

        let p = RegexPipeline::compile(&bundle, RegexFlags::default(), &names());
        assert_eq!(p.process("cat"), "wolf");
        assert_eq!(p.skipped().len(), 1);
    }

    #[test]
    fn missing_dir_is_empty_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = RegexBundle::load_dir(&dir.path().join("nope"));
        assert!(bundle.rules.is_empty());
        assert!(bundle.errors.is_empty());
    }

    #[test]
    fn unknown_group_references_stay_literal() {
        let groups = CaptureGroups {
            count: 1,
            names: Vec::new(),
        };
        assert_eq!(translate_replacement("$2", &groups), "$$2");
        assert_eq!(translate_replacement("$0", &groups), "$$0");
        assert_eq!(translate_replacement("$<nope>", &groups), "$$<nope>");
        // `$12` falls back to `$1` followed by a literal `2`.
        assert_eq!(translate_replacement("$12", &groups), "${1}2");

        let p = pipeline(vec![RegexRule::new(r"(\w+)", "[$1|$2|$<tag>]")]);
        assert_eq!(p.process("hi"), "[hi|$2|$<tag>]");

        let p = pipeline(vec![RegexRule::new(r"(?<tag>\w+)", "<$<tag>>")]);
        assert_eq!(p.process("hi"), "<hi>");
    }

    #[test]
    fn lookaround_rules_compile_and_rewrite() {
        let p = pipeline(vec![RegexRule::new(r"(?<=[一-鿿])[ \t]+(?=[一-鿿])", "")]);
        assert_eq!(p.len(), 1);
        assert!(p.skipped().is_empty());
        assert_eq!(p.process("你 好, hello world 世\t界"), "你好, hello world 世界");
    }

    #[test]
    fn backreference_rules_compile_with_flags() {
        let p = pipeline(vec![
            RegexRule::new(r"\b(\w+) \1\b", "$1"),
            RegexRule::new("/^(?!>)NOTE: .*$/gm", ""),
        ]);
        assert_eq!(p.len(), 2);
        assert_eq!(p.process("the the cat\nnote: keep\nNOTE: drop"), "the cat\nnote: keep");

        // Default flags reach the fallback engine too.
        let p = pipeline(vec![RegexRule::new(r"NIA(?=\.)", "Nia")]);
        assert_eq!(p.process("nia. nia!"), "Nia. nia!");
    }

    #[test]
    fn pattern_rejected_by_both_engines_is_skipped() {
        let p = pipeline(vec![RegexRule::new(r"(?<=a", "")]);
        assert!(p.is_empty());
        assert!(matches!(p.skipped()[0], RegexRuleError::InvalidPattern { .. }));
    }

    #[test]
    fn empty_pipeline_only_trims() {
        assert_eq!(RegexPipeline::empty().process("  hi \n"), "hi");
    }
}
