//! `{{user}}` / `{{char}}` placeholder substitution.
//!
//! Tokens match ASCII case-insensitively (`{{User}}`, `{{CHAR}}`), the way
//! card authors actually write them. Substitution is repeated until no token
//! is left, so text like `{{{{char}}}}` with a character named `user` cannot
//! leak a token through. Brace characters are stripped from the substituted
//! names, which makes every pass remove braces and guarantees termination.

const TOKEN_LEN: usize = 8;
const USER_TOKEN: &[u8; TOKEN_LEN] = b"{{user}}";
const CHAR_TOKEN: &[u8; TOKEN_LEN] = b"{{char}}";

/// The two values substituted into persona and preset text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholders {
    user: String,
    character: String,
}

impl Placeholders {
    pub fn new(user: &str, character: &str) -> Self {
        Self {
            user: strip_braces(user),
            character: strip_braces(character),
        }
    }

    /// The value that replaces `{{user}}`.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// The value that replaces `{{char}}`.
    pub fn character(&self) -> &str {
        &self.character
    }

    /// Replace every placeholder token in `text`.
    pub fn substitute(&self, text: &str) -> String {
        let mut current = match self.substitute_once(text) {
            Some(next) => next,
            None => return text.to_string(),
        };
        while let Some(next) = self.substitute_once(&current) {
            current = next;
        }
        current
    }

    /// One left-to-right pass. Returns `None` when nothing was replaced.
    fn substitute_once(&self, text: &str) -> Option<String> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        let mut replaced = false;

        while let Some(pos) = rest.find("{{") {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            match self.token_value(tail) {
                Some(value) => {
                    out.push_str(value);
                    rest = &tail[TOKEN_LEN..];
                    replaced = true;
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
        out.push_str(rest);

        replaced.then_some(out)
    }

    fn token_value(&self, tail: &str) -> Option<&str> {
        let head = tail.as_bytes().get(..TOKEN_LEN)?;
        if head.eq_ignore_ascii_case(USER_TOKEN) {
            Some(&self.user)
        } else if head.eq_ignore_ascii_case(CHAR_TOKEN) {
            Some(&self.character)
        } else {
            None
        }
    }
}

/// True if `text` still holds a `{{user}}` or `{{char}}` token in any case.
pub fn contains_placeholder(text: &str) -> bool {
    text.as_bytes().windows(TOKEN_LEN).any(|w| {
        w.eq_ignore_ascii_case(USER_TOKEN) || w.eq_ignore_ascii_case(CHAR_TOKEN)
    })
}

fn strip_braces(value: &str) -> String {
    value.chars().filter(|c| *c != '{' && *c != '}').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_both_tokens() {
        let p = Placeholders::new("Sam", "Nia");
        assert_eq!(p.substitute("{{char}} waves at {{user}}."), "Nia waves at Sam.");
    }

    #[test]
    fn tokens_match_case_insensitively() {
        let p = Placeholders::new("Sam", "Nia");
        assert_eq!(p.substitute("{{Char}} / {{USER}}"), "Nia / Sam");
    }

    #[test]
    fn text_without_tokens_is_unchanged() {
        let p = Placeholders::new("Sam", "Nia");
        assert_eq!(p.substitute("{ {user} } {{nope}} {{"), "{ {user} } {{nope}} {{");
    }

    #[test]
    fn multibyte_text_survives() {
        let p = Placeholders::new("泠泠", "尤利娅");
        assert_eq!(p.substitute("「{{char}}」看着{{user}}"), "「尤利娅」看着泠泠");
    }

    #[test]
    fn nested_tokens_cannot_leak() {
        // After one pass "{{{{char}}}}" becomes "{{user}}" because the
        // character is literally named "user".
        let p = Placeholders::new("Sam", "user");
        let out = p.substitute("{{{{char}}}}");
        assert_eq!(out, "Sam");
        assert!(!contains_placeholder(&out));
    }

    #[test]
    fn names_carrying_tokens_are_neutralised() {
        let p = Placeholders::new("{{char}}", "{{user}}");
        let out = p.substitute("{{user}} meets {{char}}");
        assert!(!contains_placeholder(&out));
        assert_eq!(p.user(), "char");
        assert_eq!(p.character(), "user");
    }

    #[test]
    fn detects_leftover_tokens() {
        assert!(contains_placeholder("hello {{User}}"));
        assert!(!contains_placeholder("hello {user}"));
    }
}
