//! Prefix parsing of raw message text.

/// The pieces of a command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedCommand<'a> {
    pub prefix: &'a str,
    pub name: &'a str,
    /// Remainder after the name, trimmed. Empty when there is none.
    pub args: &'a str,
}

/// Splits message text into prefix, command word and argument string.
///
/// Prefixes are tried in configuration order and the first one that matches
/// wins, so list longer prefixes before their own prefixes (`"//"` before `"/"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParser {
    prefixes: Vec<String>,
}

impl CommandParser {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect(),
        }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// The prefix used when rendering help, `/` if none is configured.
    pub fn display_prefix(&self) -> &str {
        self.prefixes.first().map(String::as_str).unwrap_or("/")
    }

    /// Parses `text`, or returns `None` if it is not a command line.
    ///
    /// Leading whitespace is ignored. A prefix with nothing after it is not a
    /// command.
    pub fn parse<'a>(&'a self, text: &'a str) -> Option<ParsedCommand<'a>> {
        let text = text.trim_start();
        let (prefix, rest) = self
            .prefixes
            .iter()
            .find_map(|p| text.strip_prefix(p.as_str()).map(|rest| (p.as_str(), rest)))?;

        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };
        if name.is_empty() {
            return None;
        }
        Some(ParsedCommand { prefix, name, args })
    }
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new(["/", "#"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_command_with_args() {
        let parser = CommandParser::default();
        let parsed = parser.parse("/mycmd hello").unwrap();
        assert_eq!(parsed.prefix, "/");
        assert_eq!(parsed.name, "mycmd");
        assert_eq!(parsed.args, "hello");

        let parsed = parser.parse("  #mc   many   spaced words  ").unwrap();
        assert_eq!(parsed.prefix, "#");
        assert_eq!(parsed.name, "mc");
        assert_eq!(parsed.args, "many   spaced words");
    }

    #[test]
    fn test_not_a_command() {
        let parser = CommandParser::default();
        assert_eq!(parser.parse("mycmd hello"), None);
        assert_eq!(parser.parse("/"), None);
        assert_eq!(parser.parse("/ mycmd"), None);
        assert_eq!(parser.parse(""), None);
    }

    #[test]
    fn test_no_args() {
        let parser = CommandParser::default();
        let parsed = parser.parse("/ping").unwrap();
        assert_eq!(parsed.name, "ping");
        assert_eq!(parsed.args, "");
    }

    #[test]
    fn test_first_matching_prefix_wins() {
        let parser = CommandParser::new(["!!", "!"]);
        assert_eq!(parser.parse("!!ban 42").unwrap().prefix, "!!");
        assert_eq!(parser.parse("!ban 42").unwrap().prefix, "!");

        let parser = CommandParser::new(["!", "!!"]);
        assert_eq!(parser.parse("!!ban").unwrap().name, "!ban");
    }

    #[test]
    fn test_empty_prefixes_are_ignored() {
        let parser = CommandParser::new(["", "/"]);
        assert_eq!(parser.prefixes(), ["/".to_string()]);
        assert_eq!(parser.parse("ping"), None);
    }
}
