//! Command parsing.
//!
//! A [`Parser`] turns message text into [`ParseArgs`]. Results are cached on the
//! event under the parser's [`id`](Parser::id), so several handlers sharing an
//! equivalent parser only parse once, while different parsers never see each
//! other's results.

use ripple_core::{Event, ParseArgs};

use crate::error::{PredicateError, PredicateResult};

/// Extracts arguments from message text.
pub trait Parser: Send + Sync {
    /// Identity of the parser; equal ids must imply equal results.
    fn id(&self) -> &str;

    /// Parses the text. `None` means the text is not for this parser.
    fn parse(&self, text: &str) -> Option<ParseArgs>;
}

/// Parses an event, reusing a cached result if this parser already ran on it.
pub fn parse_event(parser: &dyn Parser, event: &Event) -> Option<ParseArgs> {
    if let Some(cached) = event.args(parser.id()) {
        return cached;
    }
    let args = parser.parse(event.text());
    event.store_args(parser.id(), args.clone());
    args
}

/// Parses `<start><command><sep><arg><sep><arg>...`.
///
/// ```rust,ignore
/// let parser = CmdParser::new(["."], [" "], ["echo"])?;
/// let args = parser.parse(".echo  hello world").unwrap();
/// assert_eq!(args.command, "echo");
/// assert_eq!(args.values, ["hello", "world"]);
/// ```
#[derive(Debug, Clone)]
pub struct CmdParser {
    id: String,
    starts: Vec<String>,
    separators: Vec<String>,
    targets: Vec<String>,
}

impl CmdParser {
    /// Creates a parser. All three lists must be non-empty.
    pub fn new<A, B, C>(starts: A, separators: B, targets: C) -> PredicateResult<Self>
    where
        A: IntoIterator,
        A::Item: Into<String>,
        B: IntoIterator,
        B::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        let starts = collect_non_empty(starts)?;
        let mut separators = collect_non_empty(separators)?;
        let targets = collect_non_empty(targets)?;
        // Longer separators first so that "  " is not split as two " ".
        separators.sort_by_key(|s| std::cmp::Reverse(s.len()));

        let id = format!(
            "cmd[{}|{}|{}]",
            starts.join(","),
            separators.join(","),
            targets.join(",")
        );
        Ok(Self {
            id,
            starts,
            separators,
            targets,
        })
    }

    fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut tokens = vec![text];
        for sep in &self.separators {
            tokens = tokens.into_iter().flat_map(|t| t.split(sep.as_str())).collect();
        }
        tokens.retain(|t| !t.is_empty());
        tokens
    }
}

impl Parser for CmdParser {
    fn id(&self) -> &str {
        &self.id
    }

    fn parse(&self, text: &str) -> Option<ParseArgs> {
        let text = text.trim();
        let body = self.starts.iter().find_map(|s| text.strip_prefix(s.as_str()))?;
        let mut tokens = self.split(body).into_iter();
        let command = tokens.next()?;
        if !self.targets.iter().any(|t| t == command) {
            return None;
        }
        Some(ParseArgs {
            command: command.to_string(),
            values: tokens.map(str::to_string).collect(),
        })
    }
}

fn collect_non_empty<I>(items: I) -> PredicateResult<Vec<String>>
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    let items: Vec<String> = items
        .into_iter()
        .map(Into::into)
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        Err(PredicateError::EmptyTargets)
    } else {
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::private_message;

    #[test]
    fn test_cmd_parser() {
        let parser = CmdParser::new([".", "/"], [" ", ","], ["echo", "say"]).unwrap();

        let args = parser.parse(".echo  hello,world").unwrap();
        assert_eq!(args.command, "echo");
        assert_eq!(args.values, vec!["hello", "world"]);

        let args = parser.parse("  /say").unwrap();
        assert_eq!(args.command, "say");
        assert!(args.values.is_empty());

        assert!(parser.parse("echo hi").is_none());
        assert!(parser.parse(".unknown hi").is_none());
        assert!(parser.parse(".").is_none());
    }

    #[test]
    fn test_cmd_parser_requires_lists() {
        assert!(matches!(
            CmdParser::new(Vec::<String>::new(), [" "], ["a"]),
            Err(PredicateError::EmptyTargets)
        ));
        assert!(CmdParser::new(["."], [""], ["a"]).is_err());
    }

    #[test]
    fn test_parse_event_caches_per_parser() {
        let event = private_message(1, ".echo x");
        let echo = CmdParser::new(["."], [" "], ["echo"]).unwrap();
        let other = CmdParser::new(["."], [" "], ["other"]).unwrap();

        assert_eq!(parse_event(&echo, &event).unwrap().values, vec!["x"]);
        assert!(parse_event(&other, &event).is_none());

        assert!(event.args(echo.id()).unwrap().is_some());
        assert_eq!(event.args(other.id()), Some(None));
    }
}
