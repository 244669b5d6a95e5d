//! Text matchers.
//!
//! A [`Matcher`] is a synchronous, pure predicate over message text. Like
//! [`Checker`](crate::Checker) it composes into `And`/`Or`/`Xor`/`Not` trees,
//! but carries no callbacks, so it is cheap to clone and share.
//!
//! ```rust,ignore
//! let greet = Matcher::new(StartMatcher::new(["hi", "hello"], LogicMode::Or)?)
//!     & !Matcher::new(ContainMatcher::single("bye"));
//! assert!(greet.is_match("hello there"));
//! ```

use std::ops::{BitAnd, BitOr, BitXor, Not};
use std::sync::Arc;

use regex::Regex;

use crate::error::{PredicateError, PredicateResult};
use crate::logic::LogicMode;

/// The evaluation logic of a leaf matcher.
pub trait Match: Send + Sync {
    /// Returns whether the text matches.
    fn is_match(&self, text: &str) -> bool;
}

enum Node {
    Leaf(Box<dyn Match>),
    Wrapped {
        mode: LogicMode,
        left: Matcher,
        right: Option<Matcher>,
    },
}

/// A composable text predicate.
#[derive(Clone)]
pub struct Matcher {
    node: Arc<Node>,
}

impl Matcher {
    /// Creates a leaf matcher.
    pub fn new(m: impl Match + 'static) -> Self {
        Self {
            node: Arc::new(Node::Leaf(Box::new(m))),
        }
    }

    /// Combines matchers under `mode`.
    ///
    /// Binary modes need `right`; `Not` must not be given one.
    pub fn combine(mode: LogicMode, left: Matcher, right: Option<Matcher>) -> PredicateResult<Self> {
        match (mode.is_binary(), right.is_some()) {
            (true, false) => Err(PredicateError::MissingOperand { mode }),
            (false, true) => Err(PredicateError::UnexpectedOperand),
            _ => Ok(Self::wrapped(mode, left, right)),
        }
    }

    fn wrapped(mode: LogicMode, left: Matcher, right: Option<Matcher>) -> Self {
        Self {
            node: Arc::new(Node::Wrapped { mode, left, right }),
        }
    }

    /// Both matchers match.
    pub fn and(self, other: Matcher) -> Self {
        Self::wrapped(LogicMode::And, self, Some(other))
    }

    /// Either matcher matches.
    pub fn or(self, other: Matcher) -> Self {
        Self::wrapped(LogicMode::Or, self, Some(other))
    }

    /// Exactly one matcher matches.
    pub fn xor(self, other: Matcher) -> Self {
        Self::wrapped(LogicMode::Xor, self, Some(other))
    }

    /// Evaluates the tree against `text`.
    pub fn is_match(&self, text: &str) -> bool {
        match &*self.node {
            Node::Leaf(m) => m.is_match(text),
            Node::Wrapped { mode, left, right } => {
                let l = left.is_match(text);
                let r = right.as_ref().map(|right| right.is_match(text));
                mode.calc(l, r).unwrap_or(false)
            }
        }
    }
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &*self.node {
            Node::Leaf(_) => f.write_str("Matcher::Leaf"),
            Node::Wrapped { mode, left, right } => f
                .debug_struct("Matcher::Wrapped")
                .field("mode", mode)
                .field("left", left)
                .field("right", right)
                .finish(),
        }
    }
}

impl BitAnd for Matcher {
    type Output = Matcher;

    fn bitand(self, rhs: Matcher) -> Matcher {
        self.and(rhs)
    }
}

impl BitOr for Matcher {
    type Output = Matcher;

    fn bitor(self, rhs: Matcher) -> Matcher {
        self.or(rhs)
    }
}

impl BitXor for Matcher {
    type Output = Matcher;

    fn bitxor(self, rhs: Matcher) -> Matcher {
        self.xor(rhs)
    }
}

impl Not for Matcher {
    type Output = Matcher;

    fn not(self) -> Matcher {
        Self::wrapped(LogicMode::Not, self, None)
    }
}

// ============================================================================
// Built-in matchers
// ============================================================================

/// Targets folded under a binary mode.
#[derive(Debug, Clone)]
struct Targets {
    targets: Vec<String>,
    mode: LogicMode,
}

impl Targets {
    fn new<I, S>(targets: I, mode: LogicMode) -> PredicateResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !mode.is_binary() {
            return Err(PredicateError::UnsupportedSequenceMode { mode });
        }
        let targets: Vec<String> = targets.into_iter().map(Into::into).collect();
        if targets.is_empty() {
            return Err(PredicateError::EmptyTargets);
        }
        Ok(Self { targets, mode })
    }

    fn single(target: impl Into<String>) -> Self {
        Self {
            targets: vec![target.into()],
            mode: LogicMode::Or,
        }
    }

    fn fold(&self, test: impl Fn(&str) -> bool) -> bool {
        self.mode
            .seq_calc(self.targets.iter().map(|t| test(t)))
            .unwrap_or(false)
    }
}

macro_rules! text_matcher {
    ($(#[$doc:meta])* $name:ident, |$text:ident, $target:ident| $test:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            targets: Targets,
        }

        impl $name {
            /// Matches against several targets, folded with `mode`.
            pub fn new<I, S>(targets: I, mode: LogicMode) -> PredicateResult<Self>
            where
                I: IntoIterator<Item = S>,
                S: Into<String>,
            {
                Ok(Self {
                    targets: Targets::new(targets, mode)?,
                })
            }

            /// Matches against one target.
            pub fn single(target: impl Into<String>) -> Self {
                Self {
                    targets: Targets::single(target),
                }
            }
        }

        impl Match for $name {
            fn is_match(&self, $text: &str) -> bool {
                self.targets.fold(|$target| $test)
            }
        }
    };
}

text_matcher!(
    /// Text starts with the target.
    StartMatcher,
    |text, target| text.starts_with(target)
);
text_matcher!(
    /// Text contains the target.
    ContainMatcher,
    |text, target| text.contains(target)
);
text_matcher!(
    /// Text ends with the target.
    EndMatcher,
    |text, target| text.ends_with(target)
);
text_matcher!(
    /// Text equals the target.
    FullMatcher,
    |text, target| text == target
);

/// Text matches a regular expression anywhere.
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    regex: Regex,
}

impl RegexMatcher {
    /// Compiles the pattern.
    pub fn new(pattern: &str) -> PredicateResult<Self> {
        let regex = Regex::new(pattern).map_err(|e| PredicateError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { regex })
    }
}

impl Match for RegexMatcher {
    fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}
