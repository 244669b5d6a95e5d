//! Event checkers.
//!
//! A [`Checker`] is an async predicate over an [`Event`]. Checkers compose with
//! [`and`](Checker::and), [`or`](Checker::or), [`xor`](Checker::xor) and
//! [`not`](Checker::not) (or the `&`, `|`, `^`, `!` operators) into a tree:
//!
//! ```text
//!            Wrapped(Or)
//!           /          \
//!    Wrapped(And)     Leaf(C)
//!     /       \
//!  Leaf(A)   Leaf(B)
//! ```
//!
//! Composition consumes its operands, so a leaf is only ever reachable from a
//! single root.
//!
//! # Callbacks
//!
//! A checker carries an optional pass callback and an optional fail callback,
//! each settable once. Filling a wrapped checker fills every node below it with
//! the same callback. When a tree is [`check`](Checker::check)ed only the root's
//! callback fires, once per evaluation.

mod builtin;

use std::future::Future;
use std::ops::{BitAnd, BitOr, BitXor, Not};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use ripple_core::Event;

use crate::error::{PredicateError, PredicateResult};
use crate::logic::LogicMode;

pub use builtin::{
    AccessChecker, AccessList, AsyncFnChecker, AtChecker, FnChecker, FriendRequestChecker,
    GroupRequestChecker, NoticeTypeChecker, UserLevel,
};

/// A shared async callback without arguments.
pub type Callback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Wraps an async closure into a [`Callback`].
pub fn callback<F, Fut>(f: F) -> Callback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// The evaluation logic of a leaf checker.
#[async_trait]
pub trait Check: Send + Sync {
    /// Returns whether the event passes.
    async fn check(&self, event: &Arc<Event>) -> bool;
}

enum Node {
    Leaf(Box<dyn Check>),
    Wrapped {
        mode: LogicMode,
        left: Box<Checker>,
        right: Option<Box<Checker>>,
    },
}

/// A composable async predicate over events.
pub struct Checker {
    node: Node,
    ok_cb: Option<Callback>,
    fail_cb: Option<Callback>,
}

impl Checker {
    /// Creates a leaf checker.
    pub fn new(check: impl Check + 'static) -> Self {
        Self::from_node(Node::Leaf(Box::new(check)))
    }

    /// Creates a leaf checker from a synchronous closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        Self::new(FnChecker::new(f))
    }

    fn from_node(node: Node) -> Self {
        Self {
            node,
            ok_cb: None,
            fail_cb: None,
        }
    }

    /// Combines checkers under `mode`.
    ///
    /// Binary modes need `right`; `Not` must not be given one.
    pub fn combine(mode: LogicMode, left: Checker, right: Option<Checker>) -> PredicateResult<Self> {
        match (mode.is_binary(), right.is_some()) {
            (true, false) => Err(PredicateError::MissingOperand { mode }),
            (false, true) => Err(PredicateError::UnexpectedOperand),
            _ => Ok(Self::from_node(Node::Wrapped {
                mode,
                left: Box::new(left),
                right: right.map(Box::new),
            })),
        }
    }

    fn binary(mode: LogicMode, left: Checker, right: Checker) -> Self {
        Self::from_node(Node::Wrapped {
            mode,
            left: Box::new(left),
            right: Some(Box::new(right)),
        })
    }

    /// Both checkers pass.
    pub fn and(self, other: Checker) -> Self {
        Self::binary(LogicMode::And, self, other)
    }

    /// Either checker passes.
    pub fn or(self, other: Checker) -> Self {
        Self::binary(LogicMode::Or, self, other)
    }

    /// Exactly one checker passes.
    pub fn xor(self, other: Checker) -> Self {
        Self::binary(LogicMode::Xor, self, other)
    }

    /// Whether this is a leaf.
    pub fn is_leaf(&self) -> bool {
        matches!(self.node, Node::Leaf(_))
    }

    /// Sets the pass callback here and on every node below.
    pub fn fill_ok_cb(&mut self, cb: Callback) -> PredicateResult<()> {
        self.fill(&cb, true)
    }

    /// Sets the fail callback here and on every node below.
    pub fn fill_fail_cb(&mut self, cb: Callback) -> PredicateResult<()> {
        self.fill(&cb, false)
    }

    /// Builder form of [`fill_ok_cb`](Self::fill_ok_cb).
    pub fn on_ok(mut self, cb: Callback) -> PredicateResult<Self> {
        self.fill_ok_cb(cb)?;
        Ok(self)
    }

    /// Builder form of [`fill_fail_cb`](Self::fill_fail_cb).
    pub fn on_fail(mut self, cb: Callback) -> PredicateResult<Self> {
        self.fill_fail_cb(cb)?;
        Ok(self)
    }

    fn fill(&mut self, cb: &Callback, ok: bool) -> PredicateResult<()> {
        let (slot, name) = if ok {
            (&mut self.ok_cb, "ok")
        } else {
            (&mut self.fail_cb, "fail")
        };
        if slot.is_some() {
            return Err(PredicateError::CallbackAlreadySet { slot: name });
        }
        *slot = Some(Arc::clone(cb));

        if let Node::Wrapped { left, right, .. } = &mut self.node {
            left.fill(cb, ok)?;
            if let Some(right) = right {
                right.fill(cb, ok)?;
            }
        }
        Ok(())
    }

    /// Evaluates the tree without firing any callback.
    pub fn evaluate<'a>(&'a self, event: &'a Arc<Event>) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            match &self.node {
                Node::Leaf(check) => check.check(event).await,
                Node::Wrapped { mode, left, right } => {
                    let l = left.evaluate(event).await;
                    let r = match right {
                        Some(right) => Some(right.evaluate(event).await),
                        None => None,
                    };
                    // Arity was validated when the node was built.
                    mode.calc(l, r).unwrap_or(false)
                }
            }
        })
    }

    /// Evaluates the tree, then fires this checker's pass or fail callback.
    pub async fn check(&self, event: &Arc<Event>) -> bool {
        let passed = self.evaluate(event).await;
        let cb = if passed { &self.ok_cb } else { &self.fail_cb };
        if let Some(cb) = cb {
            cb().await;
        }
        passed
    }
}

impl std::fmt::Debug for Checker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node {
            Node::Leaf(_) => f.write_str("Checker::Leaf"),
            Node::Wrapped { mode, left, right } => f
                .debug_struct("Checker::Wrapped")
                .field("mode", mode)
                .field("left", left)
                .field("right", right)
                .finish(),
        }
    }
}

impl BitAnd for Checker {
    type Output = Checker;

    fn bitand(self, rhs: Checker) -> Checker {
        self.and(rhs)
    }
}

impl BitOr for Checker {
    type Output = Checker;

    fn bitor(self, rhs: Checker) -> Checker {
        self.or(rhs)
    }
}

impl BitXor for Checker {
    type Output = Checker;

    fn bitxor(self, rhs: Checker) -> Checker {
        self.xor(rhs)
    }
}

impl Not for Checker {
    type Output = Checker;

    fn not(self) -> Checker {
        Self::from_node(Node::Wrapped {
            mode: LogicMode::Not,
            left: Box::new(self),
            right: None,
        })
    }
}
