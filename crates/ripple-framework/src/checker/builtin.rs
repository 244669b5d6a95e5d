use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ripple_core::{Event, NoticeType, RequestType};

use super::Check;

// ============================================================================
// Closure checkers
// ============================================================================

/// A checker backed by a synchronous closure.
pub struct FnChecker<F> {
    f: F,
}

impl<F> FnChecker<F>
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    /// Wraps the closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Check for FnChecker<F>
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    async fn check(&self, event: &Arc<Event>) -> bool {
        (self.f)(event)
    }
}

/// A checker backed by an async closure.
pub struct AsyncFnChecker<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnChecker<F, Fut>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    /// Wraps the closure.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> Check for AsyncFnChecker<F, Fut>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    async fn check(&self, event: &Arc<Event>) -> bool {
        (self.f)(Arc::clone(event)).await
    }
}

// ============================================================================
// Event shape checkers
// ============================================================================

/// Passes message events that mention someone.
///
/// With a target, one of the mentions must be that id (`"all"` included).
#[derive(Debug, Clone, Default)]
pub struct AtChecker {
    target: Option<String>,
}

impl AtChecker {
    /// Any mention passes.
    pub fn any() -> Self {
        Self::default()
    }

    /// Only a mention of `target` passes.
    pub fn target(target: impl ToString) -> Self {
        Self {
            target: Some(target.to_string()),
        }
    }
}

#[async_trait]
impl Check for AtChecker {
    async fn check(&self, event: &Arc<Event>) -> bool {
        let Some(message) = event.as_message() else {
            return false;
        };
        match &self.target {
            Some(target) => message.at_targets.iter().any(|qq| qq == target),
            None => !message.at_targets.is_empty(),
        }
    }
}

/// Passes add-friend requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct FriendRequestChecker;

#[async_trait]
impl Check for FriendRequestChecker {
    async fn check(&self, event: &Arc<Event>) -> bool {
        event
            .as_request()
            .is_some_and(|r| r.request_type == RequestType::Friend)
    }
}

/// Passes group join and invite requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupRequestChecker;

#[async_trait]
impl Check for GroupRequestChecker {
    async fn check(&self, event: &Arc<Event>) -> bool {
        event
            .as_request()
            .is_some_and(|r| r.request_type == RequestType::Group)
    }
}

/// Passes notices of one type, or all notices when no type is given.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoticeTypeChecker {
    notice_type: Option<NoticeType>,
}

impl NoticeTypeChecker {
    /// Creates the checker. `None` accepts every notice.
    pub fn new(notice_type: Option<NoticeType>) -> Self {
        Self { notice_type }
    }
}

#[async_trait]
impl Check for NoticeTypeChecker {
    async fn check(&self, event: &Arc<Event>) -> bool {
        let Some(notice) = event.as_notice() else {
            return false;
        };
        self.notice_type.is_none_or(|t| t == notice.notice_type)
    }
}

// ============================================================================
// Access control
// ============================================================================

/// Permission tiers, ordered by trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserLevel {
    /// Blacklisted users.
    Black = -1,
    /// Everyone else.
    User = 10,
    /// Whitelisted users.
    White = 100,
    /// Super users.
    Su = 1000,
    /// The bot owner.
    Owner = 10000,
}

/// The user and group lists an [`AccessChecker`] consults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessList {
    /// Owner account.
    pub owner: Option<i64>,
    /// Super users.
    pub super_users: Vec<i64>,
    /// Whitelisted users.
    pub white_users: Vec<i64>,
    /// Blacklisted users.
    pub black_users: Vec<i64>,
    /// If non-empty, group events from other groups are rejected.
    pub white_groups: Vec<i64>,
}

impl AccessList {
    /// Resolves the level of a user. The blacklist wins over every other list.
    pub fn level_of(&self, user_id: i64) -> UserLevel {
        if self.black_users.contains(&user_id) {
            UserLevel::Black
        } else if self.owner == Some(user_id) {
            UserLevel::Owner
        } else if self.super_users.contains(&user_id) {
            UserLevel::Su
        } else if self.white_users.contains(&user_id) {
            UserLevel::White
        } else {
            UserLevel::User
        }
    }
}

/// Passes events whose sender reaches a minimum [`UserLevel`].
#[derive(Debug, Clone)]
pub struct AccessChecker {
    level: UserLevel,
    list: Arc<AccessList>,
}

impl AccessChecker {
    /// Requires at least `level` under `list`.
    pub fn new(level: UserLevel, list: Arc<AccessList>) -> Self {
        Self { level, list }
    }
}

#[async_trait]
impl Check for AccessChecker {
    async fn check(&self, event: &Arc<Event>) -> bool {
        let Some(user_id) = event.user_id() else {
            return false;
        };
        if let Some(group_id) = event.group_id() {
            if !self.list.white_groups.is_empty() && !self.list.white_groups.contains(&group_id) {
                return false;
            }
        }
        self.list.level_of(user_id) >= self.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::Checker;
    use crate::testing::{event, group_message, private_message};
    use serde_json::json;

    #[tokio::test]
    async fn test_at_checker() {
        let mention = Arc::new(event(json!({
            "post_type": "message", "message_type": "group", "message_id": 1,
            "user_id": 5, "group_id": 9, "message": "[CQ:at,qq=10001] hi"
        })));
        let plain = Arc::new(group_message(5, 9, "hi"));

        assert!(AtChecker::any().check(&mention).await);
        assert!(AtChecker::target(10001).check(&mention).await);
        assert!(!AtChecker::target(42).check(&mention).await);
        assert!(!AtChecker::any().check(&plain).await);
    }

    #[tokio::test]
    async fn test_request_and_notice_checkers() {
        let friend = Arc::new(event(json!({
            "post_type": "request", "request_type": "friend", "user_id": 1, "flag": "x"
        })));
        let poke = Arc::new(event(json!({
            "post_type": "notice", "notice_type": "notify", "sub_type": "poke", "user_id": 1
        })));

        assert!(FriendRequestChecker.check(&friend).await);
        assert!(!GroupRequestChecker.check(&friend).await);
        assert!(!FriendRequestChecker.check(&poke).await);

        assert!(NoticeTypeChecker::new(None).check(&poke).await);
        assert!(NoticeTypeChecker::new(Some(NoticeType::Notify)).check(&poke).await);
        assert!(!NoticeTypeChecker::new(Some(NoticeType::GroupBan)).check(&poke).await);
    }

    #[tokio::test]
    async fn test_access_levels() {
        let list = Arc::new(AccessList {
            owner: Some(1),
            super_users: vec![2],
            white_users: vec![3],
            black_users: vec![4, 1],
            white_groups: vec![],
        });

        assert_eq!(list.level_of(1), UserLevel::Black);
        assert_eq!(list.level_of(2), UserLevel::Su);
        assert_eq!(list.level_of(3), UserLevel::White);
        assert_eq!(list.level_of(99), UserLevel::User);

        let su = Checker::new(AccessChecker::new(UserLevel::Su, Arc::clone(&list)));
        assert!(su.check(&Arc::new(private_message(2, "x"))).await);
        assert!(!su.check(&Arc::new(private_message(3, "x"))).await);

        let user = Checker::new(AccessChecker::new(UserLevel::User, list));
        assert!(user.check(&Arc::new(private_message(99, "x"))).await);
        assert!(!user.check(&Arc::new(private_message(4, "x"))).await);
    }

    #[tokio::test]
    async fn test_access_white_groups() {
        let list = Arc::new(AccessList {
            white_groups: vec![100],
            ..Default::default()
        });
        let checker = AccessChecker::new(UserLevel::User, list);

        assert!(checker.check(&Arc::new(group_message(5, 100, "x"))).await);
        assert!(!checker.check(&Arc::new(group_message(5, 200, "x"))).await);
        assert!(checker.check(&Arc::new(private_message(5, "x"))).await);
    }

    #[tokio::test]
    async fn test_async_fn_checker() {
        let checker = Checker::new(AsyncFnChecker::new(|event: Arc<Event>| async move {
            event.text().len() > 3
        }));
        assert!(checker.check(&Arc::new(private_message(1, "long text"))).await);
        assert!(!checker.check(&Arc::new(private_message(1, "no"))).await);
    }
}
