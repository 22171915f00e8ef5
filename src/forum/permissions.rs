use chrono::{DateTime, Duration, Utc};
use strum_macros::Display;

use crate::user::Role;

/// Hours after creation during which authors may still edit or delete
/// their own content. Applies to every role, including admins.
pub const EDIT_WINDOW_HOURS: i64 = 24;

/// Actions an identity can attempt against forum content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ContentAction {
    Pin,
    Unpin,
    Lock,
    Unlock,
    Delete,
    Restore,
    Edit,
}

/// Decides whether `role`/`actor_id` may perform `action` on content
/// authored by `author_id`.
///
/// Pure and total: no I/O, always returns a boolean.
/// - admins may do anything
/// - moderators may delete, lock/unlock and restore any content, never pin
/// - pin/unpin is admin-only regardless of ownership
/// - authors may edit/delete their own content (the edit window is a
///   separate, time-based check the caller applies)
pub fn can_perform_action(
    action: ContentAction,
    role: Role,
    actor_id: &str,
    author_id: &str,
) -> bool {
    if role == Role::Admin {
        return true;
    }

    let is_author = actor_id == author_id;

    match action {
        ContentAction::Pin | ContentAction::Unpin => false,
        ContentAction::Lock | ContentAction::Unlock | ContentAction::Restore => {
            role == Role::Moderator
        }
        ContentAction::Delete => role == Role::Moderator || is_author,
        ContentAction::Edit => is_author,
    }
}

/// Whether content created at `created_at` is still inside the edit window
pub fn within_edit_window(created_at: DateTime<Utc>) -> bool {
    Utc::now() - created_at < Duration::hours(EDIT_WINDOW_HOURS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const AUTHOR: &str = "author-1";
    const OTHER: &str = "other-1";

    #[rstest]
    #[case(Role::Admin, AUTHOR, true)]
    #[case(Role::Admin, OTHER, true)]
    #[case(Role::Moderator, AUTHOR, false)]
    #[case(Role::Moderator, OTHER, false)]
    #[case(Role::User, AUTHOR, false)]
    #[case(Role::User, OTHER, false)]
    fn test_pin_is_admin_only(#[case] role: Role, #[case] actor: &str, #[case] expected: bool) {
        assert_eq!(
            can_perform_action(ContentAction::Pin, role, actor, AUTHOR),
            expected
        );
        assert_eq!(
            can_perform_action(ContentAction::Unpin, role, actor, AUTHOR),
            expected
        );
    }

    #[rstest]
    #[case(Role::Admin, OTHER, true)]
    #[case(Role::Moderator, OTHER, true)]
    #[case(Role::User, OTHER, false)]
    #[case(Role::User, AUTHOR, false)]
    fn test_lock_requires_moderator(
        #[case] role: Role,
        #[case] actor: &str,
        #[case] expected: bool,
    ) {
        assert_eq!(
            can_perform_action(ContentAction::Lock, role, actor, AUTHOR),
            expected
        );
        assert_eq!(
            can_perform_action(ContentAction::Unlock, role, actor, AUTHOR),
            expected
        );
        assert_eq!(
            can_perform_action(ContentAction::Restore, role, actor, AUTHOR),
            expected
        );
    }

    #[rstest]
    #[case(Role::Admin, OTHER, true)]
    #[case(Role::Moderator, OTHER, true)]
    #[case(Role::User, AUTHOR, true)] // author may delete own content
    #[case(Role::User, OTHER, false)]
    fn test_delete_matrix(#[case] role: Role, #[case] actor: &str, #[case] expected: bool) {
        assert_eq!(
            can_perform_action(ContentAction::Delete, role, actor, AUTHOR),
            expected
        );
    }

    #[rstest]
    #[case(Role::User, AUTHOR, true)]
    #[case(Role::User, OTHER, false)]
    #[case(Role::Moderator, OTHER, false)] // moderators cannot edit others' content
    #[case(Role::Moderator, AUTHOR, true)]
    #[case(Role::Admin, OTHER, true)]
    fn test_edit_is_author_bound(#[case] role: Role, #[case] actor: &str, #[case] expected: bool) {
        assert_eq!(
            can_perform_action(ContentAction::Edit, role, actor, AUTHOR),
            expected
        );
    }

    #[test]
    fn test_edit_window_boundaries() {
        assert!(within_edit_window(Utc::now()));
        assert!(within_edit_window(Utc::now() - Duration::hours(23)));
        assert!(!within_edit_window(Utc::now() - Duration::hours(25)));
    }
}
