//! Social state: followers/following sets and the like set (C8).
//!
//! Kept as one small cohesive unit per the partitioned-mutex design in
//! `Controller`: this struct never touches the peer table or file
//! transfers, so it can be locked independently of them.

use std::collections::HashSet;

#[derive(Default)]
pub struct SocialState {
    followers: HashSet<String>,
    following: HashSet<String>,
    liked_posts: HashSet<String>,
}

/// Identity used for a `LIKE`/`UNLIKE` toggle: the post's owner and its
/// `POST_TIMESTAMP`, since the protocol has no separate post-id field.
pub fn post_key(owner: &str, post_timestamp: &str) -> String {
    format!("{}|{}", owner, post_timestamp)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeAction {
    Like,
    Unlike,
}

impl LikeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LikeAction::Like => "LIKE",
            LikeAction::Unlike => "UNLIKE",
        }
    }
}

impl SocialState {
    pub fn new() -> Self {
        SocialState::default()
    }

    /// Adds `user_id` to `following`, refusing a self-follow. Returns
    /// `false` if already following (a duplicate-state request, per §7).
    pub fn follow(&mut self, local_user: &str, user_id: &str) -> bool {
        if user_id == local_user {
            return false;
        }
        self.following.insert(user_id.to_string())
    }

    pub fn unfollow(&mut self, user_id: &str) -> bool {
        self.following.remove(user_id)
    }

    pub fn add_follower(&mut self, local_user: &str, user_id: &str) -> bool {
        if user_id == local_user {
            return false;
        }
        self.followers.insert(user_id.to_string())
    }

    pub fn remove_follower(&mut self, user_id: &str) -> bool {
        self.followers.remove(user_id)
    }

    pub fn is_following(&self, user_id: &str) -> bool {
        self.following.contains(user_id)
    }

    pub fn followers(&self) -> impl Iterator<Item = &String> {
        self.followers.iter()
    }

    pub fn follower_count(&self) -> usize {
        self.followers.len()
    }

    /// Determines which action a toggle should take without mutating
    /// state — state only changes once the corresponding ACK arrives.
    pub fn next_like_action(&self, owner: &str, post_timestamp: &str) -> LikeAction {
        if self.liked_posts.contains(&post_key(owner, post_timestamp)) {
            LikeAction::Unlike
        } else {
            LikeAction::Like
        }
    }

    pub fn apply_like_toggle(&mut self, owner: &str, post_timestamp: &str, action: LikeAction) {
        let key = post_key(owner, post_timestamp);
        match action {
            LikeAction::Like => {
                self.liked_posts.insert(key);
            }
            LikeAction::Unlike => {
                self.liked_posts.remove(&key);
            }
        }
    }

    pub fn has_liked(&self, owner: &str, post_timestamp: &str) -> bool {
        self.liked_posts.contains(&post_key(owner, post_timestamp))
    }

    /// No-self invariant check, callable from tests and from Controller
    /// assertions during development.
    pub fn upholds_no_self_invariant(&self, local_user: &str) -> bool {
        !self.following.contains(local_user) && !self.followers.contains(local_user)
    }
}
