//! Restart rate limit for supervised children.

use std::collections::{HashMap, VecDeque};

use crate::consts::{MAX_RESTARTS_IN_WINDOW, RESTART_WINDOW};
use crate::status::Component;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Restart,
    /// Too many restarts within the window; leave it stopped.
    GiveUp,
}

#[derive(Debug, Default)]
pub struct RestartPolicy {
    restarts: HashMap<Component, VecDeque<i64>>,
}

impl RestartPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// An unexpected exit of `c` at `now`.
    pub fn on_exit(&mut self, c: Component, now: i64) -> Decision {
        let q = self.restarts.entry(c).or_default();
        while q.front().is_some_and(|&t| now - t >= RESTART_WINDOW) {
            q.pop_front();
        }
        if q.len() >= MAX_RESTARTS_IN_WINDOW {
            return Decision::GiveUp;
        }
        q.push_back(now);
        Decision::Restart
    }

    /// Forget the history, e.g. after an operator start.
    pub fn reset(&mut self, c: Component) {
        self.restarts.remove(&c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixth_exit_within_a_minute_gives_up() {
        let mut p = RestartPolicy::new();
        for t in 0..5 {
            assert_eq!(p.on_exit(Component::Fd, 100 + t), Decision::Restart);
        }
        assert_eq!(p.on_exit(Component::Fd, 110), Decision::GiveUp);
        assert_eq!(p.on_exit(Component::Amg, 110), Decision::Restart);
        // the oldest restarts fall out of the window
        assert_eq!(p.on_exit(Component::Fd, 161), Decision::Restart);
        p.reset(Component::Fd);
        assert_eq!(p.on_exit(Component::Fd, 162), Decision::Restart);
    }
}
