//! Suppression of redelivered questions.
//!
//! Chat platforms retry slow commands, so the same question can arrive more
//! than once. A question counts as redelivered when its id, or its
//! `user:text:time-bucket` key, was seen among the recent questions.

use std::{
    collections::VecDeque,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use crate::base::{config::Config, types::Question};

/// Bounded memory of recently handled questions.
#[derive(Debug)]
pub struct Deduplicator {
    recent: Mutex<VecDeque<(String, String)>>,
    capacity: usize,
    window_secs: i64,
}

impl Deduplicator {
    pub fn new(capacity: usize, window: Duration) -> Self {
        let capacity = capacity.max(1);

        Self {
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            window_secs: i64::try_from(window.as_secs()).unwrap_or(i64::MAX).max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.dedup_capacity, Duration::from_secs(config.dedup_window_secs))
    }

    /// Returns `true` the first time a question is seen, remembering it;
    /// `false` for a redelivery.
    pub fn first_delivery(&self, question: &Question) -> bool {
        let id_key = question.id().to_string();
        let text_key = self.text_key(question);

        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);

        if recent.iter().any(|(id, text)| *id == id_key || *text == text_key) {
            return false;
        }

        if recent.len() == self.capacity {
            recent.pop_front();
        }
        recent.push_back((id_key, text_key));

        true
    }

    fn text_key(&self, question: &Question) -> String {
        let bucket = question.received_at().timestamp().div_euclid(self.window_secs);

        format!("{}:{}:{}", question.user().unwrap_or("unknown"), question.normalized(), bucket)
    }
}
