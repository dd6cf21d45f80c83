//! Pending questions from subagents to the main agent

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

struct Pending {
    question: String,
    reply: oneshot::Sender<String>,
}

/// One outstanding question per subagent, answered through a oneshot
#[derive(Default)]
pub struct QuestionBridge {
    pending: Mutex<HashMap<String, Pending>>,
}

impl QuestionBridge {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Pending>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Park a question
    ///
    /// A subagent has at most one open question. While it is unanswered,
    /// further registrations fail with the outstanding question.
    pub fn register(
        &self,
        subagent_id: &str,
        question: impl Into<String>,
    ) -> Result<oneshot::Receiver<String>, String> {
        let mut pending = self.lock();
        if let Some(open) = pending.get(subagent_id) {
            return Err(open.question.clone());
        }
        let (reply, rx) = oneshot::channel();
        pending.insert(
            subagent_id.to_string(),
            Pending {
                question: question.into(),
                reply,
            },
        );
        Ok(rx)
    }

    /// Deliver an answer; false when nothing was waiting
    pub fn answer(&self, subagent_id: &str, answer: impl Into<String>) -> bool {
        match self.lock().remove(subagent_id) {
            Some(pending) => pending.reply.send(answer.into()).is_ok(),
            None => false,
        }
    }

    pub fn pending(&self, subagent_id: &str) -> Option<String> {
        self.lock().get(subagent_id).map(|p| p.question.clone())
    }

    /// Withdraw a question; the waiter sees a closed channel
    pub fn cancel(&self, subagent_id: &str) -> bool {
        self.lock().remove(subagent_id).is_some()
    }

    /// `(subagent_id, question)` pairs, sorted by id
    pub fn pending_all(&self) -> Vec<(String, String)> {
        let mut all: Vec<_> = self
            .lock()
            .iter()
            .map(|(id, p)| (id.clone(), p.question.clone()))
            .collect();
        all.sort();
        all
    }
}
