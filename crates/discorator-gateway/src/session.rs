//! Session identity and progress.
//!
//! Only the dispatcher and the orchestrator write here. Everything else
//! reads through the accessors.

use discorator_core::{Intents, Token};
use parking_lot::RwLock;

/// What a RESUME needs besides the token. Set together from READY, cleared together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeInfo {
    pub session_id: String,
    pub resume_url: String,
}

#[derive(Debug, Default)]
struct SessionState {
    sequence: Option<u64>,
    resume: Option<ResumeInfo>,
    alive: bool,
}

/// Identity and progress of one logical gateway session.
#[derive(Debug)]
pub struct Session {
    token: Token,
    intents: Intents,
    state: RwLock<SessionState>,
}

impl Session {
    pub fn new(token: Token, intents: Intents) -> Self {
        Self {
            token,
            intents,
            state: RwLock::new(SessionState::default()),
        }
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn intents(&self) -> Intents {
        self.intents
    }

    /// Last sequence number seen, if any.
    pub fn sequence(&self) -> Option<u64> {
        self.state.read().sequence
    }

    /// Record a dispatch sequence number. Never moves backwards.
    pub fn observe_sequence(&self, sequence: u64) -> u64 {
        let mut state = self.state.write();
        let next = state.sequence.map_or(sequence, |current| current.max(sequence));
        state.sequence = Some(next);
        next
    }

    pub fn resume_info(&self) -> Option<ResumeInfo> {
        self.state.read().resume.clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.state.read().resume.as_ref().map(|r| r.session_id.clone())
    }

    pub fn resume_url(&self) -> Option<String> {
        self.state.read().resume.as_ref().map(|r| r.resume_url.clone())
    }

    /// Store the identity handed out by READY.
    pub(crate) fn establish(&self, info: ResumeInfo) {
        self.state.write().resume = Some(info);
    }

    /// Forget the session so the next handshake is a fresh IDENTIFY.
    pub(crate) fn reset_identity(&self) {
        let mut state = self.state.write();
        state.resume = None;
        state.sequence = None;
    }

    /// Whether a handshake has completed and the session has not been closed since.
    pub fn is_alive(&self) -> bool {
        self.state.read().alive
    }

    pub(crate) fn set_alive(&self, alive: bool) {
        self.state.write().alive = alive;
    }
}
