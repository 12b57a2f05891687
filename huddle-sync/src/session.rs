//! Call-scoped identity, role, and feature visibility.
//!
//! The quiz-visibility flag used to live in a process-wide global in the
//! original design; here it is explicit session state with a defined
//! initial value (off) and teardown (cleared when the session ends), and
//! it travels with the rest of the call context instead of ambiently.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a call member with display metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub id: Uuid,
    pub display_name: String,
}

impl ParticipantInfo {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name: display_name.into(),
        }
    }

    /// Create with explicit id (for testing).
    pub fn with_id(id: Uuid, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}

/// Role within the call. The host authors whiteboard strokes and quiz
/// content; participants consume host state and submit their own answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Host,
    Participant,
}

/// Per-client view of the active call.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub local: ParticipantInfo,
    pub role: Role,
    /// Current roster size, host included. Updated from the SDK roster.
    pub participant_count: usize,
    /// Whether the quiz panel is showing. Session-scoped, never global.
    quiz_visible: bool,
}

impl SessionContext {
    pub fn new(session_id: Uuid, local: ParticipantInfo, role: Role) -> Self {
        Self {
            session_id,
            local,
            role,
            participant_count: 1,
            quiz_visible: false,
        }
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }

    pub fn quiz_visible(&self) -> bool {
        self.quiz_visible
    }

    pub fn show_quiz(&mut self) {
        self.quiz_visible = true;
    }

    pub fn hide_quiz(&mut self) {
        self.quiz_visible = false;
    }

    /// Clear session-scoped UI state. Called when the session ends or the
    /// feature view unmounts.
    pub fn teardown(&mut self) {
        self.quiz_visible = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiz_visibility_lifecycle() {
        let mut ctx = SessionContext::new(
            Uuid::new_v4(),
            ParticipantInfo::new("Alice"),
            Role::Host,
        );
        // Defined init: off.
        assert!(!ctx.quiz_visible());

        ctx.show_quiz();
        assert!(ctx.quiz_visible());

        ctx.teardown();
        assert!(!ctx.quiz_visible());
    }

    #[test]
    fn test_role_predicates() {
        let host = SessionContext::new(Uuid::new_v4(), ParticipantInfo::new("H"), Role::Host);
        let guest =
            SessionContext::new(Uuid::new_v4(), ParticipantInfo::new("G"), Role::Participant);
        assert!(host.is_host());
        assert!(!guest.is_host());
    }
}
