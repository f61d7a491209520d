//! Conversation session bookkeeping
//!
//! After a turn completes the session stays open for a timeout window;
//! speech inside the window is dispatched as a follow-up with the stored
//! continuation token and no wake phrase. The manager keeps no timers of
//! its own: the controller compares against the deadline when candidate
//! follow-ups arrive.

use std::time::{Duration, Instant};
use tracing::debug;

/// Follow-up window state for the active conversation.
///
/// Live iff a turn completed within the timeout window and no explicit
/// end-of-conversation command has been recognized since.
#[derive(Debug)]
pub struct Session {
    timeout: Duration,
    token: Option<String>,
    last_activity: Option<Instant>,
}

impl Session {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            token: None,
            last_activity: None,
        }
    }

    /// True while within the timeout window of the last completed turn.
    pub fn is_live(&self) -> bool {
        match self.last_activity {
            Some(at) => at.elapsed() < self.timeout,
            None => false,
        }
    }

    /// Continuation token for the next dispatch, or None when no live
    /// session exists. Opaque: stored and forwarded, never inspected.
    pub fn token(&self) -> Option<&str> {
        if self.is_live() {
            self.token.as_deref()
        } else {
            None
        }
    }

    /// Refresh the deadline after a completed turn.
    ///
    /// A new token replaces the stored one; None keeps the existing
    /// token (the agent does not return one on every turn).
    pub fn refresh(&mut self, token: Option<String>) {
        if let Some(token) = token {
            self.token = Some(token);
        }
        self.last_activity = Some(Instant::now());
        debug!(
            "Session refreshed (token: {})",
            self.token.as_deref().map(|t| t.get(..12).unwrap_or(t)).unwrap_or("none")
        );
    }

    /// Reset the inactivity timer without touching the token.
    pub fn touch(&mut self) {
        if self.last_activity.is_some() {
            self.last_activity = Some(Instant::now());
        }
    }

    /// Seconds until expiry; zero when not live.
    pub fn time_remaining(&self) -> Duration {
        match self.last_activity {
            Some(at) if self.is_live() => self.timeout.saturating_sub(at.elapsed()),
            _ => Duration::ZERO,
        }
    }

    /// Tear the session down and discard the continuation token.
    pub fn expire(&mut self) {
        self.token = None;
        self.last_activity = None;
        debug!("Session expired");
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_fresh_session_not_live() {
        let session = Session::new(Duration::from_secs(30));
        assert!(!session.is_live());
        assert!(session.token().is_none());
        assert_eq!(session.time_remaining(), Duration::ZERO);
    }

    #[test]
    fn test_live_immediately_after_refresh() {
        let mut session = Session::new(Duration::from_secs(30));
        session.refresh(Some("abc123".to_string()));

        assert!(session.is_live());
        assert_eq!(session.token(), Some("abc123"));
        assert!(session.time_remaining() > Duration::from_secs(29));
    }

    #[test]
    fn test_expiry_after_timeout() {
        // Holds for any timeout > 0; exercised at a few scales
        for timeout_ms in [10u64, 25, 50] {
            let mut session = Session::new(Duration::from_millis(timeout_ms));
            session.refresh(Some("abc123".to_string()));
            assert!(session.is_live());

            sleep(Duration::from_millis(timeout_ms + 10));
            assert!(!session.is_live());
            assert!(session.token().is_none());
        }
    }

    #[test]
    fn test_refresh_without_token_keeps_existing() {
        let mut session = Session::new(Duration::from_secs(30));
        session.refresh(Some("abc123".to_string()));
        session.refresh(None);

        assert_eq!(session.token(), Some("abc123"));
    }

    #[test]
    fn test_refresh_replaces_token() {
        let mut session = Session::new(Duration::from_secs(30));
        session.refresh(Some("first".to_string()));
        session.refresh(Some("second".to_string()));

        assert_eq!(session.token(), Some("second"));
    }

    #[test]
    fn test_explicit_expire_discards_token() {
        let mut session = Session::new(Duration::from_secs(30));
        session.refresh(Some("abc123".to_string()));

        session.expire();
        assert!(!session.is_live());
        assert!(session.token().is_none());

        // A later refresh with no token starts a token-less session
        session.refresh(None);
        assert!(session.is_live());
        assert!(session.token().is_none());
    }

    #[test]
    fn test_touch_extends_only_active_sessions() {
        let mut session = Session::new(Duration::from_secs(30));

        // No session yet: touch is a no-op
        session.touch();
        assert!(!session.is_live());

        session.refresh(Some("abc123".to_string()));
        session.touch();
        assert!(session.is_live());
    }
}
