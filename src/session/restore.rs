//! Deciding what to restore when control comes back to the editor.
//!
//! Three entry points:
//!
//! 1. Return from checkout with a success indicator and an echoed owner id
//!    that matches ours: authoritative restore of the current session.
//! 2. Return with a cancellation indicator: the same restore, since the
//!    user must pick up exactly where they left off either way.
//! 3. A fresh landing with no indicators: a snapshot, if one exists, is only
//!    offered. It is never applied silently.
//!
//! When no exact session is pinned, candidates are tried in order: exact
//! session (if a hint is known), latest for the owner, legacy single slot.
//! First hit wins. Nothing found is not an error; it means start fresh.

use std::sync::Arc;
use url::form_urlencoded;

use super::store::SessionStore;
use crate::state::{EditSnapshot, EditorState};

/// How the app regained control, parsed from the return URL's query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectReturn {
    Success {
        payment_session: String,
        echoed_owner: String,
    },
    Cancelled,
    Fresh,
}

impl RedirectReturn {
    /// Parse `payment=success&session_id=...&user_id=...` (leading `?` optional).
    ///
    /// A success without a payment session id is not trusted and reads as a
    /// fresh landing.
    pub fn from_query(query: &str) -> Self {
        let mut payment = None;
        let mut payment_session = None;
        let mut echoed_owner = None;

        for (key, value) in form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            match key.as_ref() {
                "payment" => payment = Some(value.into_owned()),
                "session_id" if !value.is_empty() => payment_session = Some(value.into_owned()),
                "user_id" => echoed_owner = Some(value.into_owned()),
                _ => {}
            }
        }

        match (payment.as_deref(), payment_session) {
            (Some("success"), Some(payment_session)) => RedirectReturn::Success {
                payment_session,
                echoed_owner: echoed_owner.unwrap_or_default(),
            },
            (Some("cancelled"), _) => RedirectReturn::Cancelled,
            _ => RedirectReturn::Fresh,
        }
    }
}

/// Which session(s) a lookup may consider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSelector<'a> {
    /// Only this exact session
    Pinned(&'a str),
    /// Exact session if a hint is given, then latest, then legacy
    Preferred(Option<&'a str>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreSource {
    ExactSession,
    LatestForOwner,
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Purchase,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    /// The editor now holds the restored session
    Restored {
        source: RestoreSource,
        after: ReturnKind,
    },
    /// A return happened but nothing usable was stored; editor untouched
    Missing { after: ReturnKind },
    /// Fresh landing with a resumable session; the caller decides
    Offered {
        source: RestoreSource,
        snapshot: Box<EditSnapshot>,
    },
    /// The return belongs to a different owner; nothing is restored
    OwnerMismatch,
    /// Nothing to restore
    StartFresh,
}

impl RestoreOutcome {
    /// Whether the cached credit balance should be reloaded from the ledger
    pub fn refresh_credits(&self) -> bool {
        matches!(
            self,
            RestoreOutcome::Restored { .. } | RestoreOutcome::Missing { .. }
        )
    }

    /// User-facing message for this outcome, if any
    pub fn notice(&self) -> Option<&'static str> {
        match self {
            RestoreOutcome::Restored {
                after: ReturnKind::Cancelled,
                ..
            } => Some(
                "Payment was cancelled. Your image has been restored and you can try purchasing credits again.",
            ),
            RestoreOutcome::Missing {
                after: ReturnKind::Cancelled,
            } => Some("Payment was cancelled. Your previous edits could not be restored."),
            RestoreOutcome::Missing {
                after: ReturnKind::Purchase,
            } => Some(
                "Credits added, but your previous edits could not be restored. You can continue editing.",
            ),
            RestoreOutcome::Offered { .. } => Some("You have an unfinished edit. Resume it?"),
            _ => None,
        }
    }
}

pub struct RestorationOrchestrator {
    sessions: Arc<SessionStore>,
}

impl RestorationOrchestrator {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self { sessions }
    }

    /// First usable snapshot allowed by `selector`
    pub fn find(
        &self,
        owner_id: &str,
        selector: SessionSelector<'_>,
    ) -> Option<(RestoreSource, EditSnapshot)> {
        let hint = match selector {
            SessionSelector::Pinned(session_id) => {
                return self
                    .sessions
                    .load_by_session(owner_id, session_id)
                    .map(|snapshot| (RestoreSource::ExactSession, snapshot));
            }
            SessionSelector::Preferred(hint) => hint,
        };

        if let Some(session_id) = hint {
            if let Some(snapshot) = self.sessions.load_by_session(owner_id, session_id) {
                return Some((RestoreSource::ExactSession, snapshot));
            }
        }
        if let Some(snapshot) = self.sessions.load_latest(owner_id) {
            return Some((RestoreSource::LatestForOwner, snapshot));
        }
        self.sessions
            .load_legacy()
            .map(|snapshot| (RestoreSource::Legacy, snapshot))
    }

    /// Handle whatever brought control back and update `editor` accordingly.
    ///
    /// `session_id` is the editing session the app believes it is in; when it
    /// is known a redirect return restores exactly that session.
    pub fn handle_return(
        &self,
        redirect: &RedirectReturn,
        owner_id: &str,
        session_id: Option<&str>,
        editor: &mut EditorState,
    ) -> RestoreOutcome {
        let after = match redirect {
            RedirectReturn::Success { echoed_owner, .. } if echoed_owner != owner_id => {
                tracing::info!(owner_id, "checkout return for a different owner, not restoring");
                return RestoreOutcome::OwnerMismatch;
            }
            RedirectReturn::Success { .. } => ReturnKind::Purchase,
            RedirectReturn::Cancelled => ReturnKind::Cancelled,
            RedirectReturn::Fresh => return self.offer(owner_id, session_id),
        };

        let selector = match session_id {
            Some(session_id) => SessionSelector::Pinned(session_id),
            None => SessionSelector::Preferred(None),
        };

        match self.find(owner_id, selector) {
            Some((source, snapshot)) => {
                tracing::info!(
                    owner_id,
                    ?source,
                    history_len = snapshot.history_sequence.len(),
                    cursor = snapshot.history_cursor,
                    "restored edit session after checkout return"
                );
                editor.apply(snapshot);
                RestoreOutcome::Restored { source, after }
            }
            None => {
                tracing::warn!(
                    owner_id,
                    session_id,
                    "no snapshot to restore after checkout return"
                );
                RestoreOutcome::Missing { after }
            }
        }
    }

    /// Apply a snapshot the user accepted from an offer
    pub fn accept(&self, snapshot: EditSnapshot, editor: &mut EditorState) {
        editor.apply(snapshot);
    }

    fn offer(&self, owner_id: &str, session_id: Option<&str>) -> RestoreOutcome {
        match self.find(owner_id, SessionSelector::Preferred(session_id)) {
            Some((source, snapshot)) => RestoreOutcome::Offered {
                source,
                snapshot: Box::new(snapshot),
            },
            None => RestoreOutcome::StartFresh,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success() {
        let parsed = RedirectReturn::from_query("?payment=success&session_id=cs_123&user_id=u1");
        assert_eq!(
            parsed,
            RedirectReturn::Success {
                payment_session: "cs_123".to_string(),
                echoed_owner: "u1".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_decodes_escaped_values() {
        let parsed =
            RedirectReturn::from_query("payment=success&session_id=cs%3A1&user_id=user%5Fabc+x");
        assert_eq!(
            parsed,
            RedirectReturn::Success {
                payment_session: "cs:1".to_string(),
                echoed_owner: "user_abc x".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_cancelled_and_fresh() {
        assert_eq!(
            RedirectReturn::from_query("payment=cancelled"),
            RedirectReturn::Cancelled
        );
        assert_eq!(RedirectReturn::from_query(""), RedirectReturn::Fresh);
        assert_eq!(
            RedirectReturn::from_query("utm_source=mail"),
            RedirectReturn::Fresh
        );
        // Success without a payment session is not trusted
        assert_eq!(
            RedirectReturn::from_query("payment=success&user_id=u1"),
            RedirectReturn::Fresh
        );
    }

    #[test]
    fn test_notices() {
        let cancelled = RestoreOutcome::Restored {
            source: RestoreSource::ExactSession,
            after: ReturnKind::Cancelled,
        };
        assert!(cancelled.notice().unwrap().contains("cancelled"));
        assert!(cancelled.refresh_credits());
        assert_eq!(RestoreOutcome::OwnerMismatch.notice(), None);
        assert!(!RestoreOutcome::OwnerMismatch.refresh_credits());
        assert!(!RestoreOutcome::StartFresh.refresh_credits());
    }
}
