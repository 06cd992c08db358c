//! Authenticated subject handed to the core by the transport layer

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Identity resolved from a verified session token.
///
/// The transport layer builds this once per request and passes it into the
/// authorization engine and session flow; the core never reads headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuthenticatedSubject {
    pub user_id: i64,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
