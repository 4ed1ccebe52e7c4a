use chatrelay_channels::AllowList;

use crate::envelope::SignalEvent;

/// Determine if an inbound message may be forwarded to the bus.
///
/// A sender matches on either its phone number or its account UUID.
pub fn check_access(allow: &AllowList, event: &SignalEvent) -> Result<(), AccessDenied> {
    if allow.permits(&event.sender)
        || event
            .sender_uuid
            .as_deref()
            .is_some_and(|uuid| allow.permits(uuid))
    {
        Ok(())
    } else {
        Err(AccessDenied::NotOnAllowlist)
    }
}

/// Reason an inbound message was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDenied {
    NotOnAllowlist,
}

impl std::fmt::Display for AccessDenied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotOnAllowlist => write!(f, "sender not on allowlist"),
        }
    }
}
