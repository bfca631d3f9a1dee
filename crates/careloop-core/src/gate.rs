//! Permission gate for alert recipients.
//!
//! An empty result is normal: it means nobody in the candidate list may be
//! told, and the caller records that instead of failing.

use crate::member::{Capability, SupportCircleMember};
use crate::reminder::Reminder;

/// What an alert is about, as far as recipient eligibility cares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertContext {
    /// Domain a recipient must be granted to see the alert's content.
    pub content_domain: Option<Capability>,
}

impl AlertContext {
    pub fn ungated() -> Self {
        Self::default()
    }

    pub fn for_reminder(reminder: &Reminder) -> Self {
        Self {
            content_domain: reminder.category.content_domain(),
        }
    }
}

/// Why a candidate was left out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    AlertsDisabled,
    Inactive,
    MissingCapability(Capability),
}

/// Whether `member` may receive an alert in `context`.
pub fn check(member: &SupportCircleMember, context: &AlertContext) -> Result<(), Exclusion> {
    if !member.can_receive_alerts {
        return Err(Exclusion::AlertsDisabled);
    }
    if !member.is_active() {
        return Err(Exclusion::Inactive);
    }
    if let Some(domain) = context.content_domain {
        if !member.capabilities.grants(domain) {
            return Err(Exclusion::MissingCapability(domain));
        }
    }
    Ok(())
}

/// Candidates that survive [`check`], in candidate order, without repeats.
pub fn eligible_recipients<'a, I>(context: &AlertContext, candidates: I) -> Vec<SupportCircleMember>
where
    I: IntoIterator<Item = &'a SupportCircleMember>,
{
    let mut out: Vec<SupportCircleMember> = Vec::new();
    for member in candidates {
        match check(member, context) {
            Ok(()) if !out.iter().any(|m| m.id == member.id) => out.push(member.clone()),
            Ok(()) => {}
            Err(reason) => {
                tracing::debug!(member_id = %member.id, ?reason, "excluded from alert recipients");
            }
        }
    }
    out
}
