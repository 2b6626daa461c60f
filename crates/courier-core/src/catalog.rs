//! Known platform event names that webhooks may subscribe to.

use std::collections::BTreeSet;

/// Events published by the platform out of the box.
pub const PLATFORM_EVENTS: &[&str] = &[
    "contact.created",
    "contact.updated",
    "contact.deleted",
    "contact.tag_added",
    "contact.tag_removed",
    "opportunity.created",
    "opportunity.stage_changed",
    "opportunity.won",
    "opportunity.lost",
    "order.created",
    "order.paid",
    "order.refunded",
    "subscription.created",
    "subscription.renewed",
    "subscription.cancelled",
    "funnel.published",
    "page.published",
    "form.submitted",
    "affiliate.signup",
    "affiliate.commission_earned",
    "email.sent",
    "email.opened",
    "email.clicked",
    "email.bounced",
    "email.unsubscribed",
];

/// Set of event names accepted by registration and dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCatalog {
    names: BTreeSet<String>,
}

impl EventCatalog {
    /// Catalog of `PLATFORM_EVENTS` plus `extra` names.
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut catalog = Self::default();
        catalog.names.extend(extra.into_iter().map(Into::into));
        catalog
    }

    /// Whether `name` is a known event.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Names from `events` that are not in the catalog, in input order.
    pub fn unknown<'a>(&self, events: &'a [String]) -> Vec<&'a str> {
        events.iter().map(String::as_str).filter(|e| !self.contains(e)).collect()
    }

    /// Iterates over known names in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Number of known events.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for EventCatalog {
    fn default() -> Self {
        Self { names: PLATFORM_EVENTS.iter().map(|s| (*s).to_string()).collect() }
    }
}
