//! Service matching.
//!
//! Picks the registered service responsible for a presented URL. Among
//! enabled services whose pattern accepts the URL, the lowest
//! `evaluation_order` wins, and ties go to the lowest id. Storage order
//! never influences the result.

use super::RegisteredService;

/// Find the service that owns `candidate`.
///
/// Returns `None` when no enabled service matches; callers treat that as
/// "service unknown/unauthorized", not as a matcher failure.
///
/// # Examples
///
/// ```
/// use ticket_broker::services::{find_match, RegisteredService, ServicePattern};
///
/// let services = vec![
///     RegisteredService::new("broad", ServicePattern::regex("^https://").unwrap())
///         .with_id(1)
///         .with_evaluation_order(1000),
///     RegisteredService::new("narrow", ServicePattern::regex("^https://app").unwrap())
///         .with_id(2)
///         .with_evaluation_order(10),
/// ];
///
/// let found = find_match(&services, "https://app.example.com").unwrap();
/// assert_eq!(found.name, "narrow");
/// ```
#[must_use]
pub fn find_match<'a, I>(services: I, candidate: &str) -> Option<&'a RegisteredService>
where
    I: IntoIterator<Item = &'a RegisteredService>,
{
    services
        .into_iter()
        .filter(|service| service.enabled && service.matches(candidate))
        .min_by_key(|service| (service.evaluation_order, service.id))
}
