//! Metric names and descriptions.
//!
//! The broker records through the `metrics` facade only. Installing an
//! exporter (Prometheus or otherwise) is left to the host application; call
//! [`describe_metrics`] once after installing it to attach help text.

use metrics::describe_counter;

/// Tickets minted, labelled by `kind`.
pub const TICKETS_ISSUED: &str = "sso_tickets_issued_total";

/// Validation attempts, labelled by `kind` and `outcome`.
pub const TICKETS_VALIDATED: &str = "sso_tickets_validated_total";

/// Tickets removed by the eager sweep.
pub const TICKETS_SWEPT: &str = "sso_tickets_swept_total";

/// Ticket-granting tickets destroyed by logout.
pub const SESSIONS_DESTROYED: &str = "sso_sessions_destroyed_total";

/// Register all metric descriptions.
pub fn describe_metrics() {
    describe_counter!(TICKETS_ISSUED, "Total number of tickets issued");
    describe_counter!(
        TICKETS_VALIDATED,
        "Total number of ticket validation attempts"
    );
    describe_counter!(
        TICKETS_SWEPT,
        "Total number of expired tickets removed by the registry cleaner"
    );
    describe_counter!(
        SESSIONS_DESTROYED,
        "Total number of single-sign-on sessions ended by logout"
    );
}

pub(crate) fn outcome_label(result: &crate::error::Result<impl Sized>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(e) if e.is_ticket_unusable() => "unusable",
        Err(e) if e.is_infrastructure_failure() => "error",
        Err(_) => "denied",
    }
}
