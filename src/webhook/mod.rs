//! Inbound webhook boundary: delivery authentication and payload validation.

mod payload;
mod signature;

pub use payload::{is_valid_repo, PullRequestEvent};
pub use signature::{
    verify_signature, Authentication, WebhookAuthenticator, DEV_BYPASS_HEADER, SIGNATURE_HEADER,
    SIGNATURE_PREFIX,
};

/// Header naming the event type.
pub const EVENT_HEADER: &str = "x-github-event";

/// Header carrying the unique delivery id.
pub const DELIVERY_HEADER: &str = "x-github-delivery";

/// Event type handled by the registration pipeline.
pub const PULL_REQUEST_EVENT: &str = "pull_request";
