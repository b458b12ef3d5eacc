mod lead;
mod lead_email;
mod spam;
// allow external `use` statements to skip `lead_email` etc
pub use lead::Lead;
pub use lead::LeadSource;
pub use lead_email::LeadEmail;
pub use spam::spam_reason;
pub use spam::SpamReason;
