mod collect_lead;
mod health_check;
mod lead_notification;
mod webhook_lead;

pub use collect_lead::*;
pub use health_check::*;
pub use lead_notification::*;
pub use webhook_lead::*;
