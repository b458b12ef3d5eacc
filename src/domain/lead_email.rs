use validator::ValidateEmail;

/// A parsed email address, used for leads as well as senders and recipients.
///
/// Addresses are trimmed and lower-cased on the way in, so two submissions
/// differing only in case refer to the same lead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadEmail(String);

impl LeadEmail {
    pub fn parse(email: String) -> Result<Self, String> {
        let normalised = email.trim().to_lowercase();
        match ValidateEmail::validate_email(&normalised) && has_tld(&normalised) {
            true => Ok(Self(normalised)),
            false => Err(format!("Invalid email: {email:?}")),
        }
    }
}

/// `validator` accepts `john@localhost`; landing page leads need
/// `local@domain.tld`.
fn has_tld(email: &str) -> bool {
    let Some((_, domain)) = email.rsplit_once('@') else {
        return false;
    };
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

impl AsRef<str> for LeadEmail {
    fn as_ref(&self) -> &str { &self.0 }
}

impl std::fmt::Display for LeadEmail {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
