use std::fmt::Display;

/// Throwaway inbox providers. Extended at runtime with
/// `intake.extra_disposable_domains`.
const DISPOSABLE_DOMAINS: &[&str] = &[
    "10minutemail.com",
    "dispostable.com",
    "getnada.com",
    "guerrillamail.com",
    "mailinator.com",
    "maildrop.cc",
    "sharklasers.com",
    "temp-mail.org",
    "tempmail.com",
    "throwaway.email",
    "trashmail.com",
    "yopmail.com",
];

const NO_REPLY_PREFIXES: &[&str] = &[
    "noreply",
    "no-reply",
    "no_reply",
    "donotreply",
    "do-not-reply",
];

/// Minimum run of digits before the `@` that marks an address as generated
const DIGIT_RUN: usize = 5;

/// Why a submission was discarded as spam. Only ever logged; the caller sees
/// a normal success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpamReason {
    TestAddress,
    DigitRun,
    NoReply,
    DisposableDomain(String),
}

impl Display for SpamReason {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            SpamReason::TestAddress => write!(f, "test address"),
            SpamReason::DigitRun => write!(f, "{DIGIT_RUN}+ consecutive digits before @"),
            SpamReason::NoReply => write!(f, "no-reply alias"),
            SpamReason::DisposableDomain(d) => write!(f, "disposable domain {d}"),
        }
    }
}

/// Heuristic checks on the raw submitted address. Runs before format
/// validation, so anything without an `@` is left for the format check.
pub fn spam_reason(
    email: &str,
    extra_disposable_domains: &[String],
) -> Option<SpamReason> {
    let email = email.trim().to_lowercase();
    let (local, domain) = email.rsplit_once('@')?;

    if is_test_address(local) {
        return Some(SpamReason::TestAddress);
    }
    if longest_digit_run(local) >= DIGIT_RUN {
        return Some(SpamReason::DigitRun);
    }
    if NO_REPLY_PREFIXES.iter().any(|p| local.starts_with(p)) {
        return Some(SpamReason::NoReply);
    }
    let disposable = DISPOSABLE_DOMAINS.iter().any(|d| *d == domain)
        || extra_disposable_domains
            .iter()
            .any(|d| d.trim().eq_ignore_ascii_case(domain));
    if disposable {
        return Some(SpamReason::DisposableDomain(domain.to_owned()));
    }
    None
}

/// `test`, `test123`, `asdf`
fn is_test_address(local: &str) -> bool {
    match local.strip_prefix("test") {
        Some(rest) => rest.chars().all(|c| c.is_ascii_digit()),
        None => local == "asdf",
    }
}

fn longest_digit_run(s: &str) -> usize {
    s.chars()
        .fold((0, 0), |(longest, current), c| match c.is_ascii_digit() {
            true => (longest.max(current + 1), current + 1),
            false => (longest, 0),
        })
        .0
}
