//! Fixed reply texts, English first and Persian second. Everything is sent
//! with legacy Markdown parsing.

use std::time::Duration;

use domain_intake_core::Outcome;

pub const INVALID_DOMAIN: &str = "\
Invalid domain name. It should be a simple domain name like: `git.ir`.

نام دامنه نامعتبر است. ورودی باید یک نام دامنه مثل `git.ir` باشد.";

pub const DUPLICATE_DOMAIN: &str = "\
Domain is already registered.

نام دامنه قبلا ثبت شده است.";

pub const INTERNAL_ERROR: &str = "\
Internal error occurred. Retry, and reach support if the problem persists.

خطای داخلی رخ داده است. در صورتی که پس از تلاش مجدد مشکل برطرف نشد، به پشتیبانی پیام دهید.";

pub const HELP: &str = "\
Send a domain name, or any link on it, and it will be added to the list.

Examples:
`git.ir`
`https://www.git.ir/some/page`

Only the apex zone is kept, so `a.b.git.ir` is recorded as `git.ir`. \
The domain must resolve to public addresses.";

pub const INFO: &str = "\
This bot collects domains hosted inside the country so they can be routed \
directly instead of through a tunnel. Submitted domains are checked against \
a public DNS resolver before they are recorded.";

/// Reply text for a settled submission. `rate_window` is the quota window
/// quoted when the user is rate limited.
pub fn for_outcome(outcome: &Outcome, rate_window: Duration) -> String {
    match outcome {
        Outcome::Accepted { domain } => format!("`{domain}`"),
        Outcome::RateLimited => rate_limited(rate_window),
        Outcome::InvalidDomain => INVALID_DOMAIN.to_string(),
        Outcome::Duplicate => DUPLICATE_DOMAIN.to_string(),
        Outcome::InternalError => INTERNAL_ERROR.to_string(),
    }
}

pub fn rate_limited(window: Duration) -> String {
    let (amount, unit, unit_fa) = window_units(window);
    let plural = if amount == 1 { "" } else { "s" };
    format!(
        "Rate limit exceeded. Retry in the next {amount} {unit}{plural}.\n\n\
         تعداد درخواست\u{200c}های شما بیشتر از حد مجاز هستند. \
         می\u{200c}توانید مجددا بعد از {} {unit_fa} تلاش کنید.",
        persian_digits(amount)
    )
}

/// Largest whole unit that expresses the window exactly.
fn window_units(window: Duration) -> (u64, &'static str, &'static str) {
    let secs = window.as_secs();
    if secs >= 3600 && secs % 3600 == 0 {
        (secs / 3600, "hour", "ساعت")
    } else if secs >= 60 && secs % 60 == 0 {
        (secs / 60, "minute", "دقیقه")
    } else {
        (secs, "second", "ثانیه")
    }
}

fn persian_digits(value: u64) -> String {
    value
        .to_string()
        .chars()
        .map(|digit| match digit.to_digit(10) {
            Some(d) => char::from_u32(0x06F0 + d).unwrap_or(digit),
            None => digit,
        })
        .collect()
}

/// Reply to `/start`.
pub fn start(version: &str, compiled_at: &str) -> String {
    format!(
        "Compiled At: {}\nVersion: {}",
        code_span(compiled_at),
        code_span(version)
    )
}

/// Alert posted to the operator chat.
pub fn operator_alert(error: &str) -> String {
    format!("🚨 An unexpected error occurred. Please check the logs...\n\n```\n{error}```")
}

/// Wraps `text` in backticks. Escapes are not processed inside a code span,
/// so the only thing to guard against is a backtick ending it early.
fn code_span(text: &str) -> String {
    let inner: String = text.chars().filter(|ch| *ch != '`').collect();
    format!("`{inner}`")
}
