use thiserror::Error;
use url::{Host, Url};

/// Maximum number of `.` separators tolerated in a submitted host name.
pub const MAX_HOST_DOTS: usize = 5;

/// Errors that can occur while extracting an apex zone from free-form text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("input is empty")]
    Empty,
    #[error("failed to parse input as url: {0}")]
    Url(#[from] url::ParseError),
    #[error("host '{0}' is an ip address, not a domain name")]
    IpLiteral(String),
    #[error("subdomains depth exceeded maximum limit in '{0}'")]
    TooDeep(String),
    #[error("could not find domain apex zone and tld parts in '{0}'")]
    MissingZone(String),
    #[error("domain '{0}' contains an empty label")]
    EmptyLabel(String),
}

/// Extracts the lowercase `apex.tld` pair from user-supplied text.
///
/// The text may be a full URL (`https://www.example.com/path`), a bare host
/// (`example.com`) or a host followed by a path (`example.com/page`).
/// Internationalized names are returned in their ASCII (punycode) form.
pub fn extract_apex_zone(text: &str) -> Result<String, ExtractError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ExtractError::Empty);
    }

    let host = host_of(trimmed)?;
    let host = host.strip_suffix('.').unwrap_or(host.as_str());

    let dots = host.matches('.').count();
    if dots > MAX_HOST_DOTS {
        return Err(ExtractError::TooDeep(host.to_string()));
    }
    if dots < 1 {
        return Err(ExtractError::MissingZone(host.to_string()));
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.iter().any(|label| label.is_empty()) {
        return Err(ExtractError::EmptyLabel(host.to_string()));
    }
    let [.., apex, tld] = labels.as_slice() else {
        return Err(ExtractError::MissingZone(host.to_string()));
    };

    Ok(format!("{apex}.{tld}").to_lowercase())
}

fn host_of(text: &str) -> Result<String, ExtractError> {
    let candidate = match Url::parse(text) {
        Ok(url) => match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => return Ok(domain.to_string()),
            Some(Host::Ipv4(addr)) => return Err(ExtractError::IpLiteral(addr.to_string())),
            Some(Host::Ipv6(addr)) => return Err(ExtractError::IpLiteral(addr.to_string())),
            _ => first_segment(url.path()).to_string(),
        },
        Err(url::ParseError::RelativeUrlWithoutBase) => first_segment(text).to_string(),
        Err(err) => return Err(ExtractError::Url(err)),
    };

    // Same IDNA mapping the URL parser applies to hosts of special schemes,
    // so `https://دامنه.ir` and `دامنه.ir` share one key.
    match Host::parse(&candidate)? {
        Host::Domain(domain) => Ok(domain),
        Host::Ipv4(addr) => Err(ExtractError::IpLiteral(addr.to_string())),
        Host::Ipv6(addr) => Err(ExtractError::IpLiteral(addr.to_string())),
    }
}

fn first_segment(path: &str) -> &str {
    path.split('/').next().unwrap_or_default()
}
