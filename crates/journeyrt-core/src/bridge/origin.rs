//! Page origin allow-list evaluation.

use url::Url;

/// Decides whether a page origin may complete the bridge handshake.
///
/// `file://` origins are accepted only behind the development flag. All
/// other origins must be `https` with a host, matched case-insensitively
/// against the `https` entries of the allow-list. Ports and paths are not
/// compared.
#[must_use]
pub fn is_allowed(origin: &str, allow_list: &[String], allow_file_origins: bool) -> bool {
    let Ok(origin) = Url::parse(origin) else {
        return false;
    };

    if allow_file_origins && origin.scheme() == "file" {
        return true;
    }

    let Some(host) = origin.host_str() else {
        return false;
    };
    if origin.scheme() != "https" || host.is_empty() {
        return false;
    }

    allow_list.iter().any(|candidate| {
        let Ok(candidate) = Url::parse(candidate) else {
            return false;
        };
        candidate.scheme() == "https"
            && candidate
                .host_str()
                .is_some_and(|candidate_host| candidate_host.eq_ignore_ascii_case(host))
    })
}
