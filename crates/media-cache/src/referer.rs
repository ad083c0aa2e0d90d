//! Referer selection for hotlink-protected media.
//!
//! Image hosts commonly reject requests whose `Referer` points at a third-party
//! page while accepting requests that look like they come from their own site.

use url::Url;

/// Pick the `Referer` to present when fetching `image_url` found on `page_referer`.
///
/// Same-site pairs keep the page referer. A third-party image host gets its own
/// origin (`scheme://host[:port]`) instead. Returns `None` when the page referer
/// is not an absolute URL.
pub fn smart_referer(image_url: &str, page_referer: &str) -> Option<String> {
    let referer = Url::parse(page_referer).ok()?;
    let ref_host = referer.host_str()?;

    let Some(image) = Url::parse(image_url).ok() else {
        return Some(page_referer.to_string());
    };
    let Some(image_host) = image.host_str() else {
        return Some(page_referer.to_string());
    };

    if same_site(image_host, ref_host) {
        return Some(page_referer.to_string());
    }

    Some(image.origin().ascii_serialization())
}

fn same_site(a: &str, b: &str) -> bool {
    a == b || is_subdomain_of(a, b) || is_subdomain_of(b, a)
}

fn is_subdomain_of(host: &str, parent: &str) -> bool {
    host.len() > parent.len()
        && host.ends_with(parent)
        && host.as_bytes()[host.len() - parent.len() - 1] == b'.'
}
