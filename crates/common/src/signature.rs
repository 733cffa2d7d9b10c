use sha2::{Digest, Sha256};

/// Compute the request signature shared between peer instances.
///
/// The digest covers the HTTP method, the request URI (with the
/// `_signature` parameter itself removed) and the raw body, keyed by the
/// credential secret. Peers sign outgoing requests with the same scheme.
pub fn compute_signature(method: &str, uri: &str, body: &[u8], secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b":");
    hasher.update(uri_without_signature(uri).as_bytes());
    hasher.update(b":");
    hasher.update(body);
    hasher.update(b":");
    hasher.update(secret.as_bytes());

    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Verify a supplied signature against the expected one for this request.
/// Comparison is constant-time.
pub fn verify_signature(
    method: &str,
    uri: &str,
    body: &[u8],
    secret: &str,
    supplied: &str,
) -> bool {
    let expected = compute_signature(method, uri, body, secret);
    constant_time_eq(expected.as_bytes(), supplied.as_bytes())
}

/// Strip the `_signature` query parameter from a URI so that both sides
/// compute the digest over the same string.
pub fn uri_without_signature(uri: &str) -> String {
    let Some((path, query)) = uri.split_once('?') else {
        return uri.to_string();
    };

    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| !pair.starts_with("_signature="))
        .collect();

    if kept.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, kept.join("&"))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
