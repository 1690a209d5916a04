//! Registration key layout: `<root>/<service>/<endpoint-id>`.

pub const DEFAULT_KEY_ROOT: &str = "register";

/// Key prefix under which instances of `service` register, e.g. `register/orders/`.
pub fn service_prefix(root: &str, service: &str) -> String {
    format!("{}/{}/", root.trim_matches('/'), service.trim_matches('/'))
}

/// Endpoint identifier of `key` under `prefix`.
///
/// The key must split around the prefix into exactly two pieces, the first one empty:
/// keys outside the prefix, keys repeating the prefix, and the bare prefix yield `None`.
pub fn split_id<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let rest = key.strip_prefix(prefix)?;
    if rest.is_empty() || rest.contains(prefix) {
        return None;
    }
    Some(rest)
}
