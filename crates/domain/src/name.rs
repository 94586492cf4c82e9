/// Strips the delegated domain suffix from a queried name.
///
/// `name` is the name as received from the wire, with or without the
/// trailing dot. The match against `domain` is an exact byte suffix check
/// (case sensitive). Returns the leading labels with the suffix and its
/// separating dot removed, or `None` when the name is outside the domain.
/// A name equal to the bare domain has no separating dot and is rejected.
pub fn strip_tunnel_name(name: &str, domain: &str) -> Option<String> {
    let question = name.strip_suffix('.').unwrap_or(name);
    let host = question.strip_suffix(domain)?.strip_suffix('.')?;
    if host.is_empty() {
        return None;
    }
    Some(host.to_string())
}
