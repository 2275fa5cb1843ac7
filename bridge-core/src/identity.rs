// ABOUTME: Naming convention between Matrix user IDs and IRC nicknames
// ABOUTME: Pure mapping functions plus the prefix checks that keep the bridge from echoing itself

/// Local-part prefix of Matrix users owned by the bridge (IRC-origin puppets).
pub const MATRIX_USER_PREFIX: &str = "irc.";

/// Nick prefix of IRC connections owned by the bridge (Matrix-origin puppets).
pub const IRC_NICK_PREFIX: &str = "M-";

/// Translates identities between the two networks for one homeserver domain.
#[derive(Debug, Clone)]
pub struct IdentityMapper {
    domain: String,
}

impl IdentityMapper {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// `bob` -> `@irc.bob:<domain>`
    ///
    /// The nick is copied as-is, without case folding or escaping.
    pub fn to_matrix_user(&self, nick: &str) -> String {
        format!("@{}{}:{}", MATRIX_USER_PREFIX, nick, self.domain)
    }

    /// `@alice:<domain>` -> `M-alice`
    ///
    /// Puppets the bridge already owns map back to their original IRC nick,
    /// so `to_matrix_user(to_irc_nick(to_matrix_user(n)))` is stable.
    /// An ID without a `:` keeps the whole remainder as its local part.
    pub fn to_irc_nick(&self, user_id: &str) -> String {
        let local = local_part(user_id);
        if let Some(nick) = local.strip_prefix(MATRIX_USER_PREFIX) {
            if !nick.is_empty() {
                return nick.to_string();
            }
        }
        format!("{}{}", IRC_NICK_PREFIX, sanitize_nick(local))
    }
}

/// The part of a Matrix ID between the `@` sigil and the first `:`.
pub fn local_part(user_id: &str) -> &str {
    let rest = user_id.strip_prefix('@').unwrap_or(user_id);
    match rest.find(':') {
        Some(idx) => &rest[..idx],
        None => rest,
    }
}

/// True for Matrix users whose traffic originates from this bridge.
pub fn is_bridge_user(user_id: &str) -> bool {
    user_id
        .strip_prefix('@')
        .is_some_and(|rest| rest.starts_with(MATRIX_USER_PREFIX))
}

/// True for IRC nicks that belong to the bridge's own per-user connections.
pub fn is_synthetic_nick(nick: &str) -> bool {
    nick.len() >= IRC_NICK_PREFIX.len()
        && nick.is_char_boundary(IRC_NICK_PREFIX.len())
        && nick[..IRC_NICK_PREFIX.len()].eq_ignore_ascii_case(IRC_NICK_PREFIX)
}

/// Replace characters IRC does not allow in nicknames with `_`.
fn sanitize_nick(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "[]\\`_^{|}-".contains(c) {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> IdentityMapper {
        IdentityMapper::new("example.org")
    }

    #[test]
    fn test_nick_to_matrix_user() {
        assert_eq!(mapper().to_matrix_user("bob"), "@irc.bob:example.org");
    }

    #[test]
    fn test_matrix_user_to_nick() {
        assert_eq!(mapper().to_irc_nick("@alice:example.org"), "M-alice");
    }

    #[test]
    fn test_nick_uses_only_local_part() {
        assert_eq!(mapper().to_irc_nick("@carol:other.server:8448"), "M-carol");
    }

    #[test]
    fn test_user_id_without_colon_does_not_panic() {
        // Precondition violation: there is no domain to strip.
        assert_eq!(mapper().to_irc_nick("@dave"), "M-dave");
        assert_eq!(mapper().to_irc_nick("dave"), "M-dave");
        assert_eq!(mapper().to_irc_nick(""), "M-");
    }

    #[test]
    fn test_invalid_nick_characters_replaced() {
        assert_eq!(mapper().to_irc_nick("@alice.smith:example.org"), "M-alice_smith");
        assert_eq!(mapper().to_irc_nick("@a=b/c:example.org"), "M-a_b_c");
    }

    #[test]
    fn test_mapping_is_stable_after_first_application() {
        let m = mapper();
        for nick in ["bob", "Guest42", "x[away]", "M-alice"] {
            let once = m.to_matrix_user(nick);
            let twice = m.to_matrix_user(&m.to_irc_nick(&once));
            assert_eq!(once, twice, "nick {nick}");
        }
    }

    #[test]
    fn test_bridge_user_detection() {
        assert!(is_bridge_user("@irc.bob:example.org"));
        assert!(!is_bridge_user("@alice:example.org"));
        assert!(!is_bridge_user("@ircfan:example.org"));
        assert!(!is_bridge_user("irc.bob:example.org"));
    }

    #[test]
    fn test_synthetic_nick_detection() {
        assert!(is_synthetic_nick("M-alice"));
        assert!(is_synthetic_nick("m-alice"));
        assert!(!is_synthetic_nick("Mallory"));
        assert!(!is_synthetic_nick("M"));
        assert!(!is_synthetic_nick("é"));
    }

    #[test]
    fn test_nick_copied_verbatim_into_localpart() {
        let m = mapper();
        assert_eq!(m.to_matrix_user("Bob"), "@irc.Bob:example.org");
        assert_eq!(m.to_matrix_user("[away]"), "@irc.[away]:example.org");
        assert_eq!(m.to_irc_nick("@irc.Bob:example.org"), "Bob");
    }
}
