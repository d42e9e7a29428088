use crate::peer::types::ServerConfig;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

// Функция для добавления схемы протокола к URL ICE сервера, если она отсутствует
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    if config.url.starts_with("turn:")
        || config.url.starts_with("turns:")
        || config.url.starts_with("stun:")
    {
        config.url.clone()
    } else {
        let scheme = if config.r#type == "turn" {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, config.url)
    }
}

/// `start + window`, saturating instead of overflowing.
pub fn add_window(start: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| start.checked_add_signed(w))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Whole seconds between two instants, never negative.
pub fn whole_seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_seconds().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(kind: &str, url: &str) -> ServerConfig {
        ServerConfig {
            id: "s".into(),
            r#type: kind.into(),
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    #[test]
    fn adds_missing_scheme() {
        assert_eq!(add_ice_url_scheme(&server("stun", "stun.l.google.com:19302")), "stun:stun.l.google.com:19302");
        assert_eq!(add_ice_url_scheme(&server("turn", "relay.example.org:3478")), "turn:relay.example.org:3478");
        assert_eq!(add_ice_url_scheme(&server("turn", "turns:relay.example.org:5349")), "turns:relay.example.org:5349");
    }

    #[test]
    fn random_ids_are_hex_and_distinct() {
        let a = random_id();
        let b = random_id();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn seconds_between_clamps_at_zero() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(65);
        assert_eq!(whole_seconds_between(t0, t1), 65);
        assert_eq!(whole_seconds_between(t1, t0), 0);
    }
}
