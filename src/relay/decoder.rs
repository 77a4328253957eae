//! Relay event -> public order decoding
//!
//! Pure and deterministic: the same event always decodes to the same
//! `(key, order)` pair, which keeps replayed events idempotent in the book.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;

use super::event::{RawEvent, ORDER_EVENT_KIND};
use crate::domain::{Currency, MakerStatus, OrderType, PublicOrder};
use crate::error::{FedError, Result};

/// Status tag value of an order that is live in the book
const STATUS_PENDING: &str = "pending";

const GEOHASH_ALPHABET: &[u8] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Maps event authors to coordinator aliases
#[derive(Debug, Clone, Default)]
pub struct PubkeyDirectory {
    by_pubkey: HashMap<String, String>,
}

impl PubkeyDirectory {
    pub fn insert(&mut self, pubkey: &str, alias: &str) {
        self.by_pubkey
            .insert(pubkey.to_ascii_lowercase(), alias.to_string());
    }

    /// Forget `pubkey` if it still maps to `alias`.
    pub fn remove(&mut self, pubkey: &str, alias: &str) -> bool {
        let key = pubkey.to_ascii_lowercase();
        if self.by_pubkey.get(&key).map(String::as_str) == Some(alias) {
            self.by_pubkey.remove(&key);
            true
        } else {
            false
        }
    }

    pub fn alias_for(&self, pubkey: &str) -> Option<&str> {
        self.by_pubkey
            .get(&pubkey.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn pubkeys(&self) -> impl Iterator<Item = &String> {
        self.by_pubkey.keys()
    }
}

fn missing(tag: &str) -> FedError {
    FedError::Decode(format!("missing '{tag}' tag"))
}

fn parse_decimal(tag: &str, raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw.trim())
        .map_err(|e| FedError::Decode(format!("bad '{tag}' value '{raw}': {e}")))
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| FedError::Decode(format!("timestamp out of range: {secs}")))
}

/// Decode a geohash to the (latitude, longitude) of its cell centre.
pub fn decode_geohash(hash: &str) -> Option<(f64, f64)> {
    if hash.is_empty() {
        return None;
    }
    let (mut lat, mut lon) = ((-90.0_f64, 90.0_f64), (-180.0_f64, 180.0_f64));
    let mut even = true;
    for c in hash.bytes() {
        let value = GEOHASH_ALPHABET
            .iter()
            .position(|&a| a == c.to_ascii_lowercase())?;
        for shift in (0..5).rev() {
            let bit = (value >> shift) & 1 == 1;
            let range = if even { &mut lon } else { &mut lat };
            let mid = (range.0 + range.1) / 2.0;
            if bit {
                range.0 = mid;
            } else {
                range.1 = mid;
            }
            even = !even;
        }
    }
    Some(((lat.0 + lat.1) / 2.0, (lon.0 + lon.1) / 2.0))
}

/// Local order id: last numeric path segment of the `source` URL, else the
/// `d` tag itself when numeric.
fn order_id(event: &RawEvent, key: &str) -> u64 {
    event
        .tag_value("source")
        .and_then(|url| {
            url.trim_end_matches('/')
                .rsplit('/')
                .next()
                .and_then(|segment| segment.parse().ok())
        })
        .or_else(|| key.parse().ok())
        .unwrap_or_default()
}

/// Decode one relay event into its merge key and either an order or a
/// tombstone (`None`) meaning "remove this key".
pub fn decode_order(
    event: &RawEvent,
    directory: &PubkeyDirectory,
) -> Result<(String, Option<PublicOrder>)> {
    if event.kind != ORDER_EVENT_KIND {
        return Err(FedError::Decode(format!(
            "unexpected event kind {}",
            event.kind
        )));
    }
    let key = event.tag_value("d").ok_or_else(|| missing("d"))?.to_string();

    if event.tag_value("s") != Some(STATUS_PENDING) {
        return Ok((key, None));
    }

    let alias = directory
        .alias_for(&event.pubkey)
        .map(str::to_string)
        .or_else(|| event.tag("y").and_then(|y| y.get(1)).cloned())
        .ok_or_else(|| {
            FedError::Decode(format!("event author {} is not a known coordinator", event.pubkey))
        })?;

    let order_type = match event.tag_value("k").ok_or_else(|| missing("k"))? {
        "buy" => OrderType::Buy,
        "sell" => OrderType::Sell,
        other => return Err(FedError::Decode(format!("unknown order side '{other}'"))),
    };
    let currency = Currency::Code(
        event
            .tag_value("f")
            .ok_or_else(|| missing("f"))?
            .to_ascii_uppercase(),
    );

    let fiat = event.tag("fa").ok_or_else(|| missing("fa"))?;
    let (amount, has_range, min_amount, max_amount) = match fiat {
        [fixed] => (Some(parse_decimal("fa", fixed)?), false, None, None),
        [min, max, ..] => (
            None,
            true,
            Some(parse_decimal("fa", min)?),
            Some(parse_decimal("fa", max)?),
        ),
        [] => return Err(missing("fa")),
    };

    let premium = match event.tag_value("premium") {
        Some(raw) => parse_decimal("premium", raw)?,
        None => Decimal::ZERO,
    };
    let bond_size = match event.tag_value("bond") {
        Some(raw) => parse_decimal("bond", raw)?,
        None => Decimal::ZERO,
    };
    let satoshis_now = event
        .tag_value("amt")
        .and_then(|raw| raw.parse::<u64>().ok())
        .filter(|sats| *sats > 0);
    let expires_at = match event.tag_value("expiration") {
        Some(raw) => timestamp(
            raw.parse()
                .map_err(|_| FedError::Decode(format!("bad expiration '{raw}'")))?,
        )?,
        None => timestamp(event.created_at)?,
    };
    let location = event.tag_value("g").and_then(decode_geohash);

    let order = PublicOrder {
        id: order_id(event, &key),
        created_at: timestamp(event.created_at)?,
        expires_at,
        order_type,
        currency,
        amount,
        has_range,
        min_amount,
        max_amount,
        payment_method: event.tag("pm").map(|pm| pm.join(" ")).unwrap_or_default(),
        premium,
        satoshis_now,
        price: None,
        latitude: location.map(|(lat, _)| lat),
        longitude: location.map(|(_, lon)| lon),
        bond_size,
        escrow_duration: 0,
        maker: None,
        maker_nick: event.tag_value("name").unwrap_or_default().to_string(),
        maker_hash_id: String::new(),
        maker_status: MakerStatus::Active,
        coordinator_short_alias: Some(alias),
    };
    Ok((key, Some(order)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const MOON_PUBKEY: &str = "7af6f7cfc3bfdf8aa65df2465aa7841096fa8ee6b2d4d14fc43d974e5db9ab96";

    fn tags(pairs: &[&[&str]]) -> Vec<Vec<String>> {
        pairs
            .iter()
            .map(|tag| tag.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    fn event(status: &str) -> RawEvent {
        RawEvent {
            id: "ev1".into(),
            pubkey: MOON_PUBKEY.into(),
            created_at: 1_700_000_000,
            kind: ORDER_EVENT_KIND,
            tags: tags(&[
                &["d", "b5e1c2aa"],
                &["k", "sell"],
                &["f", "eur"],
                &["s", status],
                &["amt", "0"],
                &["fa", "50", "300"],
                &["pm", "SEPA", "Revolut"],
                &["premium", "2.5"],
                &["source", "http://moon.onion/order/moon/4120"],
                &["bond", "3"],
                &["expiration", "1700086400"],
                &["name", "SlowPanda41"],
                &["y", "robosats", "moon"],
                &["z", "order"],
            ]),
            content: String::new(),
            sig: String::new(),
        }
    }

    fn directory() -> PubkeyDirectory {
        let mut directory = PubkeyDirectory::default();
        directory.insert(MOON_PUBKEY, "moon");
        directory
    }

    #[test]
    fn decodes_pending_order() {
        let (key, order) = decode_order(&event("pending"), &directory()).expect("decodes");
        let order = order.expect("pending is a live order");
        assert_eq!(key, "b5e1c2aa");
        assert_eq!(order.id, 4120);
        assert_eq!(order.order_type, OrderType::Sell);
        assert_eq!(order.currency, Currency::Code("EUR".into()));
        assert!(order.has_range);
        assert_eq!(order.max_fiat(), Some(dec!(300)));
        assert_eq!(order.payment_method, "SEPA Revolut");
        assert_eq!(order.premium, dec!(2.5));
        assert_eq!(order.satoshis_now, None);
        assert_eq!(order.coordinator_short_alias.as_deref(), Some("moon"));
    }

    #[test]
    fn non_pending_status_is_tombstone() {
        let (key, order) = decode_order(&event("in-progress"), &directory()).expect("decodes");
        assert_eq!(key, "b5e1c2aa");
        assert!(order.is_none());
    }

    #[test]
    fn removing_a_key_only_forgets_its_own_alias() {
        let mut directory = directory();
        assert!(!directory.remove(MOON_PUBKEY, "lake"));
        assert_eq!(directory.alias_for(MOON_PUBKEY), Some("moon"));
        assert!(directory.remove(&MOON_PUBKEY.to_ascii_uppercase(), "moon"));
        assert!(directory.alias_for(MOON_PUBKEY).is_none());
        assert_eq!(directory.pubkeys().count(), 0);
    }

    #[test]
    fn decoding_is_deterministic() {
        let first = decode_order(&event("pending"), &directory()).expect("decodes");
        let second = decode_order(&event("pending"), &directory()).expect("decodes");
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_author_falls_back_to_platform_tag() {
        let (_, order) =
            decode_order(&event("pending"), &PubkeyDirectory::default()).expect("decodes");
        assert_eq!(
            order.and_then(|o| o.coordinator_short_alias).as_deref(),
            Some("moon")
        );
    }

    #[test]
    fn missing_key_is_a_decode_error() {
        let mut ev = event("pending");
        ev.tags.retain(|t| t[0] != "d");
        assert!(matches!(
            decode_order(&ev, &directory()),
            Err(FedError::Decode(_))
        ));
    }

    #[test]
    fn geohash_decodes_to_cell_centre() {
        let (lat, lon) = decode_geohash("u4pruydqqvj").expect("valid geohash");
        assert!((lat - 57.64911).abs() < 1e-4);
        assert!((lon - 10.40744).abs() < 1e-4);
        assert!(decode_geohash("a").is_none());
    }
}
