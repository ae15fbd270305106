//! Typed values on top of the byte-level session contract.
//!
//! Values travel as UTF-8 JSON text. Decoding follows `serde_json`'s rules:
//! unknown fields are ignored, missing fields fail unless the target type
//! marks them optional or defaulted.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{SessionError, SessionValues};

/// Serializes `value` as JSON and stores it under `key`, replacing any
/// previous value.
///
/// `None` is stored as JSON `null`. Fails only for an empty key or a value
/// `serde_json` refuses to encode (a map with non-string keys, for example).
pub fn set_session<S, T>(store: &S, key: &str, value: &T) -> Result<(), SessionError>
where
    S: SessionValues + ?Sized,
    T: Serialize + ?Sized,
{
    if key.is_empty() {
        return Err(SessionError::EmptyKey);
    }
    let json = serde_json::to_string(value).map_err(|source| SessionError::Encode {
        key: key.to_owned(),
        source,
    })?;
    store.set(key, Bytes::from(json));
    Ok(())
}

/// Reads the value stored under `key` as a `T`.
///
/// - `Ok(None)`: nothing was ever stored under `key`.
/// - `Ok(Some(v))`: the stored JSON decoded as `T`.
/// - `Err(e)` with [`e.is_decode()`](SessionError::is_decode): bytes are
///   present but are not UTF-8 JSON of a compatible shape.
pub fn get_session<T, S>(store: &S, key: &str) -> Result<Option<T>, SessionError>
where
    T: DeserializeOwned,
    S: SessionValues + ?Sized,
{
    let Some(bytes) = store.get(key) else {
        return Ok(None);
    };
    let text = std::str::from_utf8(&bytes).map_err(|source| SessionError::NotUtf8 {
        key: key.to_owned(),
        source,
    })?;
    serde_json::from_str(text)
        .map(Some)
        .map_err(|source| SessionError::Decode { key: key.to_owned(), source })
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::session::Session;

    #[derive(Debug, Deserialize, PartialEq, Serialize)]
    struct Cart {
        items: Vec<i32>,
    }

    #[derive(Debug, Deserialize, PartialEq, Serialize)]
    struct Wizard {
        step: u8,
        vehicle: Option<String>,
        notes: Vec<String>,
    }

    #[test]
    fn round_trips_structured_values() {
        let session = Session::new();
        let wizard = Wizard {
            step: 2,
            vehicle: Some("KA-01-1234".into()),
            notes: vec!["oil change".into(), "brakes".into()],
        };

        set_session(&session, "wizard", &wizard).unwrap();

        let read: Option<Wizard> = get_session(&session, "wizard").unwrap();
        assert_eq!(read, Some(wizard));
    }

    #[test]
    fn stored_bytes_are_utf8_json() {
        let session = Session::new();
        set_session(&session, "cart", &Cart { items: vec![1, 2, 3] }).unwrap();
        assert_eq!(session.get("cart").unwrap(), Bytes::from_static(br#"{"items":[1,2,3]}"#));
    }

    #[test]
    fn cart_items_read_back_as_a_list() {
        #[derive(Deserialize)]
        struct Items {
            items: Vec<i32>,
        }

        let session = Session::new();
        set_session(&session, "cart", &serde_json::json!({ "items": [1, 2, 3] })).unwrap();

        let cart: Items = get_session(&session, "cart").unwrap().unwrap();
        assert_eq!(cart.items, vec![1, 2, 3]);

        let as_cart: Option<Cart> = get_session(&session, "cart").unwrap();
        assert_eq!(as_cart, Some(Cart { items: vec![1, 2, 3] }));
    }

    #[test]
    fn missing_key_is_no_value_not_an_error() {
        let session = Session::new();
        let value: Option<String> = get_session(&session, "nope").unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn second_write_wins() {
        let session = Session::new();
        set_session(&session, "k", "first").unwrap();
        set_session(&session, "k", "second").unwrap();

        let value: Option<String> = get_session(&session, "k").unwrap();
        assert_eq!(value.as_deref(), Some("second"));
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let session = Session::new();
        session.set("cart", Bytes::from_static(b"{items: [1,"));

        let err = get_session::<Cart, _>(&session, "cart").unwrap_err();
        assert!(err.is_decode());
        assert!(matches!(err, SessionError::Decode { ref key, .. } if key == "cart"));
    }

    #[test]
    fn shape_mismatch_is_a_decode_error() {
        let session = Session::new();
        set_session(&session, "cart", "not a cart").unwrap();

        let err = get_session::<Cart, _>(&session, "cart").unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn invalid_utf8_is_a_decode_error() {
        let session = Session::new();
        session.set("raw", Bytes::from_static(&[0xff, 0xfe, 0x22]));

        let err = get_session::<String, _>(&session, "raw").unwrap_err();
        assert!(matches!(err, SessionError::NotUtf8 { .. }));
        assert!(err.is_decode());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let session = Session::new();
        set_session(&session, "cart", &serde_json::json!({ "items": [4], "coupon": "X" })).unwrap();

        let cart: Option<Cart> = get_session(&session, "cart").unwrap();
        assert_eq!(cart, Some(Cart { items: vec![4] }));
    }

    #[test]
    fn null_is_stored_and_read_as_none() {
        let session = Session::new();
        set_session(&session, "maybe", &None::<Cart>).unwrap();

        assert_eq!(session.get("maybe").unwrap(), Bytes::from_static(b"null"));
        let read: Option<Option<Cart>> = get_session(&session, "maybe").unwrap();
        assert_eq!(read, Some(None));
    }

    #[test]
    fn empty_key_is_rejected() {
        let session = Session::new();
        let err = set_session(&session, "", &1).unwrap_err();
        assert!(matches!(err, SessionError::EmptyKey));
        assert!(session.is_empty());
    }

    #[test]
    fn unencodable_value_is_an_encode_error() {
        use std::collections::HashMap;

        let mut by_pair = HashMap::new();
        by_pair.insert((1, 2), "x");

        let session = Session::new();
        let err = set_session(&session, "pairs", &by_pair).unwrap_err();
        assert!(matches!(err, SessionError::Encode { .. }));
        assert!(!err.is_decode());
    }
}
