// Entity Codecs
// Serialize aggregates to the byte representation stored in the backend.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Converts an entity to and from stored bytes
pub trait Codec<T>: Send + Sync {
    fn encode(&self, value: &T) -> StoreResult<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> StoreResult<T>;
}

/// JSON text (the interchange format shared with the other language servers)
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

/// MessagePack, compact and self-describing
#[derive(Debug, Clone, Copy, Default)]
pub struct MessagePackCodec;

/// Bincode, compact but schema-dependent
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl<T: Serialize + DeserializeOwned> Codec<T> for JsonCodec {
    fn encode(&self, value: &T) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(StoreError::codec)
    }

    fn decode(&self, bytes: &[u8]) -> StoreResult<T> {
        serde_json::from_slice(bytes).map_err(StoreError::codec)
    }
}

impl<T: Serialize + DeserializeOwned> Codec<T> for MessagePackCodec {
    fn encode(&self, value: &T) -> StoreResult<Vec<u8>> {
        rmp_serde::to_vec_named(value).map_err(StoreError::codec)
    }

    fn decode(&self, bytes: &[u8]) -> StoreResult<T> {
        rmp_serde::from_slice(bytes).map_err(StoreError::codec)
    }
}

impl<T: Serialize + DeserializeOwned> Codec<T> for BincodeCodec {
    fn encode(&self, value: &T) -> StoreResult<Vec<u8>> {
        bincode::serialize(value).map_err(StoreError::codec)
    }

    fn decode(&self, bytes: &[u8]) -> StoreResult<T> {
        bincode::deserialize(bytes).map_err(StoreError::codec)
    }
}

/// Codec selected by configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    #[default]
    Json,
    MessagePack,
    Bincode,
}

impl CodecKind {
    /// Whether stored bytes can be decoded without knowing the entity type
    ///
    /// Bincode carries no field names or type tags, so untyped tools cannot read it.
    pub fn is_self_describing(&self) -> bool {
        !matches!(self, CodecKind::Bincode)
    }
}

impl<T: Serialize + DeserializeOwned> Codec<T> for CodecKind {
    fn encode(&self, value: &T) -> StoreResult<Vec<u8>> {
        match self {
            CodecKind::Json => JsonCodec.encode(value),
            CodecKind::MessagePack => MessagePackCodec.encode(value),
            CodecKind::Bincode => BincodeCodec.encode(value),
        }
    }

    fn decode(&self, bytes: &[u8]) -> StoreResult<T> {
        match self {
            CodecKind::Json => Codec::<T>::decode(&JsonCodec, bytes),
            CodecKind::MessagePack => Codec::<T>::decode(&MessagePackCodec, bytes),
            CodecKind::Bincode => Codec::<T>::decode(&BincodeCodec, bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Wallet {
        gold: i64,
        gems: i64,
        tags: Vec<String>,
    }

    fn wallet() -> Wallet {
        Wallet {
            gold: 1000,
            gems: 3,
            tags: vec!["starter".into()],
        }
    }

    #[test]
    fn test_every_kind_restores_the_value() {
        for kind in [CodecKind::Json, CodecKind::MessagePack, CodecKind::Bincode] {
            let bytes = kind.encode(&wallet()).unwrap();
            let back: Wallet = kind.decode(&bytes).unwrap();
            assert_eq!(back, wallet(), "codec {kind:?}");
        }
    }

    #[test]
    fn test_json_is_plain_text() {
        let bytes = JsonCodec.encode(&wallet()).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains("\"gold\":1000"));
    }

    #[test]
    fn test_malformed_payload_is_codec_error() {
        let result: StoreResult<Wallet> = JsonCodec.decode(b"{not json");
        assert!(matches!(result, Err(StoreError::Codec { .. })));

        let result: StoreResult<Wallet> = MessagePackCodec.decode(&[0xc1]);
        assert!(matches!(result, Err(StoreError::Codec { .. })));
    }

    #[test]
    fn test_untyped_documents_need_self_describing_codec() {
        let doc = serde_json::json!({ "gold": 1000, "tags": ["starter"] });
        for kind in [CodecKind::Json, CodecKind::MessagePack] {
            assert!(kind.is_self_describing());
            let bytes = Codec::<serde_json::Value>::encode(&kind, &doc).unwrap();
            let back: serde_json::Value = kind.decode(&bytes).unwrap();
            assert_eq!(back, doc, "codec {kind:?}");
        }

        assert!(!CodecKind::Bincode.is_self_describing());
        let bytes = Codec::<serde_json::Value>::encode(&CodecKind::Bincode, &doc).unwrap();
        let back: StoreResult<serde_json::Value> = CodecKind::Bincode.decode(&bytes);
        assert!(matches!(back, Err(StoreError::Codec { .. })));
    }

    #[test]
    fn test_codec_kind_from_config_text() {
        #[derive(Deserialize)]
        struct Holder {
            codec: CodecKind,
        }
        let holder: Holder = toml::from_str("codec = \"message_pack\"").unwrap();
        assert_eq!(holder.codec, CodecKind::MessagePack);
    }
}
