/*
    block.rs - Ledger blocks and the chain digest

    A block is one line of the ledger file:

        {"index":3,"previous_hash":"9f..","timestamp":1700000000,"data":{..},"hash":"4c.."}

    Digest contract (shared by every writer and any external verifier):

        hash = hex(SHA-256(index || previous_hash || timestamp || canonical(data)))

    index and timestamp are written in decimal. The four parts are
    concatenated as UTF-8 with no separators. canonical(data)
    is the literal "Genesis Block" for the genesis marker, and for a message the
    compact JSON object with keys in the order sender_public_key,
    receiver_public_key, ciphertext.
*/

use crate::ledger::errors::StoreResult;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// `previous_hash` of the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Payload of the genesis block, as persisted and as hashed
pub const GENESIS_MARKER: &str = "Genesis Block";

/// Encode opaque identity or ciphertext bytes for the text log
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Reverse of [`encode_base64`]
pub fn decode_base64(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(text)
}

/// Chain digest over the block header fields, lowercase hex
pub fn digest(index: u64, previous_hash: &str, timestamp: u64, canonical_data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(index.to_string().as_bytes());
    hasher.update(previous_hash.as_bytes());
    hasher.update(timestamp.to_string().as_bytes());
    hasher.update(canonical_data.as_bytes());
    hex::encode(hasher.finalize())
}

/// `(index, hash)` of the most recently committed block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tail {
    pub index: u64,
    pub hash: String,
}

/// Fixed payload of block 0. Persisted as the bare string "Genesis Block".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenesisMarker;

impl Serialize for GenesisMarker {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(GENESIS_MARKER)
    }
}

impl<'de> Deserialize<'de> for GenesisMarker {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        if text == GENESIS_MARKER {
            Ok(GenesisMarker)
        } else {
            Err(de::Error::invalid_value(
                de::Unexpected::Str(&text),
                &GENESIS_MARKER,
            ))
        }
    }
}

/// One relayed message. All fields are standard base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageRecord {
    pub sender_public_key: String,
    pub receiver_public_key: String,
    pub ciphertext: String,
}

impl MessageRecord {
    /// Build a record from raw identity and ciphertext bytes
    pub fn new(sender_public_key: &[u8], receiver_public_key: &[u8], ciphertext: &[u8]) -> Self {
        Self {
            sender_public_key: encode_base64(sender_public_key),
            receiver_public_key: encode_base64(receiver_public_key),
            ciphertext: encode_base64(ciphertext),
        }
    }

    pub fn sender_key_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        decode_base64(&self.sender_public_key)
    }

    pub fn receiver_key_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        decode_base64(&self.receiver_public_key)
    }

    pub fn ciphertext_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        decode_base64(&self.ciphertext)
    }

    /// True when the record's receiver matches an already encoded key
    pub fn is_addressed_to(&self, encoded_key: &str) -> bool {
        self.receiver_public_key == encoded_key
    }
}

/// Block payload: the genesis marker or a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Genesis(GenesisMarker),
    Message(MessageRecord),
}

impl Payload {
    /// The exact string fed to the digest
    pub fn canonical_string(&self) -> StoreResult<String> {
        match self {
            Payload::Genesis(_) => Ok(GENESIS_MARKER.to_string()),
            Payload::Message(record) => Ok(serde_json::to_string(record)?),
        }
    }

    pub fn as_message(&self) -> Option<&MessageRecord> {
        match self {
            Payload::Message(record) => Some(record),
            Payload::Genesis(_) => None,
        }
    }

    pub fn into_message(self) -> Option<MessageRecord> {
        match self {
            Payload::Message(record) => Some(record),
            Payload::Genesis(_) => None,
        }
    }
}

/// A sealed ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Block {
    pub index: u64,
    pub previous_hash: String,
    pub timestamp: u64,
    pub data: Payload,
    pub hash: String,
}

impl Block {
    /// Block 0 of a fresh chain
    pub fn genesis(timestamp: u64) -> StoreResult<Self> {
        Self::seal(
            0,
            GENESIS_PREVIOUS_HASH.to_string(),
            timestamp,
            Payload::Genesis(GenesisMarker),
        )
    }

    /// The block that follows `tail`
    pub fn next(tail: &Tail, timestamp: u64, record: MessageRecord) -> StoreResult<Self> {
        Self::seal(
            tail.index + 1,
            tail.hash.clone(),
            timestamp,
            Payload::Message(record),
        )
    }

    fn seal(index: u64, previous_hash: String, timestamp: u64, data: Payload) -> StoreResult<Self> {
        let hash = digest(index, &previous_hash, timestamp, &data.canonical_string()?);
        Ok(Block {
            index,
            previous_hash,
            timestamp,
            data,
            hash,
        })
    }

    /// Recompute the digest from the header fields
    pub fn compute_hash(&self) -> StoreResult<String> {
        Ok(digest(
            self.index,
            &self.previous_hash,
            self.timestamp,
            &self.data.canonical_string()?,
        ))
    }

    /// True when the stored hash matches the recomputed digest
    pub fn verify_hash(&self) -> StoreResult<bool> {
        Ok(self.compute_hash()? == self.hash)
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    pub fn tail(&self) -> Tail {
        Tail {
            index: self.index,
            hash: self.hash.clone(),
        }
    }

    /// One self-contained ledger line, newline included
    pub fn to_line(&self) -> StoreResult<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> MessageRecord {
        MessageRecord::new(b"alice-key", b"bob-key", b"\x00\x01ciphertext")
    }

    #[test]
    fn test_genesis_shape() {
        let genesis = Block::genesis(1_700_000_000).unwrap();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, "0");
        assert_eq!(genesis.data, Payload::Genesis(GenesisMarker));
        assert!(genesis.is_genesis());

        let mut hasher = Sha256::new();
        hasher.update(b"001700000000Genesis Block");
        assert_eq!(genesis.hash, hex::encode(hasher.finalize()));
    }

    #[test]
    fn test_canonical_message_field_order() {
        let payload = Payload::Message(sample_record());
        let canonical = payload.canonical_string().unwrap();
        let sender = canonical.find("sender_public_key").unwrap();
        let receiver = canonical.find("receiver_public_key").unwrap();
        let ciphertext = canonical.find("\"ciphertext\"").unwrap();
        assert!(sender < receiver && receiver < ciphertext);
        assert!(!canonical.contains(' '));
    }

    #[test]
    fn test_next_links_to_tail() {
        let genesis = Block::genesis(10).unwrap();
        let block = Block::next(&genesis.tail(), 11, sample_record()).unwrap();
        assert_eq!(block.index, 1);
        assert_eq!(block.previous_hash, genesis.hash);
        assert!(block.verify_hash().unwrap());
        assert_ne!(block.hash, genesis.hash);
    }

    #[test]
    fn test_line_format() {
        let genesis = Block::genesis(42).unwrap();
        let line = genesis.to_line().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.contains("\"data\":\"Genesis Block\""));
        assert_eq!(Block::from_line(&line).unwrap(), genesis);

        let block = Block::next(&genesis.tail(), 43, sample_record()).unwrap();
        let parsed = Block::from_line(&block.to_line().unwrap()).unwrap();
        assert_eq!(parsed.data.as_message(), Some(&sample_record()));
    }

    #[test]
    fn test_tampering_is_detected() {
        let genesis = Block::genesis(42).unwrap();
        let mut block = Block::next(&genesis.tail(), 43, sample_record()).unwrap();
        block.timestamp += 1;
        assert!(!block.verify_hash().unwrap());
    }

    #[test]
    fn test_foreign_string_payload_is_rejected() {
        let line = concat!(
            r#"{"index":0,"previous_hash":"0","timestamp":1,"#,
            r#""data":"Not Genesis","hash":"00"}"#
        );
        assert!(Block::from_line(line).is_err());
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let genesis = Block::genesis(42).unwrap();
        let block = Block::next(&genesis.tail(), 43, sample_record()).unwrap();
        let line = block.to_line().unwrap();

        let in_block = line.replacen("\"hash\"", "\"extra\":1,\"hash\"", 1);
        assert!(Block::from_line(&in_block).is_err());

        let in_record = line.replacen("\"ciphertext\"", "\"extra\":1,\"ciphertext\"", 1);
        assert!(Block::from_line(&in_record).is_err());

        assert_eq!(Block::from_line(&line).unwrap(), block);
    }

    #[test]
    fn test_record_decoding() {
        let record = sample_record();
        assert_eq!(record.sender_key_bytes().unwrap(), b"alice-key");
        assert_eq!(record.receiver_key_bytes().unwrap(), b"bob-key");
        assert_eq!(record.ciphertext_bytes().unwrap(), b"\x00\x01ciphertext");
        assert!(record.is_addressed_to(&encode_base64(b"bob-key")));
        assert!(!record.is_addressed_to(&encode_base64(b"alice-key")));
    }
}
