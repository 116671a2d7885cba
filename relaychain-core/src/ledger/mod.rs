/*
    Ledger subsystem - tamper-evident message log

    block  - block layout, payloads and the chain digest
    store  - durable append/scan/verify over the ledger file
    errors - storage error taxonomy shared with the registry
*/

pub mod block;
pub mod errors;
pub mod store;

pub use block::{
    decode_base64, digest, encode_base64, Block, GenesisMarker, MessageRecord, Payload, Tail,
    GENESIS_MARKER, GENESIS_PREVIOUS_HASH,
};
pub use errors::{StoreError, StoreResult};
pub use store::{verify_blocks, BlockReader, ChainReport, LedgerScan, LedgerStore};
