//! Relay server for end-to-end encrypted messages over a hash-chained ledger
//!
//! Clients present a public identity and a username, then store ciphertext
//! for other identities (`send_message`) or fetch what was stored for their
//! own (`retrieve_messages`). Every accepted message becomes a block in an
//! append-only, SHA-256 chained JSON-lines ledger.

pub mod cipher;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod state;
pub mod storage;

pub use cipher::{Cipher, CipherError, SealedBoxCipher, SealedBoxKeypair};
pub use client::{ClientError, RelayClient};
pub use config::Config;
pub use dispatcher::{Dispatcher, SessionState};
pub use error::{RelayError, RelayResult};
pub use ledger::{Block, LedgerStore, MessageRecord, StoreError};
pub use logging::{init_logging, LogLevel};
pub use registry::{MemberEntry, MembershipRegistry};
pub use server::RelayServer;
pub use state::RelayState;
