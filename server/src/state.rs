//! Server-wide state: the published pre-key bundles, the per-(conversation, sender-device)
//! counter ledger, the persisted message store, the message-key vault, and the live peer
//! connection map. Every store is guarded independently, mirroring the teacher's
//! `Arc<RwLock<HashMap<...>>>` peer-map idiom rather than one coarse global lock.

use common::wire::StoredMessage;
use protocol::counter::CounterLedger;
use protocol::prekey::PreKeyBundleStore;
use protocol::vault::MessageKeyVault;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

pub(crate) type Tx = mpsc::UnboundedSender<Message>;
pub(crate) type PeerMap = Arc<RwLock<HashMap<String, Tx>>>;

pub(crate) struct AppState {
    pub(crate) prekeys: RwLock<PreKeyBundleStore>,
    pub(crate) counters: RwLock<CounterLedger>,
    pub(crate) messages: RwLock<HashMap<String, Vec<StoredMessage>>>,
    pub(crate) vault: RwLock<MessageKeyVault>,
    pub(crate) peers: PeerMap,
    pub(crate) send_state_hmac_secret: Vec<u8>,
}

impl AppState {
    pub(crate) fn new(send_state_hmac_secret: Vec<u8>) -> Arc<AppState> {
        Arc::new(AppState {
            prekeys: RwLock::new(PreKeyBundleStore::new()),
            counters: RwLock::new(CounterLedger::new()),
            messages: RwLock::new(HashMap::new()),
            vault: RwLock::new(MessageKeyVault::new()),
            peers: Arc::new(RwLock::new(HashMap::new())),
            send_state_hmac_secret,
        })
    }
}
