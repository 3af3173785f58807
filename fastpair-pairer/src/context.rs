use std::sync::Arc;

use crate::{FastPairRepository, HandshakeLookup, LoginState, PairerConfig, PairingTransport};

/// Everything a pairer talks to, passed in explicitly
#[derive(Clone)]
pub struct PairerContext {
    pub handshakes: Arc<HandshakeLookup>,
    pub transport: Arc<dyn PairingTransport>,
    pub repository: Arc<dyn FastPairRepository>,
    pub login: Arc<dyn LoginState>,
    pub config: PairerConfig,
}
