//! Runs a [`Pairer`] on tokio
//!
//! Requests become spawned tasks that report back over an mpsc channel;
//! adapter events come from the transport's broadcast.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::pairer::{
    Completion, Operation, OperationResult, Pairer, PairerCallbacks, PairerEvent, PairerState,
};
use crate::{AdapterEvent, Device, OptInStatus, PairerContext, PairerId, TransitionError};

pub struct PairingDriver {
    pairer: Pairer,
    ctx: PairerContext,
    adapter_events: broadcast::Receiver<AdapterEvent>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    background: Vec<JoinHandle<()>>,
}

/// How a driven attempt ended
#[derive(Debug)]
pub struct PairingReport {
    pub state: PairerState,
    /// Fire-and-forget work that may still be running
    pub background: Vec<JoinHandle<()>>,
}

impl PairingReport {
    /// Wait for the fire-and-forget work too
    pub async fn wait_for_background(self) -> PairerState {
        for task in self.background {
            if let Err(e) = task.await {
                log::warn!("background task failed: {e}");
            }
        }
        self.state
    }
}

impl PairingDriver {
    pub fn new(ctx: PairerContext, device: Arc<Device>, callbacks: PairerCallbacks) -> Self {
        // subscribe first: the pairer's first synchronous calls may already raise events
        let adapter_events = ctx.transport.subscribe();
        let pairer = Pairer::new(ctx.clone(), device, callbacks);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self { pairer, ctx, adapter_events, completions_tx, completions_rx, background: Vec::new() }
    }

    pub fn pairer(&self) -> &Pairer {
        &self.pairer
    }

    pub async fn run(self) -> PairingReport {
        self.run_until(std::future::pending()).await
    }

    /// Run until the pairer finishes or `cancel` resolves, whichever comes first
    pub async fn run_until(mut self, cancel: impl Future<Output = ()>) -> PairingReport {
        tokio::pin!(cancel);
        loop {
            self.dispatch();
            if self.pairer.is_finished() {
                break;
            }

            tokio::select! {
                _ = &mut cancel => {
                    log::info!("{}: pairing {} abandoned", self.pairer.id(), self.pairer.device());
                    self.pairer.cancel();
                }
                Some(completion) = self.completions_rx.recv() => {
                    if let Err(e) = self.pairer.advance(PairerEvent::Completed(completion)) {
                        match e {
                            TransitionError::Stale { .. } => {
                                log::debug!("{}: {e}", self.pairer.id())
                            }
                            _ => log::warn!("{}: dropped completion: {e}", self.pairer.id()),
                        }
                    }
                }
                event = self.adapter_events.recv() => match event {
                    Ok(event) => {
                        if let Err(e) = self.pairer.advance(PairerEvent::Adapter(event)) {
                            log::debug!("{}: ignored adapter event: {e}", self.pairer.id());
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        log::warn!("{}: missed {missed} adapter events", self.pairer.id());
                    }
                    Err(RecvError::Closed) => {
                        log::warn!("{}: adapter event stream closed", self.pairer.id());
                        self.pairer.cancel();
                    }
                },
            }
        }

        let background = std::mem::take(&mut self.background);
        PairingReport { state: self.pairer.state(), background }
    }

    fn dispatch(&mut self) {
        let id = self.pairer.id();
        for request in self.pairer.take_requests() {
            let ctx = self.ctx.clone();
            let fire_and_forget = request.operation.is_fire_and_forget();
            let completions = self.completions_tx.clone();
            let task = tokio::spawn(async move {
                let generation = request.generation;
                if let Some(result) = execute(&ctx, id, request.operation).await {
                    // the driver is gone when nobody receives
                    let _ = completions.send(Completion { generation, result });
                }
            });
            if fire_and_forget {
                self.background.push(task);
            }
        }
    }
}

async fn execute(
    ctx: &PairerContext,
    id: PairerId,
    operation: Operation,
) -> Option<OperationResult> {
    let result = match operation {
        Operation::CreateHandshake { device } => {
            OperationResult::Handshake(ctx.handshakes.create(device).await)
        }
        Operation::Pair { address } => OperationResult::Pair(ctx.transport.pair(address).await),
        Operation::ConnectByAddress { address } => {
            OperationResult::ConnectByAddress(ctx.transport.connect_device(address).await)
        }
        Operation::WritePasskey { gatt_client, data_encryptor, message_type, passkey } => {
            let encryptor = data_encryptor.as_ref();
            OperationResult::PasskeyWritten(
                gatt_client.write_passkey(message_type, passkey, encryptor).await,
            )
        }
        Operation::ParseDecryptedPasskey { data_encryptor, response } => {
            OperationResult::PasskeyParsed(data_encryptor.parse_decrypted_passkey(&response).await)
        }
        Operation::CheckOptInStatus => match ctx.repository.check_opt_in_status().await {
            Ok(status) => OperationResult::OptInStatus(status),
            Err(e) => {
                log::warn!("{id}: failed to check opt-in status: {e}");
                OperationResult::OptInStatus(OptInStatus::Unknown)
            }
        },
        Operation::WriteAccountKey { gatt_client, data_encryptor, account_key } => {
            let result = gatt_client.write_account_key(account_key, data_encryptor.as_ref()).await;
            OperationResult::AccountKeyWritten { account_key, result }
        }
        Operation::FetchDeviceImages { device } => {
            if let Err(e) = ctx.repository.fetch_device_images(device.clone()).await {
                log::warn!("{id}: failed to fetch images for {device}: {e}");
            }
            return None;
        }
        Operation::AssociateAccountKeyLocally { device } => {
            if let Err(e) = ctx.repository.associate_account_key_locally(device.clone()).await {
                log::warn!("{id}: failed to associate account key for {device}: {e}");
            }
            return None;
        }
        Operation::WriteAccountAssociation { device, account_key } => {
            let saved = ctx.repository.write_account_association(device.clone(), account_key).await;
            if let Err(e) = saved {
                log::warn!("{id}: failed to save account association for {device}: {e}");
            }
            return None;
        }
        Operation::UpdateOptInStatus { status } => {
            if let Err(e) = ctx.repository.update_opt_in_status(status).await {
                log::warn!("{id}: failed to update opt-in status: {e}");
            }
            return None;
        }
    };
    Some(result)
}
