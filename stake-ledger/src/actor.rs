//! Actor-based concurrency for the keeper
//!
//! The keeper is a single-writer state machine (`&mut self` on every
//! mutation). This module runs it inside one Tokio task so many async
//! callers can share it:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │      Callers (claim module, block driver, queries)    │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               KeeperHandle (Clone)                    │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              KeeperActor (Single Task)                │
//! │       StakeKeeper -> WriteTxn -> one batch            │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! A fatal error (see [`Error::is_fatal`]) stops the actor; later calls fail
//! with [`Error::Concurrency`].

use crate::bank::TransactionFilter;
use crate::genesis::GenesisState;
use crate::keeper::{ClaimRegistry, OutcomeResolver, StakeKeeper};
use crate::store::KeyValueStore;
use crate::types::{
    Address, Argument, Coin, Coins, Stake, StakeType, Timestamp, Transaction, TransactionKind,
};
use crate::{Error, Result};
use chrono::Duration;
use tokio::sync::{mpsc, oneshot};

/// Message sent to the keeper actor
#[derive(Debug)]
pub enum KeeperMessage {
    /// Create an argument
    CreateArgument {
        claim_id: u64,
        creator: Address,
        body: String,
        now: Timestamp,
        response: oneshot::Sender<Result<u64>>,
    },

    /// Place a stake
    CreateStake {
        argument_id: u64,
        creator: Address,
        amount: Coin,
        stake_type: StakeType,
        duration: Option<Duration>,
        now: Timestamp,
        response: oneshot::Sender<Result<u64>>,
    },

    /// Record a ledger mutation (registration grants, interest, rewards)
    Record {
        address: Address,
        amount: Coin,
        kind: TransactionKind,
        reference_id: u64,
        now: Timestamp,
        response: oneshot::Sender<Result<Transaction>>,
    },

    /// End-of-block: drain one page of matured stakes
    EndBlock {
        now: Timestamp,
        response: oneshot::Sender<Result<usize>>,
    },

    /// Get argument by ID
    GetArgument {
        argument_id: u64,
        response: oneshot::Sender<Result<Argument>>,
    },

    /// Get stake by ID
    GetStake {
        stake_id: u64,
        response: oneshot::Sender<Result<Stake>>,
    },

    /// Stake IDs on an argument
    GetArgumentStakes {
        argument_id: u64,
        response: oneshot::Sender<Result<Vec<u64>>>,
    },

    /// Balance in one denomination
    GetBalance {
        address: Address,
        denom: String,
        response: oneshot::Sender<Result<Coin>>,
    },

    /// Earned coins of a user
    GetEarnedCoins {
        address: Address,
        response: oneshot::Sender<Result<Coins>>,
    },

    /// Filtered transactions of a user
    GetTransactions {
        address: Address,
        filter: TransactionFilter,
        response: oneshot::Sender<Result<Vec<Transaction>>>,
    },

    /// Export a genesis snapshot
    DumpState {
        response: oneshot::Sender<Result<GenesisState>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that owns the keeper
pub struct KeeperActor<S: KeyValueStore, C: ClaimRegistry, R: OutcomeResolver> {
    /// The single writer
    keeper: StakeKeeper<S, C, R>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<KeeperMessage>,
}

impl<S: KeyValueStore, C: ClaimRegistry, R: OutcomeResolver> KeeperActor<S, C, R> {
    /// Create new actor
    pub fn new(keeper: StakeKeeper<S, C, R>, mailbox: mpsc::Receiver<KeeperMessage>) -> Self {
        Self { keeper, mailbox }
    }

    /// Run until shutdown, mailbox close or a fatal error
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            if let KeeperMessage::Shutdown = msg {
                tracing::info!("Keeper actor shutting down");
                break;
            }
            if let Err(e) = self.handle_message(msg) {
                tracing::error!(error = %e, "Fatal keeper error, stopping actor");
                break;
            }
        }
    }

    /// Handle a single message; returns the error only if it is fatal
    fn handle_message(&mut self, msg: KeeperMessage) -> Result<()> {
        let keeper = &mut self.keeper;
        match msg {
            KeeperMessage::CreateArgument {
                claim_id,
                creator,
                body,
                now,
                response,
            } => reply(response, keeper.create_argument(claim_id, &creator, &body, &now)),

            KeeperMessage::CreateStake {
                argument_id,
                creator,
                amount,
                stake_type,
                duration,
                now,
                response,
            } => reply(
                response,
                keeper.create_stake(argument_id, &creator, &amount, stake_type, duration, &now),
            ),

            KeeperMessage::Record {
                address,
                amount,
                kind,
                reference_id,
                now,
                response,
            } => reply(
                response,
                keeper
                    .bank_mut()
                    .record(&address, &amount, kind, reference_id, &now),
            ),

            KeeperMessage::EndBlock { now, response } => reply(response, keeper.end_block(&now)),

            KeeperMessage::GetArgument {
                argument_id,
                response,
            } => reply(response, keeper.argument(argument_id)),

            KeeperMessage::GetStake { stake_id, response } => reply(response, keeper.stake(stake_id)),

            KeeperMessage::GetArgumentStakes {
                argument_id,
                response,
            } => reply(response, keeper.argument_stakes(argument_id)),

            KeeperMessage::GetBalance {
                address,
                denom,
                response,
            } => reply(response, keeper.bank().balance(&address, &denom)),

            KeeperMessage::GetEarnedCoins { address, response } => {
                reply(response, keeper.earned_coins(&address))
            }

            KeeperMessage::GetTransactions {
                address,
                filter,
                response,
            } => reply(
                response,
                keeper.bank().transactions_by_address(&address, &filter),
            ),

            KeeperMessage::DumpState { response } => reply(response, keeper.dump_state()),

            KeeperMessage::Shutdown => Ok(()),
        }
    }
}

/// Send `result` back; a fatal error is also returned to stop the actor
fn reply<T>(response: oneshot::Sender<Result<T>>, result: Result<T>) -> Result<()> {
    match result {
        Err(e) if e.is_fatal() => {
            let message = e.to_string();
            let _ = response.send(Err(e));
            Err(Error::Concurrency(message))
        }
        other => {
            let _ = response.send(other);
            Ok(())
        }
    }
}

/// Handle for sending messages to the actor
#[derive(Debug, Clone)]
pub struct KeeperHandle {
    sender: mpsc::Sender<KeeperMessage>,
}

impl KeeperHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<KeeperMessage>) -> Self {
        Self { sender }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> KeeperMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Create an argument
    pub async fn create_argument(
        &self,
        claim_id: u64,
        creator: Address,
        body: String,
        now: Timestamp,
    ) -> Result<u64> {
        self.call(|response| KeeperMessage::CreateArgument {
            claim_id,
            creator,
            body,
            now,
            response,
        })
        .await
    }

    /// Place a stake
    pub async fn create_stake(
        &self,
        argument_id: u64,
        creator: Address,
        amount: Coin,
        stake_type: StakeType,
        duration: Option<Duration>,
        now: Timestamp,
    ) -> Result<u64> {
        self.call(|response| KeeperMessage::CreateStake {
            argument_id,
            creator,
            amount,
            stake_type,
            duration,
            now,
            response,
        })
        .await
    }

    /// Record a ledger mutation
    pub async fn record(
        &self,
        address: Address,
        amount: Coin,
        kind: TransactionKind,
        reference_id: u64,
        now: Timestamp,
    ) -> Result<Transaction> {
        self.call(|response| KeeperMessage::Record {
            address,
            amount,
            kind,
            reference_id,
            now,
            response,
        })
        .await
    }

    /// Drain one page of matured stakes
    pub async fn end_block(&self, now: Timestamp) -> Result<usize> {
        self.call(|response| KeeperMessage::EndBlock { now, response })
            .await
    }

    /// Get argument by ID
    pub async fn argument(&self, argument_id: u64) -> Result<Argument> {
        self.call(|response| KeeperMessage::GetArgument {
            argument_id,
            response,
        })
        .await
    }

    /// Get stake by ID
    pub async fn stake(&self, stake_id: u64) -> Result<Stake> {
        self.call(|response| KeeperMessage::GetStake { stake_id, response })
            .await
    }

    /// Stake IDs on an argument
    pub async fn argument_stakes(&self, argument_id: u64) -> Result<Vec<u64>> {
        self.call(|response| KeeperMessage::GetArgumentStakes {
            argument_id,
            response,
        })
        .await
    }

    /// Balance in one denomination
    pub async fn balance(&self, address: Address, denom: String) -> Result<Coin> {
        self.call(|response| KeeperMessage::GetBalance {
            address,
            denom,
            response,
        })
        .await
    }

    /// Earned coins of a user
    pub async fn earned_coins(&self, address: Address) -> Result<Coins> {
        self.call(|response| KeeperMessage::GetEarnedCoins { address, response })
            .await
    }

    /// Filtered transactions of a user
    pub async fn transactions_by_address(
        &self,
        address: Address,
        filter: TransactionFilter,
    ) -> Result<Vec<Transaction>> {
        self.call(|response| KeeperMessage::GetTransactions {
            address,
            filter,
            response,
        })
        .await
    }

    /// Export a genesis snapshot
    pub async fn dump_state(&self) -> Result<GenesisState> {
        self.call(|response| KeeperMessage::DumpState { response })
            .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(KeeperMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the keeper actor
pub fn spawn_keeper_actor<S, C, R>(keeper: StakeKeeper<S, C, R>, mailbox_capacity: usize) -> KeeperHandle
where
    S: KeyValueStore + 'static,
    C: ClaimRegistry + 'static,
    R: OutcomeResolver + 'static,
{
    let (tx, rx) = mpsc::channel(mailbox_capacity); // Bounded channel for backpressure
    let actor = KeeperActor::new(keeper, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    KeeperHandle::new(tx)
}
