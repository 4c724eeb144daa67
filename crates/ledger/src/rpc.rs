//! Ledger RPC - submit transactions and read back verified state
//!
//! Flow of `submit_and_wait`:
//! Idle -> Submitting -> AwaitingInclusion -> FetchingProof -> Verifying -> Done,
//! with any stage able to end in Failed. Every state handed back to the
//! caller comes from a proof checked against the roster's collective key.

use quorum_network::{ConnectionConfig, Connection, Dialer, PublicKey, Roster, RosterConnection};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::collective::CollectiveVerifier;
use crate::config::{ChainConfig, RpcConfig};
use crate::error::{RpcError, TransactionError};
use crate::instance::{Instance, InstanceId};
use crate::instruction::Action;
use crate::messages::{AddTxRequest, GetProofRequest, GetSignerCountersRequest, TxStatus};
use crate::proof::{Hash, Proof, ProofVerifier, VerifiedState};
use crate::transaction::ClientTransaction;

/// Stages of one submit-and-wait orchestration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Idle,
    Submitting,
    AwaitingInclusion,
    FetchingProof,
    Verifying,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    /// Whether `next` directly follows this stage
    pub fn can_advance_to(self, next: Stage) -> bool {
        match (self, next) {
            (current, _) if current.is_terminal() => false,
            (_, Stage::Failed) => true,
            (Stage::Idle, Stage::Submitting)
            | (Stage::Submitting, Stage::AwaitingInclusion)
            | (Stage::AwaitingInclusion, Stage::FetchingProof)
            | (Stage::FetchingProof, Stage::Verifying)
            | (Stage::Verifying, Stage::Done) => true,
            _ => false,
        }
    }
}

/// Result of a transaction observed in a verified ledger state
#[derive(Debug, Clone)]
pub struct TransactionOutcome {
    pub tx_hash: Hash,
    /// Instance whose state showed the transaction took effect
    pub instance_id: InstanceId,
    pub height: u64,
    pub state: VerifiedState,
    /// Inclusion checks made while waiting
    pub polls: u32,
}

/// What the target instance must look like once the transaction is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    Present,
    /// Present with a version above the one read before submission
    NewerThan(Option<u64>),
    Absent,
}

impl Effect {
    fn satisfied_by(self, state: &VerifiedState) -> bool {
        match (self, state.version()) {
            (Effect::Present, Some(_)) => true,
            (Effect::NewerThan(baseline), Some(version)) => Some(version) > baseline,
            (Effect::Absent, None) => true,
            _ => false,
        }
    }
}

/// How inclusion of one transaction is recognised
#[derive(Debug, Clone)]
struct Expectation {
    target: InstanceId,
    effect: Effect,
    /// Height of the target's state read before submission
    baseline_height: u64,
    /// Counters the signers reach once the transaction is committed. Set when
    /// the effect already held before submission, so the target alone cannot
    /// show inclusion.
    counters: Option<HashMap<PublicKey, u64>>,
}

impl Expectation {
    fn observed_in(&self, state: &VerifiedState) -> bool {
        state.height > self.baseline_height && self.effect.satisfied_by(state)
    }
}

struct Orchestration {
    tx: String,
    stage: Stage,
}

impl Orchestration {
    fn new(tx_hash: &Hash) -> Self {
        Self {
            tx: hex::encode(&tx_hash[..8]),
            stage: Stage::Idle,
        }
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(self.stage.can_advance_to(next), "{:?} -> {:?}", self.stage, next);
        tracing::debug!("tx {}: {:?} -> {:?}", self.tx, self.stage, next);
        self.stage = next;
    }

    fn fail(&mut self, err: &RpcError) {
        tracing::warn!("tx {} failed during {:?}: {}", self.tx, self.stage, err);
        self.stage = Stage::Failed;
    }
}

/// Client of one ledger, reached through a connection to its roster
pub struct LedgerRpc<C: Connection = RosterConnection> {
    conn: Arc<C>,
    verifier: ProofVerifier,
    config: RpcConfig,
}

impl LedgerRpc<RosterConnection> {
    /// Connect to `roster` with failover across its members
    pub fn connect(
        roster: Arc<Roster>,
        chain_id: Hash,
        dialer: Arc<dyn Dialer>,
        connection: ConnectionConfig,
        config: RpcConfig,
    ) -> Self {
        let conn = Arc::new(RosterConnection::new(roster.clone(), dialer, connection));
        Self::new(conn, roster, chain_id, config)
    }
}

impl<C: Connection> LedgerRpc<C> {
    pub fn new(conn: Arc<C>, roster: Arc<Roster>, chain_id: Hash, config: RpcConfig) -> Self {
        Self {
            conn,
            verifier: ProofVerifier::new(roster, chain_id),
            config,
        }
    }

    pub fn with_collective_verifier(mut self, collective: Arc<dyn CollectiveVerifier>) -> Self {
        self.verifier = self.verifier.with_collective_verifier(collective);
        self
    }

    pub fn connection(&self) -> &Arc<C> {
        &self.conn
    }

    pub fn roster(&self) -> &Arc<Roster> {
        self.verifier.roster()
    }

    pub fn chain_id(&self) -> &Hash {
        self.verifier.chain_id()
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    /// Verified state of `key` at the latest block
    pub async fn get_proof(&self, key: &InstanceId) -> Result<VerifiedState, RpcError> {
        let proof = self.fetch_proof(key, None).await?;
        Ok(self.verifier.verify(key, &proof)?)
    }

    /// Verified state of `key` at `height` or later
    pub async fn get_proof_at(&self, key: &InstanceId, height: u64) -> Result<VerifiedState, RpcError> {
        let proof = self.fetch_proof(key, Some(height)).await?;
        self.verify_at(key, &proof, height)
    }

    /// Decoded view of an instance; `None` when the roster vouches it is absent
    pub async fn get_instance(&self, key: &InstanceId) -> Result<Option<Instance>, RpcError> {
        let state = self.get_proof(key).await?;
        if !state.is_present() {
            return Ok(None);
        }
        Ok(Some(Instance::from_verified(&state)?))
    }

    /// Chain parameters from the config instance
    pub async fn get_chain_config(&self) -> Result<ChainConfig, RpcError> {
        let state = self.get_proof(&InstanceId::CONFIG).await?;
        Ok(ChainConfig::from_state(&state)?)
    }

    /// Latest counter of each signer, ready for `TransactionBuilder::fill_counters`
    pub async fn get_signer_counters(&self, signers: &[PublicKey]) -> Result<HashMap<PublicKey, u64>, RpcError> {
        let (counters, height) = self.fetch_signer_counters(signers).await?;
        tracing::debug!("Fetched {} signer counters at height {}", signers.len(), height);
        Ok(counters)
    }

    /// Submit a validated transaction once. Never resubmits on ambiguity.
    pub async fn submit(&self, tx: &ClientTransaction) -> Result<TxStatus, RpcError> {
        tx.validate()?;
        let request = AddTxRequest {
            version: self.config.protocol_version,
            chain_id: *self.chain_id(),
            transaction: tx.clone(),
            inclusion_wait: self.config.inclusion_wait_blocks,
        };
        let response = self.conn.send(&request).await.map_err(RpcError::from_submission)?;
        match response.status {
            TxStatus::Rejected { reason } => Err(RpcError::Rejected(reason)),
            status => Ok(status),
        }
    }

    /// Submit `tx`, wait until its effect shows in a verified state and
    /// return that state.
    ///
    /// The effect is judged on the last instruction against the target's
    /// state read before submission: a spawn must make the derived instance
    /// present, an invoke must raise the target's version, a delete must make
    /// the target absent, each at a later height. When that already held
    /// beforehand, inclusion is read from the signers' counters instead.
    /// Cancelling stops waiting; it cannot withdraw a submission.
    pub async fn submit_and_wait(
        &self,
        tx: &ClientTransaction,
        cancel: &CancellationToken,
    ) -> Result<TransactionOutcome, RpcError> {
        let mut run = Orchestration::new(&tx.hash());
        let result = self.drive(&mut run, tx, cancel).await;
        if let Err(err) = &result {
            run.fail(err);
        }
        result
    }

    async fn drive(
        &self,
        run: &mut Orchestration,
        tx: &ClientTransaction,
        cancel: &CancellationToken,
    ) -> Result<TransactionOutcome, RpcError> {
        tx.validate()?;
        let expectation = self.expectation(run, tx, cancel).await?;
        let target = expectation.target;

        run.advance(Stage::Submitting);
        let status = cancellable(cancel, run.stage, self.submit(tx)).await?;

        run.advance(Stage::AwaitingInclusion);
        let (height, polls) = self.await_inclusion(run, &expectation, &status, cancel).await?;

        run.advance(Stage::FetchingProof);
        let proof = cancellable(cancel, run.stage, self.fetch_proof(&target, Some(height))).await?;

        run.advance(Stage::Verifying);
        let state = self.verify_at(&target, &proof, height)?;
        if !expectation.observed_in(&state) {
            return Err(RpcError::Protocol(format!(
                "state of {} at height {} contradicts the inclusion observed earlier",
                target, height
            )));
        }

        run.advance(Stage::Done);
        Ok(TransactionOutcome {
            tx_hash: tx.hash(),
            instance_id: target,
            height: state.height,
            state,
            polls,
        })
    }

    /// Read the target before submission and decide how inclusion will show
    async fn expectation(
        &self,
        run: &Orchestration,
        tx: &ClientTransaction,
        cancel: &CancellationToken,
    ) -> Result<Expectation, RpcError> {
        let last = tx.instructions().last().ok_or(TransactionError::Empty)?;
        let target = match last.action() {
            Action::Spawn { .. } => last.derive_id(""),
            Action::Invoke { .. } | Action::Delete { .. } => *last.instance_id(),
        };

        let baseline = cancellable(cancel, run.stage, self.get_proof(&target)).await?;
        let effect = match last.action() {
            Action::Spawn { .. } => Effect::Present,
            Action::Invoke { .. } => Effect::NewerThan(baseline.version()),
            Action::Delete { .. } => Effect::Absent,
        };

        let counters = if effect.satisfied_by(&baseline) {
            tracing::debug!(
                "tx {}: {} already {:?} at height {}, waiting on signer counters",
                run.tx,
                target,
                effect,
                baseline.height
            );
            Some(tx.signer_counters())
        } else {
            None
        };

        Ok(Expectation {
            target,
            effect,
            baseline_height: baseline.height,
            counters,
        })
    }

    /// Poll until the transaction is seen to have taken effect; returns the
    /// height it was observed at and the number of checks
    async fn await_inclusion(
        &self,
        run: &Orchestration,
        expectation: &Expectation,
        status: &TxStatus,
        cancel: &CancellationToken,
    ) -> Result<(u64, u32), RpcError> {
        let started = Instant::now();
        let deadline = started + self.config.max_wait();
        let timed_out = || RpcError::InclusionTimeout {
            waited_ms: started.elapsed().as_millis() as u64,
        };
        let (mut check_now, min_height) = match status {
            TxStatus::Included { height } => (true, *height),
            _ => (false, 0),
        };
        let mut polls = 0u32;

        loop {
            if !check_now {
                if Instant::now() >= deadline {
                    return Err(timed_out());
                }
                let wake = (Instant::now() + self.config.poll_interval()).min(deadline);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RpcError::Cancelled { stage: run.stage }),
                    _ = tokio::time::sleep_until(wake) => {}
                }
            }
            check_now = false;
            polls += 1;

            let check = cancellable(cancel, run.stage, self.check_inclusion(expectation));
            let observed = match tokio::time::timeout_at(deadline, check).await {
                Ok(result) => result?,
                Err(_) => return Err(timed_out()),
            };
            if let Some(height) = observed.filter(|height| *height >= min_height) {
                tracing::debug!("tx {}: observed at height {} after {} polls", run.tx, height, polls);
                return Ok((height, polls));
            }
        }
    }

    /// Height at which the transaction shows, if it does yet
    async fn check_inclusion(&self, expectation: &Expectation) -> Result<Option<u64>, RpcError> {
        let Some(required) = &expectation.counters else {
            let state = self.get_proof(&expectation.target).await?;
            return Ok(expectation.observed_in(&state).then_some(state.height));
        };

        let signers: Vec<PublicKey> = required.keys().copied().collect();
        let (latest, height) = self.fetch_signer_counters(&signers).await?;
        let reached = required
            .iter()
            .all(|(signer, counter)| latest.get(signer).is_some_and(|latest| latest >= counter));
        Ok((reached && height > expectation.baseline_height).then_some(height))
    }

    async fn fetch_signer_counters(&self, signers: &[PublicKey]) -> Result<(HashMap<PublicKey, u64>, u64), RpcError> {
        let request = GetSignerCountersRequest {
            version: self.config.protocol_version,
            chain_id: *self.chain_id(),
            signer_ids: signers.to_vec(),
        };
        let response = self.conn.send(&request).await.map_err(RpcError::from_connection)?;
        let counters = signers.iter().copied().zip(response.counters).collect();
        Ok((counters, response.height))
    }

    async fn fetch_proof(&self, key: &InstanceId, height: Option<u64>) -> Result<Proof, RpcError> {
        let request = GetProofRequest {
            version: self.config.protocol_version,
            chain_id: *self.chain_id(),
            key: *key,
            height,
        };
        let response = self.conn.send(&request).await.map_err(RpcError::from_connection)?;
        Ok(response.proof)
    }

    fn verify_at(&self, key: &InstanceId, proof: &Proof, height: u64) -> Result<VerifiedState, RpcError> {
        let state = self.verifier.verify(key, proof)?;
        if state.height < height {
            return Err(crate::error::VerificationError::StaleState {
                required: height,
                found: state.height,
            }
            .into());
        }
        Ok(state)
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    stage: Stage,
    fut: impl Future<Output = Result<T, RpcError>>,
) -> Result<T, RpcError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RpcError::Cancelled { stage }),
        result = fut => result,
    }
}
