//! Transactional send.
//!
//! A transaction carries exactly one half message. The broker keeps the half
//! message invisible until the producer commits it, discards it on rollback,
//! and asks the producer's transaction checker about it if neither happens.
//!
//! ```text
//! Begun ──send──▶ Sent ──confirm=true──▶ Committed
//!   │               │
//!   │               ├──confirm=false──▶ RolledBack
//!   │               │
//!   └──send failed──┴──confirm panicked──▶ Abandoned
//! ```

use crate::broker::{BrokerProducer, BrokerTransaction};
use crate::diagnostics::Diagnostics;
use crate::envelope::OutboundMessage;
use crate::error::{BrokerError, FacadeError, ValidationError};
use crate::message::{Message, SendReceipt};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "transaction_tests.rs"]
mod tests;

/// Lifecycle state of a [`Transaction`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Begun,
    /// The half message has been accepted by the broker
    Sent,
    Committed,
    RolledBack,
    /// Neither commit nor rollback will be issued by this handle
    Abandoned,
}

impl TransactionState {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Begun => "begun",
            Self::Sent => "sent",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
            Self::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}

/// Final result of [`Producer::send_transaction`](crate::Producer::send_transaction)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// The message was committed and is now visible to consumers
    Committed(Vec<SendReceipt>),
    /// The message was rolled back and will never be delivered
    RolledBack,
}

/// Handle for one open transaction
///
/// Commit and rollback consume the handle, so a transaction can be resolved
/// at most once. Dropping an unresolved handle leaves the decision to the
/// broker's transaction checker.
pub struct Transaction {
    inner: Box<dyn BrokerTransaction>,
    state: TransactionState,
    diagnostics: Diagnostics,
}

impl Transaction {
    pub(crate) async fn begin(
        client: &dyn BrokerProducer,
        diagnostics: Diagnostics,
    ) -> Result<Self, FacadeError> {
        let inner = client.begin_transaction().await.map_err(|e| {
            diagnostics.emit(format_args!("begin transaction failed: {}", e));
            FacadeError::from(e)
        })?;
        debug!(transaction_id = %inner.transaction_id(), "Transaction begun");

        Ok(Self {
            inner,
            state: TransactionState::Begun,
            diagnostics,
        })
    }

    /// Broker-assigned transaction id
    pub fn id(&self) -> &str {
        self.inner.transaction_id()
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Send the transaction's half message
    pub(crate) async fn send(
        &mut self,
        client: &dyn BrokerProducer,
        envelope: &OutboundMessage,
    ) -> Result<Vec<SendReceipt>, FacadeError> {
        if self.state != TransactionState::Begun {
            return Err(FacadeError::Validation(ValidationError::InvalidFormat {
                field: "transaction".to_string(),
                message: format!("transaction is {}, expected begun", self.state),
            }));
        }

        match client.send_with_transaction(envelope, self.inner.as_ref()).await {
            Ok(receipts) => {
                self.state = TransactionState::Sent;
                Ok(receipts)
            }
            Err(e) => {
                self.abandon(format_args!("half message send failed: {}", e));
                Err(e.into())
            }
        }
    }

    /// Make the half message visible to consumers
    pub async fn commit(mut self) -> Result<(), FacadeError> {
        self.inner.commit().await.map_err(|e| self.resolution_failed("commit", e))?;
        self.state = TransactionState::Committed;
        info!(transaction_id = %self.id(), "Transaction committed");
        Ok(())
    }

    /// Discard the half message
    pub async fn rollback(mut self) -> Result<(), FacadeError> {
        self.inner
            .rollback()
            .await
            .map_err(|e| self.resolution_failed("rollback", e))?;
        self.state = TransactionState::RolledBack;
        info!(transaction_id = %self.id(), "Transaction rolled back");
        Ok(())
    }

    fn resolution_failed(&self, action: &str, err: BrokerError) -> FacadeError {
        self.diagnostics.emit(format_args!(
            "{} of transaction {} failed: {}",
            action,
            self.id(),
            err
        ));
        err.into()
    }

    fn abandon(&mut self, reason: fmt::Arguments<'_>) {
        self.state = TransactionState::Abandoned;
        warn!(transaction_id = %self.id(), reason = %reason, "Transaction abandoned");
        self.diagnostics.emit(format_args!(
            "transaction {} abandoned: {}",
            self.id(),
            reason
        ));
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if matches!(self.state, TransactionState::Begun | TransactionState::Sent) {
            warn!(
                transaction_id = %self.id(),
                state = %self.state,
                "Transaction dropped without commit or rollback; the broker checker will resolve it"
            );
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id())
            .field("state", &self.state)
            .finish()
    }
}

/// Run the begin, send, confirm, commit-or-rollback sequence for one message
///
/// `confirm` runs exactly once, synchronously, after the half message was
/// accepted. A panic inside `confirm` is caught and reported as
/// [`FacadeError::TransactionAbandoned`]; no commit or rollback is issued.
pub(crate) async fn send_transaction<F>(
    client: &dyn BrokerProducer,
    diagnostics: &Diagnostics,
    message: &Message,
    envelope: &OutboundMessage,
    confirm: F,
) -> Result<TransactionOutcome, FacadeError>
where
    F: FnOnce(&Message, &[SendReceipt]) -> bool,
{
    let mut transaction = Transaction::begin(client, diagnostics.clone()).await?;
    let receipts = transaction.send(client, envelope).await?;

    let decision = panic::catch_unwind(AssertUnwindSafe(|| confirm(message, &receipts)));

    match decision {
        Ok(true) => {
            transaction.commit().await?;
            Ok(TransactionOutcome::Committed(receipts))
        }
        Ok(false) => {
            transaction.rollback().await?;
            Ok(TransactionOutcome::RolledBack)
        }
        Err(payload) => {
            let reason = format!("confirm callback panicked: {}", panic_message(payload.as_ref()));
            transaction.abandon(format_args!("{}", reason));
            Err(FacadeError::TransactionAbandoned {
                transaction_id: transaction.id().to_string(),
                reason,
            })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
