//! Session Snapshot Store
//!
//! `restore()` is the only way a snapshot turns back into an intent, and it
//! always costs one bounded round-trip to the server.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::backend::SnapshotBackend;
use super::record::SessionSnapshot;
use crate::core_types::ProductRef;
use crate::payment::api::PaymentApi;
use crate::payment::error::PaymentError;
use crate::payment::types::PaymentIntent;

pub struct SessionSnapshotStore {
    backend: Arc<dyn SnapshotBackend>,
    api: Arc<dyn PaymentApi>,
    revalidate_timeout: Duration,
}

impl SessionSnapshotStore {
    pub fn new(
        backend: Arc<dyn SnapshotBackend>,
        api: Arc<dyn PaymentApi>,
        revalidate_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            api,
            revalidate_timeout,
        }
    }

    /// Persist `snapshot`, replacing any prior record for its product reference
    pub fn save(&self, snapshot: &SessionSnapshot) -> Result<(), PaymentError> {
        self.backend.store(snapshot)?;
        debug!(product_ref = %snapshot.product_ref, token = %snapshot.token, "Snapshot saved");
        Ok(())
    }

    /// Resume a pending intent for `product_ref`
    ///
    /// Returns `Ok(None)` when there is nothing to resume: no record, TTL
    /// elapsed, or the server reports the token terminal/unknown (the record
    /// is cleared in the latter cases).
    ///
    /// # Errors
    /// A transient failure of the revalidation call (timeout, 5xx, network)
    /// fails closed with `PaymentError::Remote` and keeps the record, so a
    /// flaky network never causes a second intent to be created.
    pub async fn restore(
        &self,
        product_ref: &ProductRef,
    ) -> Result<Option<PaymentIntent>, PaymentError> {
        let Some(snapshot) = self.backend.load(product_ref)? else {
            return Ok(None);
        };

        if snapshot.is_expired(Utc::now()) {
            info!(
                product_ref = %product_ref,
                token = %snapshot.token,
                ttl_seconds = snapshot.ttl_seconds,
                "Snapshot TTL elapsed, discarding"
            );
            self.clear(product_ref)?;
            return Ok(None);
        }

        let report = match tokio::time::timeout(
            self.revalidate_timeout,
            self.api.check_status(&snapshot.token),
        )
        .await
        {
            Ok(Ok(report)) => report,
            Ok(Err(e)) if e.is_definitive() => {
                warn!(token = %snapshot.token, error = %e, "Snapshot token rejected by server, discarding");
                self.clear(product_ref)?;
                return Ok(None);
            }
            Ok(Err(e)) => {
                warn!(token = %snapshot.token, error = %e, "Snapshot revalidation failed");
                return Err(PaymentError::Remote(e.to_string()));
            }
            Err(_) => {
                warn!(
                    token = %snapshot.token,
                    timeout_ms = self.revalidate_timeout.as_millis() as u64,
                    "Snapshot revalidation timed out"
                );
                return Err(PaymentError::Remote(
                    "snapshot revalidation timed out".to_string(),
                ));
            }
        };

        if report.status.is_terminal() {
            info!(
                token = %snapshot.token,
                status = %report.status,
                "Snapshot token already terminal on server, discarding"
            );
            self.clear(product_ref)?;
            return Ok(None);
        }

        match snapshot.to_intent(report.status) {
            Some(intent) => {
                info!(token = %intent.token, status = %intent.status, "Resumed intent from snapshot");
                Ok(Some(intent))
            }
            None => {
                warn!(token = %snapshot.token, "Snapshot lacks intent details, discarding");
                self.clear(product_ref)?;
                Ok(None)
            }
        }
    }

    /// Drop the record for `product_ref`; called on terminal transitions and abandonment
    pub fn clear(&self, product_ref: &ProductRef) -> Result<(), PaymentError> {
        self.backend.remove(product_ref)?;
        debug!(product_ref = %product_ref, "Snapshot cleared");
        Ok(())
    }

    /// Raw record, without revalidation
    pub fn peek(&self, product_ref: &ProductRef) -> Result<Option<SessionSnapshot>, PaymentError> {
        Ok(self.backend.load(product_ref)?)
    }
}
