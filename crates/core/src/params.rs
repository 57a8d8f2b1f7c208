//! Out-of-band H.264 parameter-set delivery.
//!
//! Encoders such as VideoToolbox hand SPS/PPS to the host separately from
//! the frame data. The host pushes them through [`ParameterSetChannel::submit`]
//! and a single registered [`ParameterSetListener`] hears about each one.
//!
//! Delivery is synchronous: the listener runs on the submitting thread,
//! outside the channel's lock, before `submit` returns. The slices it sees
//! are only valid for the duration of the call.
//!
//! Configurations submitted while no listener is registered follow the
//! channel's [`PendingPolicy`].

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{InvalidReason, Result, RuntimeError};

/// An H.264 sequence/picture parameter-set pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSet {
    sps: Arc<[u8]>,
    pps: Arc<[u8]>,
}

impl ParameterSet {
    /// Copy and validate a pair. Both regions must be non-empty.
    pub fn new(sps: &[u8], pps: &[u8]) -> Result<Self> {
        if sps.is_empty() {
            return Err(RuntimeError::invalid(InvalidReason::EmptySps));
        }
        if pps.is_empty() {
            return Err(RuntimeError::invalid(InvalidReason::EmptyPps));
        }
        Ok(Self {
            sps: Arc::from(sps),
            pps: Arc::from(pps),
        })
    }

    pub fn sps(&self) -> &[u8] {
        &self.sps
    }

    pub fn pps(&self) -> &[u8] {
        &self.pps
    }
}

/// Host-side receiver of parameter sets.
pub trait ParameterSetListener: Send + Sync {
    /// Called once per delivered configuration. Copy anything you keep.
    fn on_parameter_sets(&self, pps: &[u8], sps: &[u8]);
}

impl<F> ParameterSetListener for F
where
    F: Fn(&[u8], &[u8]) + Send + Sync,
{
    fn on_parameter_sets(&self, pps: &[u8], sps: &[u8]) {
        self(pps, sps)
    }
}

/// What happens to a configuration submitted before any listener exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingPolicy {
    /// Keep the most recent one and deliver it once to the next listener.
    Replay,
    /// Discard it.
    Drop,
}

struct Slots {
    listener: Option<Arc<dyn ParameterSetListener>>,
    pending: Option<ParameterSet>,
    latest: Option<ParameterSet>,
}

/// Single-listener channel for [`ParameterSet`]s.
pub struct ParameterSetChannel {
    slots: RwLock<Slots>,
    policy: PendingPolicy,
}

impl ParameterSetChannel {
    pub fn new(policy: PendingPolicy) -> Self {
        Self {
            slots: RwLock::new(Slots {
                listener: None,
                pending: None,
                latest: None,
            }),
            policy,
        }
    }

    pub fn policy(&self) -> PendingPolicy {
        self.policy
    }

    /// Install `listener`, replacing any previous one.
    ///
    /// Under [`PendingPolicy::Replay`], a configuration that arrived with no
    /// listener is delivered to `listener` now, once.
    pub fn register_listener(&self, listener: Arc<dyn ParameterSetListener>) {
        let replay = {
            let mut slots = self.slots.write();
            let replaced = slots.listener.replace(listener.clone()).is_some();
            tracing::debug!(replaced, "parameter-set listener registered");
            slots.pending.take()
        };

        if let Some(params) = replay {
            tracing::debug!(
                sps_len = params.sps().len(),
                pps_len = params.pps().len(),
                "replaying pending parameter sets"
            );
            listener.on_parameter_sets(params.pps(), params.sps());
        }
    }

    /// Remove the active listener, if any.
    pub fn unregister_listener(&self) {
        if self.slots.write().listener.take().is_some() {
            tracing::debug!("parameter-set listener removed");
        }
    }

    pub fn has_listener(&self) -> bool {
        self.slots.read().listener.is_some()
    }

    /// Validate and deliver a configuration.
    ///
    /// Returns the stored [`ParameterSet`] so callers can forward it
    /// elsewhere (e.g. into a live video packetizer).
    pub fn submit(&self, pps: &[u8], sps: &[u8]) -> Result<ParameterSet> {
        let params = ParameterSet::new(sps, pps)?;

        let listener = {
            let mut slots = self.slots.write();
            slots.latest = Some(params.clone());
            match &slots.listener {
                Some(listener) => Some(listener.clone()),
                None => {
                    match self.policy {
                        PendingPolicy::Replay => {
                            tracing::debug!("no parameter-set listener, holding for replay");
                            slots.pending = Some(params.clone());
                        }
                        PendingPolicy::Drop => {
                            tracing::debug!("no parameter-set listener, dropping");
                        }
                    }
                    None
                }
            }
        };

        if let Some(listener) = listener {
            listener.on_parameter_sets(params.pps(), params.sps());
        }

        Ok(params)
    }

    /// Most recent accepted configuration, whether or not it was delivered.
    pub fn latest(&self) -> Option<ParameterSet> {
        self.slots.read().latest.clone()
    }
}

impl Default for ParameterSetChannel {
    fn default() -> Self {
        Self::new(PendingPolicy::Replay)
    }
}
