//! Signal requests and deliveries.

use std::fmt;
use std::marker::PhantomData;

use cadence_core::{EncodingError, Payload, SignalArgs};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::context::WorkflowContext;
use crate::future::WorkflowError;

/// A synchronous signal as seen by workflow logic.
///
/// Dequeued from a [`SignalQueue`](crate::SignalQueue) and answered exactly
/// once with [`SignalRequest::reply`]. `R` is the reply type the external
/// caller decodes; it is independent of the workflow's own result type.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct SignalRequest<R> {
    id: Uuid,
    signal_name: String,
    args: SignalArgs,
    #[serde(skip)]
    reply_type: PhantomData<fn() -> R>,
}

impl<R> SignalRequest<R> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn signal_name(&self) -> &str {
        &self.signal_name
    }

    pub fn args(&self) -> &SignalArgs {
        &self.args
    }

    pub fn arg<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, EncodingError> {
        self.args.get(name)
    }
}

impl<R: Serialize> SignalRequest<R> {
    /// Answer the caller. A second reply fails with `AlreadyReplied`.
    pub fn reply(&self, ctx: &WorkflowContext, value: R) -> Result<(), WorkflowError> {
        ctx.reply(self, value)
    }
}

impl<R> Clone for SignalRequest<R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            signal_name: self.signal_name.clone(),
            args: self.args.clone(),
            reply_type: PhantomData,
        }
    }
}

impl<R> fmt::Debug for SignalRequest<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalRequest")
            .field("id", &self.id)
            .field("signal_name", &self.signal_name)
            .field("args", &self.args)
            .finish()
    }
}

/// A signal handed by the host to a running instance.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDelivery {
    pub signal_name: String,
    pub payload: Payload,
    /// Set for synchronous signals; the gateway entry awaiting a reply.
    pub request_id: Option<Uuid>,
}

impl SignalDelivery {
    pub fn fire_and_forget(signal_name: impl Into<String>, payload: Payload) -> Self {
        Self {
            signal_name: signal_name.into(),
            payload,
            request_id: None,
        }
    }

    pub fn synchronous(signal_name: impl Into<String>, args: &SignalArgs, request_id: Uuid) -> Result<Self, EncodingError> {
        Ok(Self {
            signal_name: signal_name.into(),
            payload: cadence_core::to_payload(args)?,
            request_id: Some(request_id),
        })
    }

    /// The value a queue listening on this signal receives.
    ///
    /// Synchronous signals arrive as an encoded [`SignalRequest`].
    pub fn queue_item(&self) -> Payload {
        match self.request_id {
            Some(id) => serde_json::json!({
                "id": id,
                "signal_name": self.signal_name,
                "args": self.payload,
            }),
            None => self.payload.clone(),
        }
    }
}
