//! Job payloads
//!
//! The engine treats job and result bodies as opaque bytes; translating
//! wire-level requests and responses into those bytes is the embedding
//! application's concern (see [`PayloadCodec`]). The only thing the
//! engine needs to know about a payload is whether it can be queued at
//! all: a payload that references resources valid only in the current
//! process (open upload handles, for instance) must be executed in
//! place instead.

/// One unit of deferred work, ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPayload {
    body: Vec<u8>,
    process_bound: bool,
}

impl JobPayload {
    /// A payload that is safe to hand to another process.
    pub fn inline(body: Vec<u8>) -> Self {
        Self {
            body,
            process_bound: false,
        }
    }

    /// A payload tied to resources of the current process. The
    /// dispatcher will refuse to queue it and signal a bypass.
    pub fn process_bound(body: Vec<u8>) -> Self {
        Self {
            body,
            process_bound: true,
        }
    }

    /// Serialized job input.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Whether this payload must stay in the submitting process.
    pub fn is_process_bound(&self) -> bool {
        self.process_bound
    }

    /// Consumes the payload, returning the body.
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

/// Boundary contract for the embedding application's request/response
/// translation. Implementations must be deterministic round-trips.
pub trait PayloadCodec: Send + Sync {
    /// Inbound request representation on the serving side.
    type Request;
    /// Outbound response representation.
    type Response;
    /// Conversion failure type.
    type Error;

    /// Serializes the current request context into a queueable payload.
    fn to_job_payload(&self, request: &Self::Request) -> Result<JobPayload, Self::Error>;

    /// Reconstructs a request context inside a worker.
    fn from_job_payload(&self, body: &[u8]) -> Result<Self::Request, Self::Error>;

    /// Serializes the outcome of executing a job.
    fn to_result_payload(
        &self,
        response: &Self::Response,
        request: &Self::Request,
    ) -> Result<Vec<u8>, Self::Error>;

    /// Reconstructs a response on the serving side.
    fn from_result_payload(&self, body: &[u8]) -> Result<Self::Response, Self::Error>;
}
