/// Fields threaded through a single CSI RPC for structured logging and for
/// error context, so that errors and spans carry `request_name`/`pool`
/// without every call site reaching for globals (spec.md §9 redesign note
/// on nil-tolerant chains / shared mutable state).
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_name: String,
    pub cluster_id: String,
    pub pool: String,
}

impl RequestContext {
    pub fn new(
        request_name: impl Into<String>,
        cluster_id: impl Into<String>,
        pool: impl Into<String>,
    ) -> Self {
        Self {
            request_name: request_name.into(),
            cluster_id: cluster_id.into(),
            pool: pool.into(),
        }
    }
}
