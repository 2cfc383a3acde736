//! Storage key derivation.

/// Storage keys used by outbound queues
pub struct StorageKeys;

impl StorageKeys {
    /// Infix shared by every queue record key
    pub const QUEUE_INFIX: &'static str = "OutQueue";

    /// Suffix for queues that submit batches via POST
    pub const BATCH_SUFFIX: &'static str = "post2";

    /// Suffix for queues that submit single events via GET
    pub const BEACON_SUFFIX: &'static str = "get";

    /// Key for the queue record of one `{product, namespace, mode}` identity,
    /// e.g. `snowplowOutQueue_sp1_post2`.
    pub fn queue(product: &str, namespace: &str, mode_suffix: &str) -> String {
        format!(
            "{}{}_{}_{}",
            product,
            Self::QUEUE_INFIX,
            namespace,
            mode_suffix
        )
    }

    /// Prefix shared by all queue records of one product.
    pub fn queue_prefix(product: &str) -> String {
        format!("{}{}_", product, Self::QUEUE_INFIX)
    }
}
