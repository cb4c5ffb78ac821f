use alyx_storage::{Filter, SortClause};

/// A live WebSocket subscription (§3 "WebSocket subscription"). `id` is
/// client-assigned (the top-level `id` of the `subscribe` message) and
/// doubles as the `subscription_id` in every `snapshot`/`delta` reply.
pub struct Subscription {
    pub id: String,
    pub collection: String,
    pub filter: Filter,
    pub sort: Vec<SortClause>,
    pub limit: Option<u32>,
    /// Highest change-log id already considered for this subscription;
    /// advances monotonically so delta ordering per subscription is
    /// strictly increasing (§3, §5).
    pub last_seen_change_id: i64,
}
