use alloy_primitives::{Address, B256, U256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub token_address: Address,
    pub from_address: Address,
    pub to_address: Address,
    pub value: U256,
    pub block_hash: B256,
    pub transaction_hash: B256,
    pub log_index: u64,
}

/// Limit/offset window. A `limit` of zero means "no limit"; the offset is
/// applied either way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
}

impl Pagination {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }

    pub(crate) fn to_sql(self) -> String {
        if self.limit == 0 {
            // SQLite only accepts OFFSET after a LIMIT; -1 is unbounded.
            format!(" LIMIT -1 OFFSET {}", self.offset)
        } else {
            format!(" LIMIT {} OFFSET {}", self.limit, self.offset)
        }
    }
}

/// Conjunction of inclusion sets. An empty set matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransfersFilter {
    pub from: Vec<Address>,
    pub to: Vec<Address>,
    pub tokens: Vec<Address>,
    pub pagination: Pagination,
}

impl TransfersFilter {
    pub fn for_token(token: Address) -> Self {
        Self {
            tokens: vec![token],
            ..Self::default()
        }
    }
}

/// Outcome of one `write_batch` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub transfers_written: usize,
    pub tokens_created: usize,
    pub logs_skipped: usize,
}
