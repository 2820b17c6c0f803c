//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **HttpStore**: HTTP API 上の RemoteStore / EventStream（本番用）
//! - **InMemoryStore**: 単一プロセス内の store（テスト・dry run 用）
//! - **Retrying**: RetryPolicy を全呼び出しに適用するデコレータ

pub mod http_store;
pub mod inmem_store;
pub mod retrying;

pub use self::http_store::HttpStore;
pub use self::inmem_store::{ClaimRecord, CommitRecord, InMemoryStore, patterns_overlap};
pub use self::retrying::Retrying;
