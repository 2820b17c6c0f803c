//! AgentIdGenerator port - エージェント ID 生成の抽象化
//!
//! エージェント ID は `<role>-<ulid>` 形式。ワーカー同士の調整なしに一意になります。

use crate::domain::AgentId;
use crate::ports::Clock;
use ulid::Ulid;

/// AgentIdGenerator はワーカー起動ごとに一意な ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数スレッドから使える）
pub trait AgentIdGenerator: Send + Sync {
    fn generate(&self, role: &str) -> AgentId;
}

/// ULID ベースの生成器
///
/// Clock を使って現在時刻ベースの ULID を生成します。
/// テスト時は FixedClock で timestamp 部分を固定できます。
pub struct UlidAgentIds<C> {
    clock: C,
}

impl<C: Clock> UlidAgentIds<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> AgentIdGenerator for UlidAgentIds<C> {
    fn generate(&self, role: &str) -> AgentId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        AgentId::new(format!("{role}-{}", ulid.to_string().to_lowercase()))
    }
}
