use std::sync::Arc;

use dashmap::DashMap;

use crate::state::channel::Channel;

// ---------------------------------------------------------------------------
// ChannelStore
// ---------------------------------------------------------------------------

/// Registry of monitored channels, owned by the service root.
///
/// Channels are registered once at startup and never removed. Each entry is
/// guarded by its own shard lock; callers mutate through `update` so a change
/// is applied as one step.
pub struct ChannelStore {
    /// channel_id → Channel
    channels: DashMap<String, Channel>,
    /// channel ids in configured priority order, highest first
    order: Vec<String>,
}

impl ChannelStore {
    pub fn new(channels: Vec<Channel>) -> Arc<Self> {
        let order = channels.iter().map(|c| c.id.clone()).collect();
        let map = DashMap::new();
        for channel in channels {
            map.insert(channel.id.clone(), channel);
        }
        Arc::new(Self { channels: map, order })
    }

    /// Snapshot of one channel.
    pub fn get(&self, channel_id: &str) -> Option<Channel> {
        self.channels.get(channel_id).map(|c| c.clone())
    }

    /// Runs `f` under the channel's lock. `f` must not call back into the store.
    pub fn update<R>(&self, channel_id: &str, f: impl FnOnce(&mut Channel) -> R) -> Option<R> {
        let mut entry = self.channels.get_mut(channel_id)?;
        Some(f(entry.value_mut()))
    }

    pub fn balance(&self, channel_id: &str) -> Option<u64> {
        self.channels.get(channel_id).map(|c| c.points_balance)
    }

    pub fn login(&self, channel_id: &str) -> Option<String> {
        self.channels.get(channel_id).map(|c| c.login.clone())
    }

    pub fn ids(&self) -> &[String] {
        &self.order
    }

    /// Snapshots of every channel in priority order.
    pub fn snapshot(&self) -> Vec<Channel> {
        self.order.iter().filter_map(|id| self.get(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn online_count(&self) -> usize {
        self.channels.iter().filter(|c| c.is_online).count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
