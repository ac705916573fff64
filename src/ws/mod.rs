pub mod connection;
pub mod messages;
pub mod pool;
pub mod router;

pub use pool::WsPool;
pub use router::{EventRouter, RouterSettings};

use crate::types::{Topic, TopicKind};

/// Topics subscribed at startup: account topics first, then per channel.
pub fn startup_topics(
    user_id: &str,
    channel_ids: &[String],
    follow_raid: bool,
    make_predictions: bool,
) -> Vec<Topic> {
    let mut topics = vec![Topic::user(TopicKind::CommunityPointsUser, user_id)];
    if make_predictions {
        topics.push(Topic::user(TopicKind::PredictionsUser, user_id));
    }
    for id in channel_ids {
        topics.push(Topic::channel(TopicKind::VideoPlayback, id));
        if follow_raid {
            topics.push(Topic::channel(TopicKind::Raid, id));
        }
        if make_predictions {
            topics.push(Topic::channel(TopicKind::PredictionsChannel, id));
        }
    }
    topics
}
